//! Entity Store
//!
//! The bulk-capable backend behind the API's loaders. Every read takes a
//! slice of ids and returns whatever subset exists, in no particular order.
//! [`InMemoryStore`] is the bundled implementation: seeded demo data, an
//! optional per-call latency, injectable failures, and per-entity call
//! counters so tests can observe how often the backend was hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fanin_core::{ContextError, RequestContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ENTITIES
// ============================================================================

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub service_id: Uuid,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Triggered,
    Active,
    Closed,
}

/// Current lifecycle state of an alert, keyed by the alert id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub alert_id: i64,
    pub status: AlertStatus,
    pub last_escalation: Option<DateTime<Utc>>,
}

/// A monitored service, owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub tenant: String,
    pub name: String,
    pub escalation_policy_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// One entry in an alert's history. Many per alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertLog {
    pub id: i64,
    pub alert_id: i64,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

/// Entity kinds, for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Alert,
    AlertState,
    Service,
    EscalationPolicy,
    User,
    AlertLog,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Store failures. Cloneable so one failed bulk read can be handed to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entity store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Bulk reads over every entity the API serves.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    async fn find_many_alerts(&self, ctx: &RequestContext, ids: &[i64]) -> StoreResult<Vec<Alert>>;

    async fn find_many_alert_states(
        &self,
        ctx: &RequestContext,
        alert_ids: &[i64],
    ) -> StoreResult<Vec<AlertState>>;

    async fn find_many_services(&self, ctx: &RequestContext, ids: &[Uuid]) -> StoreResult<Vec<Service>>;

    /// Services owned by `tenant`; ids belonging to other tenants are
    /// treated as missing.
    async fn find_many_services_for_tenant(
        &self,
        ctx: &RequestContext,
        tenant: &str,
        ids: &[Uuid],
    ) -> StoreResult<Vec<Service>>;

    async fn find_many_escalation_policies(
        &self,
        ctx: &RequestContext,
        ids: &[Uuid],
    ) -> StoreResult<Vec<EscalationPolicy>>;

    async fn find_many_users(&self, ctx: &RequestContext, ids: &[Uuid]) -> StoreResult<Vec<User>>;

    /// Every log entry for any of `alert_ids`, flattened.
    async fn find_logs_for_alerts(
        &self,
        ctx: &RequestContext,
        alert_ids: &[i64],
    ) -> StoreResult<Vec<AlertLog>>;
}

pub type SharedStore = Arc<dyn EntityStore>;

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    alerts: HashMap<i64, Alert>,
    alert_states: HashMap<i64, AlertState>,
    services: HashMap<Uuid, Service>,
    escalation_policies: HashMap<Uuid, EscalationPolicy>,
    users: HashMap<Uuid, User>,
    alert_logs: Vec<AlertLog>,
}

#[derive(Debug, Default)]
struct CallCounters {
    alerts: AtomicUsize,
    alert_states: AtomicUsize,
    services: AtomicUsize,
    escalation_policies: AtomicUsize,
    users: AtomicUsize,
    alert_logs: AtomicUsize,
}

impl CallCounters {
    fn counter(&self, kind: EntityKind) -> &AtomicUsize {
        match kind {
            EntityKind::Alert => &self.alerts,
            EntityKind::AlertState => &self.alert_states,
            EntityKind::Service => &self.services,
            EntityKind::EscalationPolicy => &self.escalation_policies,
            EntityKind::User => &self.users,
            EntityKind::AlertLog => &self.alert_logs,
        }
    }
}

/// Store backed by in-process tables.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    failure: Mutex<Option<String>>,
    latency: Duration,
    calls: CallCounters,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every bulk read, bounded by the caller's context.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every subsequent read with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.lock_failure() = Some(reason.into());
    }

    /// Stop failing.
    pub fn recover(&self) {
        *self.lock_failure() = None;
    }

    /// Bulk reads issued for `kind` so far.
    pub fn calls(&self, kind: EntityKind) -> usize {
        self.calls.counter(kind).load(Ordering::Relaxed)
    }

    /// Bulk reads issued across every kind.
    pub fn total_calls(&self) -> usize {
        [
            EntityKind::Alert,
            EntityKind::AlertState,
            EntityKind::Service,
            EntityKind::EscalationPolicy,
            EntityKind::User,
            EntityKind::AlertLog,
        ]
        .into_iter()
        .map(|kind| self.calls(kind))
        .sum()
    }

    pub fn insert_alert(&self, alert: Alert) {
        self.write().alerts.insert(alert.id, alert);
    }

    pub fn insert_alert_state(&self, state: AlertState) {
        self.write().alert_states.insert(state.alert_id, state);
    }

    pub fn insert_service(&self, service: Service) {
        self.write().services.insert(service.id, service);
    }

    pub fn insert_escalation_policy(&self, policy: EscalationPolicy) {
        self.write().escalation_policies.insert(policy.id, policy);
    }

    pub fn insert_user(&self, user: User) {
        self.write().users.insert(user.id, user);
    }

    pub fn insert_alert_log(&self, log: AlertLog) {
        self.write().alert_logs.push(log);
    }

    /// Deterministic demo data: two tenants with two services each, two
    /// escalation policies, three users, twenty alerts and their logs.
    ///
    /// Alert ids are 1 through 20; every fourth alert has no log entries.
    pub fn demo() -> Self {
        let store = Self::new();
        let epoch = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();

        for n in 1..=3u128 {
            store.insert_user(User {
                id: demo_user_id(n),
                name: format!("user-{n}"),
                email: format!("user-{n}@example.com"),
            });
        }

        for n in 1..=2u128 {
            store.insert_escalation_policy(EscalationPolicy {
                id: demo_policy_id(n),
                name: format!("policy-{n}"),
                owner_id: demo_user_id(n),
            });
        }

        for n in 1..=4u128 {
            let tenant = if n <= 2 { "acme" } else { "globex" };
            store.insert_service(Service {
                id: demo_service_id(n),
                tenant: tenant.to_string(),
                name: format!("service-{n}"),
                escalation_policy_id: demo_policy_id(n % 2 + 1),
            });
        }

        let mut log_id = 0;
        for id in 1..=20i64 {
            let created_at = epoch + chrono::Duration::minutes(id);
            store.insert_alert(Alert {
                id,
                service_id: demo_service_id((id as u128 - 1) % 4 + 1),
                summary: format!("alert-{id}"),
                created_at,
            });

            let status = match id % 3 {
                0 => AlertStatus::Closed,
                1 => AlertStatus::Triggered,
                _ => AlertStatus::Active,
            };
            store.insert_alert_state(AlertState {
                alert_id: id,
                status,
                last_escalation: (status != AlertStatus::Triggered)
                    .then(|| created_at + chrono::Duration::minutes(5)),
            });

            if id % 4 == 0 {
                continue;
            }
            for event in ["triggered", "acknowledged"] {
                log_id += 1;
                store.insert_alert_log(AlertLog {
                    id: log_id,
                    alert_id: id,
                    event: event.to_string(),
                    timestamp: created_at,
                });
            }
        }

        store
    }

    async fn begin(&self, ctx: &RequestContext, kind: EntityKind) -> StoreResult<()> {
        self.calls.counter(kind).fetch_add(1, Ordering::Relaxed);
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if !self.latency.is_zero() {
            ctx.sleep(self.latency).await?;
        }
        match self.lock_failure().clone() {
            Some(reason) => Err(StoreError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_failure(&self) -> MutexGuard<'_, Option<String>> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn select<K, V>(table: &HashMap<K, V>, ids: &[K]) -> Vec<V>
where
    K: std::hash::Hash + Eq,
    V: Clone,
{
    ids.iter().filter_map(|id| table.get(id).cloned()).collect()
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn find_many_alerts(&self, ctx: &RequestContext, ids: &[i64]) -> StoreResult<Vec<Alert>> {
        self.begin(ctx, EntityKind::Alert).await?;
        Ok(select(&self.read().alerts, ids))
    }

    async fn find_many_alert_states(
        &self,
        ctx: &RequestContext,
        alert_ids: &[i64],
    ) -> StoreResult<Vec<AlertState>> {
        self.begin(ctx, EntityKind::AlertState).await?;
        Ok(select(&self.read().alert_states, alert_ids))
    }

    async fn find_many_services(&self, ctx: &RequestContext, ids: &[Uuid]) -> StoreResult<Vec<Service>> {
        self.begin(ctx, EntityKind::Service).await?;
        Ok(select(&self.read().services, ids))
    }

    async fn find_many_services_for_tenant(
        &self,
        ctx: &RequestContext,
        tenant: &str,
        ids: &[Uuid],
    ) -> StoreResult<Vec<Service>> {
        self.begin(ctx, EntityKind::Service).await?;
        let mut services = select(&self.read().services, ids);
        services.retain(|s| s.tenant == tenant);
        Ok(services)
    }

    async fn find_many_escalation_policies(
        &self,
        ctx: &RequestContext,
        ids: &[Uuid],
    ) -> StoreResult<Vec<EscalationPolicy>> {
        self.begin(ctx, EntityKind::EscalationPolicy).await?;
        Ok(select(&self.read().escalation_policies, ids))
    }

    async fn find_many_users(&self, ctx: &RequestContext, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        self.begin(ctx, EntityKind::User).await?;
        Ok(select(&self.read().users, ids))
    }

    async fn find_logs_for_alerts(
        &self,
        ctx: &RequestContext,
        alert_ids: &[i64],
    ) -> StoreResult<Vec<AlertLog>> {
        self.begin(ctx, EntityKind::AlertLog).await?;
        Ok(self
            .read()
            .alert_logs
            .iter()
            .filter(|log| alert_ids.contains(&log.alert_id))
            .cloned()
            .collect())
    }
}

/// Demo service `n` (1 through 4).
pub fn demo_service_id(n: u128) -> Uuid {
    Uuid::from_u128(0x5e_0000 + n)
}

/// Demo escalation policy `n` (1 through 2).
pub fn demo_policy_id(n: u128) -> Uuid {
    Uuid::from_u128(0xe5_0000 + n)
}

/// Demo user `n` (1 through 3).
pub fn demo_user_id(n: u128) -> Uuid {
    Uuid::from_u128(0x05_e000 + n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_data_shape() {
        let store = InMemoryStore::demo();
        let ctx = RequestContext::new();

        let alerts = store.find_many_alerts(&ctx, &[1, 2, 99]).await.unwrap();
        assert_eq!(alerts.len(), 2);

        let logs = store.find_logs_for_alerts(&ctx, &[1, 4]).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.alert_id == 1));

        assert_eq!(store.calls(EntityKind::Alert), 1);
        assert_eq!(store.calls(EntityKind::AlertLog), 1);
        assert_eq!(store.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_tenant_filter() {
        let store = InMemoryStore::demo();
        let ctx = RequestContext::new();
        let ids = [demo_service_id(1), demo_service_id(3)];

        let acme = store.find_many_services_for_tenant(&ctx, "acme", &ids).await.unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].id, demo_service_id(1));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryStore::demo();
        let ctx = RequestContext::new();

        store.fail_with("replica lag");
        let err = store.find_many_users(&ctx, &[demo_user_id(1)]).await.unwrap_err();
        assert_eq!(err, StoreError::Unavailable("replica lag".to_string()));

        store.recover();
        assert_eq!(store.find_many_users(&ctx, &[demo_user_id(1)]).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_bounded_by_context() {
        let store = InMemoryStore::demo().with_latency(Duration::from_secs(5));
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));

        let err = store.find_many_alerts(&ctx, &[1]).await.unwrap_err();
        assert_eq!(err, StoreError::Context(ContextError::DeadlineExceeded));
    }
}
