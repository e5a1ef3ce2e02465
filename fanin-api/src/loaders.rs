//! Per-request loader set.
//!
//! One [`RequestLoaders`] is built when a GraphQL request arrives and dropped
//! when it completes. Every loader is scoped to the request's context, so
//! batching and caching never cross request boundaries.

use std::sync::Arc;

use fanin_core::{
    AggregateFetcher, ConfigError, Fetcher, FetcherBuilder, FetcherStats, IdExtractor, LoadError,
    LoadResult, LoaderConfig, ParamRegistry, RequestContext,
};
use futures_util::future::join_all;
use uuid::Uuid;

use crate::store::{
    Alert, AlertLog, AlertState, EscalationPolicy, Service, SharedStore, StoreError, User,
};

type Loader<K, V> = Fetcher<K, (), V, StoreError>;

/// The loaders available to resolvers during one request.
#[derive(Clone)]
pub struct RequestLoaders {
    ctx: RequestContext,
    pub alerts: Loader<i64, Alert>,
    pub alert_states: Loader<i64, AlertState>,
    pub services: Loader<Uuid, Service>,
    pub escalation_policies: Loader<Uuid, EscalationPolicy>,
    pub users: Loader<Uuid, User>,
    /// Log entries grouped by alert id.
    pub alert_logs: AggregateFetcher<i64, (), AlertLog, StoreError>,
    /// Services keyed by tenant, one batching fetcher per tenant.
    pub tenant_services: ParamRegistry<Uuid, String, Service, StoreError>,
}

impl RequestLoaders {
    /// Build every loader over `store`, scoped to `ctx`.
    pub fn new(ctx: RequestContext, store: SharedStore, config: &LoaderConfig) -> Result<Self, ConfigError> {
        let alerts = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::from_fn(|a: &Alert| a.id))
                .name("alerts")
                .config(config.clone())
                .build(ctx.clone(), move |ctx: RequestContext, _: (), ids: Vec<i64>| {
                    let store = Arc::clone(&store);
                    async move { store.find_many_alerts(&ctx, &ids).await }
                })?
        };

        let alert_states = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::by_field("alert_id"))
                .name("alert_states")
                .config(config.clone())
                .build(ctx.clone(), move |ctx: RequestContext, _: (), ids: Vec<i64>| {
                    let store = Arc::clone(&store);
                    async move { store.find_many_alert_states(&ctx, &ids).await }
                })?
        };

        let services = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::by_default_field())
                .name("services")
                .config(config.clone())
                .build(ctx.clone(), move |ctx: RequestContext, _: (), ids: Vec<Uuid>| {
                    let store = Arc::clone(&store);
                    async move { store.find_many_services(&ctx, &ids).await }
                })?
        };

        let escalation_policies = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::from_fn(|p: &EscalationPolicy| p.id))
                .name("escalation_policies")
                .config(config.clone())
                .build(ctx.clone(), move |ctx: RequestContext, _: (), ids: Vec<Uuid>| {
                    let store = Arc::clone(&store);
                    async move { store.find_many_escalation_policies(&ctx, &ids).await }
                })?
        };

        let users = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::by_default_field())
                .name("users")
                .config(config.clone())
                .build(ctx.clone(), move |ctx: RequestContext, _: (), ids: Vec<Uuid>| {
                    let store = Arc::clone(&store);
                    async move { store.find_many_users(&ctx, &ids).await }
                })?
        };

        let alert_logs = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::from_fn(|l: &AlertLog| l.alert_id))
                .name("alert_logs")
                .config(config.clone())
                .build_aggregate(ctx.clone(), move |ctx: RequestContext, _: (), ids: Vec<i64>| {
                    let store = Arc::clone(&store);
                    async move { store.find_logs_for_alerts(&ctx, &ids).await }
                })?
        };

        let tenant_services = {
            let store = Arc::clone(&store);
            FetcherBuilder::new(IdExtractor::from_fn(|s: &Service| s.id))
                .name("tenant_services")
                .config(config.clone())
                .build_registry(ctx.clone(), move |ctx: RequestContext, tenant: String, ids: Vec<Uuid>| {
                    let store = Arc::clone(&store);
                    async move { store.find_many_services_for_tenant(&ctx, &tenant, &ids).await }
                })?
        };

        Ok(Self {
            ctx,
            alerts,
            alert_states,
            services,
            escalation_policies,
            users,
            alert_logs,
            tenant_services,
        })
    }

    /// The request context every loader is scoped to.
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Wait for every outstanding dispatch to finish.
    pub async fn close(&self) {
        tokio::join!(
            self.alerts.close(),
            self.alert_states.close(),
            self.services.close(),
            self.escalation_policies.close(),
            self.users.close(),
            self.alert_logs.close(),
            self.tenant_services.close(),
        );
    }

    /// Activity per loader, by loader name.
    pub fn stats(&self) -> Vec<(&'static str, FetcherStats)> {
        vec![
            ("alerts", self.alerts.stats()),
            ("alert_states", self.alert_states.stats()),
            ("services", self.services.stats()),
            ("escalation_policies", self.escalation_policies.stats()),
            ("users", self.users.stats()),
            ("alert_logs", self.alert_logs.stats()),
            ("tenant_services", self.tenant_services.stats()),
        ]
    }
}

// ============================================================================
// LOOKUP HELPERS
// ============================================================================

// Each helper goes through the loader when one is present and otherwise
// reads the single id straight from the store.

fn first_match<V>(values: Vec<V>, matches: impl Fn(&V) -> bool) -> Option<Arc<V>> {
    values.into_iter().find(|v| matches(v)).map(Arc::new)
}

pub async fn find_one_alert(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    id: i64,
) -> LoadResult<Option<Arc<Alert>>, StoreError> {
    match loaders {
        Some(l) => l.alerts.fetch_one(ctx, id).await,
        None => {
            let found = store.find_many_alerts(ctx, &[id]).await.map_err(LoadError::Fetch)?;
            Ok(first_match(found, |a| a.id == id))
        }
    }
}

/// Several alerts, outcomes in input order.
pub async fn find_many_alerts(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    ids: &[i64],
) -> Vec<LoadResult<Option<Arc<Alert>>, StoreError>> {
    match loaders {
        Some(l) => l.alerts.fetch_many(ctx, ids.iter().copied()).await,
        None => join_all(ids.iter().map(|&id| find_one_alert(None, store, ctx, id))).await,
    }
}

pub async fn find_one_alert_state(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    alert_id: i64,
) -> LoadResult<Option<Arc<AlertState>>, StoreError> {
    match loaders {
        Some(l) => l.alert_states.fetch_one(ctx, alert_id).await,
        None => {
            let found = store
                .find_many_alert_states(ctx, &[alert_id])
                .await
                .map_err(LoadError::Fetch)?;
            Ok(first_match(found, |s| s.alert_id == alert_id))
        }
    }
}

pub async fn find_one_service(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    id: Uuid,
) -> LoadResult<Option<Arc<Service>>, StoreError> {
    match loaders {
        Some(l) => l.services.fetch_one(ctx, id).await,
        None => {
            let found = store.find_many_services(ctx, &[id]).await.map_err(LoadError::Fetch)?;
            Ok(first_match(found, |s| s.id == id))
        }
    }
}

pub async fn find_one_service_for_tenant(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    tenant: &str,
    id: Uuid,
) -> LoadResult<Option<Arc<Service>>, StoreError> {
    match loaders {
        Some(l) => l.tenant_services.fetch_one_param(ctx, id, tenant.to_string()).await,
        None => {
            let found = store
                .find_many_services_for_tenant(ctx, tenant, &[id])
                .await
                .map_err(LoadError::Fetch)?;
            Ok(first_match(found, |s| s.id == id))
        }
    }
}

pub async fn find_one_escalation_policy(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    id: Uuid,
) -> LoadResult<Option<Arc<EscalationPolicy>>, StoreError> {
    match loaders {
        Some(l) => l.escalation_policies.fetch_one(ctx, id).await,
        None => {
            let found = store
                .find_many_escalation_policies(ctx, &[id])
                .await
                .map_err(LoadError::Fetch)?;
            Ok(first_match(found, |p| p.id == id))
        }
    }
}

pub async fn find_one_user(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    id: Uuid,
) -> LoadResult<Option<Arc<User>>, StoreError> {
    match loaders {
        Some(l) => l.users.fetch_one(ctx, id).await,
        None => {
            let found = store.find_many_users(ctx, &[id]).await.map_err(LoadError::Fetch)?;
            Ok(first_match(found, |u| u.id == id))
        }
    }
}

/// All log entries for one alert; empty when it has none.
pub async fn find_alert_logs(
    loaders: Option<&RequestLoaders>,
    store: &SharedStore,
    ctx: &RequestContext,
    alert_id: i64,
) -> LoadResult<Arc<[AlertLog]>, StoreError> {
    match loaders {
        Some(l) => l.alert_logs.fetch_aggregate(ctx, alert_id).await,
        None => {
            let logs = store
                .find_logs_for_alerts(ctx, &[alert_id])
                .await
                .map_err(LoadError::Fetch)?;
            Ok(Arc::from(logs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{demo_service_id, EntityKind, InMemoryStore};
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryStore>, SharedStore, RequestLoaders) {
        let store = Arc::new(InMemoryStore::demo());
        let shared: SharedStore = store.clone();
        let config = LoaderConfig::new().with_delay(Duration::from_millis(5));
        let loaders = RequestLoaders::new(RequestContext::new(), shared.clone(), &config).unwrap();
        (store, shared, loaders)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_read() {
        let (store, shared, loaders) = setup();
        let ctx = loaders.context().clone();

        let found = join_all((1..=10).map(|id| find_one_alert(Some(&loaders), &shared, &ctx, id))).await;
        assert!(found.iter().all(|f| matches!(f, Ok(Some(_)))));
        assert_eq!(store.calls(EntityKind::Alert), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_reads_per_id() {
        let (store, shared, _) = setup();
        let ctx = RequestContext::new();

        let found = join_all((1..=3).map(|id| find_one_alert(None, &shared, &ctx, id))).await;
        assert!(found.iter().all(|f| matches!(f, Ok(Some(_)))));
        assert_eq!(store.calls(EntityKind::Alert), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_logs_grouped() {
        let (store, shared, loaders) = setup();
        let ctx = loaders.context().clone();

        let (with_logs, without) = tokio::join!(
            find_alert_logs(Some(&loaders), &shared, &ctx, 1),
            find_alert_logs(Some(&loaders), &shared, &ctx, 4),
        );
        assert_eq!(with_logs.unwrap().len(), 2);
        assert!(without.unwrap().is_empty());
        assert_eq!(store.calls(EntityKind::AlertLog), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenant_services_isolated() {
        let (store, shared, loaders) = setup();
        let ctx = loaders.context().clone();
        let id = demo_service_id(1);

        let (acme, globex) = tokio::join!(
            find_one_service_for_tenant(Some(&loaders), &shared, &ctx, "acme", id),
            find_one_service_for_tenant(Some(&loaders), &shared, &ctx, "globex", id),
        );
        assert!(acme.unwrap().is_some());
        assert!(globex.unwrap().is_none());
        assert_eq!(store.calls(EntityKind::Service), 2);
        assert_eq!(loaders.tenant_services.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_after_close() {
        let (_, shared, loaders) = setup();
        let ctx = loaders.context().clone();

        let _ = find_one_user(Some(&loaders), &shared, &ctx, crate::store::demo_user_id(1)).await;
        loaders.close().await;

        let stats: std::collections::HashMap<_, _> = loaders.stats().into_iter().collect();
        assert_eq!(stats["users"].batches, 1);
        assert_eq!(stats["alerts"].requests, 0);
    }
}
