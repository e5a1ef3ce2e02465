//! GraphQL API Routes
//!
//! Read-only schema over alerts and the entities they reference. Nested
//! fields resolve through the request's loaders, so a query touching many
//! alerts issues one store read per entity kind instead of one per field.
//!
//! Endpoints:
//! - POST /graphql - Execute GraphQL queries
//! - GET /graphql/playground - GraphiQL playground

use std::sync::Arc;

use async_graphql::{
    Context, EmptyMutation, EmptySubscription, Enum, ErrorExtensions, Object, Result as GqlResult,
    Schema, SimpleObject,
};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use chrono::{DateTime, Utc};
use fanin_core::{LoadError, RequestContext};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::loaders::{
    find_alert_logs, find_many_alerts, find_one_alert, find_one_alert_state,
    find_one_escalation_policy, find_one_service, find_one_service_for_tenant, find_one_user,
    RequestLoaders,
};
use crate::store::{
    Alert, AlertLog, AlertState, AlertStatus, EscalationPolicy, Service, SharedStore, StoreError,
    User,
};
use crate::telemetry::METRICS;
use crate::AppState;

// ============================================================================
// RESOLVER ENVIRONMENT
// ============================================================================

/// What every resolver needs: the store, the request's context, and the
/// request's loaders when they are enabled.
struct Env<'a> {
    store: &'a SharedStore,
    ctx: &'a RequestContext,
    loaders: Option<&'a RequestLoaders>,
}

impl<'a> Env<'a> {
    fn from_context(ctx: &Context<'a>) -> GqlResult<Self> {
        Ok(Self {
            store: ctx.data::<SharedStore>()?,
            ctx: ctx.data::<RequestContext>()?,
            loaders: ctx.data_opt::<RequestLoaders>(),
        })
    }
}

fn gql_error(err: LoadError<StoreError>) -> async_graphql::Error {
    ApiError::from(err).extend()
}

// ============================================================================
// GRAPHQL TYPES
// ============================================================================

/// GraphQL representation of AlertStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum GqlAlertStatus {
    Triggered,
    Active,
    Closed,
}

impl From<AlertStatus> for GqlAlertStatus {
    fn from(status: AlertStatus) -> Self {
        match status {
            AlertStatus::Triggered => GqlAlertStatus::Triggered,
            AlertStatus::Active => GqlAlertStatus::Active,
            AlertStatus::Closed => GqlAlertStatus::Closed,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "AlertState")]
pub struct GqlAlertState {
    pub status: GqlAlertStatus,
    pub last_escalation: Option<DateTime<Utc>>,
}

impl From<&AlertState> for GqlAlertState {
    fn from(state: &AlertState) -> Self {
        Self {
            status: state.status.into(),
            last_escalation: state.last_escalation,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "AlertLog")]
pub struct GqlAlertLog {
    pub id: i64,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&AlertLog> for GqlAlertLog {
    fn from(log: &AlertLog) -> Self {
        Self {
            id: log.id,
            event: log.event.clone(),
            timestamp: log.timestamp,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "User")]
pub struct GqlUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for GqlUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// GraphQL escalation policy object.
pub struct GqlEscalationPolicy(Arc<EscalationPolicy>);

#[Object(name = "EscalationPolicy")]
impl GqlEscalationPolicy {
    async fn id(&self) -> Uuid {
        self.0.id
    }

    async fn name(&self) -> &str {
        &self.0.name
    }

    /// The user who owns this policy.
    async fn owner(&self, ctx: &Context<'_>) -> GqlResult<Option<GqlUser>> {
        let env = Env::from_context(ctx)?;
        let user = find_one_user(env.loaders, env.store, env.ctx, self.0.owner_id)
            .await
            .map_err(gql_error)?;
        Ok(user.as_deref().map(GqlUser::from))
    }
}

/// GraphQL service object.
pub struct GqlService(Arc<Service>);

#[Object(name = "Service")]
impl GqlService {
    async fn id(&self) -> Uuid {
        self.0.id
    }

    async fn name(&self) -> &str {
        &self.0.name
    }

    async fn tenant(&self) -> &str {
        &self.0.tenant
    }

    async fn escalation_policy(&self, ctx: &Context<'_>) -> GqlResult<Option<GqlEscalationPolicy>> {
        let env = Env::from_context(ctx)?;
        let policy = find_one_escalation_policy(
            env.loaders,
            env.store,
            env.ctx,
            self.0.escalation_policy_id,
        )
        .await
        .map_err(gql_error)?;
        Ok(policy.map(GqlEscalationPolicy))
    }
}

/// GraphQL alert object.
pub struct GqlAlert(Arc<Alert>);

#[Object(name = "Alert")]
impl GqlAlert {
    async fn id(&self) -> i64 {
        self.0.id
    }

    async fn summary(&self) -> &str {
        &self.0.summary
    }

    async fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    /// The service that raised this alert.
    async fn service(&self, ctx: &Context<'_>) -> GqlResult<Option<GqlService>> {
        let env = Env::from_context(ctx)?;
        let service = find_one_service(env.loaders, env.store, env.ctx, self.0.service_id)
            .await
            .map_err(gql_error)?;
        Ok(service.map(GqlService))
    }

    async fn state(&self, ctx: &Context<'_>) -> GqlResult<Option<GqlAlertState>> {
        let env = Env::from_context(ctx)?;
        let state = find_one_alert_state(env.loaders, env.store, env.ctx, self.0.id)
            .await
            .map_err(gql_error)?;
        Ok(state.as_deref().map(GqlAlertState::from))
    }

    /// History entries, oldest first as stored.
    async fn logs(&self, ctx: &Context<'_>) -> GqlResult<Vec<GqlAlertLog>> {
        let env = Env::from_context(ctx)?;
        let logs = find_alert_logs(env.loaders, env.store, env.ctx, self.0.id)
            .await
            .map_err(gql_error)?;
        Ok(logs.iter().map(GqlAlertLog::from).collect())
    }
}

// ============================================================================
// QUERY ROOT
// ============================================================================

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Get an alert by ID.
    async fn alert(&self, ctx: &Context<'_>, id: i64) -> GqlResult<Option<GqlAlert>> {
        let env = Env::from_context(ctx)?;
        let alert = find_one_alert(env.loaders, env.store, env.ctx, id)
            .await
            .map_err(gql_error)?;
        Ok(alert.map(GqlAlert))
    }

    /// Get several alerts by ID. Unknown ids are skipped.
    async fn alerts(&self, ctx: &Context<'_>, ids: Vec<i64>) -> GqlResult<Vec<GqlAlert>> {
        let env = Env::from_context(ctx)?;
        let mut alerts = Vec::with_capacity(ids.len());
        for outcome in find_many_alerts(env.loaders, env.store, env.ctx, &ids).await {
            if let Some(alert) = outcome.map_err(gql_error)? {
                alerts.push(GqlAlert(alert));
            }
        }
        Ok(alerts)
    }

    /// Services owned by `tenant`. Ids owned by other tenants are skipped.
    async fn services_for_tenant(
        &self,
        ctx: &Context<'_>,
        tenant: String,
        ids: Vec<Uuid>,
    ) -> GqlResult<Vec<GqlService>> {
        let env = Env::from_context(ctx)?;
        let lookups = ids
            .iter()
            .map(|&id| find_one_service_for_tenant(env.loaders, env.store, env.ctx, &tenant, id));
        let mut services = Vec::with_capacity(ids.len());
        for outcome in futures_util::future::join_all(lookups).await {
            if let Some(service) = outcome.map_err(gql_error)? {
                services.push(GqlService(service));
            }
        }
        Ok(services)
    }
}

// ============================================================================
// SCHEMA & HANDLERS
// ============================================================================

/// The GraphQL schema type.
pub type FaninSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// Create the GraphQL schema.
pub fn create_schema(store: SharedStore) -> FaninSchema {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(store)
        .finish()
}

/// Handler for GraphQL requests.
///
/// Each request gets its own context, bounded by the configured timeout,
/// and (unless disabled) its own loader set. The loaders are drained before
/// the response is returned.
pub async fn graphql_handler(
    State(state): State<AppState>,
    req: GraphQLRequest,
) -> ApiResult<GraphQLResponse> {
    let ctx = RequestContext::with_timeout(state.config.request_timeout);
    let mut request = req.into_inner().data(ctx.clone());

    let loaders = if state.config.loaders_enabled {
        let loaders = RequestLoaders::new(ctx.clone(), Arc::clone(&state.store), &state.config.loader)?;
        request = request.data(loaders.clone());
        Some(loaders)
    } else {
        None
    };

    let span = tracing::debug_span!("graphql", request_id = %ctx.request_id());
    let response = state.schema.execute(request).instrument(span).await;

    if let Some(loaders) = loaders {
        ctx.cancel();
        loaders.close().await;
        export_loader_stats(&state, &loaders);
    }

    Ok(response.into())
}

fn export_loader_stats(state: &AppState, loaders: &RequestLoaders) {
    for (name, stats) in loaders.stats() {
        if stats.requests == 0 {
            continue;
        }
        tracing::debug!(
            loader = name,
            requests = stats.requests,
            cache_hits = stats.cache_hits,
            batches = stats.batches,
            mean_batch_size = stats.mean_batch_size(),
            "Loader activity"
        );
        if state.metrics_enabled {
            if let Ok(metrics) = METRICS.as_ref() {
                metrics.record_loader(name, &stats);
            }
        }
    }
}

/// Handler for GraphiQL playground.
pub async fn graphiql_handler() -> impl IntoResponse {
    Html(
        async_graphql::http::GraphiQLSource::build()
            .endpoint("/graphql")
            .finish(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_gql_alert_status_conversion() {
        assert_eq!(GqlAlertStatus::from(AlertStatus::Active), GqlAlertStatus::Active);
        assert_eq!(GqlAlertStatus::from(AlertStatus::Closed), GqlAlertStatus::Closed);
    }

    #[test]
    fn test_schema_sdl_exposes_nested_fields() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let sdl = create_schema(store).sdl();
        assert!(sdl.contains("servicesForTenant"));
        assert!(sdl.contains("escalationPolicy"));
        assert!(sdl.contains("lastEscalation"));
    }

    #[tokio::test]
    async fn test_missing_request_context_is_an_error() {
        let store: SharedStore = Arc::new(InMemoryStore::demo());
        let schema = create_schema(store);

        let response = schema.execute("{ alert(id: 1) { id } }").await;
        assert_eq!(response.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_executes_without_loaders() {
        let store: SharedStore = Arc::new(InMemoryStore::demo());
        let schema = create_schema(store);

        let request = async_graphql::Request::new("{ alert(id: 2) { summary service { name } } }")
            .data(RequestContext::new());
        let response = schema.execute(request).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let json = response.data.into_json().unwrap();
        assert_eq!(json["alert"]["summary"], "alert-2");
        assert_eq!(json["alert"]["service"]["name"], "service-2");
    }
}
