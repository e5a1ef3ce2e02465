//! FANIN API - GraphQL Layer over Request-Scoped Loaders
//!
//! Serves a read-only GraphQL schema over an entity store. Every request
//! gets its own set of batching loaders, so nested fields across many
//! parent objects collapse into one bulk store read per entity kind.

pub mod config;
pub mod error;
pub mod loaders;
pub mod routes;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use loaders::RequestLoaders;
pub use routes::{create_schema, FaninSchema};
pub use store::{EntityStore, InMemoryStore, SharedStore, StoreError};

use telemetry::{metrics_handler, observability_middleware, TelemetryConfig};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub schema: FaninSchema,
    pub store: SharedStore,
    pub config: Arc<ApiConfig>,
    pub metrics_enabled: bool,
}

impl AppState {
    pub fn new(store: SharedStore, config: ApiConfig, telemetry: &TelemetryConfig) -> Self {
        Self {
            schema: create_schema(Arc::clone(&store)),
            store,
            config: Arc::new(config),
            metrics_enabled: telemetry.metrics_enabled,
        }
    }
}

/// Build the application router.
///
/// Routes:
/// - POST /graphql, GET /graphql/playground
/// - GET /health/ping, /health/live, /health/ready
/// - GET /metrics (when metrics are enabled)
pub fn create_router(store: SharedStore, config: ApiConfig, telemetry: &TelemetryConfig) -> Router {
    let state = AppState::new(store, config, telemetry);

    let mut router = Router::new()
        .route("/graphql", post(routes::graphql_handler))
        .route("/graphql/playground", get(routes::graphiql_handler))
        .route("/health/ping", get(routes::ping))
        .route("/health/live", get(routes::liveness))
        .route("/health/ready", get(routes::readiness));

    if telemetry.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
