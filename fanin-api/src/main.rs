//! FANIN API Server Entry Point
//!
//! Bootstraps telemetry and configuration, seeds the in-memory entity
//! store, and starts the Axum HTTP server.

use std::sync::Arc;

use fanin_api::telemetry::{init_tracing, TelemetryConfig};
use fanin_api::{create_router, ApiConfig, ApiError, ApiResult, InMemoryStore, SharedStore};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env();
    api_config.loader.validate()?;
    let addr = api_config.socket_addr()?;

    tracing::info!(
        max_batch = api_config.loader.max_batch,
        delay_ms = api_config.loader.delay.as_millis() as u64,
        loaders_enabled = api_config.loaders_enabled,
        "Loader configuration"
    );

    let store: SharedStore = Arc::new(InMemoryStore::demo());
    let app = create_router(store, api_config, &telemetry_config);

    tracing::info!(%addr, "Starting FANIN API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
