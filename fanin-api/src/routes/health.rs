//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Entity store reachability check

use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use fanin_core::RequestContext;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Budget for the readiness probe's store read.
const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentHealth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        store: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check (empty bulk read against the store)
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = RequestContext::with_timeout(READINESS_TIMEOUT);
    let start = Instant::now();
    let probe = state.store.find_many_users(&ctx, &[]).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let store = match probe {
        Ok(_) => ComponentHealth {
            status: HealthStatus::Healthy,
            latency_ms,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            ComponentHealth {
                status: HealthStatus::Unhealthy,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    };

    let status_code = match store.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let response = HealthResponse {
        status: store.status,
        message: None,
        store: Some(store),
    };
    (status_code, Json(response))
}
