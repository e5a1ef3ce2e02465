//! Prometheus Metrics Definitions
//!
//! HTTP request metrics plus per-loader batching counters, exposed on a
//! /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use fanin_core::FetcherStats;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<FaninMetrics>> = Lazy::new(FaninMetrics::new);

/// Container for all FANIN metrics.
#[derive(Clone)]
pub struct FaninMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Lookups requested through a loader - labels: loader
    pub loader_requests_total: CounterVec,

    /// Lookups answered from a loader's cache - labels: loader
    pub loader_cache_hits_total: CounterVec,

    /// Bulk fetches dispatched - labels: loader
    pub loader_batches_total: CounterVec,

    /// Identifiers sent in bulk fetches - labels: loader
    pub loader_dispatched_ids_total: CounterVec,

    /// Bulk fetches that failed - labels: loader
    pub loader_fetch_errors_total: CounterVec,
}

fn register_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl FaninMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "fanin_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| register_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "fanin_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_error("http_request_duration_seconds", e))?,

            loader_requests_total: register_counter_vec!(
                "fanin_loader_requests_total",
                "Lookups requested through a loader",
                &["loader"]
            )
            .map_err(|e| register_error("loader_requests_total", e))?,

            loader_cache_hits_total: register_counter_vec!(
                "fanin_loader_cache_hits_total",
                "Lookups answered from a loader's request cache",
                &["loader"]
            )
            .map_err(|e| register_error("loader_cache_hits_total", e))?,

            loader_batches_total: register_counter_vec!(
                "fanin_loader_batches_total",
                "Bulk fetches dispatched by a loader",
                &["loader"]
            )
            .map_err(|e| register_error("loader_batches_total", e))?,

            loader_dispatched_ids_total: register_counter_vec!(
                "fanin_loader_dispatched_ids_total",
                "Identifiers sent in bulk fetches",
                &["loader"]
            )
            .map_err(|e| register_error("loader_dispatched_ids_total", e))?,

            loader_fetch_errors_total: register_counter_vec!(
                "fanin_loader_fetch_errors_total",
                "Bulk fetches that returned an error",
                &["loader"]
            )
            .map_err(|e| register_error("loader_fetch_errors_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Add one request's worth of loader activity.
    pub fn record_loader(&self, loader: &str, stats: &FetcherStats) {
        let labels = [loader];
        self.loader_requests_total
            .with_label_values(&labels)
            .inc_by(stats.requests as f64);
        self.loader_cache_hits_total
            .with_label_values(&labels)
            .inc_by(stats.cache_hits as f64);
        self.loader_batches_total
            .with_label_values(&labels)
            .inc_by(stats.batches as f64);
        self.loader_dispatched_ids_total
            .with_label_values(&labels)
            .inc_by(stats.dispatched_ids as f64);
        self.loader_fetch_errors_total
            .with_label_values(&labels)
            .inc_by(stats.fetch_errors as f64);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
