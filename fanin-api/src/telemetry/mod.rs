//! FANIN Telemetry - Observability Infrastructure
//!
//! Structured logging and Prometheus metrics for the API layer, including
//! per-loader batching counters.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, FaninMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, TelemetryConfig};
