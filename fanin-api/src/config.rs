//! API Configuration Module
//!
//! Bind address, per-request timeout, and the batching knobs handed to every
//! request's loaders. Configuration is loaded from environment variables
//! with sensible defaults for development.

use std::net::SocketAddr;
use std::time::Duration;

use fanin_core::LoaderConfig;

use crate::error::{ApiError, ApiResult};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Server
    // ========================================================================
    /// Host to bind.
    pub bind_host: String,

    /// Port as configured, validated by [`ApiConfig::socket_addr`].
    pub port: String,

    /// Deadline applied to every GraphQL request's context.
    pub request_timeout: Duration,

    // ========================================================================
    // Loaders
    // ========================================================================
    /// Batching config shared by all loaders of a request.
    pub loader: LoaderConfig,

    /// When false, resolvers go straight to the store one id at a time.
    pub loaders_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: "3000".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            loader: LoaderConfig::default(),
            loaders_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FANIN_API_BIND`: Host to bind (default: 0.0.0.0)
    /// - `PORT` or `FANIN_API_PORT`: Port to bind (default: 3000)
    /// - `FANIN_REQUEST_TIMEOUT_MS`: Per-request deadline (default: 30000)
    /// - `FANIN_LOADERS_ENABLED`: "true" or "false" (default: true)
    /// - `FANIN_MAX_BATCH`, `FANIN_DELAY_MS`: see [`LoaderConfig::from_env`]
    pub fn from_env() -> Self {
        let bind_host = std::env::var("FANIN_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("FANIN_API_PORT").ok())
            .unwrap_or_else(|| "3000".to_string());

        let request_timeout = std::env::var("FANIN_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let loaders_enabled = std::env::var("FANIN_LOADERS_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            bind_host,
            port,
            request_timeout,
            loader: LoaderConfig::from_env(),
            loaders_enabled,
        }
    }

    /// Set the loader config.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Enable or disable per-request loaders.
    pub fn with_loaders_enabled(mut self, enabled: bool) -> Self {
        self.loaders_enabled = enabled;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve the address to listen on.
    pub fn socket_addr(&self) -> ApiResult<SocketAddr> {
        let port = self
            .port
            .parse::<u16>()
            .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", self.port)))?;

        let addr = format!("{}:{}", self.bind_host, port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }
}
