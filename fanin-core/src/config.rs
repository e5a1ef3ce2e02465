//! Loader configuration.
//!
//! Batching knobs are fixed at construction time. Defaults are tuned so a
//! batch closes well within one backend round trip: long enough to capture
//! resolver fan-out from the same request, short enough not to be felt.

use std::time::Duration;

use crate::error::ConfigError;

/// Default maximum number of identifiers per bulk fetch.
pub const DEFAULT_MAX_BATCH: usize = 100;

/// Default delay window before an open batch is dispatched.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1);

/// Batching configuration for a [`Fetcher`](crate::Fetcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Identifiers per bulk call before the batch is dispatched early.
    pub max_batch: usize,
    /// Maximum time a batch stays open waiting for more callers.
    pub delay: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
            delay: DEFAULT_DELAY,
        }
    }
}

impl LoaderConfig {
    /// Create a new loader config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a LoaderConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FANIN_MAX_BATCH`: identifiers per bulk call (default: 100)
    /// - `FANIN_DELAY_MS`: delay window in milliseconds (default: 1)
    ///
    /// Unset or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let max_batch = std::env::var("FANIN_MAX_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BATCH);

        let delay = std::env::var("FANIN_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DELAY);

        Self { max_batch, delay }
    }

    /// Set the maximum batch size.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Set the delay window.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Check that the configuration can drive a fetcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_batch".to_string(),
                value: self.max_batch.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.max_batch, 100);
        assert_eq!(config.delay, Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = LoaderConfig::new()
            .with_max_batch(10)
            .with_delay(Duration::from_millis(5));

        assert_eq!(config.max_batch, 10);
        assert_eq!(config.delay, Duration::from_millis(5));
    }

    #[test]
    fn test_zero_max_batch_rejected() {
        let err = LoaderConfig::new().with_max_batch(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_batch"));
    }

    #[test]
    fn test_from_env() {
        let _batch = EnvVarGuard::set("FANIN_MAX_BATCH", Some("25"));
        let _delay = EnvVarGuard::set("FANIN_DELAY_MS", Some("garbage"));

        let config = LoaderConfig::from_env();
        assert_eq!(config.max_batch, 25);
        assert_eq!(config.delay, DEFAULT_DELAY);
    }
}
