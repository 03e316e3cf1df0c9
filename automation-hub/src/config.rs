//! Hub configuration.

use crate::errors::HubError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an [`AutomationHub`](crate::hub::AutomationHub).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum number of executions in `running` state at once.
    pub max_concurrency: usize,
    /// How often the admission loop drains the queue, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of queued requests before enqueue is refused.
    pub queue_capacity: usize,
    /// Timeout applied to stages that do not declare one, in milliseconds.
    pub default_stage_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            poll_interval_ms: 1000,
            queue_capacity: 1000,
            default_stage_timeout_ms: 30_000,
        }
    }
}

impl HubConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, HubError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Sets the admission tick interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_default_stage_timeout_ms(mut self, timeout: u64) -> Self {
        self.default_stage_timeout_ms = timeout;
        self
    }

    /// Returns the admission tick interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Config` if any limit is zero.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.max_concurrency == 0 {
            return Err(HubError::Config("max_concurrency must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(HubError::Config("poll_interval_ms must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(HubError::Config("queue_capacity must be at least 1".into()));
        }
        if self.default_stage_timeout_ms == 0 {
            return Err(HubError::Config(
                "default_stage_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = HubConfig::new()
            .with_max_concurrency(4)
            .with_poll_interval_ms(10)
            .with_queue_capacity(8)
            .with_default_stage_timeout_ms(500);

        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.default_stage_timeout_ms, 500);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = HubConfig::from_json(r#"{"max_concurrency": 3}"#).unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.queue_capacity, 1000);
    }

    #[test]
    fn test_config_rejects_zero_concurrency() {
        let err = HubConfig::from_json(r#"{"max_concurrency": 0}"#).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }
}
