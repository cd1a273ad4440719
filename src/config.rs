//! Manager configuration.
//!
//! Field names follow the camelCase keys used by front-end configuration files, so a
//! `ManagerConfig` can be loaded straight from JSON. Every key except `url` is optional.
//!
//! ```
//! use lifeline::{DropStrategy, ManagerConfig};
//!
//! let config = ManagerConfig::from_json_str(
//!     r#"{ "url": "wss://metrics.example/stream", "maxQueueSize": 50, "dropStrategy": "newest" }"#,
//! )
//! .unwrap();
//! assert_eq!(config.max_queue_size, 50);
//! assert_eq!(config.drop_strategy, DropStrategy::Newest);
//! assert_eq!(config.max_reconnect_attempts, 5);
//! ```

use crate::backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::circuit_breaker::{
    CircuitBreakerConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MONITORING_PERIOD,
    DEFAULT_RESET_TIMEOUT,
};
use crate::error::ConfigError;
use crate::queue::{DropStrategy, DEFAULT_MAX_QUEUE_SIZE};
use crate::rate_limit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of failed attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default limit for a single transport open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Settings for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    pub url: String,
    /// Failed attempts (opens or abnormal closes) in one outage before giving up.
    ///
    /// Must exceed `failure_threshold` for the breaker to ever open: the attempt that reaches
    /// this limit ends the session before the breaker is consulted.
    pub max_reconnect_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub monitoring_period_ms: u64,
    pub max_queue_size: usize,
    pub drop_strategy: DropStrategy,
    /// Outbound messages allowed per rate window.
    pub max_requests: u32,
    pub window_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: millis(DEFAULT_BASE_DELAY),
            max_delay_ms: millis(DEFAULT_MAX_DELAY),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: millis(DEFAULT_RESET_TIMEOUT),
            monitoring_period_ms: millis(DEFAULT_MONITORING_PERIOD),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            drop_strategy: DropStrategy::default(),
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: millis(DEFAULT_WINDOW),
            connect_timeout_ms: millis(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl ManagerConfig {
    /// Defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field; the manager builder calls this before spawning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        let positive: [(&'static str, u64); 5] = [
            ("maxReconnectAttempts", u64::from(self.max_reconnect_attempts)),
            ("maxQueueSize", self.max_queue_size as u64),
            ("maxRequests", u64::from(self.max_requests)),
            ("windowMs", self.window_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field: *field });
        }
        self.backoff_policy()?;
        self.circuit_breaker_config()?;
        Ok(())
    }

    /// Backoff policy with the default jitter.
    pub fn backoff_policy(&self) -> Result<BackoffPolicy, ConfigError> {
        Ok(BackoffPolicy::new(self.base_delay(), self.max_delay())?)
    }

    pub fn circuit_breaker_config(&self) -> Result<CircuitBreakerConfig, ConfigError> {
        Ok(CircuitBreakerConfig::new(
            self.failure_threshold,
            self.reset_timeout(),
            self.monitoring_period(),
        )?)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
