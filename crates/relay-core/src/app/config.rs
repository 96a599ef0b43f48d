//! Manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::{RetryPolicy, millis};

/// Tunables for a `Manager`.
///
/// Every field has a default, so a partial JSON document is enough:
/// `{"concurrency": 4, "retry": {"base_delay_ms": 500}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Workers, i.e. the most attempts in flight at once.
    pub concurrency: usize,

    /// Attempts per request before it is marked permanently failed.
    pub max_attempts: u32,

    /// Per-attempt limit, restarted by every heartbeat.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,

    /// Keep permanently failed entries in the store for inspection and requeue.
    pub retain_failed: bool,

    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("request_timeout_ms must be greater than 0")]
    ZeroTimeout,

    #[error("retry multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("retry jitter must be within [0, 1], got {0}")]
    InvalidJitter(f64),
}

impl ManagerConfig {
    /// Two workers, five attempts, two-minute attempt timeout, failed entries kept.
    pub fn default_v1() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 5,
            request_timeout: Duration::from_secs(120),
            retain_failed: true,
            retry: RetryPolicy::default_v1(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        let multiplier = self.retry.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(multiplier));
        }
        let jitter = self.retry.jitter;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::InvalidJitter(jitter));
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}
