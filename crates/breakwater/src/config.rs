//! Pipeline configuration
//!
//! [`ResilienceConfig`] enumerates every knob of the pipeline in one flat
//! struct so invariants can be checked once, at executor construction,
//! instead of being scattered across option closures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// Configuration for a resilient executor
///
/// Every field is constructor-time; the executor never re-reads
/// configuration after [`build`](crate::ExecutorBuilder::build).
///
/// # Example
///
/// ```
/// use breakwater::ResilienceConfig;
/// use std::time::Duration;
///
/// let config = ResilienceConfig::default()
///     .with_failure_threshold(3)
///     .with_max_attempts(5)
///     .with_timeout(Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    /// Consecutive failures in `Closed` before the circuit trips to `Open`
    pub failure_threshold: u32,

    /// Consecutive probe successes in `HalfOpen` before the circuit closes
    pub success_threshold: u32,

    /// Cooldown in `Open` before a probe attempt is admitted
    #[serde(with = "duration_millis")]
    pub open_delay: Duration,

    /// Total attempts per call, including the first try
    pub max_attempts: u32,

    /// Backoff base delay (delay before the first retry)
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Backoff cap; no inter-attempt delay ever exceeds this
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 doubles the delay each retry)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) applied symmetrically to each delay
    pub jitter: f64,

    /// Overall deadline for one call, spanning all attempts and backoff
    /// sleeps
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Bound on concurrently running background executions
    pub max_background_executions: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_delay: Duration::from_secs(30),
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            timeout: Duration::from_secs(10),
            max_background_executions: 32,
        }
    }
}

impl ResilienceConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold that trips the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold that closes the circuit
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the cooldown before a probe is admitted from `Open`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Set the total attempt budget (including the first try)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the overall per-call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the bound on concurrently running background executions
    pub fn with_max_background_executions(mut self, max: usize) -> Self {
        self.max_background_executions = max;
        self
    }

    /// Check construction-time invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid(
                "success_threshold",
                "must be at least 1",
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "max_attempts",
                "must be at least 1 (the first try counts)",
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "base_delay",
                "must not exceed max_delay",
            ));
        }
        if self.backoff_coefficient < 1.0 {
            return Err(ConfigError::invalid(
                "backoff_coefficient",
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid("jitter", "must be within 0.0-1.0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be non-zero"));
        }
        if self.max_background_executions == 0 {
            return Err(ConfigError::invalid(
                "max_background_executions",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
