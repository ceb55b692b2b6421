//! Retry policy
//!
//! Pure attempt/delay arithmetic for the retry loop. The policy never
//! inspects circuit-breaker state; whether an *error* is worth retrying is
//! the caller's predicate on the executor.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Capped exponential backoff with bounded jitter
///
/// # Example
///
/// ```
/// use breakwater::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_base_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_secs(2));
///
/// // First retry after ~100ms, second after ~200ms, third after ~400ms...
/// // never more than 2 seconds.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first try
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Cap on the inter-attempt delay, jitter included
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 doubles the delay each retry)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) applied symmetrically to each delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with the pipeline defaults
    ///
    /// - 3 attempts total
    /// - 100 millisecond base delay
    /// - 2 second cap
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Fixed inter-attempt delay, no backoff or jitter
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: interval,
            max_delay: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the total attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
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

    /// True if another attempt fits the budget after `attempt` failed
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to sleep before running attempt number `attempt` (1-based)
    ///
    /// Zero for the first attempt. Deterministic when `jitter` is zero;
    /// otherwise jittered symmetrically but never above `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry = attempt - 1; // attempt 2 is the first retry
        let max = self.max_delay.as_secs_f64();
        let base = self.base_delay.as_secs_f64() * self.backoff_coefficient.powi(retry as i32 - 1);
        let capped = base.min(max);

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            // The cap holds even after jitter.
            (capped + offset).clamp(0.0, max)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
        assert_eq!(policy.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
        assert_eq!(policy.delay_before(2), Duration::from_millis(250));
        assert_eq!(policy.delay_before(4), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_progression() {
        let policy = RetryPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::exponential()
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(0.0);
        assert_eq!(policy.delay_before(12), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_respects_cap() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(400))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(1.0);

        for attempt in 2..10 {
            let delay = policy.delay_before(attempt);
            assert!(delay <= Duration::from_millis(500), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_jitter_stays_near_deterministic_delay() {
        let policy = RetryPolicy::exponential().with_jitter(0.1);

        // 10% jitter around 200ms.
        let delay = policy.delay_before(3);
        assert!(delay >= Duration::from_millis(180), "{delay:?}");
        assert!(delay <= Duration::from_millis(220), "{delay:?}");
    }

    #[test]
    fn test_has_attempts_remaining() {
        let policy = RetryPolicy::exponential().with_max_attempts(3);
        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
    }

    #[test]
    fn test_serialization_round_trip() {
        let policy = RetryPolicy::exponential().with_max_attempts(10);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
