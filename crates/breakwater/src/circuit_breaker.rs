//! Circuit breaker
//!
//! Protects a failing downstream dependency by failing fast once consecutive
//! failures cross a threshold, then probing for recovery after a cooldown.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  failure_threshold   ┌─────────┐     open_delay      ┌──────────┐
//! │ Closed  │ ───────────────────► │  Open   │ ──────────────────► │ HalfOpen │
//! └─────────┘                      └─────────┘                     └──────────┘
//!      ▲                                ▲                               │
//!      │        success_threshold       │        any probe failure      │
//!      └────────────────────────────────┴───────────────────────────────┘
//! ```
//!
//! Admission is permit-based: [`CircuitBreaker::try_acquire`] hands out a
//! [`CircuitPermit`] that the holder resolves with the attempt's outcome.
//! While `HalfOpen`, at most one permit (the probe) is out at a time; a
//! permit dropped unresolved releases the probe slot without recording an
//! outcome, so an attempt abandoned by the deadline cannot wedge the machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::duration_millis;

/// Listener invoked on every state transition, outside the breaker lock
pub type StateChangeListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - attempts are admitted
    Closed,

    /// Failure threshold exceeded - attempts are refused without running
    Open,

    /// Testing recovery - a single probe attempt is admitted at a time
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` required to trip the circuit
    pub failure_threshold: u32,

    /// Consecutive probe successes in `HalfOpen` required to close it
    pub success_threshold: u32,

    /// Cooldown in `Open` before a probe is admitted
    #[serde(with = "duration_millis")]
    pub open_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_delay: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the cooldown before a probe is admitted
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

/// Counters and state owned by the breaker lock
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    /// Move to `to`, resetting counters. `opened_at` is stamped only on
    /// entry to `Open`.
    fn transition(&mut self, to: CircuitState) -> (CircuitState, CircuitState) {
        let from = self.state;
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        self.probe_in_flight = false;
        self.opened_at = match to {
            CircuitState::Open => Some(Instant::now()),
            _ => None,
        };
        (from, to)
    }
}

/// In-process circuit breaker
///
/// One breaker per logical protected operation, shared by every concurrent
/// caller of that operation. All state lives behind a single mutex, so the
/// sequence of recorded outcomes and transitions is serializable; the
/// transition listener runs after the lock is released.
///
/// # Example
///
/// ```
/// use breakwater::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
/// match breaker.try_acquire() {
///     Some(permit) => {
///         // run the protected call, then:
///         permit.success();
///     }
///     None => {
///         // fail fast, the dependency is assumed down
///     }
/// }
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    listener: Option<StateChangeListener>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new breaker in the `Closed` state
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
            listener: None,
        }
    }

    /// Attach a transition listener
    ///
    /// The listener is invoked outside the breaker lock and must not block;
    /// a panicking listener unwinds into the caller that triggered the
    /// transition, never mid-transition.
    pub fn with_listener(mut self, listener: StateChangeListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Get the breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to run one attempt
    ///
    /// Returns `None` when the attempt must fail fast: the circuit is `Open`
    /// and still cooling down, or `HalfOpen` with the probe already out.
    /// In `Open`, an elapsed cooldown transitions to `HalfOpen` as a side
    /// effect and the returned permit is the probe.
    pub fn try_acquire(&self) -> Option<CircuitPermit<'_>> {
        let (admitted, changed) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (Some(false), None),
                CircuitState::Open => {
                    let cooled = inner
                        .opened_at
                        .is_some_and(|at| at.elapsed() >= self.config.open_delay);
                    if cooled {
                        let changed = inner.transition(CircuitState::HalfOpen);
                        inner.probe_in_flight = true;
                        (Some(true), Some(changed))
                    } else {
                        (None, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        (None, None)
                    } else {
                        inner.probe_in_flight = true;
                        (Some(true), None)
                    }
                }
            }
        };

        self.notify(changed);
        admitted.map(|probe| CircuitPermit {
            breaker: self,
            probe,
            resolved: false,
        })
    }

    /// Get the current state without side effects
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// True if the circuit is `Closed`
    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Force the circuit to `Closed`, resetting all counters
    ///
    /// Operational override; any in-flight probe slot is released.
    pub fn reset(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Closed {
                inner.failure_count = 0;
                inner.success_count = 0;
                None
            } else {
                Some(inner.transition(CircuitState::Closed))
            }
        };
        self.notify(changed);
    }

    fn record_success(&self, probe: bool) {
        let changed = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen if probe => {
                    inner.probe_in_flight = false;
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        Some(inner.transition(CircuitState::Closed))
                    } else {
                        None
                    }
                }
                // Outcome from a permit issued under an earlier state; the
                // machine has moved on, so it no longer counts.
                CircuitState::HalfOpen | CircuitState::Open => None,
            }
        };
        self.notify(changed);
    }

    fn record_failure(&self, probe: bool) {
        let changed = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        Some(inner.transition(CircuitState::Open))
                    } else {
                        None
                    }
                }
                // A failed probe does not get a second chance.
                CircuitState::HalfOpen if probe => Some(inner.transition(CircuitState::Open)),
                CircuitState::HalfOpen | CircuitState::Open => None,
            }
        };
        self.notify(changed);
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
    }

    fn notify(&self, changed: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = changed {
            debug!(%from, %to, "circuit breaker state changed");
            if let Some(listener) = &self.listener {
                listener(from, to);
            }
        }
    }
}

/// Permission to run one attempt through a [`CircuitBreaker`]
///
/// Resolve with [`success`](Self::success) or [`failure`](Self::failure).
/// Dropping an unresolved permit releases the probe slot without recording
/// an outcome.
#[must_use = "the permit must be resolved with the attempt's outcome"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl CircuitPermit<'_> {
    /// True if this permit is the single `HalfOpen` probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report that the attempt succeeded
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.probe);
    }

    /// Report that the attempt failed
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_success_threshold(2)
                .with_open_delay(Duration::from_millis(50)),
        )
    }

    fn fail_times(breaker: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            breaker.try_acquire().expect("permit").failure();
        }
    }

    #[test]
    fn test_starts_closed() {
        let breaker = test_breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_healthy());
    }

    #[test]
    fn test_opens_after_failure_threshold() {
        let breaker = test_breaker();
        fail_times(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail_times(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_healthy());
    }

    #[test]
    fn test_open_refuses_until_cooldown() {
        let breaker = test_breaker();
        fail_times(&breaker, 3);

        assert!(breaker.try_acquire().is_none());

        std::thread::sleep(Duration::from_millis(60));
        let permit = breaker.try_acquire().expect("cooldown elapsed");
        assert!(permit.is_probe());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        permit.success();
    }

    #[test]
    fn test_success_resets_failure_count_in_closed() {
        let breaker = test_breaker();
        fail_times(&breaker, 2);
        breaker.try_acquire().expect("permit").success();

        // The streak restarted; two more failures must not trip it.
        fail_times(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_single_probe_while_half_open() {
        let breaker = test_breaker();
        fail_times(&breaker, 3);
        std::thread::sleep(Duration::from_millis(60));

        let probe = breaker.try_acquire().expect("probe");
        assert!(breaker.try_acquire().is_none());
        probe.success();

        // Probe resolved below the success threshold; the next probe slot
        // opens up.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_some());
    }

    #[test]
    fn test_closes_after_success_threshold() {
        let breaker = test_breaker();
        fail_times(&breaker, 3);
        std::thread::sleep(Duration::from_millis(60));

        for _ in 0..2 {
            breaker.try_acquire().expect("probe").success();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let breaker = test_breaker();
        fail_times(&breaker, 3);
        std::thread::sleep(Duration::from_millis(60));

        breaker.try_acquire().expect("probe").failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // opened_at was restamped; the cooldown starts over.
        assert!(breaker.try_acquire().is_none());
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.try_acquire().is_some());
    }

    #[test]
    fn test_dropped_probe_releases_slot() {
        let breaker = test_breaker();
        fail_times(&breaker, 3);
        std::thread::sleep(Duration::from_millis(60));

        {
            let _probe = breaker.try_acquire().expect("probe");
            assert!(breaker.try_acquire().is_none());
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_some());
    }

    #[test]
    fn test_stale_permit_does_not_perturb_half_open() {
        let breaker = test_breaker();

        // Issued while closed, resolved after the breaker tripped.
        let stale = breaker.try_acquire().expect("permit");
        fail_times(&breaker, 3);
        std::thread::sleep(Duration::from_millis(60));
        let probe = breaker.try_acquire().expect("probe");

        stale.failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        probe.success();
        breaker.try_acquire().expect("probe").success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_forces_closed() {
        let breaker = test_breaker();
        fail_times(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_some());
    }

    #[test]
    fn test_listener_sees_transitions() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&transitions);
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(1)
                .with_open_delay(Duration::from_millis(20)),
        )
        .with_listener(Arc::new(move |from, to| {
            seen.lock().push((from, to));
        }));

        breaker.try_acquire().expect("permit").failure();
        std::thread::sleep(Duration::from_millis(30));
        breaker.try_acquire().expect("probe").success();

        assert_eq!(
            *transitions.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_concurrent_half_open_admits_one_probe() {
        let breaker = Arc::new(test_breaker());
        fail_times(&breaker, 3);
        std::thread::sleep(Duration::from_millis(60));

        // Hold the probe slot while the other callers race.
        let probe = breaker.try_acquire().expect("probe");

        let admitted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    if breaker.try_acquire().is_some() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("caller thread");
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 0);
        probe.success();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
