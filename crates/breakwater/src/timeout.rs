//! Overall deadline enforcement
//!
//! One deadline spans the entire call: every attempt plus every backoff
//! sleep. This bounds total caller-visible latency no matter how many
//! retries the policy would otherwise allow.

use std::time::Duration;

use thiserror::Error;

use crate::context::CancellationHandle;

/// The guarded future did not finish before the deadline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deadline of {limit:?} exceeded")]
pub struct DeadlineExceeded {
    /// The configured deadline
    pub limit: Duration,
}

/// Races a future against a single overall deadline
///
/// On expiry the raced future is dropped and the cooperative cancellation
/// flag is tripped. Cancellation is cooperative only: work the operation has
/// spawned or moved off-future keeps running unless the operation observes
/// [`ExecutionContext::is_cancelled`](crate::ExecutionContext::is_cancelled).
/// A non-cooperating operation leaking past its deadline is a documented,
/// bounded caller risk, not a guard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    limit: Duration,
}

impl TimeoutGuard {
    /// Create a guard with the given deadline
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    /// The configured deadline
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Run `future` to completion or until the deadline elapses
    ///
    /// On expiry, trips `cancellation` before reporting the error so that
    /// cooperative work unwinds promptly.
    pub async fn run_with_deadline<F, T>(
        &self,
        cancellation: &CancellationHandle,
        future: F,
    ) -> Result<T, DeadlineExceeded>
    where
        F: std::future::Future<Output = T>,
    {
        match tokio::time::timeout(self.limit, future).await {
            Ok(value) => Ok(value),
            Err(_) => {
                cancellation.cancel();
                Err(DeadlineExceeded { limit: self.limit })
            }
        }
    }
}
