//! Per-attempt execution context
//!
//! Each attempt receives a fresh [`ExecutionContext`]: attempt metadata for
//! log correlation plus the call-wide cooperative cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

/// Context handed to the wrapped operation on every attempt
///
/// The context is ephemeral: created per attempt, discarded with it. The
/// cancellation flag is shared across all attempts of one call and is
/// tripped when the overall deadline expires.
///
/// Observing cancellation is the operation's obligation; the pipeline drops
/// the in-flight attempt future on expiry, but work the operation spawned or
/// moved elsewhere stops only if it checks the flag:
///
/// ```ignore
/// executor.execute(|ctx| async move {
///     for chunk in chunks {
///         if ctx.is_cancelled() {
///             return Err(TransferError::Aborted);
///         }
///         push(chunk).await?;
///     }
///     Ok(())
/// }).await
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique id of this attempt, for log correlation
    pub attempt_id: Uuid,

    /// Current attempt number (1-based; 1 is the first try)
    pub attempt: u32,

    /// Total attempt budget for the call
    pub max_attempts: u32,

    cancelled: Arc<AtomicBool>,
}

impl ExecutionContext {
    pub(crate) fn new(attempt: u32, max_attempts: u32, handle: &CancellationHandle) -> Self {
        Self {
            attempt_id: Uuid::now_v7(),
            attempt,
            max_attempts,
            cancelled: Arc::clone(&handle.cancelled),
        }
    }

    /// True if this is the first attempt of the call
    pub fn is_first_attempt(&self) -> bool {
        self.attempt == 1
    }

    /// True if no further attempts remain after this one
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// True once the overall deadline has expired
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resolve when cancellation is requested
    ///
    /// Useful in `select!` patterns:
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => result,
    ///     _ = ctx.cancelled() => Err(TransferError::Aborted),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Call-wide cancellation flag
///
/// Held by the executor for the duration of one call; tripped by the
/// deadline guard on expiry.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Create an untripped handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_bounds() {
        let handle = CancellationHandle::new();
        let first = ExecutionContext::new(1, 3, &handle);
        let last = ExecutionContext::new(3, 3, &handle);

        assert!(first.is_first_attempt());
        assert!(!first.is_last_attempt());
        assert!(!last.is_first_attempt());
        assert!(last.is_last_attempt());
    }

    #[test]
    fn test_contexts_share_cancellation() {
        let handle = CancellationHandle::new();
        let ctx = ExecutionContext::new(1, 3, &handle);
        assert!(!ctx.is_cancelled());

        handle.cancel();
        assert!(ctx.is_cancelled());

        // A later attempt of the same call observes the same flag.
        let next = ExecutionContext::new(2, 3, &handle);
        assert!(next.is_cancelled());
    }

    #[test]
    fn test_attempt_ids_are_unique() {
        let handle = CancellationHandle::new();
        let a = ExecutionContext::new(1, 2, &handle);
        let b = ExecutionContext::new(2, 2, &handle);
        assert_ne!(a.attempt_id, b.attempt_id);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let handle = CancellationHandle::new();
        let ctx = ExecutionContext::new(1, 1, &handle);

        let waiter = tokio::spawn(async move { ctx.cancelled().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        handle.cancel();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("cancelled() should resolve promptly")
            .expect("waiter task");
    }
}
