//! # Breakwater
//!
//! A resilient execution pipeline: wraps an arbitrary async operation
//! (typically a network call) with a circuit breaker, bounded retry with
//! backoff, an overall deadline, and an optional fallback, composed in a
//! fixed order.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Fallback            (resolves the final error, outermost)    │
//! │ ┌──────────────────────────────────────────────────────────┐ │
//! │ │ TimeoutGuard      (one deadline spans all attempts)      │ │
//! │ │ ┌──────────────────────────────────────────────────────┐ │ │
//! │ │ │ Retry loop      (capped backoff between attempts)    │ │ │
//! │ │ │ ┌──────────────────────────────────────────────────┐ │ │ │
//! │ │ │ │ CircuitBreaker (gates each attempt, innermost)   │ │ │ │
//! │ │ │ │     → operation(ExecutionContext)                │ │ │ │
//! │ │ │ └──────────────────────────────────────────────────┘ │ │ │
//! │ │ └──────────────────────────────────────────────────────┘ │ │
//! │ └──────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Circuit breaker**: consecutive failures trip the circuit; calls then
//!   fail fast until a cooldown admits a single recovery probe
//! - **Bounded retry**: capped exponential backoff with jitter, with a
//!   caller-supplied retryability predicate
//! - **One overall deadline**: total caller-visible latency is bounded no
//!   matter how many retries occur
//! - **Fallback**: substitute a cached value or transform the final error
//! - **Background variant**: the same pipeline on a bounded background
//!   execution context
//!
//! ## Example
//!
//! ```no_run
//! use breakwater::{Executor, ResilienceConfig};
//! use std::time::Duration;
//!
//! # #[derive(Debug, thiserror::Error)]
//! # enum QuoteError {
//! #     #[error("unavailable")]
//! #     Unavailable,
//! #     #[error("bad request")]
//! #     BadRequest,
//! # }
//! # async fn fetch_quote() -> Result<u64, QuoteError> { Ok(100) }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let executor: Executor<u64, QuoteError> =
//!     Executor::builder("quote-service", ResilienceConfig::default()
//!         .with_failure_threshold(3)
//!         .with_max_attempts(3)
//!         .with_timeout(Duration::from_secs(2)))
//!     .retry_when(|err| !matches!(err, QuoteError::BadRequest))
//!     .with_fallback_value(0)
//!     .build()?;
//!
//! let quote = executor.execute(|_ctx| fetch_quote()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing and lifecycle
//!
//! Construct one [`Executor`] per protected downstream dependency and share
//! it among all concurrent callers of that dependency; the circuit breaker
//! state is shared across clones. Do not hold executors in process-wide
//! globals.
//!
//! ## Cancellation is cooperative
//!
//! When the deadline expires the in-flight attempt future is dropped, but
//! work the operation has spawned or moved off-future keeps running unless
//! the operation observes [`ExecutionContext::is_cancelled`]. Documented
//! caller obligation, not a guard failure.

pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod retry;
pub mod timeout;

/// Prelude for common imports
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::config::{ConfigError, ResilienceConfig};
    pub use crate::context::ExecutionContext;
    pub use crate::error::{AttemptError, ExecuteError};
    pub use crate::executor::{ExecutionHandle, Executor, ExecutorBuilder};
    pub use crate::fallback::Fallback;
    pub use crate::retry::RetryPolicy;
}

// Re-export key types at crate root
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
pub use config::{ConfigError, ResilienceConfig};
pub use context::{CancellationHandle, ExecutionContext};
pub use error::{AttemptError, ExecuteError};
pub use executor::{ExecutionHandle, Executor, ExecutorBuilder, RetryHook, TimeoutHook};
pub use fallback::Fallback;
pub use retry::RetryPolicy;
pub use timeout::{DeadlineExceeded, TimeoutGuard};
