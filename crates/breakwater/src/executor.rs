//! Composition root
//!
//! Assembles the fixed pipeline around one protected operation:
//!
//! ```text
//! Fallback → TimeoutGuard → retry loop → CircuitBreaker → operation
//! ```
//!
//! One deadline spans every attempt and backoff sleep; the breaker is
//! consulted before each attempt; the fallback sees only the final error.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::{ConfigError, ResilienceConfig};
use crate::context::{CancellationHandle, ExecutionContext};
use crate::error::{AttemptError, ExecuteError};
use crate::fallback::Fallback;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutGuard;

/// Hook invoked before each retry sleep with the attempt number that just
/// failed and its error
pub type RetryHook<E> = Arc<dyn Fn(u32, &ExecuteError<E>) + Send + Sync>;

/// Hook invoked when the overall deadline expires
pub type TimeoutHook = Arc<dyn Fn(Duration) + Send + Sync>;

/// Resilient executor for one protected operation
///
/// Wraps an async operation with a circuit breaker, bounded retry with
/// backoff, an overall deadline, and an optional fallback. Construct one
/// executor per downstream dependency and share it (it is `Clone` and
/// `Send + Sync`); the breaker state is shared across clones.
///
/// # Example
///
/// ```no_run
/// use breakwater::{Executor, ResilienceConfig};
///
/// # #[derive(Debug, thiserror::Error)]
/// # #[error("boom")]
/// # struct ApiError;
/// # async fn call_api() -> Result<String, ApiError> { Ok("ok".into()) }
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let executor: Executor<String, ApiError> =
///     Executor::new("billing-api", ResilienceConfig::default())?;
///
/// let value = executor.execute(|_ctx| call_api()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Executor<T, E> {
    name: Arc<str>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    guard: TimeoutGuard,
    fallback: Option<Fallback<T, E>>,
    retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    on_retry: Option<RetryHook<E>>,
    on_timeout: Option<TimeoutHook>,
    background: Arc<Semaphore>,
}

impl<T, E> Clone for Executor<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            breaker: Arc::clone(&self.breaker),
            retry: self.retry.clone(),
            guard: self.guard,
            fallback: self.fallback.clone(),
            retryable: Arc::clone(&self.retryable),
            on_retry: self.on_retry.clone(),
            on_timeout: self.on_timeout.clone(),
            background: Arc::clone(&self.background),
        }
    }
}

impl<T, E> std::fmt::Debug for Executor<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("state", &self.breaker.state())
            .finish()
    }
}

impl<T, E> Executor<T, E>
where
    E: std::error::Error,
{
    /// Start building an executor for the named dependency
    pub fn builder(name: impl Into<String>, config: ResilienceConfig) -> ExecutorBuilder<T, E> {
        ExecutorBuilder::new(name, config)
    }

    /// Build an executor with no fallback, hooks, or custom classification
    pub fn new(name: impl Into<String>, config: ResilienceConfig) -> Result<Self, ConfigError> {
        Self::builder(name, config).build()
    }

    /// The dependency name this executor protects
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current circuit breaker state
    pub fn current_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// True if the circuit is closed
    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    /// Force the circuit closed (operational override)
    pub fn reset(&self) {
        self.breaker.reset();
    }

    /// The shared circuit breaker
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The retry policy in effect
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The overall per-call deadline
    pub fn timeout(&self) -> Duration {
        self.guard.limit()
    }

    /// Run `operation` through the pipeline
    ///
    /// The closure is invoked once per attempt with a fresh
    /// [`ExecutionContext`]; it must observe the context's cancellation flag
    /// for work it spawns or moves off-future (see [`ExecutionContext`]).
    ///
    /// Returns the operation's value, the fallback's substitute, or exactly
    /// one [`ExecuteError`] kind. Panics inside the operation are caught at
    /// the attempt boundary and reported as operation failures.
    #[instrument(level = "debug", skip_all, fields(executor = %self.name))]
    pub async fn execute<F, Fut>(&self, operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cancellation = CancellationHandle::new();
        let outcome = self
            .guard
            .run_with_deadline(&cancellation, self.attempt_loop(operation, &cancellation))
            .await;

        let final_error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(failure)) => failure,
            Err(deadline) => {
                error!(executor = %self.name, limit = ?deadline.limit, "operation timed out");
                if let Some(hook) = &self.on_timeout {
                    hook(deadline.limit);
                }
                ExecuteError::Timeout {
                    limit: deadline.limit,
                }
            }
        };

        match &self.fallback {
            Some(fallback) => fallback.resolve(final_error),
            None => Err(final_error),
        }
    }

    /// Run `operation` through the pipeline on the background execution
    /// context
    ///
    /// Returns immediately; the pipeline runs with the same semantics as
    /// [`execute`](Self::execute). At most
    /// [`max_background_executions`](ResilienceConfig::max_background_executions)
    /// executions run concurrently per executor; excess spawns wait for a
    /// slot before their deadline starts.
    pub fn execute_background<F, Fut>(&self, operation: F) -> ExecutionHandle<T, E>
    where
        F: FnMut(ExecutionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let executor = self.clone();
        let inner = tokio::spawn(async move {
            let _slot = executor
                .background
                .clone()
                .acquire_owned()
                .await
                .expect("background semaphore is never closed");
            executor.execute(operation).await
        });
        ExecutionHandle { inner }
    }

    async fn attempt_loop<F, Fut>(
        &self,
        mut operation: F,
        cancellation: &CancellationHandle,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.retry.max_attempts;
        let mut attempt: u32 = 1;

        loop {
            let failure = match self.breaker.try_acquire() {
                // Fail fast without invoking the operation.
                None => ExecuteError::CircuitOpen,
                Some(permit) => {
                    let ctx = ExecutionContext::new(attempt, max_attempts, cancellation);
                    match AssertUnwindSafe(async { operation(ctx).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(value)) => {
                            permit.success();
                            return Ok(value);
                        }
                        Ok(Err(err)) => {
                            permit.failure();
                            ExecuteError::Operation(AttemptError::Operation(err))
                        }
                        Err(payload) => {
                            permit.failure();
                            ExecuteError::Operation(AttemptError::Panic(panic_message(payload)))
                        }
                    }
                }
            };

            let retryable = match &failure {
                ExecuteError::Operation(AttemptError::Operation(err)) => (self.retryable)(err),
                // The predicate classifies only the operation's own errors;
                // breaker refusals and panics stay retryable.
                _ => true,
            };

            if !retryable {
                return Err(failure);
            }
            if !self.retry.has_attempts_remaining(attempt) {
                return Err(finalize_exhausted(failure, attempt));
            }

            warn!(executor = %self.name, attempt, error = %failure, "retrying operation");
            if let Some(hook) = &self.on_retry {
                hook(attempt, &failure);
            }

            // Interruptible: the deadline races this sleep along with the
            // attempts themselves.
            tokio::time::sleep(self.retry.delay_before(attempt + 1)).await;
            attempt += 1;
        }
    }
}

/// Wrap an exhausted-budget failure; circuit-open stays fail-fast
fn finalize_exhausted<E>(failure: ExecuteError<E>, attempts: u32) -> ExecuteError<E> {
    match failure {
        ExecuteError::Operation(source) => ExecuteError::MaxRetriesExceeded { attempts, source },
        other => other,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to a background execution
///
/// Join to obtain the same `Result` that [`Executor::execute`] would have
/// returned.
pub struct ExecutionHandle<T, E> {
    inner: JoinHandle<Result<T, ExecuteError<E>>>,
}

impl<T, E> std::fmt::Debug for ExecutionHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("finished", &self.inner.is_finished())
            .finish()
    }
}

impl<T, E> ExecutionHandle<T, E> {
    /// Wait for the background execution to finish
    ///
    /// An aborted or panicked background task is reported as an
    /// operation-kind error; the pipeline itself never panics.
    pub async fn join(self) -> Result<T, ExecuteError<E>> {
        match self.inner.await {
            Ok(result) => result,
            Err(join_error) => Err(ExecuteError::Operation(AttemptError::Panic(
                join_error.to_string(),
            ))),
        }
    }

    /// Abort the background execution
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// True once the background execution has finished
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Builder for [`Executor`]
///
/// Collects the optional fallback, retry classification, and observer hooks,
/// then validates the configuration and assembles the pipeline.
pub struct ExecutorBuilder<T, E> {
    name: String,
    config: ResilienceConfig,
    fallback: Option<Fallback<T, E>>,
    retryable: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
    on_state_change: Option<Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>>,
    on_retry: Option<RetryHook<E>>,
    on_timeout: Option<TimeoutHook>,
}

impl<T, E> ExecutorBuilder<T, E>
where
    E: std::error::Error,
{
    fn new(name: impl Into<String>, config: ResilienceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            fallback: None,
            retryable: None,
            on_state_change: None,
            on_retry: None,
            on_timeout: None,
        }
    }

    /// Use a prebuilt fallback
    pub fn with_fallback(mut self, fallback: Fallback<T, E>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Substitute a static value for any final error
    pub fn with_fallback_value(self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.with_fallback(Fallback::value(value))
    }

    /// Resolve final errors with `f`
    pub fn with_fallback_fn<F>(self, f: F) -> Self
    where
        F: Fn(ExecuteError<E>) -> Result<T, ExecuteError<E>> + Send + Sync + 'static,
    {
        self.with_fallback(Fallback::from_fn(f))
    }

    /// Classify which operation errors are worth retrying
    ///
    /// Defaults to retrying everything.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    /// Observe circuit breaker transitions
    ///
    /// Invoked outside the breaker lock; must not block.
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    /// Observe retries (invoked before each backoff sleep)
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &ExecuteError<E>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Observe overall deadline expiry
    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration and assemble the executor
    pub fn build(self) -> Result<Executor<T, E>, ConfigError> {
        self.config.validate()?;

        let name: Arc<str> = self.name.into();

        let log_name = Arc::clone(&name);
        let user_hook = self.on_state_change;
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(self.config.failure_threshold)
                .with_success_threshold(self.config.success_threshold)
                .with_open_delay(self.config.open_delay),
        )
        .with_listener(Arc::new(move |from, to| {
            info!(executor = %log_name, %from, %to, "circuit breaker state changed");
            if let Some(hook) = &user_hook {
                hook(from, to);
            }
        }));

        let retry = RetryPolicy::exponential()
            .with_max_attempts(self.config.max_attempts)
            .with_base_delay(self.config.base_delay)
            .with_max_delay(self.config.max_delay)
            .with_backoff_coefficient(self.config.backoff_coefficient)
            .with_jitter(self.config.jitter);

        Ok(Executor {
            name,
            breaker: Arc::new(breaker),
            retry,
            guard: TimeoutGuard::new(self.config.timeout),
            fallback: self.fallback,
            retryable: self.retryable.unwrap_or_else(|| Arc::new(|_| true)),
            on_retry: self.on_retry,
            on_timeout: self.on_timeout,
            background: Arc::new(Semaphore::new(self.config.max_background_executions)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("downstream unavailable")]
    struct DownstreamError;

    fn quick_config() -> ResilienceConfig {
        ResilienceConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(0.0)
            .with_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let executor: Executor<u32, DownstreamError> =
            Executor::new("test", quick_config()).unwrap();

        let value = executor.execute(|_ctx| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(executor.is_healthy());
    }

    #[tokio::test]
    async fn test_context_reports_attempt_numbers() {
        let executor: Executor<u32, DownstreamError> =
            Executor::new("test", quick_config().with_max_attempts(3)).unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let result = executor
            .execute(move |ctx| {
                record.lock().push((ctx.attempt, ctx.max_attempts));
                async move {
                    if ctx.is_last_attempt() {
                        Ok(ctx.attempt)
                    } else {
                        Err(DownstreamError)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(*seen.lock(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result: Result<Executor<u32, DownstreamError>, _> =
            Executor::new("test", ResilienceConfig::default().with_max_attempts(0));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_executor_name() {
        let executor: Executor<u32, DownstreamError> =
            Executor::new("payments", quick_config()).unwrap();
        assert_eq!(executor.name(), "payments");
        assert_eq!(executor.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_finalize_keeps_circuit_open_fail_fast() {
        let exhausted: ExecuteError<DownstreamError> =
            finalize_exhausted(ExecuteError::CircuitOpen, 3);
        assert!(exhausted.is_circuit_open());

        let wrapped = finalize_exhausted(
            ExecuteError::Operation(AttemptError::Operation(DownstreamError)),
            3,
        );
        assert!(matches!(
            wrapped,
            ExecuteError::MaxRetriesExceeded { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static str")), "static str");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(17_u8)), "non-string panic payload");
    }
}
