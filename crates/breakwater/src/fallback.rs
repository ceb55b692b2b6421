//! Fallback resolution
//!
//! The outermost layer of the pipeline: consulted once, only after the
//! retry loop and circuit breaker have both given up.

use std::sync::Arc;

use crate::error::ExecuteError;

/// Substitute result for a call the pipeline could not complete
///
/// Either a static value cloned per resolution or a resolver that inspects
/// the final error and may substitute a value or transform the error.
pub struct Fallback<T, E> {
    resolver: Arc<dyn Fn(ExecuteError<E>) -> Result<T, ExecuteError<E>> + Send + Sync>,
}

impl<T, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<T, E> std::fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fallback")
    }
}

impl<T, E> Fallback<T, E> {
    /// Always substitute `value`, swallowing the final error
    pub fn value(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            resolver: Arc::new(move |_| Ok(value.clone())),
        }
    }

    /// Resolve with `f`, which may substitute a value or return a
    /// (possibly transformed) error
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(ExecuteError<E>) -> Result<T, ExecuteError<E>> + Send + Sync + 'static,
    {
        Self {
            resolver: Arc::new(f),
        }
    }

    /// Resolve the final error
    pub fn resolve(&self, error: ExecuteError<E>) -> Result<T, ExecuteError<E>> {
        (self.resolver)(error)
    }
}
