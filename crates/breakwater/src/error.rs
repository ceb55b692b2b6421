//! Pipeline error taxonomy
//!
//! Callers receive exactly one of the [`ExecuteError`] kinds; the pipeline
//! never lets a panic from the wrapped operation unwind through it.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single attempt at the wrapped operation
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The operation returned its own error
    #[error(transparent)]
    Operation(E),

    /// The operation panicked; the panic was caught at the attempt boundary
    #[error("operation panicked: {0}")]
    Panic(String),
}

impl<E> AttemptError<E> {
    /// The operation's own error, if this attempt failed with one
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(err) => Some(err),
            Self::Panic(_) => None,
        }
    }
}

/// Final outcome of a failed [`execute`](crate::Executor::execute) call
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The circuit breaker refused the attempt; the operation was not invoked
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The overall deadline elapsed before an attempt succeeded
    #[error("operation timed out after {limit:?}")]
    Timeout {
        /// The configured deadline
        limit: Duration,
    },

    /// The attempt budget ran out; carries the last attempt's failure
    #[error("retries exhausted after {attempts} attempt(s)")]
    MaxRetriesExceeded {
        /// Attempts actually made
        attempts: u32,
        /// The last attempt's failure
        #[source]
        source: AttemptError<E>,
    },

    /// A non-retryable operation failure, passed through unwrapped
    #[error(transparent)]
    Operation(AttemptError<E>),
}

impl<E> ExecuteError<E> {
    /// True if the breaker refused the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// True if the overall deadline elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The underlying operation error, if any attempt produced one
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::MaxRetriesExceeded { source, .. } | Self::Operation(source) => {
                source.operation()
            }
            _ => None,
        }
    }
}
