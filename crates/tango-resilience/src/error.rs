//! Shared error type for the resilience primitives.

use std::time::Duration;
use thiserror::Error;

/// Error produced by circuit breaker, connection pool, and rate limiter operations.
///
/// Consumers classify their own errors into [`ResilienceError::Transient`] or
/// [`ResilienceError::Permanent`] before handing them to [`crate::CircuitBreaker::execute`];
/// only transient errors are retried.
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// A transient failure, worth retrying (e.g. a VMMS call returned `-1`).
    #[error("transient error: {0}")]
    Transient(String),

    /// A failure that retrying will not fix (e.g. bad credentials).
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The circuit is open; the call was rejected without being attempted.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The connection pool has no idle connections and is at its concurrency cap.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Acquiring a pooled connection took longer than the configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The rate limiter rejected the call; too many requests in the current window.
    #[error("rate limit exceeded")]
    RateLimitExceeded,
}

impl ResilienceError {
    /// Whether the circuit breaker should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResilienceError::Transient(_) | ResilienceError::Timeout(_))
    }

    /// Whether retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ResilienceError::Permanent(_))
    }

    /// Whether this error should count towards the circuit breaker's failure threshold.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(self, ResilienceError::CircuitOpen | ResilienceError::RateLimitExceeded)
    }
}
