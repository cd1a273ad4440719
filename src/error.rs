//! Error types for the connection manager
//!
//! Transport failures never surface here: the manager absorbs them into state transitions and
//! events. The only runtime error a caller sees is from `connect()`.
use crate::backoff::BackoffError;
use crate::circuit_breaker::CircuitBreakerError;
use crate::jitter::JitterError;

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    /// Every reconnect attempt failed; the manager is back to Disconnected.
    #[error("gave up after {attempts} failed connection attempts")]
    ReconnectExhausted { attempts: u32 },
    /// `disconnect()` was called while the connect was still pending.
    #[error("connect cancelled by disconnect()")]
    Cancelled,
    /// The manager task has stopped.
    #[error("connection manager has shut down")]
    Shutdown,
}

/// Invalid manager configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("url must not be empty")]
    MissingUrl,
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("invalid backoff: {0}")]
    Backoff(#[from] BackoffError),
    #[error("invalid circuit breaker: {0}")]
    CircuitBreaker(#[from] CircuitBreakerError),
    #[error("invalid jitter: {0}")]
    Jitter(#[from] JitterError),
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}
