//! Reconnect backoff policy.
//!
//! `delay(attempt)` is `min(base * 2^(attempt-1), max)`, scaled by the configured [`Jitter`] and
//! clamped to `max` again, so a jittered delay never exceeds the ceiling. Attempt semantics:
//! attempt `0` is the initial connect (no delay); the first reconnect is `attempt = 1`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use lifeline::{BackoffPolicy, Jitter};
//!
//! let backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2))
//!     .unwrap()
//!     .with_jitter(Jitter::None);
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial connect
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(6), Duration::from_secs(2)); // capped
//! ```
//!
//! Overflow behavior: computations that would overflow saturate to `MAX_BACKOFF` (1 day) before
//! the ceiling is applied.

use crate::jitter::Jitter;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Saturation point for exponential growth (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Default delay before the first reconnect.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
/// Default ceiling for reconnect delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxMustBePositive => write!(f, "max delay must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max delay ({:?}) must be >= base delay ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Exponential reconnect backoff with a ceiling and jitter. Stateless.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: Jitter,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: DEFAULT_BASE_DELAY, max: DEFAULT_MAX_DELAY, jitter: Jitter::default() }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default `[0.8, 1.2]` jitter.
    /// Errors if `max` is zero or smaller than `base`.
    pub fn new(base: Duration, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < base {
            return Err(BackoffError::MaxLessThanBase { base, max });
        }
        Ok(Self { base, max, jitter: Jitter::default() })
    }

    /// Replace the jitter strategy.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Un-jittered delay: `min(base * 2^(attempt-1), max)`, zero for attempt `0`.
    pub fn nominal(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u128.saturating_pow(attempt - 1);
        let nanos = self.base.as_nanos().saturating_mul(multiplier);
        let grown = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
        grown.min(self.max)
    }

    /// Jittered delay for the given reconnect attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::rng())
    }

    /// Jittered delay using a caller-supplied RNG (for deterministic tests).
    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.jitter.apply_with_rng(self.nominal(attempt), rng).min(self.max)
    }
}
