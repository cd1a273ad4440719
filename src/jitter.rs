//! Jitter strategies to keep many clients from reconnecting in lockstep
//!
//! - `None`: deterministic delays, for tests or tightly controlled deployments.
//! - `Proportional`: scales the delay by a uniform factor in `[low, high]`. The reconnect default
//!   is `[0.8, 1.2]`, which keeps the delay within 20% of the nominal backoff.
//!
//! RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! `apply_with_rng`.

use rand::{rng, Rng};
use std::fmt;
use std::time::Duration;

/// Lower bound of the default reconnect jitter factor.
pub const DEFAULT_JITTER_LOW: f64 = 0.8;
/// Upper bound of the default reconnect jitter factor.
pub const DEFAULT_JITTER_HIGH: f64 = 1.2;

/// Errors returned when constructing a jitter strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum JitterError {
    /// Factors must be finite and non-negative.
    InvalidFactor(f64),
    /// `low` must not exceed `high`.
    InvertedRange { low: f64, high: f64 },
}

impl fmt::Display for JitterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitterError::InvalidFactor(v) => {
                write!(f, "jitter factor must be finite and >= 0 (got {})", v)
            }
            JitterError::InvertedRange { low, high } => {
                write!(f, "jitter low ({}) must be <= high ({})", low, high)
            }
        }
    }
}

impl std::error::Error for JitterError {}

/// Jitter strategy for randomizing reconnect delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    None,
    /// Multiply the delay by a uniform factor in `[low, high]`
    Proportional { low: f64, high: f64 },
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::Proportional { low: DEFAULT_JITTER_LOW, high: DEFAULT_JITTER_HIGH }
    }
}

impl Jitter {
    /// Create a proportional jitter strategy, validating the factor range.
    pub fn proportional(low: f64, high: f64) -> Result<Self, JitterError> {
        for factor in [low, high] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(JitterError::InvalidFactor(factor));
            }
        }
        if low > high {
            return Err(JitterError::InvertedRange { low, high });
        }
        Ok(Jitter::Proportional { low, high })
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match *self {
            Jitter::None => delay,
            Jitter::Proportional { low, high } => {
                if delay.is_zero() {
                    return Duration::ZERO;
                }
                let factor = if low == high { low } else { rng.random_range(low..=high) };
                delay.mul_f64(factor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_secs(1);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn default_jitter_stays_within_twenty_percent() {
        let jitter = Jitter::default();
        let delay = Duration::from_secs(1);

        for _ in 0..200 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= delay.mul_f64(0.8));
            assert!(jittered <= delay.mul_f64(1.2));
        }
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let jitter = Jitter::default();
        let delay = Duration::from_millis(1000);

        let a = jitter.apply_with_rng(delay, &mut StdRng::seed_from_u64(42));
        let b = jitter.apply_with_rng(delay, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_range_is_a_fixed_multiplier() {
        let jitter = Jitter::proportional(0.5, 0.5).unwrap();
        assert_eq!(jitter.apply(Duration::from_secs(1)), Duration::from_millis(500));
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::default().apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn rejects_invalid_ranges() {
        assert_eq!(
            Jitter::proportional(1.2, 0.8).unwrap_err(),
            JitterError::InvertedRange { low: 1.2, high: 0.8 }
        );
        assert!(matches!(
            Jitter::proportional(-0.1, 1.0),
            Err(JitterError::InvalidFactor(_))
        ));
        assert!(matches!(
            Jitter::proportional(0.5, f64::INFINITY),
            Err(JitterError::InvalidFactor(_))
        ));
    }
}
