//! Outbound rate limiting.
//!
//! - [`RateLimiter`]: the trait the connection driver consults before every transmission.
//! - [`FixedWindow`]: the default strategy, a counter that resets every `window`.
//! - [`Decision`]: the result of a check (Allowed/Denied).
//!
//! A fixed window can let up to `2 * max_requests` through across a window boundary. That is an
//! accepted trade-off for a metrics push channel, which does not need burst smoothing.

use crate::clock::{Clock, TokioClock};
use std::sync::Arc;
use std::time::Duration;

/// Default number of messages allowed per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1_000);

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The message may be transmitted now.
    Allowed {
        /// Permits left in the current window after this acquisition.
        remaining: u32,
    },
    /// The message must wait.
    Denied {
        /// Time until the limiter will admit another message.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Core interface for outbound rate limiting.
///
/// Rejections are not errors: the caller decides whether to queue or drop.
pub trait RateLimiter: Send + std::fmt::Debug {
    /// Try to take one permit.
    fn acquire(&mut self) -> Decision;

    /// Boolean form of [`RateLimiter::acquire`].
    fn try_acquire(&mut self) -> bool {
        self.acquire().is_allowed()
    }

    /// Forget all accounting, as if no message had ever been sent.
    fn reset(&mut self);
}

/// Snapshot of the current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub window_start: u64,
    pub count: u32,
}

/// Fixed-window counter.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    max_requests: u32,
    window: Duration,
    current: Option<RateWindow>,
    clock: Arc<dyn Clock>,
}

impl FixedWindow {
    /// Limit to `max_requests` per `window`, timed by the tokio clock.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window, current: None, clock: Arc::new(TokioClock::default()) }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub(crate) fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// The window currently being counted, if any message was admitted yet.
    pub fn current_window(&self) -> Option<RateWindow> {
        self.current
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

impl RateLimiter for FixedWindow {
    fn acquire(&mut self) -> Decision {
        let now = self.clock.now_millis();
        let window_ms = self.window_millis();

        if let Some(window) = self.current.as_mut() {
            if now.saturating_sub(window.window_start) < window_ms {
                if window.count < self.max_requests {
                    window.count += 1;
                    return Decision::Allowed { remaining: self.max_requests - window.count };
                }
                let reopens_at = window.window_start.saturating_add(window_ms);
                return Decision::Denied { wait: Duration::from_millis(reopens_at - now) };
            }
        }

        if self.max_requests == 0 {
            return Decision::Denied { wait: self.window };
        }
        self.current = Some(RateWindow { window_start: now, count: 1 });
        Decision::Allowed { remaining: self.max_requests - 1 }
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max: u32, window_ms: u64) -> (FixedWindow, ManualClock) {
        let clock = ManualClock::starting_at(1_000);
        let limiter =
            FixedWindow::new(max, Duration::from_millis(window_ms)).with_clock(clock.clone());
        (limiter, clock)
    }

    #[test]
    fn admits_up_to_max_within_window() {
        let (mut limiter, _clock) = limiter(5, 1_000);
        for expected_remaining in (0..5).rev() {
            assert_eq!(limiter.acquire(), Decision::Allowed { remaining: expected_remaining });
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn denial_reports_time_until_window_reopens() {
        let (mut limiter, clock) = limiter(1, 1_000);
        assert!(limiter.try_acquire());
        clock.advance(300);
        assert_eq!(limiter.acquire(), Decision::Denied { wait: Duration::from_millis(700) });
    }

    #[test]
    fn new_window_resets_count() {
        let (mut limiter, clock) = limiter(2, 1_000);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        clock.advance(1_000);
        assert!(limiter.try_acquire());
        assert_eq!(limiter.current_window(), Some(RateWindow { window_start: 2_000, count: 1 }));
    }

    #[test]
    fn denied_attempts_do_not_consume_permits() {
        let (mut limiter, clock) = limiter(1, 1_000);
        assert!(limiter.try_acquire());
        for _ in 0..10 {
            assert!(!limiter.try_acquire());
        }
        assert_eq!(limiter.current_window().map(|w| w.count), Some(1));
        clock.advance(1_000);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn reset_clears_the_window() {
        let (mut limiter, _clock) = limiter(1, 1_000);
        assert!(limiter.try_acquire());
        limiter.reset();
        assert!(limiter.current_window().is_none());
        assert!(limiter.try_acquire());
    }

    #[test]
    fn zero_budget_always_denies() {
        let (mut limiter, _clock) = limiter(0, 500);
        assert_eq!(limiter.acquire(), Decision::Denied { wait: Duration::from_millis(500) });
    }
}
