//! Circuit breaker guarding reconnect attempts.
//!
//! Failures are counted inside a sliding `monitoring_period`. Once `failure_threshold` of them
//! accumulate the breaker opens and refuses attempts until `reset_timeout` has passed since the
//! last failure. The first [`CircuitBreaker::can_attempt`] after that moves it to half-open and
//! lets exactly one probe through; the probe's outcome either closes the breaker
//! ([`CircuitBreaker::record_success`]) or re-opens it with a fresh timeout.
//!
//! The breaker is owned by the connection driver task, so it takes `&mut self` instead of the
//! atomics a shared breaker would need.

use crate::clock::{Clock, TokioClock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of failures that opens the breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Default cooldown before a half-open probe.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Default window in which failures are counted.
pub const DEFAULT_MONITORING_PERIOD: Duration = Duration::from_millis(60_000);

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Attempts flow normally.
    Closed,
    /// Attempts are refused until the reset timeout elapses.
    Open,
    /// One probe attempt has been let through and its outcome is pending.
    HalfOpen,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub is_open: bool,
    /// Failures currently inside the monitoring period.
    pub failures: u32,
    pub last_failure: Option<u64>,
    pub next_retry: Option<u64>,
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// Failure threshold must be > 0.
    InvalidFailureThreshold {
        /// Value provided by caller.
        provided: u32,
    },
    /// Reset timeout must be > 0.
    InvalidResetTimeout(Duration),
    /// Monitoring period must be > 0.
    InvalidMonitoringPeriod(Duration),
}

impl fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::InvalidFailureThreshold { provided } => {
                write!(f, "failure_threshold must be > 0 (got {})", provided)
            }
            CircuitBreakerError::InvalidResetTimeout(timeout) => {
                write!(f, "reset_timeout must be > 0 (got {:?})", timeout)
            }
            CircuitBreakerError::InvalidMonitoringPeriod(period) => {
                write!(f, "monitoring_period must be > 0 (got {:?})", period)
            }
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    reset_timeout: Duration,
    monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            monitoring_period: DEFAULT_MONITORING_PERIOD,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    pub fn new(
        failure_threshold: u32,
        reset_timeout: Duration,
        monitoring_period: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if reset_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidResetTimeout(reset_timeout));
        }
        if monitoring_period.is_zero() {
            return Err(CircuitBreakerError::InvalidMonitoringPeriod(monitoring_period));
        }
        Ok(Self { failure_threshold, reset_timeout, monitoring_period })
    }

    /// Failures within the monitoring period that open the breaker.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Time to stay open before a half-open probe.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// How far back failures are counted.
    pub fn monitoring_period(&self) -> Duration {
        self.monitoring_period
    }
}

/// Failure-counting circuit breaker with a single half-open probe.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    failures: VecDeque<u64>,
    next_retry: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a closed breaker timed by the tokio clock.
    ///
    /// # Examples
    /// ```
    /// use lifeline::{CircuitBreaker, CircuitBreakerConfig};
    /// use std::time::Duration;
    ///
    /// let config = CircuitBreakerConfig::new(
    ///     2,
    ///     Duration::from_secs(5),
    ///     Duration::from_secs(60),
    /// )
    /// .unwrap();
    /// let mut breaker = CircuitBreaker::new(config);
    /// assert!(breaker.can_attempt());
    /// ```
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            next_retry: None,
            clock: Arc::new(TokioClock::default()),
        }
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

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// When the next probe will be allowed, if the breaker is open.
    pub fn next_retry(&self) -> Option<u64> {
        match self.state {
            BreakerState::Closed => None,
            _ => self.next_retry,
        }
    }

    /// Whether a connect attempt may be made now.
    ///
    /// While open, the first call at or after `next_retry` moves the breaker to half-open and
    /// returns `true`; every other call returns `false` until the probe outcome is recorded.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let now = self.clock.now_millis();
                let due = match self.next_retry {
                    Some(at) => now >= at,
                    None => true,
                };
                if due {
                    self.state = BreakerState::HalfOpen;
                    tracing::info!("Circuit breaker → half-open");
                }
                due
            }
        }
    }

    /// Record a failed connect attempt.
    pub fn record_failure(&mut self) {
        let now = self.clock.now_millis();
        self.failures.push_back(now);
        self.prune(now);
        let failures = self.failure_count();

        match self.state {
            BreakerState::HalfOpen => {
                self.open(now);
                tracing::warn!(failures, "Circuit breaker: probe failed → open");
            }
            BreakerState::Open => {
                self.open(now);
            }
            BreakerState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.open(now);
                    tracing::error!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker → open"
                    );
                } else {
                    tracing::debug!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker: failure recorded"
                    );
                }
            }
        }
    }

    /// Record a successful connect; fully closes the breaker.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!("Circuit breaker → closed");
        }
        self.reset();
    }

    /// Forget all failures and close.
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.failures.clear();
        self.next_retry = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            is_open: self.state != BreakerState::Closed,
            failures: self.failure_count(),
            last_failure: self.failures.back().copied(),
            next_retry: self.next_retry(),
        }
    }

    fn open(&mut self, now: u64) {
        self.state = BreakerState::Open;
        self.next_retry = Some(now.saturating_add(millis(self.config.reset_timeout)));
    }

    fn prune(&mut self, now: u64) {
        let period = millis(self.config.monitoring_period);
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_sub(oldest) > period {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_count(&self) -> u32 {
        u32::try_from(self.failures.len()).unwrap_or(u32::MAX)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
