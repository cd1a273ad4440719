//! Connection lifecycle state and reconnect bookkeeping.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// The circuit breaker refused an attempt; waiting for the probe window.
    CircuitOpen,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::CircuitOpen => "circuit_open",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnect attempt counter for the current outage.
///
/// `count` only grows while an outage lasts and returns to zero when a connection is established
/// (or the session is reset by `disconnect()` / a fresh `connect()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectAttempt {
    pub count: u32,
    pub last_failure_at: Option<u64>,
    pub next_eligible_at: Option<u64>,
}

impl ReconnectAttempt {
    /// Count a failed open or abnormal close observed at `now`; returns the new count.
    pub fn record_failure(&mut self, now: u64) -> u32 {
        self.count = self.count.saturating_add(1);
        self.last_failure_at = Some(now);
        self.next_eligible_at = None;
        self.count
    }

    /// Remember when the next attempt is scheduled.
    pub fn schedule(&mut self, at: u64) {
        self.next_eligible_at = Some(at);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_reset() {
        let mut attempt = ReconnectAttempt::default();
        assert_eq!(attempt.record_failure(100), 1);
        attempt.schedule(1_100);
        assert_eq!(attempt.record_failure(1_200), 2);
        assert_eq!(attempt.last_failure_at, Some(1_200));
        assert_eq!(attempt.next_eligible_at, None);

        attempt.reset();
        assert_eq!(attempt, ReconnectAttempt::default());
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(ConnectionState::CircuitOpen.to_string(), "circuit_open");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
