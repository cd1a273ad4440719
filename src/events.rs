//! Events published by a connection manager.
//!
//! Lifecycle notifications and inbound application messages share one [`Event`] type so a
//! consumer can subscribe to either the same way. [`EventType`] is the subscription key.

use crate::queue::DropStrategy;
use crate::state::ConnectionState;
use crate::transport::Payload;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Category used for inbound messages that carry no recognizable type.
pub const DEFAULT_MESSAGE_KIND: &str = "message";

/// Maps an inbound payload to its message category.
pub type Classifier = Arc<dyn Fn(&Payload) -> String + Send + Sync>;

/// Default classifier: the string `"type"` field of a JSON object body, else `"message"`.
pub fn classify_by_type_field(payload: &Payload) -> String {
    payload
        .as_json()
        .as_ref()
        .and_then(|value| value.get("type"))
        .and_then(|kind| kind.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| DEFAULT_MESSAGE_KIND.to_owned())
}

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called `disconnect()`.
    Requested,
    /// The peer closed the link.
    ClosedByPeer { code: Option<u16>, reason: String },
    /// The link failed underneath us.
    ConnectionLost { reason: String },
    /// Reconnect attempts ran out.
    GaveUp,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::ClosedByPeer { code: Some(code), reason } => {
                write!(f, "closed by peer ({}): {}", code, reason)
            }
            DisconnectReason::ClosedByPeer { code: None, reason } => {
                write!(f, "closed by peer: {}", reason)
            }
            DisconnectReason::ConnectionLost { reason } => write!(f, "connection lost: {}", reason),
            DisconnectReason::GaveUp => write!(f, "reconnect attempts exhausted"),
        }
    }
}

/// Everything a manager publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The transport is open.
    Connected { url: String },
    /// The transport went away (or the session ended).
    Disconnected { reason: DisconnectReason },
    /// A transport error was absorbed.
    Error { message: String },
    /// Attempts were exhausted; the manager is Disconnected until `connect()` is called again.
    ReconnectFailed { attempts: u32 },
    /// A reconnect was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    StateChanged { from: ConnectionState, to: ConnectionState },
    /// The outbound queue discarded a message.
    MessageDropped { message: Payload, strategy: DropStrategy },
    /// An inbound application message.
    Message { kind: String, payload: Payload },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Connected { .. } => EventType::Connected,
            Event::Disconnected { .. } => EventType::Disconnected,
            Event::Error { .. } => EventType::Error,
            Event::ReconnectFailed { .. } => EventType::ReconnectFailed,
            Event::Reconnecting { .. } => EventType::Reconnecting,
            Event::StateChanged { .. } => EventType::StateChanged,
            Event::MessageDropped { .. } => EventType::MessageDropped,
            Event::Message { kind, .. } => EventType::Message(kind.clone()),
        }
    }

    /// Inbound payload, for message events.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Event::Message { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connected { url } => write!(f, "Connected({})", url),
            Event::Disconnected { reason } => write!(f, "Disconnected({})", reason),
            Event::Error { message } => write!(f, "Error({})", message),
            Event::ReconnectFailed { attempts } => {
                write!(f, "ReconnectFailed(attempts={})", attempts)
            }
            Event::Reconnecting { attempt, delay } => {
                write!(f, "Reconnecting(#{}, delay={:?})", attempt, delay)
            }
            Event::StateChanged { from, to } => write!(f, "StateChanged({} → {})", from, to),
            Event::MessageDropped { strategy, .. } => {
                write!(f, "MessageDropped(strategy={})", strategy)
            }
            Event::Message { kind, payload } => {
                write!(f, "Message({}, {} bytes)", kind, payload.len())
            }
        }
    }
}

/// Subscription key.
///
/// Converts from strings: the lifecycle names (`"connected"`, `"disconnected"`, `"error"`,
/// `"reconnect_failed"`, `"reconnecting"`, `"state_changed"`, `"message_dropped"`) map to their
/// variants and anything else is an inbound message category. An inbound message whose category
/// is itself a lifecycle name is delivered under both keys; see [`crate::EventHub::emit`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Connected,
    Disconnected,
    Error,
    ReconnectFailed,
    Reconnecting,
    StateChanged,
    MessageDropped,
    Message(String),
}

impl EventType {
    pub fn name(&self) -> &str {
        match self {
            EventType::Connected => "connected",
            EventType::Disconnected => "disconnected",
            EventType::Error => "error",
            EventType::ReconnectFailed => "reconnect_failed",
            EventType::Reconnecting => "reconnecting",
            EventType::StateChanged => "state_changed",
            EventType::MessageDropped => "message_dropped",
            EventType::Message(kind) => kind,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "connected" => EventType::Connected,
            "disconnected" => EventType::Disconnected,
            "error" => EventType::Error,
            "reconnect_failed" => EventType::ReconnectFailed,
            "reconnecting" => EventType::Reconnecting,
            "state_changed" => EventType::StateChanged,
            "message_dropped" => EventType::MessageDropped,
            other => EventType::Message(other.to_owned()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from(value.as_str())
    }
}

impl From<&String> for EventType {
    fn from(value: &String) -> Self {
        EventType::from(value.as_str())
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert an event into a JSON value, e.g. for forwarding to a UI store.
pub fn event_to_json(event: &Event) -> serde_json::Value {
    let kind = event.event_type();
    match event {
        Event::Connected { url } => json!({ "kind": kind.name(), "url": url }),
        Event::Disconnected { reason } => {
            json!({ "kind": kind.name(), "reason": reason.to_string() })
        }
        Event::Error { message } => json!({ "kind": kind.name(), "message": message }),
        Event::ReconnectFailed { attempts } => json!({ "kind": kind.name(), "attempts": attempts }),
        Event::Reconnecting { attempt, delay } => json!({
            "kind": kind.name(),
            "attempt": attempt,
            "delay_ms": clamp_u64(delay.as_millis()),
        }),
        Event::StateChanged { from, to } => json!({ "kind": kind.name(), "from": from, "to": to }),
        Event::MessageDropped { message, strategy } => json!({
            "kind": kind.name(),
            "message": message,
            "strategy": strategy,
        }),
        Event::Message { kind, payload } => json!({ "kind": kind, "payload": payload }),
    }
}
