//! Transport contract between the connection manager and the network.
//!
//! The manager only needs a message-oriented link: something that can be opened against a URL,
//! accepts whole outbound messages, and yields whole inbound messages plus close/error
//! notifications. Framing, TLS and handshakes are the implementation's business.
//!
//! - [`Connector`]: opens connections (one per connect attempt).
//! - [`Connection`]: a live link. The manager owns at most one at a time.
//! - [`TransportEvent`]: what a connection reports back.
//! - [`CredentialSource`]: supplies the credential payload forwarded on every new connection.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Close code for a normal, intentional shutdown of the link.
pub const NORMAL_CLOSURE: u16 = 1000;

/// An application message. The manager never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(text.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }

    /// Size of the message body in bytes (JSON is measured in its compact encoding).
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
            Payload::Json(value) => value.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interpret the payload as JSON when possible.
    ///
    /// Text and binary bodies are parsed; anything that does not parse yields `None`.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value.clone()),
            Payload::Text(text) => serde_json::from_str(text).ok(),
            Payload::Binary(bytes) => serde_json::from_slice(bytes).ok(),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// Notification delivered by a live [`Connection`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A whole inbound message.
    Message(Payload),
    /// The peer closed the link. `code` is the protocol close code, when one was sent.
    Closed { code: Option<u16>, reason: String },
    /// The link failed; it should be considered dead.
    Error(String),
}

/// Errors surfaced by transport implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Open(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
}

/// Opens connections to a URL.
///
/// Implementations should not retry internally; the manager owns retry policy.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    async fn open(&self, url: &str) -> Result<Self::Connection, TransportError>;
}

/// A live, message-oriented link.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Transmit one whole message.
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError>;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: the manager drops this future whenever a command arrives first.
    /// `None` means the underlying stream ended without a close handshake.
    async fn recv(&mut self) -> Option<TransportEvent>;

    /// Close the link. Errors during close are swallowed by implementations.
    async fn close(&mut self);
}

/// Supplies the credential message sent first on every new connection.
///
/// Called once per successful open, so rotating tokens are picked up on reconnect.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Option<Payload>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<Payload> + Send + Sync,
{
    fn credentials(&self) -> Option<Payload> {
        self()
    }
}

impl fmt::Debug for dyn CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialSource")
    }
}
