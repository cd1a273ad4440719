//! WebSocket transport for lifeline.
//!
//! [`WsConnector`] opens `ws://` (and, with the `tls` feature, `wss://`) connections with
//! `tokio-tungstenite` and adapts them to the lifeline transport contract:
//!
//! - text frames become [`Payload::Text`], binary frames [`Payload::Binary`];
//! - outbound [`Payload::Json`] is sent as a compact text frame;
//! - close frames are reported with their close code; ping/pong is handled by tungstenite.
//!
//! ```no_run
//! use lifeline::{ConnectionManager, ManagerConfig};
//! use lifeline_ws::WsConnector;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let manager =
//!     ConnectionManager::new(ManagerConfig::new("ws://127.0.0.1:9000/metrics"), WsConnector::new())?;
//! manager.connect().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lifeline::{Connection, Connector, Payload, TransportError, TransportEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn open(&self, url: &str) -> Result<WsConnection, TransportError> {
        let (stream, response) =
            connect_async(url).await.map_err(|err| TransportError::Open(err.to_string()))?;
        debug!(url, status = %response.status(), "websocket handshake complete");
        Ok(WsConnection { stream })
    }
}

/// A live WebSocket.
#[derive(Debug)]
pub struct WsConnection {
    stream: Stream,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        self.stream
            .send(to_message(payload))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => {
                    if let Some(event) = from_message(message) {
                        return Some(event);
                    }
                }
                Some(Err(err)) => return Some(TransportEvent::Error(err.to_string())),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close failed");
        }
    }
}

/// Outbound payload as a WebSocket frame.
pub fn to_message(payload: &Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.clone()),
        Payload::Binary(bytes) => Message::Binary(bytes.clone()),
        Payload::Json(value) => Message::Text(value.to_string()),
    }
}

/// Inbound frame as a transport event; control frames yield `None`.
pub fn from_message(message: Message) -> Option<TransportEvent> {
    match message {
        Message::Text(text) => Some(TransportEvent::Message(Payload::Text(text))),
        Message::Binary(bytes) => Some(TransportEvent::Message(Payload::Binary(bytes))),
        Message::Close(frame) => Some(match frame {
            Some(frame) => TransportEvent::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => TransportEvent::Closed { code: None, reason: String::new() },
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
