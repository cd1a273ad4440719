#![forbid(unsafe_code)]
#![cfg_attr(not(test), warn(clippy::all))]

//! # lifeline
//!
//! A resilient manager for one long-lived, message-oriented connection (typically a WebSocket
//! feeding a metrics dashboard).
//!
//! ## Features
//!
//! - **Automatic reconnect** with exponential backoff, a ceiling and `[0.8, 1.2]` jitter
//! - **Circuit breaking** so a server that is down is not hammered, with half-open probes
//! - **Bounded outbound queue** while the link is down, with drop-oldest / drop-newest policies
//! - **Fixed-window rate limiting** of outbound messages
//! - **Typed publish/subscribe** for inbound messages and lifecycle events, with per-handler
//!   isolation
//! - **Pluggable transport**: anything implementing [`Connector`] (see the `lifeline-ws` crate
//!   for WebSockets, [`testing::MockConnector`] for tests)
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::testing::MockConnector;
//! use lifeline::{ConnectionManager, ConnectionState, Event, ManagerConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let connector = MockConnector::new();
//!     let manager =
//!         ConnectionManager::new(ManagerConfig::new("ws://localhost/stream"), connector.clone())
//!             .unwrap();
//!
//!     manager.on("reconnect_failed", |event: &Event| {
//!         eprintln!("giving up: {event}");
//!         Ok(())
//!     });
//!
//!     // Queued while disconnected, flushed in order once connected.
//!     manager.send("hello").unwrap();
//!     assert!(manager.connect().await.unwrap());
//!     assert_eq!(manager.status(), ConnectionState::Connected);
//!
//!     manager.disconnect().await;
//!     assert_eq!(manager.status(), ConnectionState::Disconnected);
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_hub;
pub mod events;
pub mod jitter;
pub mod manager;
pub mod prelude;
pub mod queue;
pub mod rate_limit;
pub mod sleeper;
pub mod state;
pub mod testing;
pub mod transport;

// Re-exports
pub use backoff::{BackoffError, BackoffPolicy};
pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ManagerConfig;
pub use error::{ConfigError, ManagerError};
pub use event_hub::{EventHub, HandlerError, Subscription};
pub use events::{classify_by_type_field, DisconnectReason, Event, EventType};
pub use jitter::{Jitter, JitterError};
pub use manager::{ConnectionManager, ManagerBuilder, ManagerSnapshot};
pub use queue::{DropStrategy, MessageQueue, QueuedMessage};
pub use rate_limit::{Decision, FixedWindow, RateLimiter, RateWindow};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
pub use state::{ConnectionState, ReconnectAttempt};
pub use transport::{
    Connection, Connector, CredentialSource, Payload, TransportError, TransportEvent,
};
