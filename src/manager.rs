//! The connection manager handle.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle to a single driver task that owns the
//! transport, the outbound queue, the rate limiter, the circuit breaker and the reconnect
//! bookkeeping. Every public method either reads shared state (`status()`, the event hub) or
//! posts a command to the driver, so state transitions are strictly sequential without locks.
//!
//! ```no_run
//! use lifeline::{ConnectionManager, Event, ManagerConfig};
//! use lifeline::testing::MockConnector;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::builder(
//!     ManagerConfig::new("ws://localhost:9000/metrics"),
//!     MockConnector::new(),
//! )
//! .build()?;
//!
//! manager.on("cpu", |event: &Event| {
//!     println!("cpu sample: {:?}", event.payload());
//!     Ok(())
//! });
//! manager.connect().await?;
//! manager.send(r#"{"type":"subscribe","topic":"cpu"}"#)?;
//! # Ok(())
//! # }
//! ```

mod driver;

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::clock::{Clock, TokioClock};
use crate::config::ManagerConfig;
use crate::error::{ConfigError, ManagerError};
use crate::event_hub::{EventHub, HandlerError, Subscription};
use crate::events::{classify_by_type_field, Classifier, Event, EventType};
use crate::jitter::Jitter;
use crate::queue::MessageQueue;
use crate::rate_limit::{FixedWindow, RateLimiter};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state::{ConnectionState, ReconnectAttempt};
use crate::transport::{Connector, CredentialSource, Payload};
use driver::{Command, Driver};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Point-in-time view of a manager, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSnapshot {
    pub state: ConnectionState,
    pub attempts: ReconnectAttempt,
    pub breaker: CircuitBreakerState,
    /// Messages waiting in the outbound queue.
    pub queued: usize,
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

/// Handle to a managed, self-healing connection.
///
/// Clones talk to the same driver task. The task stops (closing the transport and releasing every
/// subscription) once the last handle is dropped. A handler that captures a handle keeps the
/// task alive until it is unsubscribed.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    hub: EventHub,
}

impl ConnectionManager {
    /// Start configuring a manager for `connector`.
    pub fn builder<C: Connector>(config: ManagerConfig, connector: C) -> ManagerBuilder<C> {
        ManagerBuilder::new(config, connector)
    }

    /// Build a manager with default collaborators.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new<C: Connector>(config: ManagerConfig, connector: C) -> Result<Self, ConfigError> {
        Self::builder(config, connector).build()
    }

    /// Connect, or report the current connectivity.
    ///
    /// - Connected: `Ok(true)` immediately.
    /// - Connecting: `Ok(false)` immediately; an open is already in flight.
    /// - Reconnecting or CircuitOpen: joins the running recovery without resetting its attempt
    ///   count, and resolves like a fresh sequence does.
    /// - Disconnected: starts a fresh sequence and resolves `Ok(true)` once connected,
    ///   [`ManagerError::ReconnectExhausted`] when attempts run out, or
    ///   [`ManagerError::Cancelled`] if [`disconnect`](Self::disconnect) intervenes.
    pub async fn connect(&self) -> Result<bool, ManagerError> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Connect(reply))?;
        response.await.map_err(|_| ManagerError::Shutdown)?
    }

    /// Send a message, or queue it if it cannot go out right now.
    ///
    /// Never fails because of the connection; queued messages are flushed in order once the link
    /// is up and the rate limiter allows. Only errors if the manager task has stopped.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), ManagerError> {
        self.post(Command::Send(payload.into()))
    }

    /// Close the connection and reset the session: the queue is cleared, attempts, breaker and
    /// rate limiter start over, and any pending `connect()` resolves with `Cancelled`.
    ///
    /// A no-op when already disconnected. Returns once the driver has processed it.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.post(Command::Disconnect(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Current state, without side effects.
    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Watch state changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Subscribe `handler` to an event type (`"connected"`, `"reconnect_failed"`, a message
    /// category, ...).
    ///
    /// Handlers run on the driver task; they must not block. Calling [`send`](Self::send) from
    /// a handler is fine.
    pub fn on<F>(&self, event_type: impl Into<EventType>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.hub.on(event_type, handler)
    }

    /// Stream of every event from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.hub.stream()
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Diagnostics snapshot, taken after every previously posted command has been handled.
    pub async fn snapshot(&self) -> Result<ManagerSnapshot, ManagerError> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Snapshot(reply))?;
        response.await.map_err(|_| ManagerError::Shutdown)
    }

    fn post(&self, command: Command) -> Result<(), ManagerError> {
        self.commands.send(command).map_err(|_| ManagerError::Shutdown)
    }
}

/// Builder for [`ConnectionManager`].
pub struct ManagerBuilder<C> {
    config: ManagerConfig,
    connector: C,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Arc<dyn Sleeper>,
    classifier: Classifier,
    credentials: Option<Arc<dyn CredentialSource>>,
    rate_limiter: Option<Box<dyn RateLimiter>>,
    jitter: Option<Jitter>,
    hub: Option<EventHub>,
}

impl<C: Connector> ManagerBuilder<C> {
    fn new(config: ManagerConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            clock: None,
            sleeper: Arc::new(TokioSleeper),
            classifier: Arc::new(classify_by_type_field),
            credentials: None,
            rate_limiter: None,
            jitter: None,
            hub: None,
        }
    }

    /// Time source for the breaker, rate limiter and attempt bookkeeping.
    pub fn with_clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Sleeper used for backoff, probe and rate-window timers.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// How inbound messages are mapped to event categories.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Payload) -> String + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Credential payload forwarded first on every new connection.
    pub fn with_credentials<S: CredentialSource + 'static>(mut self, source: S) -> Self {
        self.credentials = Some(Arc::new(source));
        self
    }

    /// Replace the fixed-window limiter built from the config.
    pub fn with_rate_limiter<L: RateLimiter + 'static>(mut self, limiter: L) -> Self {
        self.rate_limiter = Some(Box::new(limiter));
        self
    }

    /// Replace the default `[0.8, 1.2]` backoff jitter.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Publish into an existing hub instead of a fresh one.
    pub fn with_event_hub(mut self, hub: EventHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Validate the configuration and spawn the driver task.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn build(self) -> Result<ConnectionManager, ConfigError> {
        self.config.validate()?;

        let mut backoff: BackoffPolicy = self.config.backoff_policy()?;
        if let Some(jitter) = self.jitter {
            backoff = backoff.with_jitter(jitter);
        }
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(TokioClock::default()),
        };
        let breaker = CircuitBreaker::new(self.config.circuit_breaker_config()?)
            .with_shared_clock(Arc::clone(&clock));
        let limiter: Box<dyn RateLimiter> = match self.rate_limiter {
            Some(limiter) => limiter,
            None => Box::new(
                FixedWindow::new(self.config.max_requests, self.config.window())
                    .with_shared_clock(Arc::clone(&clock)),
            ),
        };
        let queue = MessageQueue::new(self.config.max_queue_size, self.config.drop_strategy);
        let hub = self.hub.unwrap_or_default();

        let (commands, inbox) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver {
            config: self.config,
            connector: Arc::new(self.connector),
            commands: inbox,
            status: status_tx,
            hub: hub.clone(),
            clock,
            sleeper: self.sleeper,
            backoff,
            breaker,
            limiter,
            queue,
            classifier: self.classifier,
            credentials: self.credentials,
            state: ConnectionState::Disconnected,
            attempts: ReconnectAttempt::default(),
            connection: None,
            opening: None,
            timer: None,
            waiters: Vec::new(),
            counters: Default::default(),
        };
        tokio::spawn(driver.run());

        Ok(ConnectionManager { commands, status, hub })
    }
}

impl<C> std::fmt::Debug for ManagerBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("config", &self.config)
            .field("sleeper", &self.sleeper)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}
