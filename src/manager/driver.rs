//! The connection state machine.
//!
//! One task per manager. It multiplexes four inputs with a biased `select!`:
//!
//! 1. commands from handles (so `disconnect()` wins a race with a completing open),
//! 2. the in-flight transport open, if any,
//! 3. events from the live connection, if any,
//! 4. the single timer slot (backoff retry, half-open probe or rate-window flush).
//!
//! Dropping the open future or the timer is how pending work is cancelled.

use super::ManagerSnapshot;
use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::clock::Clock;
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::event_hub::EventHub;
use crate::events::{Classifier, DisconnectReason, Event};
use crate::queue::{MessageQueue, QueuedMessage};
use crate::rate_limit::{Decision, RateLimiter};
use crate::sleeper::Sleeper;
use crate::state::{ConnectionState, ReconnectAttempt};
use crate::transport::{
    Connection, Connector, CredentialSource, Payload, TransportError, TransportEvent,
    NORMAL_CLOSURE,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

pub(super) type ConnectReply = oneshot::Sender<Result<bool, ManagerError>>;
pub(super) type OpenFuture<T> = BoxFuture<'static, Result<T, TransportError>>;

/// Requests posted by [`ConnectionManager`](super::ConnectionManager) handles.
pub(crate) enum Command {
    Connect(ConnectReply),
    Send(Payload),
    Disconnect(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<ManagerSnapshot>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TimerKind {
    /// Backoff elapsed; try to open again.
    Retry,
    /// Breaker cooldown elapsed; send the half-open probe.
    Probe,
    /// Rate window reopened; continue flushing the queue.
    Flush,
}

pub(super) struct Timer {
    kind: TimerKind,
    sleep: BoxFuture<'static, ()>,
}

enum Input<T> {
    Command(Command),
    Opened(Result<T, TransportError>),
    Transport(Option<TransportEvent>),
    Timer(TimerKind),
    Shutdown,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    sent: u64,
    received: u64,
    dropped: u64,
}

pub(super) struct Driver<C: Connector> {
    pub(super) config: ManagerConfig,
    pub(super) connector: Arc<C>,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
    pub(super) status: watch::Sender<ConnectionState>,
    pub(super) hub: EventHub,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) sleeper: Arc<dyn Sleeper>,
    pub(super) backoff: BackoffPolicy,
    pub(super) breaker: CircuitBreaker,
    pub(super) limiter: Box<dyn RateLimiter>,
    pub(super) queue: MessageQueue,
    pub(super) classifier: Classifier,
    pub(super) credentials: Option<Arc<dyn CredentialSource>>,
    pub(super) state: ConnectionState,
    pub(super) attempts: ReconnectAttempt,
    pub(super) connection: Option<C::Connection>,
    pub(super) opening: Option<OpenFuture<C::Connection>>,
    pub(super) timer: Option<Timer>,
    pub(super) waiters: Vec<ConnectReply>,
    pub(super) counters: Counters,
}

impl<C: Connector> Driver<C> {
    pub(super) async fn run(mut self) {
        debug!(url = %self.config.url, "connection manager started");
        loop {
            match self.next_input().await {
                Input::Command(command) => self.handle_command(command).await,
                Input::Opened(result) => {
                    self.opening = None;
                    match result {
                        Ok(connection) => self.on_open(connection).await,
                        Err(err) => self.on_open_failed(err),
                    }
                }
                Input::Transport(event) => self.on_transport_event(event).await,
                Input::Timer(kind) => {
                    self.timer = None;
                    self.on_timer(kind).await;
                }
                Input::Shutdown => break,
            }
        }
        self.shutdown().await;
    }

    async fn next_input(&mut self) -> Input<C::Connection> {
        let Self { commands, opening, connection, timer, .. } = self;
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => Input::Command(command),
                None => Input::Shutdown,
            },
            result = wait_open(opening) => Input::Opened(result),
            event = wait_transport(connection) => Input::Transport(event),
            kind = wait_timer(timer) => Input::Timer(kind),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply),
            Command::Send(payload) => self.submit(payload).await,
            Command::Disconnect(ack) => {
                self.disconnect().await;
                let _ = ack.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn connect(&mut self, reply: ConnectReply) {
        match self.state {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(true));
            }
            ConnectionState::Connecting => {
                let _ = reply.send(Ok(false));
            }
            ConnectionState::Reconnecting | ConnectionState::CircuitOpen => {
                debug!(state = %self.state, "connect joins the running recovery");
                self.waiters.push(reply);
            }
            ConnectionState::Disconnected => {
                info!(url = %self.config.url, "connecting");
                self.waiters.push(reply);
                self.attempts.reset();
                self.attempt_open();
            }
        }
    }

    /// Open the transport if the breaker allows it, otherwise wait in CircuitOpen.
    fn attempt_open(&mut self) {
        if !self.breaker.can_attempt() {
            self.enter_circuit_open();
            return;
        }
        self.transition(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout();
        self.opening = Some(
            async move {
                match tokio::time::timeout(timeout, connector.open(&url)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                }
            }
            .boxed(),
        );
    }

    async fn on_open(&mut self, connection: C::Connection) {
        self.connection = Some(connection);
        self.breaker.record_success();
        self.attempts.reset();
        self.transition(ConnectionState::Connected);
        info!(url = %self.config.url, queued = self.queue.len(), "connected");
        self.hub.emit(&Event::Connected { url: self.config.url.clone() });
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(true));
        }

        if let Some(credentials) = self.credentials.as_ref().and_then(|source| source.credentials())
        {
            if let Err(err) = self.transmit(&credentials).await {
                self.connection_lost(DisconnectReason::ConnectionLost { reason: err.to_string() })
                    .await;
                return;
            }
            debug!("credentials forwarded");
        }
        self.flush().await;
    }

    fn on_open_failed(&mut self, err: TransportError) {
        warn!(url = %self.config.url, error = %err, "connection attempt failed");
        self.hub.emit(&Event::Error { message: err.to_string() });
        self.breaker.record_failure();
        self.handle_failure();
    }

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(payload)) => {
                self.counters.received += 1;
                let kind = (self.classifier)(&payload);
                self.hub.emit(&Event::Message { kind, payload });
            }
            Some(TransportEvent::Closed { code: Some(NORMAL_CLOSURE), reason }) => {
                self.peer_closed(reason);
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.connection_lost(DisconnectReason::ClosedByPeer { code, reason }).await;
            }
            Some(TransportEvent::Error(message)) => {
                self.hub.emit(&Event::Error { message: message.clone() });
                self.connection_lost(DisconnectReason::ConnectionLost { reason: message }).await;
            }
            None => {
                self.connection_lost(DisconnectReason::ConnectionLost {
                    reason: "stream ended without a close frame".to_owned(),
                })
                .await;
            }
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match (kind, self.state) {
            (TimerKind::Retry, ConnectionState::Reconnecting)
            | (TimerKind::Probe, ConnectionState::CircuitOpen) => self.attempt_open(),
            (TimerKind::Flush, ConnectionState::Connected) => self.flush().await,
            (kind, state) => debug!(?kind, %state, "stale timer ignored"),
        }
    }

    /// Route an outbound message: straight to the transport when possible, else the queue.
    async fn submit(&mut self, payload: Payload) {
        if self.state != ConnectionState::Connected || !self.queue.is_empty() {
            self.enqueue(payload);
            if self.state == ConnectionState::Connected && self.timer.is_none() {
                self.flush().await;
            }
            return;
        }

        match self.limiter.acquire() {
            Decision::Allowed { .. } => {
                if let Err(err) = self.transmit(&payload).await {
                    let message = QueuedMessage::new(payload, self.clock.now_millis());
                    self.requeue(vec![message]);
                    self.connection_lost(DisconnectReason::ConnectionLost {
                        reason: err.to_string(),
                    })
                    .await;
                }
            }
            Decision::Denied { wait } => {
                debug!(wait_ms = wait.as_millis() as u64, "rate limited, message queued");
                self.enqueue(payload);
                self.arm_timer(TimerKind::Flush, wait);
            }
        }
    }

    /// Drain the queue through the rate limiter, oldest first.
    async fn flush(&mut self) {
        if self.state != ConnectionState::Connected || self.queue.is_empty() {
            return;
        }
        let mut pending: VecDeque<QueuedMessage> = self.queue.drain().into();
        debug!(count = pending.len(), "flushing outbound queue");

        while let Some(message) = pending.pop_front() {
            match self.limiter.acquire() {
                Decision::Allowed { .. } => {
                    if let Err(err) = self.transmit(&message.payload).await {
                        self.requeue(std::iter::once(message).chain(pending));
                        self.connection_lost(DisconnectReason::ConnectionLost {
                            reason: err.to_string(),
                        })
                        .await;
                        return;
                    }
                }
                Decision::Denied { wait } => {
                    self.requeue(std::iter::once(message).chain(pending));
                    debug!(
                        wait_ms = wait.as_millis() as u64,
                        remaining = self.queue.len(),
                        "rate limited, flush paused"
                    );
                    self.arm_timer(TimerKind::Flush, wait);
                    return;
                }
            }
        }
    }

    async fn transmit(&mut self, payload: &Payload) -> Result<(), TransportError> {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        connection.send(payload).await?;
        self.counters.sent += 1;
        Ok(())
    }

    fn enqueue(&mut self, payload: Payload) {
        let message = QueuedMessage::new(payload, self.clock.now_millis());
        if let Some(dropped) = self.queue.enqueue(message) {
            self.report_drop(dropped);
        }
    }

    fn requeue<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = QueuedMessage>,
    {
        for dropped in self.queue.restore(messages) {
            self.report_drop(dropped);
        }
    }

    fn report_drop(&mut self, dropped: QueuedMessage) {
        self.counters.dropped += 1;
        let strategy = self.queue.strategy();
        debug!(%strategy, capacity = self.queue.capacity(), "outbound queue full, message dropped");
        self.hub.emit(&Event::MessageDropped { message: dropped.payload, strategy });
    }

    /// The live connection died; tear it down and schedule recovery.
    async fn connection_lost(&mut self, reason: DisconnectReason) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        warn!(url = %self.config.url, %reason, "connection lost");
        self.hub.emit(&Event::Disconnected { reason });
        self.handle_failure();
    }

    /// The peer ended the session on purpose; stay disconnected.
    fn peer_closed(&mut self, reason: String) {
        self.connection = None;
        self.timer = None;
        self.attempts.reset();
        info!(url = %self.config.url, %reason, "connection closed by peer");
        self.transition(ConnectionState::Disconnected);
        self.hub.emit(&Event::Disconnected {
            reason: DisconnectReason::ClosedByPeer { code: Some(NORMAL_CLOSURE), reason },
        });
    }

    /// Count a failed open or abnormal close and decide what happens next.
    fn handle_failure(&mut self) {
        let now = self.clock.now_millis();
        let attempt = self.attempts.record_failure(now);
        if attempt >= self.config.max_reconnect_attempts {
            self.give_up(attempt);
            return;
        }

        self.transition(ConnectionState::Reconnecting);
        let blocked = self.breaker.state() == BreakerState::Open
            && self.breaker.next_retry().is_some_and(|at| at > now);
        if blocked {
            self.enter_circuit_open();
            return;
        }

        let delay = self.backoff.delay(attempt);
        self.attempts.schedule(now.saturating_add(millis(delay)));
        info!(attempt, delay_ms = millis(delay), "reconnect scheduled");
        self.hub.emit(&Event::Reconnecting { attempt, delay });
        self.arm_timer(TimerKind::Retry, delay);
    }

    fn enter_circuit_open(&mut self) {
        let now = self.clock.now_millis();
        let retry_at = self
            .breaker
            .next_retry()
            .filter(|at| *at > now)
            .unwrap_or_else(|| now.saturating_add(millis(self.config.reset_timeout())));
        self.attempts.schedule(retry_at);
        warn!(retry_in_ms = retry_at - now, "circuit open, holding reconnect attempts");
        self.transition(ConnectionState::CircuitOpen);
        self.arm_timer(TimerKind::Probe, Duration::from_millis(retry_at - now));
    }

    fn give_up(&mut self, attempts: u32) {
        self.opening = None;
        self.timer = None;
        error!(url = %self.config.url, attempts, "reconnect attempts exhausted");
        self.transition(ConnectionState::Disconnected);
        self.hub.emit(&Event::Disconnected { reason: DisconnectReason::GaveUp });
        self.hub.emit(&Event::ReconnectFailed { attempts });
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ManagerError::ReconnectExhausted { attempts }));
        }
    }

    async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!("disconnect ignored, already disconnected");
            return;
        }
        self.opening = None;
        self.timer = None;
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        let discarded = self.queue.clear();
        self.attempts.reset();
        self.breaker.reset();
        self.limiter.reset();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ManagerError::Cancelled));
        }
        info!(url = %self.config.url, discarded, "disconnected");
        self.transition(ConnectionState::Disconnected);
        self.hub.emit(&Event::Disconnected { reason: DisconnectReason::Requested });
    }

    async fn shutdown(mut self) {
        self.opening = None;
        self.timer = None;
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ManagerError::Shutdown));
        }
        self.hub.clear();
        debug!(url = %self.config.url, "connection manager stopped");
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.status.send_replace(to);
        debug!(%from, %to, "connection state changed");
        self.hub.emit(&Event::StateChanged { from, to });
    }

    fn arm_timer(&mut self, kind: TimerKind, delay: Duration) {
        self.timer = Some(Timer { kind, sleep: self.sleeper.sleep(delay) });
    }

    fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            state: self.state,
            attempts: self.attempts,
            breaker: self.breaker.snapshot(),
            queued: self.queue.len(),
            sent: self.counters.sent,
            received: self.counters.received,
            dropped: self.counters.dropped,
        }
    }
}

async fn wait_open<T>(opening: &mut Option<OpenFuture<T>>) -> Result<T, TransportError> {
    match opening {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn wait_transport<T: Connection>(connection: &mut Option<T>) -> Option<TransportEvent> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Timer>) -> TimerKind {
    match timer {
        Some(timer) => {
            (&mut timer.sleep).await;
            timer.kind
        }
        None => std::future::pending().await,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
