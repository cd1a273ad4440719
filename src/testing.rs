//! In-memory transport for tests.
//!
//! [`MockConnector`] satisfies the [`Connector`] contract without a network. Open outcomes are
//! scripted, outbound messages are recorded, and the live connection can be driven from the test
//! (deliver a message, close cleanly, drop abruptly, fail).
//!
//! ```
//! use lifeline::testing::{MockConnector, OpenOutcome};
//!
//! let connector = MockConnector::new();
//! connector.refuse_next(2, "server down");
//! connector.push_outcome(OpenOutcome::Accept);
//! assert_eq!(connector.open_count(), 0);
//! ```

use crate::transport::{
    Connection, Connector, Payload, TransportError, TransportEvent, NORMAL_CLOSURE,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Scripted result of one `open()` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpenOutcome {
    /// Hand out a live connection.
    #[default]
    Accept,
    /// Fail with [`TransportError::Open`].
    Refuse(String),
    /// Never complete (exercises connect timeouts and cancellation).
    Hang,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<OpenOutcome>,
    fallback: OpenOutcome,
    opened: Vec<String>,
    sent: Vec<Payload>,
    closes: usize,
    fail_sends: bool,
    live: Option<mpsc::UnboundedSender<TransportEvent>>,
}

/// Scriptable in-memory connector. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Connector that accepts every open.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the outcome of the next unscripted `open()`.
    pub fn push_outcome(&self, outcome: OpenOutcome) {
        self.lock().script.push_back(outcome);
    }

    /// Refuse the next `count` opens.
    pub fn refuse_next(&self, count: usize, reason: &str) {
        let mut state = self.lock();
        for _ in 0..count {
            state.script.push_back(OpenOutcome::Refuse(reason.to_owned()));
        }
    }

    /// Outcome used once the script runs out.
    pub fn set_default(&self, outcome: OpenOutcome) {
        self.lock().fallback = outcome;
    }

    /// Make every `send` on live connections fail until turned off.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Number of `open()` calls so far.
    pub fn open_count(&self) -> usize {
        self.lock().opened.len()
    }

    /// URLs passed to `open()`, in order.
    pub fn opened_urls(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    /// Everything successfully sent, in order, across all connections.
    pub fn sent(&self) -> Vec<Payload> {
        self.lock().sent.clone()
    }

    /// Number of `close()` calls made by the manager.
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    /// Whether a connection handed out by this connector is still open.
    pub fn is_live(&self) -> bool {
        self.lock().live.is_some()
    }

    /// Push an inbound message on the live connection. Returns `false` if there is none.
    pub fn deliver(&self, payload: impl Into<Payload>) -> bool {
        self.push_event(TransportEvent::Message(payload.into()))
    }

    /// Peer closes with code 1000.
    pub fn close_cleanly(&self) -> bool {
        self.push_event(TransportEvent::Closed {
            code: Some(NORMAL_CLOSURE),
            reason: "normal closure".to_owned(),
        })
    }

    /// Peer closes with an arbitrary code.
    pub fn close_with(&self, code: u16, reason: &str) -> bool {
        self.push_event(TransportEvent::Closed { code: Some(code), reason: reason.to_owned() })
    }

    /// Report a transport error on the live connection.
    pub fn fail(&self, reason: &str) -> bool {
        self.push_event(TransportEvent::Error(reason.to_owned()))
    }

    /// End the live stream without a close frame.
    pub fn drop_connection(&self) -> bool {
        self.lock().live.take().is_some()
    }

    fn push_event(&self, event: TransportEvent) -> bool {
        match self.lock().live.as_ref() {
            Some(live) => live.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn open(&self, url: &str) -> Result<MockConnection, TransportError> {
        let outcome = {
            let mut state = self.lock();
            state.opened.push(url.to_owned());
            match state.script.pop_front() {
                Some(outcome) => outcome,
                None => state.fallback.clone(),
            }
        };

        match outcome {
            OpenOutcome::Accept => {
                let (events, inbox) = mpsc::unbounded_channel();
                self.lock().live = Some(events);
                Ok(MockConnection { inbox, state: Arc::clone(&self.state) })
            }
            OpenOutcome::Refuse(reason) => Err(TransportError::Open(reason)),
            OpenOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Connection handed out by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    inbox: mpsc::UnboundedReceiver<TransportEvent>,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(TransportError::Send("mock send failure".to_owned()));
        }
        state.sent.push(payload.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbox.recv().await
    }

    async fn close(&mut self) {
        let mut state = self.lock();
        state.closes += 1;
        state.live = None;
    }
}
