//! Typed publish/subscribe hub.
//!
//! Handlers are registered per [`EventType`] and invoked in subscription order. Each handler is
//! isolated: an `Err` or a panic is logged and the remaining handlers still run. Handlers are
//! called outside the registry lock, so they may subscribe or unsubscribe from inside a callback.
//!
//! Every emitted event is also pushed to a broadcast channel ([`EventHub::stream`]) for async
//! consumers that prefer a stream over callbacks.

use crate::events::{Event, EventType};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the broadcast stream before slow receivers start lagging.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

struct HubInner {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventType, Vec<(u64, Handler)>>>,
    stream: broadcast::Sender<Event>,
}

impl HubInner {
    fn handlers(&self) -> MutexGuard<'_, HashMap<EventType, Vec<(u64, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, ty: &EventType, id: u64) -> bool {
        let mut map = self.handlers();
        let Some(list) = map.get_mut(ty) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(ty);
        }
        removed
    }
}

/// Publish/subscribe hub shared by a manager and its consumers.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("stream_receivers", &self.inner.stream.receiver_count())
            .finish()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Hub whose broadcast stream buffers `capacity` events per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(HashMap::new()),
                stream,
            }),
        }
    }

    /// Register `handler` for events of type `event_type`.
    ///
    /// # Examples
    /// ```
    /// use lifeline::{Event, EventHub};
    ///
    /// let hub = EventHub::new();
    /// let subscription = hub.on("connected", |event: &Event| {
    ///     println!("{event}");
    ///     Ok(())
    /// });
    /// hub.emit(&Event::Connected { url: "ws://localhost".into() });
    /// assert!(subscription.unsubscribe());
    /// ```
    pub fn on<F>(&self, event_type: impl Into<EventType>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let ty = event_type.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers().entry(ty.clone()).or_default().push((id, Arc::new(handler)));
        Subscription { id, ty, hub: Arc::downgrade(&self.inner) }
    }

    /// Deliver `event` to its handlers, then to stream receivers.
    ///
    /// An inbound message whose category shares a lifecycle name (`"error"`, `"connected"`, ...)
    /// reaches both the handlers of [`EventType::Message`] for that category and the handlers
    /// registered under the lifecycle key, in subscription order. A handler registered with a
    /// string such as `on("error")` therefore sees lifecycle errors and `{"type":"error"}`
    /// messages alike; `on(EventType::Message("error".into()))` sees only the messages.
    pub fn emit(&self, event: &Event) {
        let ty = event.event_type();
        let handlers = self.handlers_for(event, &ty);

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(event_type = %ty, error = %err, "event handler failed");
                }
                Err(panic) => {
                    warn!(
                        event_type = %ty,
                        panic = %panic_message(&*panic),
                        "event handler panicked"
                    );
                }
            }
        }

        // No receivers is fine.
        let _ = self.inner.stream.send(event.clone());
    }

    fn handlers_for(&self, event: &Event, ty: &EventType) -> Vec<Handler> {
        let map = self.inner.handlers();
        let mut matched: Vec<&(u64, Handler)> = map.get(ty).into_iter().flatten().collect();
        if let Event::Message { kind, .. } = event {
            let shadowed = EventType::from(kind.as_str());
            if !matches!(shadowed, EventType::Message(_)) {
                matched.extend(map.get(&shadowed).into_iter().flatten());
                matched.sort_by_key(|(id, _)| *id);
            }
        }
        matched.into_iter().map(|(_, handler)| Arc::clone(handler)).collect()
    }

    /// Receive every event emitted from now on.
    pub fn stream(&self) -> broadcast::Receiver<Event> {
        self.inner.stream.subscribe()
    }

    /// Release every subscription.
    pub fn clear(&self) {
        self.inner.handlers().clear();
    }

    /// Total number of registered handlers across all event types.
    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers().values().map(Vec::len).sum()
    }

    /// Number of handlers registered for one event type.
    pub fn handler_count(&self, event_type: impl Into<EventType>) -> usize {
        self.inner.handlers().get(&event_type.into()).map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventHub::on`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    ty: EventType,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn event_type(&self) -> &EventType {
        &self.ty
    }

    /// Remove the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.hub.upgrade() {
            Some(hub) => hub.remove(&self.ty, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for HubInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HubInner")
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Payload;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn connected() -> Event {
        Event::Connected { url: "ws://test".into() }
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn(&Event) -> Result<(), HandlerError> {
        let log = Arc::clone(log);
        move |_| {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.on("connected", recorder(&log, "a"));
        hub.on("connected", recorder(&log, "b"));
        hub.on("disconnected", recorder(&log, "other"));
        hub.on("connected", recorder(&log, "c"));

        hub.emit(&connected());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn failing_handlers_are_isolated_and_logged() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.on("connected", recorder(&log, "first"));
        hub.on("connected", |_| Err("handler exploded".into()));
        hub.on("connected", |_| panic!("handler panicked hard"));
        hub.on("connected", recorder(&log, "last"));

        hub.emit(&connected());
        assert_eq!(*log.lock().unwrap(), vec!["first", "last"]);

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("event handler failed"), "error should be logged: {logs}");
        assert!(logs.contains("handler exploded"));
        assert!(logs.contains("event handler panicked"), "panic should be logged: {logs}");
        assert!(logs.contains("handler panicked hard"));
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = hub.on("connected", recorder(&log, "first"));
        hub.on("connected", recorder(&log, "second"));

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        hub.emit(&connected());
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
        assert_eq!(hub.handler_count("connected"), 1);
    }

    #[test]
    fn handlers_may_unsubscribe_themselves() {
        let hub = EventHub::new();
        let calls = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handler_calls = Arc::clone(&calls);
        let handler_slot = Arc::clone(&slot);
        let subscription = hub.on("connected", move |_| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = handler_slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(subscription);

        hub.emit(&connected());
        hub.emit(&connected());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn message_events_route_by_category() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.on("metrics", recorder(&log, "metrics"));
        hub.on("alert", recorder(&log, "alert"));

        hub.emit(&Event::Message { kind: "alert".into(), payload: Payload::text("{}") });
        assert_eq!(*log.lock().unwrap(), vec!["alert"]);
    }

    #[test]
    fn messages_named_like_lifecycle_events_reach_both_lists() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.on("error", recorder(&log, "by-name"));
        hub.on(EventType::Message("error".into()), recorder(&log, "messages-only"));
        hub.on("connected", recorder(&log, "connected"));
        hub.on("error", recorder(&log, "by-name-later"));

        hub.emit(&Event::Message {
            kind: "error".into(),
            payload: Payload::text(r#"{"type":"error","code":42}"#),
        });
        assert_eq!(*log.lock().unwrap(), vec!["by-name", "messages-only", "by-name-later"]);

        log.lock().unwrap().clear();
        hub.emit(&Event::Error { message: "transport".into() });
        assert_eq!(*log.lock().unwrap(), vec!["by-name", "by-name-later"]);
    }

    #[test]
    fn clear_releases_everything() {
        let hub = EventHub::new();
        let sub = hub.on("connected", |_| Ok(()));
        hub.on("error", |_| Ok(()));
        assert_eq!(hub.subscriber_count(), 2);
        hub.clear();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn unsubscribe_after_hub_dropped_is_a_no_op() {
        let hub = EventHub::new();
        let sub = hub.on("connected", |_| Ok(()));
        drop(hub);
        assert!(!sub.unsubscribe());
    }

    #[tokio::test]
    async fn stream_receives_every_event() {
        let hub = EventHub::new();
        let mut rx = hub.stream();
        hub.emit(&connected());
        hub.emit(&Event::Error { message: "boom".into() });

        assert_eq!(rx.recv().await.unwrap(), connected());
        assert_eq!(rx.recv().await.unwrap(), Event::Error { message: "boom".into() });
    }
}
