#![allow(dead_code)]

use lifeline::testing::MockConnector;
use lifeline::{ConnectionManager, ConnectionState, Event, Jitter, ManagerConfig, ManagerSnapshot};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const URL: &str = "ws://localhost:9000/stream";

/// Upper bound for any wait in a paused-time test; hitting it means the expected state never came.
pub const PATIENCE: Duration = Duration::from_secs(600);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Small delays so paused-time tests stay readable: base 100ms, cap 1s.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig { base_delay_ms: 100, max_delay_ms: 1_000, ..ManagerConfig::new(URL) }
}

/// Manager without jitter, so backoff delays are exact.
pub fn manager(config: ManagerConfig, connector: &MockConnector) -> ConnectionManager {
    init_tracing();
    ConnectionManager::builder(config, connector.clone())
        .with_jitter(Jitter::None)
        .build()
        .expect("valid config")
}

/// Returns once every command posted so far has been handled by the driver.
pub async fn settle(manager: &ConnectionManager) -> ManagerSnapshot {
    manager.snapshot().await.expect("manager running")
}

/// Wait (in virtual time) until the manager reports `state`.
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut status = manager.watch_status();
    tokio::time::timeout(PATIENCE, status.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("manager never reached {state}"))
        .expect("manager running");
}

/// Run `connect()` in the background and return once the driver has picked it up.
pub async fn spawn_connect(
    manager: &ConnectionManager,
) -> JoinHandle<Result<bool, lifeline::ManagerError>> {
    let handle = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    tokio::task::yield_now().await;
    settle(manager).await;
    handle
}

/// Everything currently buffered on an event stream.
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Lifecycle events only, without the state-change chatter.
pub fn without_state_changes(events: Vec<Event>) -> Vec<Event> {
    events.into_iter().filter(|event| !matches!(event, Event::StateChanged { .. })).collect()
}

pub fn texts(payloads: &[lifeline::Payload]) -> Vec<String> {
    payloads
        .iter()
        .map(|payload| match payload {
            lifeline::Payload::Text(text) => text.clone(),
            other => panic!("expected text payload, got {other:?}"),
        })
        .collect()
}
