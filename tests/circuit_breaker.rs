//! Circuit breaker wired into the reconnect loop.
mod common;

use common::test_helpers::{drain, manager, spawn_connect, wait_for_state, URL};
use lifeline::testing::{MockConnector, OpenOutcome};
use lifeline::{ConnectionState, Event, ManagerConfig, ManagerError};
use std::time::Duration;

fn breaker_config() -> ManagerConfig {
    ManagerConfig {
        max_reconnect_attempts: 10,
        base_delay_ms: 1_000,
        max_delay_ms: 1_000,
        failure_threshold: 2,
        reset_timeout_ms: 5_000,
        ..ManagerConfig::new(URL)
    }
}

#[tokio::test(start_paused = true)]
async fn open_breaker_holds_attempts_until_reset_timeout() {
    let connector = MockConnector::new();
    connector.set_default(OpenOutcome::Refuse("down".into()));
    let manager = manager(breaker_config(), &connector);

    // t=0 first refusal, t=1000 second refusal trips the breaker.
    let pending = spawn_connect(&manager).await;
    wait_for_state(&manager, ConnectionState::CircuitOpen).await;
    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.breaker.is_open);
    assert_eq!(snapshot.breaker.failures, 2);
    assert_eq!(snapshot.breaker.last_failure, Some(1_000));
    assert_eq!(snapshot.breaker.next_retry, Some(6_000));
    assert_eq!(snapshot.attempts.next_eligible_at, Some(6_000));
    assert_eq!(connector.open_count(), 2);

    // One second later a connect request does not reach the transport; it waits for the probe.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let joined = spawn_connect(&manager).await;
    assert!(!joined.is_finished());
    assert_eq!(connector.open_count(), 2);

    connector.set_default(OpenOutcome::Accept);
    tokio::time::sleep(Duration::from_millis(3_999)).await;
    assert_eq!(connector.open_count(), 2);
    assert_eq!(manager.status(), ConnectionState::CircuitOpen);

    // The half-open probe goes out at t=6000 and succeeds.
    assert_eq!(pending.await.unwrap(), Ok(true));
    assert_eq!(joined.await.unwrap(), Ok(true));
    assert_eq!(connector.open_count(), 3);
    let snapshot = manager.snapshot().await.unwrap();
    assert!(!snapshot.breaker.is_open);
    assert_eq!(snapshot.breaker.failures, 0);
    assert_eq!(snapshot.attempts.count, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_for_another_cooldown() {
    let connector = MockConnector::new();
    connector.set_default(OpenOutcome::Refuse("down".into()));
    let manager = manager(breaker_config(), &connector);

    let _pending = spawn_connect(&manager).await;
    wait_for_state(&manager, ConnectionState::CircuitOpen).await;

    tokio::time::sleep(Duration::from_millis(5_001)).await;
    assert_eq!(connector.open_count(), 3);
    assert_eq!(manager.status(), ConnectionState::CircuitOpen);
    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.breaker.is_open);
    assert_eq!(snapshot.breaker.next_retry, Some(11_000));

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(connector.open_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn fresh_connect_with_open_breaker_waits_for_probe() {
    let connector = MockConnector::new();
    connector.set_default(OpenOutcome::Refuse("down".into()));
    let manager = manager(ManagerConfig { max_reconnect_attempts: 2, ..breaker_config() }, &connector);

    // Attempts run out at t=1000, just as the breaker trips.
    assert_eq!(manager.connect().await, Err(ManagerError::ReconnectExhausted { attempts: 2 }));
    assert!(manager.snapshot().await.unwrap().breaker.is_open);

    let mut events = manager.events();
    connector.set_default(OpenOutcome::Accept);
    let pending = spawn_connect(&manager).await;
    assert_eq!(manager.status(), ConnectionState::CircuitOpen);
    assert_eq!(connector.open_count(), 2);
    assert_eq!(
        drain(&mut events),
        vec![Event::StateChanged {
            from: ConnectionState::Disconnected,
            to: ConnectionState::CircuitOpen
        }]
    );

    let started = tokio::time::Instant::now();
    assert_eq!(pending.await.unwrap(), Ok(true));
    assert_eq!(started.elapsed(), Duration::from_millis(5_000));
    assert_eq!(connector.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn failures_outside_the_monitoring_period_do_not_trip() {
    let connector = MockConnector::new();
    connector.set_default(OpenOutcome::Refuse("down".into()));
    let manager = manager(
        ManagerConfig {
            max_reconnect_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 2_000,
            failure_threshold: 2,
            monitoring_period_ms: 1_000,
            ..ManagerConfig::new(URL)
        },
        &connector,
    );
    let mut events = manager.events();

    assert_eq!(manager.connect().await, Err(ManagerError::ReconnectExhausted { attempts: 3 }));
    assert_eq!(connector.open_count(), 3);
    let snapshot = manager.snapshot().await.unwrap();
    assert!(!snapshot.breaker.is_open);
    assert_eq!(snapshot.breaker.failures, 1);
    assert!(!drain(&mut events).iter().any(|event| matches!(
        event,
        Event::StateChanged { to: ConnectionState::CircuitOpen, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn default_settings_reach_circuit_open() {
    let connector = MockConnector::new();
    connector.set_default(OpenOutcome::Refuse("down".into()));
    let manager = manager(ManagerConfig::new(URL), &connector);

    // Refusals at t=0, 1000 and 3000; the third trips the breaker with attempts to spare.
    let _pending = spawn_connect(&manager).await;
    wait_for_state(&manager, ConnectionState::CircuitOpen).await;
    assert_eq!(connector.open_count(), 3);
    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.breaker.is_open);
    assert_eq!(snapshot.breaker.last_failure, Some(3_000));
    assert_eq!(snapshot.breaker.next_retry, Some(33_000));
    assert_eq!(snapshot.attempts.count, 3);
}
