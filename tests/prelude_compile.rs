//! Compile-time prelude coverage test.
use lifeline::prelude::*;
use lifeline::testing::MockConnector;
use std::time::Duration;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let _backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1))
        .expect("valid backoff")
        .with_jitter(Jitter::None);
    let config =
        ManagerConfig { drop_strategy: DropStrategy::Newest, ..ManagerConfig::new("ws://x") };
    let manager: ConnectionManager =
        ConnectionManager::new(config, MockConnector::new()).expect("valid config");

    let _subscription: Subscription =
        manager.on(EventType::Connected, |_event: &Event| Ok::<(), HandlerError>(()));
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert!(manager.connect().await.expect("connects"));
}
