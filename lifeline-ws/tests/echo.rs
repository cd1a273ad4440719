use futures::{SinkExt, StreamExt};
use lifeline::{ConnectionManager, ConnectionState, Event, ManagerConfig, Payload};
use lifeline_ws::WsConnector;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Accepts one client and echoes its data frames back.
async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
        while let Some(Ok(message)) = ws.next().await {
            if message.is_text() || message.is_binary() {
                if ws.send(message).await.is_err() {
                    break;
                }
            } else if message.is_close() {
                break;
            }
        }
    });
    format!("ws://{addr}")
}

async fn next_message(events: &mut broadcast::Receiver<Event>) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for an inbound message")
            .expect("event stream closed");
        if matches!(event, Event::Message { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn round_trips_messages_through_a_real_socket() {
    let url = spawn_echo_server().await;
    let manager = ConnectionManager::new(ManagerConfig::new(url), WsConnector::new()).unwrap();
    let mut events = manager.events();

    // Queued before the socket exists, flushed after the handshake.
    manager.send(serde_json::json!({"type": "echo", "seq": 1})).unwrap();
    assert!(manager.connect().await.unwrap());
    assert_eq!(manager.status(), ConnectionState::Connected);

    match next_message(&mut events).await {
        Event::Message { kind, payload } => {
            assert_eq!(kind, "echo");
            assert!(matches!(payload, Payload::Text(_)), "json goes out as text");
            assert_eq!(payload.as_json(), Some(serde_json::json!({"type": "echo", "seq": 1})));
        }
        other => panic!("unexpected event {other:?}"),
    }

    manager.send(vec![1u8, 2, 3]).unwrap();
    match next_message(&mut events).await {
        Event::Message { kind, payload } => {
            assert_eq!(kind, "message");
            assert_eq!(payload, Payload::Binary(vec![1, 2, 3]));
        }
        other => panic!("unexpected event {other:?}"),
    }

    manager.disconnect().await;
    assert_eq!(manager.status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_connection_is_reported_as_an_open_error() {
    use lifeline::{Connector, TransportError};

    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WsConnector::new().open(&format!("ws://{addr}")).await.unwrap_err();
    assert!(matches!(err, TransportError::Open(_)), "got {err:?}");
}
