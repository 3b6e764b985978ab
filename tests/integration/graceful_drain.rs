// S6 — Graceful drain: three unconsumed stream entries targeting u6
// exist; u6 is connected to A. Shutdown is signalled. Background tasks
// stop, the remaining entries are consumed and delivered on A's live WS,
// and A's registry entries are removed once every background task has
// exited.

use std::sync::Arc;
use std::time::Duration;

use notif_coordinator::Coordinator;
use notif_protocol::WsServerFrame;
use notif_test_util::{FakeCoordinator, MockWsClient};
use server::config::Config;
use server::engine::Engine;
use tokio::sync::watch;

fn test_config() -> Config {
    Config {
        instance_id: "instance-a".to_owned(),
        redis_url: String::new(),
        bind_addr: String::new(),
        heartbeat_interval: Duration::from_secs(3600),
        client_timeout_multiplier: 3,
        message_ttl_hours: 24,
        max_pending_messages: 100,
        pending_retry_interval: Duration::from_secs(3600),
        max_message_size: 1024 * 1024,
        enable_debug: true,
        max_attempts: 3,
        max_reconnect_attempts: 5,
        redis_retry_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn remaining_stream_entries_drain_to_the_live_socket_on_shutdown() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let engine = Arc::new(Engine::new(test_config(), coordinator.clone()));

    let router = server::build_router(engine.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let mut client = MockWsClient::connect(&format!("ws://{addr}/ws/u6")).await.expect("ws connect");
    tokio::time::sleep(Duration::from_millis(50)).await;

    for i in 0..3 {
        let message = format!("\"entry-{i}\"");
        coordinator
            .stream_add(
                "notifications:stream",
                &[("user_id", "u6"), ("message", message.as_str()), ("type", "notification")],
            )
            .await
            .expect("stream_add");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = server::spawn_background_loops(engine.clone(), shutdown_rx);

    // Simulate SIGTERM: signal every background task to stop, then await
    // them exactly as main.rs does before touching the registry.
    shutdown_tx.send(true).expect("send shutdown");
    for handle in background {
        handle.await.expect("background task panicked");
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.recv_frame())
            .await
            .expect("timed out waiting for drained frame")
            .expect("frame");
        match frame {
            WsServerFrame::Notification(envelope) => received.push(envelope.message),
            other => panic!("expected notification frame, got {other:?}"),
        }
    }
    for i in 0..3 {
        assert!(received.contains(&serde_json::json!({ "content": format!("entry-{i}") })));
    }

    engine.registry.remove_for_instance(&engine.instance_id).await;
    assert!(coordinator.hget("websocket:connections", "u6").await.unwrap().is_none());

    http_handle.abort();
}
