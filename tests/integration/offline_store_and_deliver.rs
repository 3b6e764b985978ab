// S3 — Offline store and deliver: no instance owns u3 at first. A
// producer posts via the stream ingestion endpoint; some instance's
// consumer picks it up, finds no owner, and enqueues it. When u3 later
// opens a WS, the first frame is the flushed pending entry.

use std::sync::Arc;
use std::time::Duration;

use notif_coordinator::Coordinator;
use notif_protocol::WsServerFrame;
use notif_test_util::{FakeCoordinator, MockWsClient};
use server::config::Config;
use server::engine::Engine;
use tokio::sync::watch;

fn test_config(instance_id: &str) -> Config {
    Config {
        instance_id: instance_id.to_owned(),
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

async fn start_instance(
    coordinator: Arc<dyn Coordinator>,
    instance_id: &str,
) -> (std::net::SocketAddr, watch::Sender<bool>, Vec<tokio::task::JoinHandle<()>>) {
    let engine = Arc::new(Engine::new(test_config(instance_id), coordinator));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = server::spawn_background_loops(engine.clone(), shutdown_rx);

    let router = server::build_router(engine);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    handles.push(tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    }));
    (addr, shutdown_tx, handles)
}

#[tokio::test]
async fn unowned_user_gets_queued_then_flushed_on_connect() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let (addr, _shutdown, _handles) = start_instance(coordinator.clone(), "instance-a").await;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/notify/stream/u3"))
        .json(&serde_json::json!({ "message": "ready" }))
        .send()
        .await
        .expect("request");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    // Give the ingestion consumer loop a moment to read, find no owner,
    // and enqueue to the pending store.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let pending_members = coordinator.zrange("notifications:pending:u3", 0, -1).await.unwrap();
    assert_eq!(pending_members.len(), 1);

    let mut client = MockWsClient::connect(&format!("ws://{addr}/ws/u3")).await.expect("ws connect");
    let frame = tokio::time::timeout(Duration::from_secs(2), client.recv_frame())
        .await
        .expect("timed out")
        .expect("frame");
    match frame {
        WsServerFrame::Notification(envelope) => {
            assert_eq!(envelope.message, serde_json::json!({ "content": "ready" }));
            assert_eq!(envelope.is_pending, Some(true));
            assert!(envelope.original_timestamp.is_some());
        }
        other => panic!("expected notification frame, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.zrange("notifications:pending:u3", 0, -1).await.unwrap().is_empty());
    assert!(!coordinator.smembers("notifications:pending_users").await.unwrap().contains(&"u3".to_owned()));
}
