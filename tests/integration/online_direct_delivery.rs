// S1 — Online direct delivery: a user connected to the same instance that
// receives the HTTP request gets the notification over its live socket.

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

async fn start_server(
    coordinator: Arc<dyn Coordinator>,
    instance_id: &str,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let engine = Arc::new(Engine::new(test_config(instance_id), coordinator));
    let router = server::build_router(engine);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn online_user_receives_direct_notification_on_its_live_socket() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let (addr, _handle) = start_server(coordinator.clone(), "instance-a").await;

    let ws_url = format!("ws://{addr}/ws/u1");
    let mut client = MockWsClient::connect(&ws_url).await.expect("ws connect");
    // Give the server a moment to register the session.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/notify/direct/u1"))
        .json(&serde_json::json!({ "message": { "content": "hello" } }))
        .send()
        .await
        .expect("request");
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    let frame = tokio::time::timeout(Duration::from_secs(2), client.recv_frame())
        .await
        .expect("timed out waiting for frame")
        .expect("frame");
    match frame {
        WsServerFrame::Notification(envelope) => {
            assert_eq!(envelope.user_id, "u1");
            assert_eq!(envelope.message, serde_json::json!({ "content": "hello" }));
            assert_eq!(envelope.is_pending, None);
        }
        other => panic!("expected notification frame, got {other:?}"),
    }
}

#[tokio::test]
async fn ws_rejects_blank_user_id_with_close_code_4000() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let (addr, _handle) = start_server(coordinator, "instance-a").await;

    let ws_url = format!("ws://{addr}/ws/%20%20");
    let mut client = MockWsClient::connect(&ws_url).await.expect("ws connect");
    let result = tokio::time::timeout(Duration::from_secs(2), client.recv_frame()).await;
    // The connection is closed by the server with code 4000 before any
    // frame is sent; recv_frame should observe the stream ending.
    assert!(result.is_err() || result.unwrap().is_err());
}
