// S2 — Cross-instance fan-out: u2 is connected to instance B; a producer
// hits instance A with /notify/direct/u2`. A must find B in the registry,
// publish on B's fan-out channel, and B must deliver it locally.

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
async fn notify_direct_on_a_reaches_user_connected_to_b() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let (addr_a, _shutdown_a, _handles_a) = start_instance(coordinator.clone(), "instance-a").await;
    let (addr_b, _shutdown_b, _handles_b) = start_instance(coordinator.clone(), "instance-b").await;

    let mut client = MockWsClient::connect(&format!("ws://{addr_b}/ws/u2")).await.expect("ws connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr_a}/notify/direct/u2"))
        .json(&serde_json::json!({ "message": "fan me out" }))
        .send()
        .await
        .expect("request");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    let frame = tokio::time::timeout(Duration::from_secs(2), client.recv_frame())
        .await
        .expect("timed out")
        .expect("frame");
    match frame {
        WsServerFrame::Notification(envelope) => assert_eq!(envelope.user_id, "u2"),
        other => panic!("expected notification frame, got {other:?}"),
    }

    // Nothing should have been enqueued for u2 as pending.
    let pending = http
        .get(format!("http://{addr_a}/debug/pending/u2"))
        .send()
        .await
        .unwrap()
        .json::<Vec<serde_json::Value>>()
        .await
        .unwrap();
    assert!(pending.is_empty());
}
