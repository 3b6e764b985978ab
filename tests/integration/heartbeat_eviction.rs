// S5 — Heartbeat eviction: u5 is connected to A but the connection
// stalls (no client activity). After HEARTBEAT_INTERVAL *
// CLIENT_TIMEOUT_MULTIPLIER without activity, A disconnects u5 locally
// and removes the registry entry; GET /stats on A no longer lists u5.

use std::sync::Arc;
use std::time::Duration;

use notif_coordinator::Coordinator;
use notif_test_util::FakeCoordinator;
use server::config::Config;
use server::engine::Engine;
use tokio::sync::watch;

fn test_config() -> Config {
    Config {
        instance_id: "instance-a".to_owned(),
        redis_url: String::new(),
        bind_addr: String::new(),
        heartbeat_interval: Duration::from_millis(40),
        client_timeout_multiplier: 1,
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
async fn stalled_session_is_evicted_and_disappears_from_stats() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let engine = Arc::new(Engine::new(test_config(), coordinator.clone()));

    // Keep the mailbox receiver alive but never read from it or the
    // registry's connect-time handling: nothing ever touches
    // last_activity again after connect, simulating a client that has
    // stopped responding without its socket erroring out.
    let _rx = engine.connect("u5").await.expect("connect");
    assert_eq!(engine.local_connection_count().await, 1);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(server::heartbeat::run(engine.clone(), shutdown_rx));

    // CLIENT_TIMEOUT is 40ms here; give the heartbeat loop a few ticks
    // to observe the staleness and evict.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(engine.local_connection_count().await, 0);
    assert!(coordinator.hget("websocket:connections", "u5").await.unwrap().is_none());

    let router = server::build_router(engine.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let http = reqwest::Client::new();
    let body: serde_json::Value = http
        .get(format!("http://{addr}/stats"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let local_users = body["local_connections"]["local_users"].as_array().expect("local_users array");
    assert!(!local_users.iter().any(|u| u == "u5"));
    assert_eq!(body["local_connections"]["total_local_connections"], 0);

    server_handle.abort();
    heartbeat.abort();
}
