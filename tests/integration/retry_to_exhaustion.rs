// S4 — Retry to exhaustion: nobody ever owns u4, so every retry fails.
// After max_attempts failed retries the entry moves to the dead letter
// list and u4 drops out of the pending users index.

use std::sync::Arc;
use std::time::Duration;

use notif_coordinator::Coordinator;
use notif_test_util::FakeCoordinator;
use server::config::Config;
use server::engine::Engine;
use uuid::Uuid;

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
async fn exhausted_entry_moves_to_dead_letter_and_drops_from_index() {
    let coordinator: Arc<dyn Coordinator> = Arc::new(FakeCoordinator::new());
    let engine = Arc::new(Engine::new(test_config(), coordinator.clone()));

    engine.pending.enqueue("u4", serde_json::json!("will never be delivered"), Uuid::new_v4()).await;
    assert!(coordinator.smembers("notifications:pending_users").await.unwrap().contains(&"u4".to_owned()));

    for _ in 0..3 {
        engine.retry_user("u4").await;
    }

    assert!(coordinator.zrange("notifications:pending:u4", 0, -1).await.unwrap().is_empty());
    assert!(!coordinator.smembers("notifications:pending_users").await.unwrap().contains(&"u4".to_owned()));

    let dead_letter = coordinator.lrange("notifications:dead_letter", 0, -1).await.unwrap();
    assert_eq!(dead_letter.len(), 1);
    let entry: notif_protocol::PendingEntry = serde_json::from_str(&dead_letter[0]).unwrap();
    assert_eq!(entry.user_id, "u4");
    assert_eq!(entry.attempts, 3);
}
