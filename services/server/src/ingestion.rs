// Stream consumer: competes with peer instances to drain the shared
// ingestion log via one named consumer group.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notif_coordinator::StreamEntry;
use notif_protocol::NotificationEnvelope;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::reconnect::Backoff;

pub const STREAM_KEY: &str = "notifications:stream";
pub const CONSUMER_GROUP: &str = "notification_processors";
const READ_COUNT: usize = 10;
const BLOCK_MS: u64 = 1000;

fn consumer_id(instance_id: &str) -> String {
    format!("{instance_id}_{:x}", rand::random::<u32>())
}

fn entry_to_envelope(entry: &StreamEntry) -> Option<NotificationEnvelope> {
    let user_id = entry.field("user_id")?.trim();
    if user_id.is_empty() {
        return None;
    }
    let message = match entry.field("message") {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::String(s)) => serde_json::json!({ "content": s }),
            Ok(other) => other,
            Err(_) => serde_json::json!({ "content": raw }),
        },
        None => serde_json::Value::Null,
    };
    let notification_id = entry
        .field("notification_id")
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);
    let timestamp = entry
        .field("timestamp")
        .and_then(|v| v.parse::<chrono::DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);

    Some(NotificationEnvelope {
        notification_id,
        user_id: user_id.to_owned(),
        message,
        timestamp,
        is_pending: None,
        original_timestamp: None,
    })
}

async fn process_entries(engine: &Engine, entries: Vec<StreamEntry>) {
    for entry in entries {
        let Some(envelope) = entry_to_envelope(&entry) else {
            warn!(id = %entry.id, "ingestion entry missing user_id, dropping");
            ack(engine, &entry.id).await;
            continue;
        };
        engine.send_distributed(envelope).await;
        crate::metrics::Metrics::incr(&engine.metrics.stream_messages_consumed);
        ack(engine, &entry.id).await;
    }
}

async fn ack(engine: &Engine, id: &str) {
    if let Err(e) = engine.coordinator.stream_ack(STREAM_KEY, CONSUMER_GROUP, id).await {
        warn!(id, error = %e, "failed to ack stream entry");
    }
}

/// Runs until `shutdown` resolves, then drains any remaining entries with
/// a non-blocking read before returning.
pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let consumer = consumer_id(&engine.instance_id);
    let mut backoff = Backoff::new(
        engine.config.redis_retry_delay,
        Duration::from_secs(60),
        engine.config.max_reconnect_attempts,
    );

    if let Err(e) = engine.coordinator.ensure_consumer_group(STREAM_KEY, CONSUMER_GROUP).await {
        error!(error = %e, "failed to ensure ingestion consumer group at startup");
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = engine
                .coordinator
                .stream_read_group(STREAM_KEY, CONSUMER_GROUP, &consumer, READ_COUNT, BLOCK_MS) => {
                match result {
                    Ok(entries) => {
                        backoff.reset();
                        if !entries.is_empty() {
                            process_entries(&engine, entries).await;
                        }
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        if msg.contains("NOGROUP") {
                            warn!("ingestion consumer group missing, recreating");
                            let _ = engine.coordinator.ensure_consumer_group(STREAM_KEY, CONSUMER_GROUP).await;
                            continue;
                        }
                        match backoff.next_delay() {
                            Some(delay) => {
                                warn!(error = %e, delay_ms = delay.as_millis() as u64, "ingestion read failed, backing off");
                                tokio::time::sleep(delay).await;
                            }
                            None => {
                                error!(error = %e, "ingestion consumer giving up after max reconnect attempts");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    drain_on_shutdown(&engine, &consumer).await;
}

/// Reads with a non-blocking call until the stream is empty, delivering
/// everything still outstanding before the instance exits.
async fn drain_on_shutdown(engine: &Engine, consumer: &str) {
    info!(instance_id = %engine.instance_id, "draining ingestion log before shutdown");
    loop {
        match engine.coordinator.stream_read_group(STREAM_KEY, CONSUMER_GROUP, consumer, READ_COUNT, 0).await {
            Ok(entries) if entries.is_empty() => break,
            Ok(entries) => process_entries(engine, entries).await,
            Err(e) => {
                warn!(error = %e, "shutdown drain read failed, stopping drain");
                break;
            }
        }
    }
}
