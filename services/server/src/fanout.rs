// Instance fan-out subscriber: receives envelopes the stream consumer (or
// another instance) decided belong to a user this instance owns.

use std::sync::Arc;
use std::time::Duration;

use notif_protocol::{FanoutEnvelope, NotificationEnvelope, WsServerFrame};
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::reconnect::Backoff;

pub fn channel(instance_id: &str) -> String {
    format!("notifications:instance:{instance_id}")
}

async fn deliver(engine: &Engine, raw: &str) {
    let envelope: FanoutEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed fan-out envelope, dropping");
            return;
        }
    };

    crate::metrics::Metrics::incr(&engine.metrics.fanout_received);
    let notification = NotificationEnvelope::new(envelope.user_id.clone(), envelope.message);
    // Local delivery only: if the user already left this instance, the
    // originating instance already returned success to its caller, so we
    // log and drop rather than re-enqueueing (that would double-count).
    if !engine.send_local(&envelope.user_id, WsServerFrame::Notification(notification)).await {
        info!(user_id = %envelope.user_id, "fan-out target has no local session, dropping");
    }
}

pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let channel_name = channel(&engine.instance_id);
    let mut backoff = Backoff::new(
        engine.config.redis_retry_delay,
        Duration::from_secs(60),
        engine.config.max_reconnect_attempts,
    );

    loop {
        if *shutdown.borrow() {
            return;
        }

        let mut receiver = match engine.coordinator.subscribe(&channel_name).await {
            Ok(receiver) => {
                backoff.reset();
                receiver
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(error = %e, "fan-out subscribe failed, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                None => {
                    error!(error = %e, "fan-out subscriber giving up after max reconnect attempts");
                    return;
                }
            },
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                message = receiver.recv() => {
                    match message {
                        Some(raw) => deliver(&engine, &raw).await,
                        None => {
                            warn!("fan-out subscription dropped, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
}
