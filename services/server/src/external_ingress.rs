// External pub/sub ingress: a single well-known channel any producer can
// publish loosely structured envelopes to.

use std::sync::Arc;
use std::time::Duration;

use notif_protocol::{ExternalIngressEnvelope, NotificationEnvelope, DEFAULT_NOTIFICATION_TYPE};
use tracing::{error, warn};

use crate::engine::Engine;
use crate::reconnect::Backoff;

pub const CHANNEL: &str = "notifications:user";

fn to_envelope(raw: &str) -> Option<NotificationEnvelope> {
    let parsed: ExternalIngressEnvelope = serde_json::from_str(raw).ok()?;
    let user_id = parsed.user_id.trim();
    if user_id.is_empty() {
        return None;
    }
    let message = match parsed.message {
        Some(serde_json::Value::String(s)) => serde_json::json!({ "content": s }),
        Some(other) => other,
        None => serde_json::Value::Null,
    };
    let _kind = parsed.r#type.unwrap_or_else(|| DEFAULT_NOTIFICATION_TYPE.to_owned());
    Some(NotificationEnvelope::new(user_id, message))
}

async fn deliver(engine: &Engine, raw: &str) {
    match to_envelope(raw) {
        Some(envelope) => {
            engine.send_distributed(envelope).await;
        }
        None => warn!(%raw, "malformed external ingress payload, dropping"),
    }
}

pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut backoff = Backoff::new(
        engine.config.redis_retry_delay,
        Duration::from_secs(60),
        engine.config.max_reconnect_attempts,
    );

    loop {
        if *shutdown.borrow() {
            return;
        }

        let mut receiver = match engine.coordinator.subscribe(CHANNEL).await {
            Ok(receiver) => {
                backoff.reset();
                receiver
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(error = %e, "external ingress subscribe failed, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                None => {
                    error!(error = %e, "external ingress subscriber giving up after max reconnect attempts");
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
                            warn!("external ingress subscription dropped, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
}
