// Heartbeat, GC, and session-timeout loop: runs every HEARTBEAT_INTERVAL,
// evicts timed-out local sessions, pings the survivors, and sweeps stale
// registry entries.

use std::sync::Arc;

use chrono::Utc;
use notif_protocol::WsServerFrame;
use tracing::info;

use crate::engine::Engine;

pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(engine.config.heartbeat_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                tick(&engine).await;
            }
        }
    }
}

async fn tick(engine: &Engine) {
    let client_timeout = chrono::Duration::from_std(engine.config.client_timeout()).unwrap_or(chrono::Duration::zero());
    let mut to_disconnect = engine.stale_local_users(client_timeout).await;

    let heartbeat = WsServerFrame::Heartbeat {
        timestamp: Utc::now(),
        instance_id: engine.instance_id.clone(),
    };
    for user_id in engine.local_user_ids().await {
        if to_disconnect.contains(&user_id) {
            continue;
        }
        if !engine.send_local(&user_id, heartbeat.clone()).await {
            to_disconnect.push(user_id);
        }
    }

    for user_id in &to_disconnect {
        engine.disconnect(user_id).await;
    }
    if !to_disconnect.is_empty() {
        info!(count = to_disconnect.len(), instance_id = %engine.instance_id, "heartbeat evicted timed-out sessions");
    }

    let swept = engine.registry.sweep_stale().await;
    if swept > 0 {
        info!(count = swept, "heartbeat swept stale registry entries");
    }
}
