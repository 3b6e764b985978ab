// Pending retry loop: the only path that can promote a pending entry to
// the dead letter sink.

use std::sync::Arc;

use crate::engine::Engine;

pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(engine.config.pending_retry_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                for user_id in engine.pending.pending_users().await {
                    engine.retry_user(&user_id).await;
                }
            }
        }
    }
}
