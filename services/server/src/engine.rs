// The single value injected into every handler and background task:
// connection registry, pending store, and local session table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use notif_coordinator::Coordinator;
use notif_protocol::{FanoutEnvelope, NotificationEnvelope, RegistryEntry, WsServerFrame};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::pending::PendingStore;
use crate::registry::ConnectionRegistry;

const FANOUT_PREFIX: &str = "notifications:instance";

struct LocalSession {
    mailbox: mpsc::UnboundedSender<WsServerFrame>,
    connected_at: chrono::DateTime<Utc>,
    last_activity: AtomicI64,
}

pub struct Engine {
    pub instance_id: String,
    pub config: Config,
    pub coordinator: Arc<dyn Coordinator>,
    pub registry: ConnectionRegistry,
    pub pending: PendingStore,
    pub metrics: Arc<Metrics>,
    local_sessions: RwLock<HashMap<String, LocalSession>>,
}

impl Engine {
    #[must_use]
    pub fn new(config: Config, coordinator: Arc<dyn Coordinator>) -> Self {
        let registry = ConnectionRegistry::new(coordinator.clone());
        let pending = PendingStore::new(
            coordinator.clone(),
            config.message_ttl_hours,
            config.max_pending_messages,
            config.max_attempts,
        );
        Self {
            instance_id: config.instance_id.clone(),
            config,
            coordinator,
            registry,
            pending,
            metrics: Arc::new(Metrics::new()),
            local_sessions: RwLock::new(HashMap::new()),
        }
    }

    fn fanout_channel(instance_id: &str) -> String {
        format!("{FANOUT_PREFIX}:{instance_id}")
    }

    /// Registers a new local session for `user_id` and returns the
    /// receiver half of its mailbox. Fails with `None` if `user_id` is
    /// empty after trimming.
    pub async fn connect(self: &Arc<Self>, user_id: &str) -> Option<mpsc::UnboundedReceiver<WsServerFrame>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut sessions = self.local_sessions.write().await;
            sessions.insert(
                user_id.to_owned(),
                LocalSession {
                    mailbox: tx,
                    connected_at: Utc::now(),
                    last_activity: AtomicI64::new(Utc::now().timestamp_millis()),
                },
            );
            self.metrics.set_locally_connected(sessions.len());
        }
        self.registry.write(user_id, &self.instance_id).await;

        let engine = Arc::clone(self);
        let user_id = user_id.to_owned();
        tokio::spawn(async move {
            engine.flush_on_connect(&user_id).await;
        });

        Some(rx)
    }

    /// Idempotent: safe to call for a user with no local session.
    pub async fn disconnect(&self, user_id: &str) {
        let removed = {
            let mut sessions = self.local_sessions.write().await;
            let removed = sessions.remove(user_id).is_some();
            self.metrics.set_locally_connected(sessions.len());
            removed
        };
        self.registry.remove(user_id).await;
        if removed {
            info!(user_id, instance_id = %self.instance_id, "session disconnected");
        }
    }

    pub async fn touch_activity(&self, user_id: &str) {
        let sessions = self.local_sessions.read().await;
        if let Some(session) = sessions.get(user_id) {
            session.last_activity.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }

    /// Delivers to a local session only. Returns `false` and disconnects
    /// the session if it doesn't exist or the mailbox is closed.
    pub async fn send_local(&self, user_id: &str, frame: WsServerFrame) -> bool {
        let delivered = {
            let sessions = self.local_sessions.read().await;
            match sessions.get(user_id) {
                Some(session) => {
                    let ok = session.mailbox.send(frame).is_ok();
                    if ok {
                        session.last_activity.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                    }
                    Some(ok)
                }
                None => None,
            }
        };

        match delivered {
            Some(true) => true,
            Some(false) => {
                self.disconnect(user_id).await;
                false
            }
            None => false,
        }
    }

    /// Tries local delivery, then cross-instance fan-out via the
    /// registry. Does not touch the Pending Store either way — callers
    /// that want the offline fallback use `send_distributed`; the retry
    /// loop uses this directly so a failed retry doesn't also mint a
    /// fresh, duplicate pending entry alongside the one it's already
    /// walking.
    async fn try_deliver(&self, envelope: &NotificationEnvelope) -> bool {
        if self.send_local(&envelope.user_id, WsServerFrame::Notification(envelope.clone())).await {
            return true;
        }

        if let Some(RegistryEntry { instance_id, .. }) = self.registry.read(&envelope.user_id).await {
            if instance_id != self.instance_id {
                let fanout = FanoutEnvelope::new(envelope.user_id.clone(), envelope.message.clone(), self.instance_id.clone());
                if let Ok(json) = serde_json::to_string(&fanout) {
                    match self.coordinator.publish(&Self::fanout_channel(&instance_id), &json).await {
                        Ok(()) => {
                            Metrics::incr(&self.metrics.fanout_sent);
                            return true;
                        }
                        Err(e) => warn!(user_id = %envelope.user_id, error = %e, "fan-out publish failed"),
                    }
                }
            }
            // instance_id == self.instance_id but no local session: stale
            // registry entry pointing here. The next heartbeat sweep will
            // reconcile it; treat this attempt as failed for now.
        }

        false
    }

    /// Tries local delivery, then cross-instance fan-out, then falls back
    /// to enqueueing for later delivery. Returns `true` if the envelope
    /// was delivered or handed off to a peer instance; `false` if it was
    /// enqueued as pending.
    pub async fn send_distributed(&self, envelope: NotificationEnvelope) -> bool {
        if self.try_deliver(&envelope).await {
            return true;
        }
        self.pending
            .enqueue(&envelope.user_id, envelope.message, envelope.notification_id)
            .await;
        Metrics::incr(&self.metrics.pending_enqueued);
        false
    }

    /// Delivers a user's queued entries to their (just-opened) local
    /// session in enqueue order, stopping at the first failed send so
    /// per-connection ordering is preserved.
    pub async fn flush_on_connect(&self, user_id: &str) {
        let entries = self.pending.read_all(user_id).await;
        let mut delivered = Vec::new();
        for (raw, entry) in entries {
            let envelope = NotificationEnvelope {
                notification_id: entry.notification_id,
                user_id: entry.user_id.clone(),
                message: entry.message.clone(),
                timestamp: Utc::now(),
                is_pending: None,
                original_timestamp: None,
            }
            .into_pending_delivery(entry.timestamp);

            if self.send_local(user_id, WsServerFrame::Notification(envelope)).await {
                delivered.push(raw);
            } else {
                break;
            }
        }
        self.pending.remove_members(user_id, &delivered).await;
    }

    /// One retry pass over a single user's pending queue: attempt
    /// redelivery of every entry, promoting exhausted ones to the dead
    /// letter sink.
    pub async fn retry_user(&self, user_id: &str) {
        let entries = self.pending.read_all(user_id).await;
        for (raw, mut entry) in entries {
            let envelope = NotificationEnvelope {
                notification_id: entry.notification_id,
                user_id: entry.user_id.clone(),
                message: entry.message.clone(),
                timestamp: entry.timestamp,
                is_pending: None,
                original_timestamp: None,
            };

            if self.try_deliver(&envelope).await {
                self.pending.remove_members(user_id, &[raw]).await;
                Metrics::incr(&self.metrics.retries_succeeded);
                continue;
            }

            entry.attempts += 1;
            Metrics::incr(&self.metrics.retries_failed);
            if entry.exhausted() {
                self.pending.push_dead_letter(&entry).await;
                self.pending.remove_members(user_id, &[raw]).await;
                Metrics::incr(&self.metrics.dead_letter_appends);
            } else {
                self.pending.replace_entry(user_id, &raw, &entry, entry.score()).await;
            }
        }
    }

    pub async fn local_user_ids(&self) -> Vec<String> {
        self.local_sessions.read().await.keys().cloned().collect()
    }

    pub async fn local_connection_count(&self) -> usize {
        self.local_sessions.read().await.len()
    }

    pub async fn local_connection_times(&self) -> HashMap<String, chrono::DateTime<Utc>> {
        self.local_sessions
            .read()
            .await
            .iter()
            .map(|(user_id, session)| (user_id.clone(), session.connected_at))
            .collect()
    }

    /// Users whose last-activity timestamp is older than `timeout`.
    pub async fn stale_local_users(&self, timeout: chrono::Duration) -> Vec<String> {
        let now = Utc::now().timestamp_millis();
        let horizon = timeout.num_milliseconds();
        self.local_sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| now - session.last_activity.load(Ordering::Relaxed) > horizon)
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }
}
