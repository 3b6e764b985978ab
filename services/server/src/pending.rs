// Durable, bounded, time-bounded per-user offline queue, plus the pending
// users index and the dead-letter sink.

use std::sync::Arc;

use notif_coordinator::Coordinator;
use notif_protocol::PendingEntry;
use tracing::warn;
use uuid::Uuid;

const PENDING_USERS_KEY: &str = "notifications:pending_users";
const DEAD_LETTER_KEY: &str = "notifications:dead_letter";

fn pending_key(user_id: &str) -> String {
    format!("notifications:pending:{user_id}")
}

pub struct PendingStore {
    coordinator: Arc<dyn Coordinator>,
    ttl_hours: i64,
    max_size: usize,
    max_attempts: u32,
}

impl PendingStore {
    #[must_use]
    pub fn new(coordinator: Arc<dyn Coordinator>, ttl_hours: i64, max_size: usize, max_attempts: u32) -> Self {
        Self { coordinator, ttl_hours, max_size, max_attempts }
    }

    /// Enqueues `message` for `user_id` under `notification_id` (kept, not
    /// reminted, so an id assigned at the producer edge survives a trip
    /// through the pending store), trims the queue to `max_size` (oldest
    /// first), refreshes the TTL, and adds the user to the pending-users
    /// index.
    pub async fn enqueue(&self, user_id: &str, message: serde_json::Value, notification_id: Uuid) -> PendingEntry {
        let entry = PendingEntry {
            user_id: user_id.to_owned(),
            message,
            timestamp: chrono::Utc::now(),
            attempts: 0,
            max_attempts: self.max_attempts,
            notification_id,
        };
        let key = pending_key(user_id);
        let score = entry.score();

        if let Ok(json) = serde_json::to_string(&entry) {
            if let Err(e) = self.coordinator.zadd(&key, &json, score).await {
                warn!(user_id, error = %e, "failed to enqueue pending entry");
                return entry;
            }
        }

        if let Err(e) = self.coordinator.expire(&key, self.ttl_hours * 3600).await {
            warn!(user_id, error = %e, "failed to refresh pending queue ttl");
        }
        if let Err(e) = self.coordinator.sadd(PENDING_USERS_KEY, user_id).await {
            warn!(user_id, error = %e, "failed to index pending user");
        }

        self.trim(user_id).await;
        entry
    }

    async fn trim(&self, user_id: &str) {
        let key = pending_key(user_id);
        let Ok(len) = self.coordinator.zcard(&key).await else {
            return;
        };
        if (len as usize) > self.max_size {
            let excess = len as isize - self.max_size as isize;
            if let Err(e) = self.coordinator.zremrangebyrank(&key, 0, excess - 1).await {
                warn!(user_id, error = %e, "failed to trim pending queue");
            }
        }
    }

    /// Reads every entry for `user_id` in enqueue order (oldest first),
    /// discarding and removing any member that fails to parse.
    pub async fn read_all(&self, user_id: &str) -> Vec<(String, PendingEntry)> {
        let key = pending_key(user_id);
        let Ok(raw_members) = self.coordinator.zrange(&key, 0, -1).await else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut malformed = Vec::new();
        for raw in raw_members {
            match serde_json::from_str::<PendingEntry>(&raw) {
                Ok(entry) => out.push((raw, entry)),
                Err(_) => malformed.push(raw),
            }
        }
        if !malformed.is_empty() {
            warn!(user_id, count = malformed.len(), "discarding malformed pending entries");
            let _ = self.coordinator.zrem(&key, &malformed).await;
        }
        out
    }

    /// Removes the given raw members from `user_id`'s queue and drops the
    /// user from the pending-users index once the queue is empty.
    pub async fn remove_members(&self, user_id: &str, raw_members: &[String]) {
        if raw_members.is_empty() {
            return;
        }
        let key = pending_key(user_id);
        if let Err(e) = self.coordinator.zrem(&key, raw_members).await {
            warn!(user_id, error = %e, "failed to remove delivered pending entries");
            return;
        }
        self.reconcile_index(user_id).await;
    }

    /// Replaces `old_raw` with `updated`, preserving the original enqueue
    /// score so retry ordering doesn't drift.
    pub async fn replace_entry(&self, user_id: &str, old_raw: &str, updated: &PendingEntry, score: f64) {
        let key = pending_key(user_id);
        let Ok(json) = serde_json::to_string(updated) else {
            return;
        };
        if let Err(e) = self.coordinator.zrem(&key, &[old_raw.to_owned()]).await {
            warn!(user_id, error = %e, "failed to replace pending entry (remove)");
            return;
        }
        if let Err(e) = self.coordinator.zadd(&key, &json, score).await {
            warn!(user_id, error = %e, "failed to replace pending entry (add)");
        }
    }

    pub async fn push_dead_letter(&self, entry: &PendingEntry) {
        if let Ok(json) = serde_json::to_string(entry) {
            if let Err(e) = self.coordinator.lpush(DEAD_LETTER_KEY, &json).await {
                warn!(user_id = %entry.user_id, error = %e, "failed to append to dead letter");
            }
        }
    }

    async fn reconcile_index(&self, user_id: &str) {
        let key = pending_key(user_id);
        match self.coordinator.zcard(&key).await {
            Ok(0) => {
                if let Err(e) = self.coordinator.srem(PENDING_USERS_KEY, user_id).await {
                    warn!(user_id, error = %e, "failed to drop empty user from pending index");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(user_id, error = %e, "failed to check pending queue size"),
        }
    }

    pub async fn pending_users(&self) -> Vec<String> {
        self.coordinator.smembers(PENDING_USERS_KEY).await.unwrap_or_default()
    }
}
