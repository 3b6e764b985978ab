// Distributed mapping from user id to owning instance id, backed by the
// `websocket:connections` hash in the coordinator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notif_coordinator::Coordinator;
use notif_protocol::RegistryEntry;
use tracing::warn;

const CONNECTIONS_KEY: &str = "websocket:connections";
const STALE_HORIZON: Duration = Duration::from_secs(3600);

pub struct ConnectionRegistry {
    coordinator: Arc<dyn Coordinator>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn write(&self, user_id: &str, instance_id: &str) {
        let entry = RegistryEntry {
            instance_id: instance_id.to_owned(),
            connected_at: Utc::now(),
            user_id: user_id.to_owned(),
        };
        let Ok(json) = serde_json::to_string(&entry) else {
            return;
        };
        if let Err(e) = self.coordinator.hset(CONNECTIONS_KEY, user_id, &json).await {
            warn!(user_id, error = %e, "failed to write registry entry");
        }
    }

    pub async fn remove(&self, user_id: &str) {
        if let Err(e) = self.coordinator.hdel(CONNECTIONS_KEY, &[user_id.to_owned()]).await {
            warn!(user_id, error = %e, "failed to remove registry entry");
        }
    }

    /// Reads a user's registry entry. A value that fails to parse is
    /// treated as malformed state: it is deleted and `None` is returned,
    /// exactly as a missing entry would be.
    pub async fn read(&self, user_id: &str) -> Option<RegistryEntry> {
        let raw = match self.coordinator.hget(CONNECTIONS_KEY, user_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "registry read failed");
                return None;
            }
        };

        match serde_json::from_str::<RegistryEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(_) => {
                warn!(user_id, "malformed registry entry, discarding");
                self.remove(user_id).await;
                None
            }
        }
    }

    /// Every parseable entry currently in the registry, across all
    /// instances. Used by the distributed stats endpoint; malformed
    /// entries are silently skipped rather than deleted, since this is a
    /// read-only view.
    pub async fn all(&self) -> Vec<RegistryEntry> {
        let all = match self.coordinator.hgetall(CONNECTIONS_KEY).await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "registry read-all failed");
                return Vec::new();
            }
        };
        all.into_iter()
            .filter_map(|(_, raw)| serde_json::from_str::<RegistryEntry>(&raw).ok())
            .collect()
    }

    /// Removes stale entries (older than one hour) and entries that fail
    /// to parse. Returns the number of entries swept.
    pub async fn sweep_stale(&self) -> usize {
        let all = match self.coordinator.hgetall(CONNECTIONS_KEY).await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "registry sweep failed to read entries");
                return 0;
            }
        };

        let now = Utc::now();
        let mut stale = Vec::new();
        for (user_id, raw) in all {
            match serde_json::from_str::<RegistryEntry>(&raw) {
                Ok(entry) => {
                    let age = now.signed_duration_since(entry.connected_at);
                    if age.to_std().map(|d| d > STALE_HORIZON).unwrap_or(true) {
                        stale.push(user_id);
                    }
                }
                Err(_) => stale.push(user_id),
            }
        }

        for user_id in &stale {
            self.remove(user_id).await;
        }
        stale.len()
    }

    /// Removes every entry that points at `instance_id` — called once on
    /// graceful shutdown so a crashed-looking entry never strands a user.
    pub async fn remove_for_instance(&self, instance_id: &str) -> usize {
        let all = match self.coordinator.hgetall(CONNECTIONS_KEY).await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "registry drain failed to read entries");
                return 0;
            }
        };

        let mut owned = Vec::new();
        for (user_id, raw) in all {
            if let Ok(entry) = serde_json::from_str::<RegistryEntry>(&raw) {
                if entry.instance_id == instance_id {
                    owned.push(user_id);
                }
            }
        }

        for user_id in &owned {
            self.remove(user_id).await;
        }
        owned.len()
    }
}
