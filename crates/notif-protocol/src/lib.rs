// notif-protocol: wire types and Redis-side record shapes for the
// notification delivery fabric.
//
// WebSocket frames sent to clients use a top-level `type` field for
// discriminated deserialization. Records stored in the coordinator
// (registry entries, pending entries) use a stable, explicit schema so a
// rolling upgrade never strands an entry it can no longer parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Notification envelope
// ---------------------------------------------------------------------------

/// The canonical notification, as delivered to a client and as stored while
/// pending.
///
/// `message` is an arbitrary JSON value (object, string, number, or array) —
/// the fabric never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub notification_id: Uuid,
    pub user_id: String,
    pub message: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_timestamp: Option<DateTime<Utc>>,
}

impl NotificationEnvelope {
    #[must_use]
    pub fn new(user_id: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            notification_id: Uuid::new_v4(),
            user_id: user_id.into(),
            message,
            timestamp: Utc::now(),
            is_pending: None,
            original_timestamp: None,
        }
    }

    /// Tags the envelope as having been flushed from the pending store,
    /// preserving the time it was originally enqueued.
    #[must_use]
    pub fn into_pending_delivery(mut self, original_timestamp: DateTime<Utc>) -> Self {
        self.is_pending = Some(true);
        self.original_timestamp = Some(original_timestamp);
        self
    }
}

// ---------------------------------------------------------------------------
// Server -> client WebSocket frames
// ---------------------------------------------------------------------------

/// All server-to-client WebSocket frame kinds, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerFrame {
    Notification(NotificationEnvelope),
    Heartbeat {
        timestamp: DateTime<Utc>,
        instance_id: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
        instance_id: String,
    },
}

// ---------------------------------------------------------------------------
// Coordinator-resident records
// ---------------------------------------------------------------------------

/// Value stored under a user's field in the `websocket:connections` hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub instance_id: String,
    pub connected_at: DateTime<Utc>,
    pub user_id: String,
}

/// One entry in a user's pending sorted set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub user_id: String,
    pub message: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    pub notification_id: Uuid,
}

impl PendingEntry {
    #[must_use]
    pub fn new(user_id: impl Into<String>, message: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            user_id: user_id.into(),
            message,
            timestamp: Utc::now(),
            attempts: 0,
            max_attempts,
            notification_id: Uuid::new_v4(),
        }
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Sorted-set score for this entry: sub-second epoch seconds, so two
    /// entries enqueued within the same wall-clock second still get
    /// distinct, arrival-ordered scores instead of colliding and falling
    /// back to Redis's lexicographic-by-member tie-break.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Fan-out envelope published on an instance's private channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    #[serde(rename = "type")]
    pub kind: FanoutKind,
    pub user_id: String,
    pub message: serde_json::Value,
    pub source_instance: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutKind {
    Fanout,
}

impl FanoutEnvelope {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        message: serde_json::Value,
        source_instance: impl Into<String>,
    ) -> Self {
        Self {
            kind: FanoutKind::Fanout,
            user_id: user_id.into(),
            message,
            source_instance: source_instance.into(),
        }
    }
}

/// Loosely structured envelope accepted on the external ingress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIngressEnvelope {
    pub user_id: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

pub const DEFAULT_NOTIFICATION_TYPE: &str = "notification";

// ---------------------------------------------------------------------------
// HTTP API types
// ---------------------------------------------------------------------------

/// Request body shared by `/notify/stream/{user_id}` and `/notify/direct/{user_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub message: serde_json::Value,
    #[serde(default = "default_notification_type")]
    pub r#type: String,
}

fn default_notification_type() -> String {
    DEFAULT_NOTIFICATION_TYPE.to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyStreamResponse {
    pub success: bool,
    pub stream_id: String,
    pub message: String,
    pub delivery_method: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyDirectResponse {
    pub success: bool,
    pub message: &'static str,
    pub delivery_method: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub redis: String,
    pub redis_stream: String,
    pub consumer_group: String,
    pub local_connections: LocalConnectionInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConnectionInfo {
    pub instance_id: String,
    pub total_local_connections: usize,
    pub local_users: Vec<String>,
    pub connection_times: std::collections::HashMap<String, DateTime<Utc>>,
}

/// Point-in-time read of the observability contract's gauge and counters
/// (§9 of the design): one gauge (locally connected users) plus counters
/// for stream consumption, fan-out, pending enqueues, retries, and DLQ
/// appends. No exporter is wired to this — it exists so `/stats` can
/// surface the raw numbers for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub locally_connected_users: usize,
    pub stream_messages_consumed: u64,
    pub fanout_sent: u64,
    pub fanout_received: u64,
    pub pending_enqueued: u64,
    pub retries_succeeded: u64,
    pub retries_failed: u64,
    pub dead_letter_appends: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub local_connections: LocalConnectionInfo,
    pub metrics: MetricsSnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedInstanceStats {
    pub users: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedStatsResponse {
    pub total_instances: usize,
    pub total_users: usize,
    pub current_instance: String,
    pub by_instance: std::collections::HashMap<String, DistributedInstanceStats>,
    pub timestamp: DateTime<Utc>,
}

/// Frozen HTTP error envelope used by all non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Frozen error codes used across the HTTP and WS surfaces.
pub mod error_codes {
    pub const INVALID_USER: &str = "INVALID_USER";
    pub const MESSAGE_TOO_LARGE: &str = "MESSAGE_TOO_LARGE";
    pub const COORDINATOR_UNAVAILABLE: &str = "COORDINATOR_UNAVAILABLE";
    pub const MALFORMED_STATE: &str = "MALFORMED_STATE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_envelope_round_trips_as_tagged_ws_frame() {
        let env = NotificationEnvelope::new("user-1", json!({"content": "hi"}));
        let frame = WsServerFrame::Notification(env.clone());
        let text = serde_json::to_string(&frame).expect("serialize");
        assert!(text.contains("\"type\":\"notification\""));

        let parsed: WsServerFrame = serde_json::from_str(&text).expect("parse");
        match parsed {
            WsServerFrame::Notification(parsed_env) => assert_eq!(parsed_env, env),
            other => panic!("expected notification frame, got {other:?}"),
        }
    }

    #[test]
    fn pending_delivery_tags_is_pending_and_original_timestamp() {
        let original = Utc::now() - chrono::Duration::hours(2);
        let env = NotificationEnvelope::new("user-1", json!("ready")).into_pending_delivery(original);
        assert_eq!(env.is_pending, Some(true));
        assert_eq!(env.original_timestamp, Some(original));
    }

    #[test]
    fn pending_entry_exhausted_tracks_attempts_vs_max() {
        let mut entry = PendingEntry::new("user-1", json!("x"), 3);
        assert!(!entry.exhausted());
        entry.attempts = 3;
        assert!(entry.exhausted());
    }

    #[test]
    fn score_has_sub_second_resolution() {
        let mut entry = PendingEntry::new("user-1", json!("x"), 3);
        entry.timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        assert_eq!(entry.score(), 1_700_000_000.5);
    }

    #[test]
    fn fanout_envelope_serializes_type_field_as_fanout() {
        let env = FanoutEnvelope::new("user-1", json!("hi"), "instance-a");
        let text = serde_json::to_string(&env).expect("serialize");
        assert!(text.contains("\"type\":\"fanout\""));
    }

    #[test]
    fn external_ingress_envelope_allows_missing_type_and_message() {
        let parsed: ExternalIngressEnvelope =
            serde_json::from_str(r#"{"user_id": "u1"}"#).expect("parse");
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.r#type, None);
        assert_eq!(parsed.message, None);
    }

    #[test]
    fn notify_request_defaults_type_to_notification() {
        let parsed: NotifyRequest =
            serde_json::from_str(r#"{"message": "hi"}"#).expect("parse");
        assert_eq!(parsed.r#type, "notification");
    }
}
