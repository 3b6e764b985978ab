// notif-coordinator: the thin abstraction over the shared coordination store.
//
// Everything the fabric needs from its coordinator — connection registry
// hashes, pending-delivery sorted sets, dead-letter lists, the fan-out
// pub/sub bus, and the ingestion stream with its consumer group — is
// expressed here as a trait so the server can run against a real Redis
// deployment in production and an in-memory double in tests, without the
// two ever drifting in shape.

mod redis_impl;
mod stream;

pub use redis_impl::RedisCoordinator;
pub use stream::StreamEntry;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
    #[error("malformed coordinator state: {0}")]
    Malformed(String),
}

/// A live subscription to a pub/sub channel.
///
/// Dropping the handle aborts the background task forwarding messages and
/// releases the underlying subscription — callers never need to issue an
/// explicit unsubscribe.
pub struct PubSubReceiver {
    rx: tokio::sync::mpsc::Receiver<String>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PubSubReceiver {
    #[must_use]
    pub fn new(rx: tokio::sync::mpsc::Receiver<String>, task: tokio::task::JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for PubSubReceiver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Coordination primitives the fabric needs, independent of backend.
///
/// Method names follow the underlying Redis command they map to; the trait
/// exists so `services/server` never talks to `redis` directly.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn ping(&self) -> Result<(), CoordinatorError>;

    // -- hash: connection registry --------------------------------------
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CoordinatorError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CoordinatorError>;
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<(), CoordinatorError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CoordinatorError>;

    // -- sorted set: pending store ---------------------------------------
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CoordinatorError>;
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CoordinatorError>;
    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CoordinatorError>;
    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<(), CoordinatorError>;
    async fn zcard(&self, key: &str) -> Result<u64, CoordinatorError>;
    async fn expire(&self, key: &str, seconds: i64) -> Result<(), CoordinatorError>;

    // -- set: pending user index ------------------------------------------
    async fn sadd(&self, key: &str, member: &str) -> Result<(), CoordinatorError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), CoordinatorError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CoordinatorError>;

    // -- list: dead-letter queue -------------------------------------------
    async fn lpush(&self, key: &str, value: &str) -> Result<(), CoordinatorError>;
    async fn llen(&self, key: &str) -> Result<u64, CoordinatorError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CoordinatorError>;

    // -- pub/sub: instance fan-out + external ingress ---------------------
    async fn publish(&self, channel: &str, message: &str) -> Result<(), CoordinatorError>;
    async fn subscribe(&self, channel: &str) -> Result<PubSubReceiver, CoordinatorError>;

    // -- streams: durable ingestion log ------------------------------------
    async fn ensure_consumer_group(&self, stream_key: &str, group: &str) -> Result<(), CoordinatorError>;
    async fn stream_add(&self, stream_key: &str, fields: &[(&str, &str)]) -> Result<String, CoordinatorError>;
    async fn stream_read_group(
        &self,
        stream_key: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, CoordinatorError>;
    async fn stream_ack(&self, stream_key: &str, group: &str, id: &str) -> Result<(), CoordinatorError>;
    async fn stream_len(&self, stream_key: &str) -> Result<u64, CoordinatorError>;
    /// Number of entries the group has not yet delivered, when the backend
    /// can report it. `None` means the backend has no cheap way to compute
    /// lag (older Redis, or a test double that doesn't model it).
    async fn stream_group_lag(&self, stream_key: &str, group: &str) -> Result<Option<u64>, CoordinatorError>;
}
