use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Value};
use tokio::sync::mpsc;

use crate::{Coordinator, CoordinatorError, PubSubReceiver, StreamEntry};

/// Coordinator backed by a real Redis deployment.
///
/// `manager` is cloned per call — `redis::aio::ConnectionManager` is a cheap
/// handle around a multiplexed connection that reconnects on its own, so
/// every method here just grabs a clone and issues its command.
pub struct RedisCoordinator {
    manager: redis::aio::ConnectionManager,
    client: redis::Client,
}

impl RedisCoordinator {
    /// Opens a client against `redis_url` and waits up to 5 seconds for the
    /// initial connection to come up.
    pub async fn connect(redis_url: &str) -> Result<Self, CoordinatorError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))?;

        let manager = tokio::time::timeout(Duration::from_secs(5), client.get_connection_manager())
            .await
            .map_err(|_| CoordinatorError::Unavailable("timed out connecting to redis".into()))?
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))?;

        Ok(Self { manager, client })
    }
}

fn unavailable(e: redis::RedisError) -> CoordinatorError {
    CoordinatorError::Unavailable(e.to_string())
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

/// Parses a flat `[k, v, k, v, ...]` array into pairs.
fn parse_flat_pairs(value: &Value) -> Vec<(String, String)> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .chunks_exact(2)
        .filter_map(|pair| Some((value_to_string(&pair[0])?, value_to_string(&pair[1])?)))
        .collect()
}

/// Parses the `XREADGROUP`/`XREAD` reply for a single requested stream into
/// its entries. The reply shape is `[[stream_name, [[id, [k,v,...]], ...]]]`.
fn parse_stream_entries(value: &Value) -> Vec<StreamEntry> {
    let Value::Array(streams) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for stream in streams {
        let Value::Array(pair) = stream else { continue };
        let Some(Value::Array(entries)) = pair.get(1) else {
            continue;
        };
        for entry in entries {
            let Value::Array(entry_parts) = entry else { continue };
            let Some(id) = entry_parts.first().and_then(value_to_string) else {
                continue;
            };
            let fields = entry_parts.get(1).map(parse_flat_pairs).unwrap_or_default();
            out.push(StreamEntry { id, fields });
        }
    }
    out
}

/// Parses `XINFO GROUPS` looking for `group`'s `lag` field. Redis reports
/// each group as a flat `[k, v, ...]` array, not a nested map.
fn parse_group_lag(value: &Value, group: &str) -> Option<u64> {
    let Value::Array(groups) = value else {
        return None;
    };
    for g in groups {
        let fields = parse_flat_pairs(g);
        let name = fields.iter().find(|(k, _)| k == "name").map(|(_, v)| v.as_str());
        if name != Some(group) {
            continue;
        }
        return fields
            .iter()
            .find(|(k, _)| k == "lag")
            .and_then(|(_, v)| v.parse::<u64>().ok());
    }
    None
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn ping(&self) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await.map_err(unavailable)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.hget(key, field).await.map_err(unavailable)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<(), CoordinatorError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(key, fields).await.map_err(unavailable)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await.map_err(unavailable)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await.map_err(unavailable)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.zrange(key, start, stop).await.map_err(unavailable)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CoordinatorError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.zrem::<_, _, ()>(key, members).await.map_err(unavailable)
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.zremrangebyrank::<_, ()>(key, start, stop)
            .await
            .map_err(unavailable)
    }

    async fn zcard(&self, key: &str) -> Result<u64, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.zcard(key).await.map_err(unavailable)
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, seconds).await.map_err(unavailable)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.sadd::<_, _, ()>(key, member).await.map_err(unavailable)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(key, member).await.map_err(unavailable)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.smembers(key).await.map_err(unavailable)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(key, value).await.map_err(unavailable)
    }

    async fn llen(&self, key: &str) -> Result<u64, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.llen(key).await.map_err(unavailable)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.lrange(key, start, stop).await.map_err(unavailable)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, message).await.map_err(unavailable)
    }

    async fn subscribe(&self, channel: &str) -> Result<PubSubReceiver, CoordinatorError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        pubsub.subscribe(channel).await.map_err(unavailable)?;

        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unreadable pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(PubSubReceiver::new(rx, task))
    }

    async fn ensure_consumer_group(&self, stream_key: &str, group: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        let result = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async::<Value>(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn stream_add(&self, stream_key: &str, fields: &[(&str, &str)]) -> Result<String, CoordinatorError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key).arg("*");
        for (k, v) in fields {
            cmd.arg(*k).arg(*v);
        }
        let id: String = cmd.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(id)
    }

    async fn stream_read_group(
        &self,
        stream_key: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, CoordinatorError> {
        let mut conn = self.manager.clone();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream_key)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if matches!(reply, Value::Nil) {
            return Ok(Vec::new());
        }
        Ok(parse_stream_entries(&reply))
    }

    async fn stream_ack(&self, stream_key: &str, group: &str, id: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.manager.clone();
        redis::cmd("XACK")
            .arg(stream_key)
            .arg(group)
            .arg(id)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn stream_len(&self, stream_key: &str) -> Result<u64, CoordinatorError> {
        let mut conn = self.manager.clone();
        conn.xlen(stream_key).await.map_err(unavailable)
    }

    async fn stream_group_lag(&self, stream_key: &str, group: &str) -> Result<Option<u64>, CoordinatorError> {
        let mut conn = self.manager.clone();
        let reply = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream_key)
            .query_async::<Value>(&mut conn)
            .await;

        match reply {
            Ok(value) => Ok(parse_group_lag(&value, group)),
            // A stream with no groups yet, or that doesn't exist, isn't a
            // coordinator failure — just unknown lag.
            Err(_) => Ok(None),
        }
    }
}
