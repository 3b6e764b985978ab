//! In-memory stand-in for a real Redis-backed coordinator.
//!
//! Clone the handle (it's an `Arc` underneath) to hand the *same* backing
//! store to two or more `Engine`s — that's how the integration suite
//! simulates a multi-instance deployment without Docker. The fake models
//! hashes, sorted sets, sets, lists, pub/sub and streams closely enough to
//! drive the fabric's logic end to end; it does not model key expiry or
//! the stream pending-entries list (no redelivery-on-crash), since nothing
//! under test depends on either.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use notif_coordinator::{Coordinator, CoordinatorError, PubSubReceiver, StreamEntry};
use tokio::sync::{broadcast, mpsc};

#[derive(Default)]
struct StreamState {
    entries: Vec<(String, Vec<(String, String)>)>,
    next_id: u64,
    groups: HashMap<String, usize>,
}

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
    streams: HashMap<String, StreamState>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// Resolves Redis-style (possibly negative) inclusive bounds against a
/// collection of length `len` into a concrete `start..end` range.
fn resolve_range(len: usize, start: isize, stop: isize) -> std::ops::Range<usize> {
    let len_i = len as isize;
    let clamp = |i: isize| -> isize {
        let i = if i < 0 { len_i + i } else { i };
        i.clamp(0, len_i)
    };
    let start = clamp(start) as usize;
    let stop_inclusive = if stop < 0 { len_i + stop } else { stop };
    let end = (stop_inclusive + 1).clamp(0, len_i) as usize;
    if start >= end { 0..0 } else { start..end }
}

#[derive(Clone, Default)]
pub struct FakeCoordinator {
    inner: Arc<Mutex<Inner>>,
}

impl FakeCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn ping(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(h) = inner.hashes.get_mut(key) {
            for f in fields {
                h.remove(f);
            }
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        let set = inner.zsets.entry(key.to_owned()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_owned(), score));
        set.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        let Some(set) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let range = resolve_range(set.len(), start, stop);
        Ok(set[range].iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.zsets.get_mut(key) {
            set.retain(|(m, _)| !members.iter().any(|x| x == m));
        }
        Ok(())
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.zsets.get_mut(key) {
            let range = resolve_range(set.len(), start, stop);
            set.drain(range);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).map_or(0, |s| s.len() as u64))
    }

    async fn expire(&self, _key: &str, _seconds: i64) -> Result<(), CoordinatorError> {
        // No TTL model; the fake is only used for single-process test runs
        // that finish well before any real expiry would fire.
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sets.entry(key.to_owned()).or_default().insert(member.to_owned());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(s) = inner.sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lists.entry(key.to_owned()).or_default().push_front(value.to_owned());
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<u64, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let range = resolve_range(list.len(), start, stop);
        Ok(list.iter().skip(range.start).take(range.len()).cloned().collect())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        let tx = inner
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(1024).0);
        let _ = tx.send(message.to_owned());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PubSubReceiver, CoordinatorError> {
        let mut rx = {
            let mut inner = self.inner.lock().unwrap();
            let tx = inner
                .channels
                .entry(channel.to_owned())
                .or_insert_with(|| broadcast::channel(1024).0);
            tx.subscribe()
        };

        let (tx, out_rx) = mpsc::channel(256);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(PubSubReceiver::new(out_rx, task))
    }

    async fn ensure_consumer_group(&self, stream_key: &str, group: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.entry(stream_key.to_owned()).or_default();
        stream.groups.entry(group.to_owned()).or_insert(0);
        Ok(())
    }

    async fn stream_add(&self, stream_key: &str, fields: &[(&str, &str)]) -> Result<String, CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.entry(stream_key.to_owned()).or_default();
        let id = format!("{}-0", stream.next_id);
        stream.next_id += 1;
        stream
            .entries
            .push((id.clone(), fields.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()));
        Ok(id)
    }

    async fn stream_read_group(
        &self,
        stream_key: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        _block_ms: u64,
    ) -> Result<Vec<StreamEntry>, CoordinatorError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(stream) = inner.streams.get_mut(stream_key) else {
            return Ok(Vec::new());
        };
        let delivered = *stream.groups.get(group).unwrap_or(&0);
        let available = stream.entries.len().saturating_sub(delivered);
        let take = available.min(count);
        let slice = &stream.entries[delivered..delivered + take];
        let out = slice
            .iter()
            .map(|(id, fields)| StreamEntry { id: id.clone(), fields: fields.clone() })
            .collect();
        stream.groups.insert(group.to_owned(), delivered + take);
        Ok(out)
    }

    async fn stream_ack(&self, _stream_key: &str, _group: &str, _id: &str) -> Result<(), CoordinatorError> {
        // Pending-entries tracking isn't modeled; acking is a no-op once the
        // fake has already advanced the group's delivery cursor.
        Ok(())
    }

    async fn stream_len(&self, stream_key: &str) -> Result<u64, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.streams.get(stream_key).map_or(0, |s| s.entries.len() as u64))
    }

    async fn stream_group_lag(&self, stream_key: &str, group: &str) -> Result<Option<u64>, CoordinatorError> {
        let inner = self.inner.lock().unwrap();
        let Some(stream) = inner.streams.get(stream_key) else {
            return Ok(None);
        };
        let Some(delivered) = stream.groups.get(group) else {
            return Ok(None);
        };
        Ok(Some(stream.entries.len().saturating_sub(*delivered) as u64))
    }
}
