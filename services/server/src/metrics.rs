// In-process counters and the one gauge named in the design notes. No
// exporter is wired up — that's deliberately out of scope — but every
// counter is real and incremented at the call site it documents, and
// surfaced through `/stats` for inspection.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use notif_protocol::MetricsSnapshot;

#[derive(Default)]
pub struct Metrics {
    pub locally_connected_users: AtomicUsize,
    pub stream_messages_consumed: AtomicU64,
    pub fanout_sent: AtomicU64,
    pub fanout_received: AtomicU64,
    pub pending_enqueued: AtomicU64,
    pub retries_succeeded: AtomicU64,
    pub retries_failed: AtomicU64,
    pub dead_letter_appends: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_locally_connected(&self, count: usize) {
        self.locally_connected_users.store(count, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            locally_connected_users: self.locally_connected_users.load(Ordering::Relaxed),
            stream_messages_consumed: self.stream_messages_consumed.load(Ordering::Relaxed),
            fanout_sent: self.fanout_sent.load(Ordering::Relaxed),
            fanout_received: self.fanout_received.load(Ordering::Relaxed),
            pending_enqueued: self.pending_enqueued.load(Ordering::Relaxed),
            retries_succeeded: self.retries_succeeded.load(Ordering::Relaxed),
            retries_failed: self.retries_failed.load(Ordering::Relaxed),
            dead_letter_appends: self.dead_letter_appends.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment_independently() {
        let metrics = Metrics::new();
        assert_eq!(metrics.stream_messages_consumed.load(Ordering::Relaxed), 0);
        Metrics::incr(&metrics.stream_messages_consumed);
        Metrics::incr(&metrics.fanout_sent);
        Metrics::incr(&metrics.fanout_sent);
        assert_eq!(metrics.stream_messages_consumed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.fanout_sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.dead_letter_appends.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn set_locally_connected_reports_last_value() {
        let metrics = Metrics::new();
        metrics.set_locally_connected(4);
        assert_eq!(metrics.locally_connected_users.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn snapshot_reflects_current_counter_values() {
        let metrics = Metrics::new();
        metrics.set_locally_connected(2);
        Metrics::incr(&metrics.retries_failed);
        Metrics::incr(&metrics.retries_failed);
        Metrics::incr(&metrics.dead_letter_appends);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.locally_connected_users, 2);
        assert_eq!(snapshot.retries_failed, 2);
        assert_eq!(snapshot.dead_letter_appends, 1);
        assert_eq!(snapshot.fanout_sent, 0);
    }
}
