// One reusable exponential-backoff-with-cap primitive, shared by the
// stream consumer, the fan-out subscriber, and the external-ingress
// subscriber — the three loops that depend on a coordinator connection
// staying up.

use std::time::Duration;

pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self { base, cap, max_attempts, attempt: 0 }
    }

    /// Resets the attempt counter after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the delay for the next retry, or `None` once
    /// `max_attempts` has been exhausted — callers should give up and log
    /// critical when this returns `None`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let exp = 2u32.saturating_pow(self.attempt);
        let delay = self.base.saturating_mul(exp).min(self.cap);
        self.attempt += 1;
        Some(delay)
    }
}
