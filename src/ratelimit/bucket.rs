// Token bucket with lazy continuous refill
// Author: kelexine (https://github.com/kelexine)

use std::time::Duration;
use tokio::time::Instant;

/// Slack for float rounding when comparing token counts.
const EPSILON: f64 = 1e-9;

/// Per-owner token bucket.
///
/// Uses tokio's monotonic clock so refill never runs backwards and tests can
/// drive time with a paused runtime.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    pub fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Whether `cost` tokens are available right now (after refill).
    pub fn can_take(&self, cost: u32) -> bool {
        self.tokens + EPSILON >= cost as f64
    }

    /// Take `cost` tokens, or report how long until they accrue.
    pub fn try_take(&mut self, cost: u32, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.can_take(cost) {
            self.tokens = (self.tokens - cost as f64).max(0.0);
            Ok(())
        } else {
            Err(self.time_until(cost))
        }
    }

    /// Minimum wait until `cost` tokens are available, rounded up to whole ms.
    pub fn time_until(&self, cost: u32) -> Duration {
        let deficit = (cost as f64 - self.tokens).max(0.0);
        let millis = (deficit / self.refill_rate * 1000.0).ceil().max(1.0);
        Duration::from_millis(millis as u64)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.tokens + EPSILON >= self.capacity
    }
}
