//! Message Rate Limiting
//!
//! Fixed-window token bucket: each key gets `capacity` messages per window,
//! and the bucket refills completely once the window has elapsed. Keys are
//! the connection before `auth` and the player after it, so reconnecting
//! does not reset an authenticated player's budget.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::game::bet::PlayerId;
use crate::network::session::ConnectionId;

/// Messages allowed per window.
pub const RATE_LIMIT_CAPACITY: u32 = 20;

/// Refill window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// Who a bucket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RateKey {
    /// Unauthenticated connection.
    Connection(ConnectionId),
    /// Authenticated player.
    Player(PlayerId),
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    window_start: Instant,
}

/// Limiter over all keys.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    buckets: BTreeMap<RateKey, Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_CAPACITY, RATE_LIMIT_WINDOW)
    }
}

impl RateLimiter {
    /// Create a limiter.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            buckets: BTreeMap::new(),
        }
    }

    /// Spend one token for `key`. Returns false if the message must be dropped.
    pub fn check(&mut self, key: RateKey, now: Instant) -> bool {
        let capacity = self.capacity;
        let window = self.window;
        let bucket = self.buckets.entry(key).or_insert(Bucket {
            tokens: capacity,
            window_start: now,
        });

        if now.saturating_duration_since(bucket.window_start) >= window {
            bucket.tokens = capacity;
            bucket.window_start = now;
        }

        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    /// Forget a key (connection closed).
    pub fn forget(&mut self, key: &RateKey) {
        self.buckets.remove(key);
    }

    /// Drop buckets whose window expired; they would refill anyway.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < window);
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
