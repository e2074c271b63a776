//! Per-sender token buckets.

use ember_types::Address;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

struct TokenBucket {
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    fn take(&mut self, now_ms: u64, rps: f64, burst: f64) -> bool {
        let elapsed_secs = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * rps).min(burst);
        self.last_refill_ms = now_ms;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Lazy-refill token buckets keyed by sender address. A bucket starts full
/// at `burst` tokens and refills at `rps` tokens per second on each
/// admission attempt.
///
/// The map itself sits behind a read-write lock; each bucket has its own
/// mutex, so concurrent admissions from different senders only contend on
/// the map read lock.
pub struct RateLimiter {
    rps: f64,
    burst: f64,
    buckets: RwLock<HashMap<Address, Mutex<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: f64) -> Self {
        RateLimiter {
            rps,
            burst: burst.max(1.0),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Take one token for `sender`, refilling first. Returns false when the
    /// bucket is dry.
    pub fn try_take(&self, sender: &Address, now_ms: u64) -> bool {
        {
            let buckets = self.buckets.read();
            if let Some(bucket) = buckets.get(sender) {
                return bucket.lock().take(now_ms, self.rps, self.burst);
            }
        }
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(*sender).or_insert_with(|| {
            Mutex::new(TokenBucket {
                tokens: self.burst,
                last_refill_ms: now_ms,
            })
        });
        bucket.get_mut().take(now_ms, self.rps, self.burst)
    }

    /// Drop buckets idle longer than `idle_secs`. Run by the node's
    /// periodic sweep so the map does not grow with one-shot senders.
    pub fn purge_stale(&self, now_ms: u64, idle_secs: u64) {
        let cutoff = now_ms.saturating_sub(idle_secs * 1000);
        self.buckets
            .write()
            .retain(|_, bucket| bucket.get_mut().last_refill_ms >= cutoff);
    }

    pub fn tracked_senders(&self) -> usize {
        self.buckets.read().len()
    }
}
