//! The transaction pool.

use crate::{AdmissionError, RateLimiter};
use ember_state::AccountReader;
use ember_types::{Hash, Transaction};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Pool tuning. Times are wall-clock and node-local; nothing here feeds
/// consensus-critical state.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Global cap on pending transactions.
    pub size_limit: usize,
    /// Per-sender token refill rate, tokens per second.
    pub rps: f64,
    /// Per-sender bucket capacity.
    pub burst: f64,
    /// Pending transactions older than this are expired by the sweep.
    pub tx_ttl_secs: u64,
    /// Recently evicted hashes are refused re-admission for this long.
    pub replay_window_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            size_limit: 1000,
            rps: 10.0,
            burst: 20.0,
            tx_ttl_secs: 600,
            replay_window_secs: 60,
        }
    }
}

/// Result of a successful admission. Re-admitting a pending hash is an
/// idempotent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    AlreadyPending,
}

struct PoolEntry {
    tx: Transaction,
    seq: u64,
    admitted_at_ms: u64,
}

struct PoolInner {
    entries: HashMap<Hash, PoolEntry>,
    next_seq: u64,
    recently_evicted: HashMap<Hash, u64>,
}

/// Bounded, deduplicated set of admitted pending transactions.
///
/// The uniqueness index sits behind one lock; the per-sender rate limiter
/// keeps its own fine-grained state. Admission and eviction may run
/// concurrently from request-serving threads.
pub struct Mempool {
    config: MempoolConfig,
    inner: Mutex<PoolInner>,
    limiter: RateLimiter,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        let limiter = RateLimiter::new(config.rps, config.burst);
        Mempool {
            config,
            limiter,
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                next_seq: 0,
                recently_evicted: HashMap::new(),
            }),
        }
    }

    /// The full admission pipeline: decode, structural and signature
    /// verification, nonce and balance checks against `accounts`, then the
    /// pool-local replay window, rate limit, and capacity checks.
    pub fn check_and_admit(
        &self,
        raw: &[u8],
        accounts: &dyn AccountReader,
        now_ms: u64,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let tx = Transaction::decode(raw).map_err(|e| AdmissionError::Decode(e.to_string()))?;
        tx.verify().map_err(|e| AdmissionError::Invalid(e.to_string()))?;

        let account = accounts.account(&tx.from)?.unwrap_or_default();
        if tx.nonce < account.nonce {
            return Err(AdmissionError::NonceMismatch {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        let need = tx.max_cost();
        if account.balance < need {
            return Err(AdmissionError::InsufficientBalance {
                need,
                have: account.balance,
            });
        }

        {
            let inner = self.inner.lock();
            if inner.entries.contains_key(&tx.hash) {
                return Ok(AdmissionOutcome::AlreadyPending);
            }
            if let Some(evicted_at) = inner.recently_evicted.get(&tx.hash) {
                if now_ms.saturating_sub(*evicted_at) < self.config.replay_window_secs * 1000 {
                    return Err(AdmissionError::RecentlyEvicted);
                }
            }
        }

        if !self.limiter.try_take(&tx.from, now_ms) {
            return Err(AdmissionError::RateLimited);
        }

        let mut inner = self.inner.lock();
        // Re-check under the lock: another thread may have admitted the
        // same hash between the peek above and here.
        if inner.entries.contains_key(&tx.hash) {
            return Ok(AdmissionOutcome::AlreadyPending);
        }
        if inner.entries.len() >= self.config.size_limit {
            return Err(AdmissionError::PoolFull);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        tracing::debug!(tx = %tx.hash, from = %tx.from, seq, "transaction admitted");
        inner.entries.insert(
            tx.hash,
            PoolEntry {
                tx,
                seq,
                admitted_at_ms: now_ms,
            },
        );
        Ok(AdmissionOutcome::Admitted)
    }

    /// Encoded transactions for a proposal, bounded by `max_bytes`.
    ///
    /// Order is stable by admission sequence; within one sender the slots
    /// that sender occupies are reordered by nonce ascending, so a sender's
    /// out-of-order submissions still propose in executable order.
    pub fn select_for_proposal(&self, max_bytes: usize) -> Vec<Vec<u8>> {
        let mut txs: Vec<Transaction> = {
            let inner = self.inner.lock();
            let mut entries: Vec<(u64, Transaction)> = inner
                .entries
                .values()
                .map(|e| (e.seq, e.tx.clone()))
                .collect();
            entries.sort_by_key(|(seq, _)| *seq);
            entries.into_iter().map(|(_, tx)| tx).collect()
        };

        // Per-sender nonce ordering within that sender's slots.
        let mut by_sender: HashMap<ember_types::Address, Vec<usize>> = HashMap::new();
        for (idx, tx) in txs.iter().enumerate() {
            by_sender.entry(tx.from).or_default().push(idx);
        }
        for positions in by_sender.values() {
            if positions.len() < 2 {
                continue;
            }
            let mut group: Vec<Transaction> =
                positions.iter().map(|&i| txs[i].clone()).collect();
            group.sort_by_key(|tx| tx.nonce);
            for (&slot, tx) in positions.iter().zip(group) {
                txs[slot] = tx;
            }
        }

        let mut out = Vec::new();
        let mut total = 0usize;
        for tx in txs {
            let encoded = tx.encode();
            if total + encoded.len() > max_bytes {
                break;
            }
            total += encoded.len();
            out.push(encoded);
        }
        out
    }

    /// Remove a transaction, recording it in the replay window.
    pub fn evict(&self, hash: &Hash, now_ms: u64) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(hash).is_some() {
            tracing::debug!(tx = %hash, "transaction evicted");
        }
        inner.recently_evicted.insert(*hash, now_ms);
    }

    /// Eviction after Commit: every transaction carried by the committed
    /// block leaves the pool.
    pub fn prune_committed(&self, hashes: &[Hash], now_ms: u64) {
        for hash in hashes {
            self.evict(hash, now_ms);
        }
    }

    /// Periodic sweep: expire old pending entries, forget stale replay
    /// records, and drop idle rate-limiter buckets.
    pub fn sweep(&self, now_ms: u64) {
        let ttl_ms = self.config.tx_ttl_secs * 1000;
        let window_ms = self.config.replay_window_secs * 1000;
        let mut inner = self.inner.lock();
        let expired: Vec<Hash> = inner
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.admitted_at_ms) >= ttl_ms)
            .map(|(h, _)| *h)
            .collect();
        for hash in &expired {
            inner.entries.remove(hash);
            inner.recently_evicted.insert(*hash, now_ms);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired pending transactions");
        }
        inner
            .recently_evicted
            .retain(|_, at| now_ms.saturating_sub(*at) < window_ms);
        drop(inner);
        self.limiter.purge_stale(now_ms, self.config.tx_ttl_secs);
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
