//! Pending transaction pool.
//!
//! A bounded, hash-deduplicated set of admitted transactions with
//! per-sender token-bucket rate limiting and a replay window for recently
//! evicted hashes. Admission runs the full check pipeline (decode,
//! structural validation, signature recovery, nonce and balance checks
//! against the committed state) before pool-local concerns.

mod pool;
mod ratelimit;

pub use pool::{AdmissionOutcome, Mempool, MempoolConfig};
pub use ratelimit::RateLimiter;

use ember_state::StateError;
use primitive_types::U256;
use thiserror::Error;

/// Classified admission failures. `RateLimited` is back-pressure, not a
/// transaction fault.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    #[error("failed to decode transaction: {0}")]
    Decode(String),

    #[error("invalid transaction: {0}")]
    Invalid(String),

    #[error("nonce too low: account at {expected}, transaction has {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: U256, have: U256 },

    #[error("sender rate limit exceeded")]
    RateLimited,

    #[error("mempool is full")]
    PoolFull,

    #[error("transaction was recently evicted")]
    RecentlyEvicted,

    #[error(transparent)]
    State(#[from] StateError),
}
