//! Error taxonomy and wire result codes.

use ember_state::StateError;
use ember_store::StoreError;
use ember_validators::ValidatorError;
use thiserror::Error;

/// Transaction accepted.
pub const CODE_OK: u32 = 0;
/// The raw bytes did not decode to a transaction.
pub const CODE_DECODE_ERROR: u32 = 1;
/// Structurally invalid, bad signature, nonce mismatch, or insufficient
/// balance. Rejected and, at finalization, evicted from the mempool.
pub const CODE_INVALID_TX: u32 = 2;
/// Execution failed (out of gas, revert). The receipt is marked failed and
/// gas is charged.
pub const CODE_EXECUTION_FAILED: u32 = 4;
/// Admission back-pressure: sender rate limit or pool capacity. Not a
/// transaction fault; resubmission later is fine.
pub const CODE_RATE_LIMITED: u32 = 5;
/// The caller's deadline expired before admission started.
pub const CODE_TIMEOUT: u32 = 6;

/// Application-level failures.
///
/// Per-transaction problems never surface here; they become result codes.
/// `Storage` and `Invariant` are fatal to the block: Commit aborts without
/// acknowledging, so the consensus engine halts instead of propagating a
/// bad app-hash.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Validators(#[from] ValidatorError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl AppError {
    /// Whether the operator must intervene before the node can continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Storage(_) | AppError::Invariant(_))
    }
}
