//! The consensus-facing operation surface.
//!
//! The engine is an external collaborator; it sees the application only
//! through [`ConsensusApp`]. A wire shim translating these calls to the
//! engine's transport lives outside this workspace.

use crate::AppError;
use ember_types::{GenesisDoc, Hash, ValidatorUpdate};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Caller-supplied deadline for request-serving operations. Consensus
/// operations are deliberately not deadline-bounded: once begun they must
/// run to completion or the replay invariants break.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    pub const NONE: Deadline = Deadline(None);

    pub fn within(budget: Duration) -> Self {
        Deadline(Some(Instant::now() + budget))
    }

    pub fn expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }
}

/// Persisted commit metadata, the crash-recovery source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMeta {
    pub root: Hash,
    pub height: u64,
    pub app_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoResponse {
    pub last_height: u64,
    pub last_app_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitChainResponse {
    pub validators: Vec<ValidatorUpdate>,
    pub app_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTxResponse {
    pub code: u32,
    pub log: String,
}

/// Per-transaction result within a finalized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub code: u32,
    pub log: String,
    pub gas_used: u64,
}

impl ExecResult {
    pub fn ok(gas_used: u64) -> Self {
        ExecResult {
            code: crate::CODE_OK,
            log: "OK".to_string(),
            gas_used,
        }
    }

    pub fn rejected(code: u32, log: impl Into<String>) -> Self {
        ExecResult {
            code,
            log: log.into(),
            gas_used: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeBlockResponse {
    pub tx_results: Vec<ExecResult>,
    /// Voting-power delta; empty means "no change" and must be passed
    /// through as empty.
    pub validator_updates: Vec<ValidatorUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponse {
    /// Advisory: the engine may prune blocks below this height.
    pub retain_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub code: u32,
    pub value: Vec<u8>,
    pub log: String,
}

impl QueryResponse {
    pub fn ok(value: Vec<u8>) -> Self {
        QueryResponse {
            code: 0,
            value,
            log: String::new(),
        }
    }

    pub fn not_found(log: impl Into<String>) -> Self {
        QueryResponse {
            code: 1,
            value: Vec::new(),
            log: log.into(),
        }
    }
}

/// The operations the consensus engine drives, in its fixed order:
/// `Info → (InitChain at height 0) → repeat{ PrepareProposal,
/// ProcessProposal, FinalizeBlock, Commit }`, with `CheckTx` and `Query`
/// interleaved out-of-band from request threads.
pub trait ConsensusApp {
    /// Last committed height and app-hash, from persisted metadata.
    fn info(&self) -> InfoResponse;

    /// Seed the validator set (from genesis only when the persisted set is
    /// empty) and return the initial set plus the current app-hash.
    fn init_chain(&mut self, genesis: GenesisDoc) -> Result<InitChainResponse, AppError>;

    /// Full admission pipeline into the mempool.
    fn check_tx(&self, raw_tx: &[u8], deadline: Deadline) -> CheckTxResponse;

    /// Assemble an ordered proposal from the local mempool, then append
    /// deduplicated engine-provided transactions, within `max_bytes`.
    fn prepare_proposal(&mut self, height: u64, max_bytes: usize, hint_txs: Vec<Vec<u8>>)
        -> Vec<Vec<u8>>;

    /// Validation is deferred to FinalizeBlock; accepting unconditionally
    /// preserves liveness under honest leaders.
    fn process_proposal(&mut self, height: u64, txs: &[Vec<u8>]) -> bool;

    /// Execute the proposer-fixed transaction order against the working
    /// state. Per-transaction failures become result codes, never block
    /// failures.
    fn finalize_block(
        &mut self,
        height: u64,
        time: u64,
        txs: &[Vec<u8>],
    ) -> Result<FinalizeBlockResponse, AppError>;

    /// Durably persist the finalized block and its state, advance the
    /// app-hash, prune the mempool.
    fn commit(&mut self) -> Result<CommitResponse, AppError>;

    /// Read-only queries: `height`, `balance/<addr>`, `account/<addr>`,
    /// `tx/<hash>`, `block/<height>`.
    fn query(&self, path: &str, deadline: Deadline) -> QueryResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_none_never_expires() {
        assert!(!Deadline::NONE.expired());
    }

    #[test]
    fn deadline_in_past_is_expired() {
        let d = Deadline::within(Duration::from_secs(0));
        assert!(d.expired());
    }

    #[test]
    fn state_meta_round_trip() {
        let meta = StateMeta {
            root: ember_types::EMPTY_ROOT,
            height: 12,
            app_hash: ember_types::EMPTY_ROOT,
        };
        let json = serde_json::to_vec(&meta).unwrap();
        assert_eq!(serde_json::from_slice::<StateMeta>(&json).unwrap(), meta);
    }
}
