//! World state and transaction execution.
//!
//! [`StateDb`] composes the account trie with per-account storage tries and
//! the code store; [`StateManager`] owns the working handle between blocks
//! and enforces the reload-after-commit rule; [`ExecutionEngine`] applies
//! transactions to a [`StateDb`] under a [`BlockContext`].

mod executor;
mod manager;
mod state_db;

pub use executor::{
    derive_contract_address, intrinsic_gas, BlockContext, ExecError, ExecOutcome,
    ExecutionEngine, TX_BASE_GAS, TX_CODE_DEPOSIT_GAS, TX_CREATE_GAS, TX_DATA_NONZERO_GAS,
    TX_DATA_ZERO_GAS,
};
pub use manager::StateManager;
pub use state_db::{AccountReader, StateDb};

use ember_store::StoreError;
use ember_trie::TrieError;
use thiserror::Error;

/// Errors from state access.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Trie(#[from] TrieError),

    #[error("corrupt account record: {0}")]
    CorruptAccount(String),

    #[error("corrupt storage record: {0}")]
    CorruptStorage(String),
}
