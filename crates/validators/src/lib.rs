//! Validator set management.
//!
//! [`ValidatorSetManager`] owns stake accounting, slashing, jailing, power
//! derivation, and the translation of set changes into consensus
//! voting-power deltas. All mutation happens behind one writer lock;
//! readers take the shared side. Nothing under the lock ever calls back out
//! of this crate: deferred consequences (the auto-slash after too many
//! missed blocks) queue as [`PendingAction`]s that the application layer
//! drains after the lock is free.

mod manager;

pub use manager::ValidatorSetManager;

use ember_store::StoreError;
use ember_types::Address;
use primitive_types::U256;
use thiserror::Error;

/// Membership parameters.
#[derive(Debug, Clone)]
pub struct ValidatorParams {
    /// Minimum stake, in base units, to be an active validator.
    pub min_stake: U256,
    pub max_validators: usize,
}

/// Configuration for the missed-block auto-slash.
#[derive(Debug, Clone)]
pub struct SlashPolicy {
    /// Consecutive misses that trigger a slash decision.
    pub missed_block_threshold: u32,
    /// Percent slashed per threshold window.
    pub slash_percent: u8,
    /// Ceiling on a single slash decision.
    pub slash_percent_cap: u8,
    /// Jail duration attached to an auto-slash, in seconds.
    pub jail_duration_secs: u64,
}

impl Default for SlashPolicy {
    fn default() -> Self {
        SlashPolicy {
            missed_block_threshold: 100,
            slash_percent: 5,
            slash_percent_cap: 50,
            jail_duration_secs: 24 * 60 * 60,
        }
    }
}

/// A consequence recorded under the validator lock and applied by the
/// caller after releasing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Slash {
        address: Address,
        percent: u8,
        jail_duration_secs: u64,
    },
}

/// Errors from validator set operations.
#[derive(Debug, Clone, Error)]
pub enum ValidatorError {
    #[error("validator not found: {0}")]
    NotFound(Address),

    #[error("validator already registered: {0}")]
    AlreadyRegistered(Address),

    #[error("stake below minimum: have {have}, minimum {min}")]
    StakeBelowMinimum { have: U256, min: U256 },

    #[error("validator set is full and candidate stake does not exceed the smallest member")]
    SetFull,

    #[error("validator is jailed: {0}")]
    Jailed(Address),

    #[error("validator is not jailed: {0}")]
    NotJailed(Address),

    #[error("validator is jailed until {until}, now {now}")]
    StillJailed { until: u64, now: u64 },

    #[error("unstake would drop stake below minimum: would leave {remaining}, minimum {min}")]
    UnstakeBelowMinimum { remaining: U256, min: U256 },

    #[error("unstake amount exceeds stake")]
    UnstakeExceedsStake,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt validator record: {0}")]
    Codec(String),
}
