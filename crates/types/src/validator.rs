//! Validator records, voting-power derivation, and genesis documents.

use crate::address::Address;
use crate::crypto::PublicKey;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Stake decimals: one whole coin is `10^18` base units.
pub const STAKE_UNIT_DECIMALS: u32 = 18;

/// Upper bound on a single validator's voting power. Keeps the sum of powers
/// comfortably inside the consensus engine's signed 64-bit accumulator even
/// at the maximum set size.
pub const POWER_CAP: i64 = 1 << 30;

/// Voting power derived from stake: `clamp(stake / 10^18, 0, 2^30)`.
pub fn power_from_stake(stake: U256) -> i64 {
    let whole = stake / U256::exp10(STAKE_UNIT_DECIMALS as usize);
    if whole > U256::from(POWER_CAP) {
        POWER_CAP
    } else {
        whole.as_u64() as i64
    }
}

/// A member of the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pub_key: PublicKey,
    #[serde(with = "crate::serde_u256")]
    pub stake: U256,
    pub power: i64,
    pub jailed: bool,
    /// Unix seconds; zero when not jailed.
    pub jailed_until: u64,
    pub created_at: u64,
    pub last_active_at: u64,
    pub missed_blocks_consecutive: u32,
    pub total_missed: u64,
}

impl Validator {
    pub fn new(address: Address, pub_key: PublicKey, stake: U256, now: u64) -> Self {
        Validator {
            address,
            pub_key,
            power: power_from_stake(stake),
            stake,
            jailed: false,
            jailed_until: 0,
            created_at: now,
            last_active_at: now,
            missed_blocks_consecutive: 0,
            total_missed: 0,
        }
    }

    /// Active means eligible for the consensus set: enough stake, not jailed.
    pub fn is_active(&self, min_stake: U256) -> bool {
        !self.jailed && self.stake >= min_stake
    }
}

/// A voting-power change handed to the consensus engine. `power == 0`
/// removes the validator from the engine's set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: PublicKey,
    pub power: i64,
}

/// A validator entry in the genesis document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub pub_key: PublicKey,
    pub power: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GenesisValidator {
    /// Genesis powers convert back to stake at one coin per power unit.
    pub fn stake(&self) -> U256 {
        U256::from(self.power.max(0) as u64) * U256::exp10(STAKE_UNIT_DECIMALS as usize)
    }

    pub fn address(&self) -> Address {
        Address::from_validator_pub_key(self.pub_key.as_bytes())
    }
}

/// A funded account in the genesis state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    #[serde(with = "crate::serde_u256")]
    pub balance: U256,
}

/// Optional application state carried by the genesis document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    #[serde(default)]
    pub alloc: Vec<GenesisAccount>,
}

/// The genesis document handed to the application by the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub chain_id: String,
    /// Unix seconds.
    pub time: u64,
    pub validators: Vec<GenesisValidator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<GenesisState>,
}
