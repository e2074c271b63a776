//! Core types for the Emberchain node.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Primitives**: [`Hash`], [`Address`], U256 serde helpers
//! - **Chain data**: [`Transaction`], [`Receipt`], [`Block`], [`Account`]
//! - **Validators**: [`Validator`], [`ValidatorUpdate`], genesis documents
//! - **Key material**: secp256k1 account keys, ed25519 validator keys
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crates, making it the foundation layer. All hashing is keccak-256 and all
//! canonical encodings are RLP, so that hashes line up with what an
//! EVM-compatible tool expects.

mod account;
mod address;
mod block;
mod crypto;
mod hash;
mod receipt;
mod transaction;
mod validator;

pub mod serde_bytes_hex;
pub mod serde_u256;

pub use account::{Account, AccountDecodeError};
pub use address::Address;
pub use block::{Block, BlockDecodeError, BlockHeader};
pub use crypto::{recover_signer, AccountKey, CryptoError, KeyPair, PublicKey};
pub use hash::{keccak256, Hash, HexError, EMPTY_ROOT, KECCAK_EMPTY};
pub use receipt::{Log, Receipt, ReceiptStatus};
pub use transaction::{Transaction, TxError};
pub use validator::{
    power_from_stake, GenesisAccount, GenesisDoc, GenesisState, GenesisValidator, Validator,
    ValidatorUpdate, POWER_CAP, STAKE_UNIT_DECIMALS,
};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use primitive_types::U256;

    /// Deterministic account key derived from a seed byte.
    pub fn test_account_key(seed: u8) -> AccountKey {
        let mut secret = [0u8; 32];
        secret[31] = seed.max(1);
        secret[0] = 0x10;
        AccountKey::from_bytes(&secret).expect("test secret is a valid scalar")
    }

    /// Deterministic validator keypair derived from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed([seed; 32])
    }

    /// Build and sign a plain value transfer.
    pub fn test_transfer(
        key: &AccountKey,
        to: Address,
        value: U256,
        nonce: u64,
    ) -> Transaction {
        let mut tx = Transaction::new(
            key.address(),
            Some(to),
            value,
            Vec::new(),
            21_000,
            U256::from(1_000_000_000u64),
            nonce,
        );
        tx.sign(key);
        tx
    }

    /// One whole coin in base units (10^18).
    pub fn coins(n: u64) -> U256 {
        U256::from(n) * U256::exp10(STAKE_UNIT_DECIMALS as usize)
    }
}
