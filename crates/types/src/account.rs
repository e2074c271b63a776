//! Account state as stored in the world-state trie.

use crate::hash::{Hash, EMPTY_ROOT, KECCAK_EMPTY};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to decode account: {0}")]
pub struct AccountDecodeError(String);

/// The per-address record in the state trie.
///
/// `nonce` counts committed transactions from the address, `code_hash` is
/// [`KECCAK_EMPTY`] for externally-owned accounts, and `storage_root` is the
/// root of the account's storage trie ([`EMPTY_ROOT`] when empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    #[serde(with = "crate::serde_u256")]
    pub balance: U256,
    pub code_hash: Hash,
    pub storage_root: Hash,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            nonce: 0,
            balance: U256::zero(),
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT,
        }
    }
}

impl Account {
    /// A fresh account holding `balance`, created lazily on first credit.
    pub fn with_balance(balance: U256) -> Self {
        Account {
            balance,
            ..Default::default()
        }
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }

    /// Canonical trie-leaf encoding: `rlp([nonce, balance, storage_root,
    /// code_hash])`.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut stream = rlp::RlpStream::new_list(4);
        stream.append(&self.nonce);
        stream.append(&self.balance);
        stream.append(&self.storage_root.to_vec());
        stream.append(&self.code_hash.to_vec());
        stream.out().to_vec()
    }

    pub fn rlp_decode(bytes: &[u8]) -> Result<Self, AccountDecodeError> {
        let rlp = rlp::Rlp::new(bytes);
        let nonce: u64 = rlp
            .val_at(0)
            .map_err(|e| AccountDecodeError(e.to_string()))?;
        let balance: U256 = rlp
            .val_at(1)
            .map_err(|e| AccountDecodeError(e.to_string()))?;
        let storage_root: Vec<u8> = rlp
            .val_at(2)
            .map_err(|e| AccountDecodeError(e.to_string()))?;
        let code_hash: Vec<u8> = rlp
            .val_at(3)
            .map_err(|e| AccountDecodeError(e.to_string()))?;
        Ok(Account {
            nonce,
            balance,
            storage_root: Hash::from_slice(&storage_root)
                .map_err(|e| AccountDecodeError(e.to_string()))?,
            code_hash: Hash::from_slice(&code_hash)
                .map_err(|e| AccountDecodeError(e.to_string()))?,
        })
    }
}
