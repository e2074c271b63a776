//! Transactions and their canonical encoding.

use crate::address::Address;
use crate::crypto::{recover_signer, AccountKey, CryptoError};
use crate::hash::{keccak256, Hash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from decoding or verifying a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("failed to decode transaction: {0}")]
    Decode(String),

    #[error("transaction hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: Hash, computed: Hash },

    #[error("missing signature")]
    MissingSignature,

    #[error("signer mismatch: recovered {recovered}, declared {declared}")]
    SignerMismatch { recovered: Address, declared: Address },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("zero gas limit")]
    ZeroGasLimit,
}

/// A user transaction.
///
/// `to == None` denotes contract creation. The hash is derived from the
/// canonical RLP encoding of every field except the signature, and the
/// signature signs that same hash, so `hash` and `from` are both verifiable
/// from the wire form alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(with = "crate::serde_u256")]
    pub value: U256,
    #[serde(with = "crate::serde_bytes_hex")]
    pub data: Vec<u8>,
    pub gas_limit: u64,
    #[serde(with = "crate::serde_u256")]
    pub gas_price: U256,
    pub nonce: u64,
    #[serde(with = "crate::serde_bytes_hex")]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Build an unsigned transaction; the hash is computed immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Vec<u8>,
        gas_limit: u64,
        gas_price: U256,
        nonce: u64,
    ) -> Self {
        let mut tx = Transaction {
            hash: Hash::ZERO,
            from,
            to,
            value,
            data,
            gas_limit,
            gas_price,
            nonce,
            signature: Vec::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// keccak256 of the canonical RLP encoding, signature excluded.
    pub fn compute_hash(&self) -> Hash {
        let mut stream = rlp::RlpStream::new_list(7);
        stream.append(&self.from.to_vec());
        match &self.to {
            Some(to) => stream.append(&to.to_vec()),
            None => stream.append_empty_data(),
        };
        stream.append(&self.value);
        stream.append(&self.data);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_price);
        stream.append(&self.nonce);
        keccak256(&stream.out())
    }

    /// Whether this transaction creates a contract.
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Sign with an account key, filling in the signature field.
    pub fn sign(&mut self, key: &AccountKey) {
        self.signature = key.sign_hash(&self.hash);
    }

    /// Recover the signer from the signature.
    pub fn recover_signer(&self) -> Result<Address, TxError> {
        if self.signature.is_empty() {
            return Err(TxError::MissingSignature);
        }
        Ok(recover_signer(&self.hash, &self.signature)?)
    }

    /// Full structural verification: declared hash matches the canonical
    /// encoding and the signature recovers `from`.
    pub fn verify(&self) -> Result<(), TxError> {
        if self.gas_limit == 0 {
            return Err(TxError::ZeroGasLimit);
        }
        let computed = self.compute_hash();
        if computed != self.hash {
            return Err(TxError::HashMismatch {
                declared: self.hash,
                computed,
            });
        }
        let recovered = self.recover_signer()?;
        if recovered != self.from {
            return Err(TxError::SignerMismatch {
                recovered,
                declared: self.from,
            });
        }
        Ok(())
    }

    /// Total funds a sender must hold to admit this transaction:
    /// `value + gas_limit * gas_price`.
    pub fn max_cost(&self) -> U256 {
        self.value + U256::from(self.gas_limit) * self.gas_price
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("transaction serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TxError> {
        serde_json::from_slice(bytes).map_err(|e| TxError::Decode(e.to_string()))
    }

    /// Size of the wire encoding, used for proposal byte budgeting.
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }
}
