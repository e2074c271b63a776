//! Blocks and block headers.

use crate::hash::{keccak256, Hash};
use crate::receipt::Receipt;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to decode block: {0}")]
pub struct BlockDecodeError(String);

/// Header of a committed block.
///
/// `app_hash` is the state root after applying this block; `parent_hash` is
/// the header hash of the previous block (zero at height 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub timestamp: u64,
    pub chain_id: String,
    pub app_hash: Hash,
}

impl BlockHeader {
    /// keccak256 of the canonical RLP encoding of the header fields, the
    /// `hash` field itself excluded.
    pub fn compute_hash(
        height: u64,
        parent_hash: &Hash,
        timestamp: u64,
        chain_id: &str,
        app_hash: &Hash,
    ) -> Hash {
        let mut stream = rlp::RlpStream::new_list(5);
        stream.append(&height);
        stream.append(&parent_hash.to_vec());
        stream.append(&timestamp);
        stream.append(&chain_id.as_bytes().to_vec());
        stream.append(&app_hash.to_vec());
        keccak256(&stream.out())
    }

    pub fn new(
        height: u64,
        parent_hash: Hash,
        timestamp: u64,
        chain_id: String,
        app_hash: Hash,
    ) -> Self {
        let hash = Self::compute_hash(height, &parent_hash, timestamp, &chain_id, &app_hash);
        BlockHeader {
            height,
            hash,
            parent_hash,
            timestamp,
            chain_id,
            app_hash,
        }
    }
}

/// A committed block: header plus the executed transactions and their
/// receipts, in proposal order. The two lists are parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

impl Block {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("block serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        serde_json::from_slice(bytes).map_err(|e| BlockDecodeError(e.to_string()))
    }
}
