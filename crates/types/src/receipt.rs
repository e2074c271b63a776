//! Execution receipts and contract logs.

use crate::address::Address;
use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// Outcome of an executed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// An event emitted by a contract during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    #[serde(with = "crate::serde_bytes_hex")]
    pub data: Vec<u8>,
}

/// Receipt for a transaction that reached execution; produced exactly once
/// per executed transaction, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_height: u64,
    pub gas_used: u64,
    pub status: ReceiptStatus,
    pub logs: Vec<Log>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Receipt {
    pub fn success(tx_hash: Hash, block_height: u64, gas_used: u64, logs: Vec<Log>) -> Self {
        Receipt {
            tx_hash,
            block_height,
            gas_used,
            status: ReceiptStatus::Success,
            logs,
            error: None,
        }
    }

    pub fn failure(tx_hash: Hash, block_height: u64, gas_used: u64, error: String) -> Self {
        Receipt {
            tx_hash,
            block_height,
            gas_used,
            status: ReceiptStatus::Failure,
            logs: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    #[test]
    fn serde_round_trip() {
        let receipt = Receipt::success(
            keccak256(b"tx"),
            7,
            21_000,
            vec![Log {
                address: Address::ZERO,
                topics: vec![keccak256(b"topic")],
                data: vec![1, 2, 3],
            }],
        );
        let json = serde_json::to_vec(&receipt).unwrap();
        assert_eq!(serde_json::from_slice::<Receipt>(&json).unwrap(), receipt);
    }

    #[test]
    fn failure_carries_error() {
        let receipt = Receipt::failure(keccak256(b"tx"), 3, 0, "out of gas".into());
        assert!(!receipt.is_success());
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("out of gas"));
    }

    #[test]
    fn success_omits_error_field() {
        let receipt = Receipt::success(keccak256(b"tx"), 1, 21_000, vec![]);
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(!json.contains("error"));
    }
}
