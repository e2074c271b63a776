//! Logical key layout.
//!
//! Metadata keys are literal byte strings in [`Namespace::Meta`]; blocks and
//! transactions use fixed-width binary keys in their own namespaces.
//! `latest_height` is stored as a decimal string.

use ember_types::Hash;

/// Meta key: JSON `{root, height, app_hash}` of the last commit.
pub const STATE_META: &[u8] = b"state_meta";

/// Meta key: JSON list of all validators.
pub const VALIDATOR_SET: &[u8] = b"validators/set";

/// Meta key: JSON map of the last validator set emitted to the consensus
/// engine, so delta suppression survives a restart.
pub const VALIDATOR_EMITTED: &[u8] = b"validators/emitted";

/// Meta key: decimal string of the last committed height.
pub const LATEST_HEIGHT: &[u8] = b"latest_height";

/// Block key: big-endian height, so prefix scans iterate in height order.
pub fn block_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// Transaction key: the 32-byte transaction hash.
pub fn tx_key(hash: &Hash) -> [u8; 32] {
    *hash.as_bytes()
}
