//! Durable byte-keyed storage.
//!
//! The node persists everything through the [`KvStore`] trait: point reads
//! and writes, atomic multi-key batches, and prefix scans, partitioned into
//! a small set of [`Namespace`]s so that trie-node compaction never touches
//! block or validator metadata.
//!
//! Two backends are provided:
//!
//! - [`RocksStore`]: the production backend. Namespaces map to RocksDB
//!   column families; batches ride a single `WriteBatch` so a crash leaves
//!   the last batch either fully visible or fully absent.
//! - [`MemStore`]: an in-memory backend with the same semantics, used by
//!   unit and deterministic-replay tests.

mod keys;
mod memory;
mod rocks;

pub use keys::{block_key, tx_key, LATEST_HEIGHT, STATE_META, VALIDATOR_EMITTED, VALIDATOR_SET};
pub use memory::MemStore;
pub use rocks::{RocksConfig, RocksStore};

use thiserror::Error;

/// Logical keyspaces within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Chain metadata: `state_meta`, `latest_height`, `validators/set`.
    Meta,
    /// Committed blocks keyed by big-endian height.
    Blocks,
    /// Committed transactions keyed by hash.
    Txs,
    /// Content-addressed trie nodes and code blobs.
    Trie,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Meta,
        Namespace::Blocks,
        Namespace::Txs,
        Namespace::Trie,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Namespace::Meta => 0,
            Namespace::Blocks => 1,
            Namespace::Txs => 2,
            Namespace::Trie => 3,
        }
    }

    pub(crate) fn cf_name(self) -> &'static str {
        match self {
            Namespace::Meta => "default",
            Namespace::Blocks => "blocks",
            Namespace::Txs => "txs",
            Namespace::Trie => "trie",
        }
    }
}

/// Errors surfaced by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key does not exist.
    #[error("not found")]
    NotFound,

    /// The backend reported data loss or an unrecoverable failure. Fatal:
    /// callers on the commit path must abort rather than acknowledge.
    #[error("storage corruption: {0}")]
    Corruption(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

/// A single operation within an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        ns: Namespace,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        ns: Namespace,
        key: Vec<u8>,
    },
}

/// An ordered set of writes applied atomically across namespaces.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, ns: Namespace, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            ns,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, ns: Namespace, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { ns, key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Append all operations from another batch.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }
}

/// Ordered byte-key/byte-value storage with atomic batches.
///
/// All methods return [`StoreError::Closed`] after `close()`. Point reads of
/// absent keys return `Ok(None)` rather than `NotFound`; the error variant
/// is reserved for callers that require presence.
pub trait KvStore: Send + Sync {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<(), StoreError>;

    /// Apply a batch atomically: after a crash, either every operation is
    /// visible or none is.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// All `(key, value)` pairs in `ns` whose key starts with `prefix`,
    /// in ascending key order.
    fn scan_prefix(&self, ns: Namespace, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Flush and refuse further operations.
    fn close(&self) -> Result<(), StoreError>;

    /// Like `get`, but absence is [`StoreError::NotFound`].
    fn get_required(&self, ns: Namespace, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.get(ns, key)?.ok_or(StoreError::NotFound)
    }
}
