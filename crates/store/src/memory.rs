//! In-memory store backend for tests and deterministic replay.

use crate::{BatchOp, KvStore, Namespace, StoreError, WriteBatch};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// A [`KvStore`] backed by in-process maps. Batches are applied under one
/// lock, giving the same all-or-nothing visibility as the RocksDB backend.
#[derive(Default)]
pub struct MemStore {
    maps: Mutex<[Map; 4]>,
    closed: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KvStore for MemStore {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        Ok(self.maps.lock()[ns.index()].get(key).cloned())
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        self.maps.lock()[ns.index()].insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        self.maps.lock()[ns.index()].remove(key);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_open()?;
        let mut maps = self.maps.lock();
        for op in batch.ops() {
            match op {
                BatchOp::Put { ns, key, value } => {
                    maps[ns.index()].insert(key.clone(), value.clone());
                }
                BatchOp::Delete { ns, key } => {
                    maps[ns.index()].remove(key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        ns: Namespace,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.check_open()?;
        let maps = self.maps.lock();
        Ok(maps[ns.index()]
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
