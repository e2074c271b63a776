//! RocksDB store backend.
//!
//! Namespaces map to column families. Commit batches ride a single
//! `rocksdb::WriteBatch` with `sync = true`, so the write-ahead log
//! guarantees all-or-nothing visibility across a crash.

use crate::{BatchOp, KvStore, Namespace, StoreError, WriteBatch};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, DB};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tuning knobs for the RocksDB backend.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    pub max_background_jobs: i32,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    pub keep_log_file_num: usize,
}

impl Default for RocksConfig {
    fn default() -> Self {
        Self {
            max_background_jobs: 4,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            keep_log_file_num: 10,
        }
    }
}

/// Production [`KvStore`] over RocksDB.
pub struct RocksStore {
    db: DB,
    closed: AtomicBool,
}

impl RocksStore {
    /// Open or create a database at `path` with default tuning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_config(path, RocksConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: RocksConfig,
    ) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_background_jobs(config.max_background_jobs);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_keep_log_file_num(config.keep_log_file_num);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cf_descriptors: Vec<_> = Namespace::ALL
            .iter()
            .map(|ns| ColumnFamilyDescriptor::new(ns.cf_name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Corruption(e.to_string()))?;

        Ok(Self {
            db,
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn cf(&self, ns: Namespace) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(ns.cf_name())
            .ok_or_else(|| StoreError::Corruption(format!("missing column family {}", ns.cf_name())))
    }
}

impl KvStore for RocksStore {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        let cf = self.cf(ns)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Corruption(e.to_string()))
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        let cf = self.cf(ns)?;
        self.db
            .put_cf(cf, key, value)
            .map_err(|e| StoreError::Corruption(e.to_string()))
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        let cf = self.cf(ns)?;
        self.db
            .delete_cf(cf, key)
            .map_err(|e| StoreError::Corruption(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_open()?;
        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.ops() {
            match op {
                BatchOp::Put { ns, key, value } => {
                    inner.put_cf(self.cf(*ns)?, key, value);
                }
                BatchOp::Delete { ns, key } => {
                    inner.delete_cf(self.cf(*ns)?, key);
                }
            }
        }
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .write_opt(inner, &write_opts)
            .map_err(|e| StoreError::Corruption(e.to_string()))
    }

    fn scan_prefix(
        &self,
        ns: Namespace,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.check_open()?;
        let cf = self.cf(ns)?;
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Corruption(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("closing rocksdb store");
        self.db.cancel_all_background_work(true);
        Ok(())
    }
}
