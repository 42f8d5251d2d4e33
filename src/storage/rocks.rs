// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed document store.
//!
//! A thin adapter over the underlying sorted engine: it persists encoded
//! sub-document keys, and reads them back via prefix seeks bounded by the
//! key codec's advance operations, filtering versions through an MVCC
//! snapshot. Bloom filters are computed on the DocKey prefix of every key,
//! so point lookups by document benefit from them even though stored keys
//! carry subkeys and timestamps.

use std::path::Path;

use rocksdb::{
    DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, SliceTransform, WriteBatch,
    WriteOptions,
};
use tracing::debug;

use crate::mvcc::MvccSnapshot;
use crate::time::Timestamp;

use super::bloom::{doc_key_prefix_in_domain, doc_key_prefix_transform};
use super::{DocKey, StorageError, SubDocKey};

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes are synced to WAL but not fsynced to disk.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Writes are fsynced to disk on every operation.
    FsyncEveryWrite,
}

/// Tuning knobs for [`RocksDocStore`].
#[derive(Debug, Clone, Copy)]
pub struct DocStoreConfig {
    pub durability: DurabilityMode,
    /// Bits per key for the block-based bloom filter.
    pub bloom_bits_per_key: f64,
    pub write_buffer_size: usize,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::default(),
            bloom_bits_per_key: 10.0,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed store of encoded sub-document keys.
pub struct RocksDocStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_opts: WriteOptions,
}

impl RocksDocStore {
    /// Opens or creates a store at the given path with default tuning.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_config(path, DocStoreConfig::default())
    }

    /// Opens or creates a store with the given configuration.
    pub fn open_with_config(path: &Path, config: DocStoreConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(4);
        opts.set_target_file_size_base(64 * 1024 * 1024);
        opts.set_level_compaction_dynamic_level_bytes(true);

        // Bloom entries are computed on the extracted DocKey prefix, not the
        // whole stored key.
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(config.bloom_bits_per_key, false);
        block_opts.set_whole_key_filtering(false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_prefix_extractor(SliceTransform::create(
            "doc-key-prefix",
            doc_key_prefix_transform,
            Some(doc_key_prefix_in_domain),
        ));
        opts.set_memtable_prefix_bloom_ratio(0.1);

        let db = DBWithThreadMode::open(&opts, path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(config.durability == DurabilityMode::FsyncEveryWrite);

        debug!(path = %path.display(), "opened document store");
        Ok(Self { db, write_opts })
    }

    /// Forces a flush to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Writes one version of one sub-document value.
    pub fn put(&self, key: &SubDocKey, value: &[u8]) -> Result<(), StorageError> {
        Self::require_persistable(key)?;
        self.db.put_opt(key.encode(), value, &self.write_opts)?;
        Ok(())
    }

    /// Atomically writes a batch whose keys may still carry the
    /// `Timestamp::MAX` placeholder; it is replaced with `commit_ts` before
    /// anything is persisted.
    pub fn put_batch(
        &self,
        entries: Vec<(SubDocKey, Vec<u8>)>,
        commit_ts: Timestamp,
    ) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        for (mut key, value) in entries {
            key.replace_max_timestamp_with(commit_ts);
            Self::require_persistable(&key)?;
            batch.put(key.encode(), &value);
        }
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(())
    }

    /// Returns the newest version of exactly this subkey path visible in
    /// `snapshot`, if any.
    pub fn get(
        &self,
        path: &SubDocKey,
        snapshot: &MvccSnapshot,
    ) -> Result<Option<(Timestamp, Vec<u8>)>, StorageError> {
        let start = path.encode_without_timestamp();
        let end = path.advance_out_of_sub_doc();

        let iter = self
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key_bytes, value) = item?;
            if key_bytes.as_ref() >= end.as_slice() {
                break;
            }
            let key = SubDocKey::fully_decode_from(&key_bytes, true)?;
            if key.num_subkeys() != path.num_subkeys() {
                // A deeper path under the same prefix.
                continue;
            }
            if let Some(ts) = key.timestamp() {
                if snapshot.is_committed(ts) {
                    return Ok(Some((ts, value.to_vec())));
                }
            }
        }
        Ok(None)
    }

    /// Returns every visible version in the sub-tree rooted at the given
    /// subkey path, in key order (newest version first within each path).
    pub fn scan_sub_doc(
        &self,
        prefix: &SubDocKey,
        snapshot: &MvccSnapshot,
    ) -> Result<Vec<(SubDocKey, Vec<u8>)>, StorageError> {
        let start = prefix.encode_without_timestamp();
        let end = prefix.advance_out_of_sub_doc();
        self.scan_range(&start, &end, snapshot)
    }

    /// Returns every visible version stored under the given document.
    pub fn scan_document(
        &self,
        doc_key: &DocKey,
        snapshot: &MvccSnapshot,
    ) -> Result<Vec<(SubDocKey, Vec<u8>)>, StorageError> {
        let prefix = doc_key.encode();
        let mut results = Vec::new();

        let iter = self.db.prefix_iterator(&prefix);
        for item in iter {
            let (key_bytes, value) = item?;
            if !key_bytes.starts_with(&prefix) {
                break;
            }
            let key = SubDocKey::fully_decode_from(&key_bytes, true)?;
            if key.timestamp().map_or(false, |ts| snapshot.is_committed(ts)) {
                results.push((key, value.to_vec()));
            }
        }
        Ok(results)
    }

    fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        snapshot: &MvccSnapshot,
    ) -> Result<Vec<(SubDocKey, Vec<u8>)>, StorageError> {
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start, Direction::Forward));
        for item in iter {
            let (key_bytes, value) = item?;
            if key_bytes.as_ref() >= end {
                break;
            }
            let key = SubDocKey::fully_decode_from(&key_bytes, true)?;
            if key.timestamp().map_or(false, |ts| snapshot.is_committed(ts)) {
                results.push((key, value.to_vec()));
            }
        }
        Ok(results)
    }

    fn require_persistable(key: &SubDocKey) -> Result<(), StorageError> {
        match key.timestamp() {
            Some(ts) if ts != Timestamp::MAX => Ok(()),
            _ => Err(StorageError::NotPersistable(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PrimitiveValue;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksDocStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksDocStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn doc_key(name: &str) -> DocKey {
        DocKey::from_range(vec![PrimitiveValue::from(name)])
    }

    fn path(doc: &str, subkey: &str) -> SubDocKey {
        SubDocKey::with_subkeys(doc_key(doc), vec![PrimitiveValue::from(subkey)])
    }

    fn versioned(doc: &str, subkey: &str, ts: u64) -> SubDocKey {
        SubDocKey::with_timestamp(
            doc_key(doc),
            vec![PrimitiveValue::from(subkey)],
            Timestamp::from_raw(ts),
        )
    }

    #[test]
    fn test_get_newest_visible_version() {
        let (store, _dir) = create_test_store();

        store.put(&versioned("doc", "col", 100), b"v1").unwrap();
        store.put(&versioned("doc", "col", 200), b"v2").unwrap();
        store.put(&versioned("doc", "col", 300), b"v3").unwrap();

        let snapshot = MvccSnapshot::at(Timestamp::from_raw(250));
        let (ts, value) = store.get(&path("doc", "col"), &snapshot).unwrap().unwrap();
        assert_eq!(ts, Timestamp::from_raw(200));
        assert_eq!(value, b"v2");

        let all = MvccSnapshot::all_committed();
        let (ts, value) = store.get(&path("doc", "col"), &all).unwrap().unwrap();
        assert_eq!(ts, Timestamp::from_raw(300));
        assert_eq!(value, b"v3");
    }

    #[test]
    fn test_get_nothing_visible() {
        let (store, _dir) = create_test_store();
        store.put(&versioned("doc", "col", 100), b"v1").unwrap();

        let snapshot = MvccSnapshot::at(Timestamp::from_raw(50));
        assert!(store.get(&path("doc", "col"), &snapshot).unwrap().is_none());
        assert!(store
            .get(&path("doc", "other"), &MvccSnapshot::all_committed())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_get_skips_deeper_paths() {
        let (store, _dir) = create_test_store();

        let mut deeper = path("doc", "col");
        deeper.append_subkey(PrimitiveValue::from("inner"));
        deeper.set_timestamp(Timestamp::from_raw(100));
        store.put(&deeper, b"nested").unwrap();

        let snapshot = MvccSnapshot::all_committed();
        assert!(store.get(&path("doc", "col"), &snapshot).unwrap().is_none());
    }

    #[test]
    fn test_scan_sub_doc_covers_subtree() {
        let (store, _dir) = create_test_store();

        store.put(&versioned("doc", "a", 100), b"a").unwrap();
        let mut nested = path("doc", "a");
        nested.append_subkey(PrimitiveValue::from("b"));
        nested.set_timestamp(Timestamp::from_raw(100));
        store.put(&nested, b"ab").unwrap();
        store.put(&versioned("doc", "z", 100), b"z").unwrap();

        let snapshot = MvccSnapshot::all_committed();
        let results = store.scan_sub_doc(&path("doc", "a"), &snapshot).unwrap();
        let values: Vec<&[u8]> = results.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![b"ab".as_slice(), b"a".as_slice()]);
    }

    #[test]
    fn test_scan_document_filters_by_snapshot() {
        let (store, _dir) = create_test_store();

        store.put(&versioned("doc", "a", 100), b"old").unwrap();
        store.put(&versioned("doc", "a", 300), b"new").unwrap();
        store.put(&versioned("other", "a", 100), b"x").unwrap();

        let snapshot = MvccSnapshot::at(Timestamp::from_raw(200));
        let results = store.scan_document(&doc_key("doc"), &snapshot).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, b"old");
        assert_eq!(results[0].0.timestamp(), Some(Timestamp::from_raw(100)));
    }

    #[test]
    fn test_put_requires_timestamp() {
        let (store, _dir) = create_test_store();
        let result = store.put(&path("doc", "col"), b"value");
        assert!(matches!(result, Err(StorageError::NotPersistable(_))));

        let result = store.put(&versioned("doc", "col", Timestamp::MAX.raw()), b"value");
        assert!(matches!(result, Err(StorageError::NotPersistable(_))));
    }

    #[test]
    fn test_put_batch_replaces_placeholder() {
        let (store, _dir) = create_test_store();

        let placeholder = SubDocKey::with_timestamp(
            doc_key("doc"),
            vec![PrimitiveValue::from("col")],
            Timestamp::MAX,
        );
        store
            .put_batch(vec![(placeholder, b"value".to_vec())], Timestamp::from_raw(42))
            .unwrap();

        let snapshot = MvccSnapshot::all_committed();
        let (ts, value) = store.get(&path("doc", "col"), &snapshot).unwrap().unwrap();
        assert_eq!(ts, Timestamp::from_raw(42));
        assert_eq!(value, b"value");
    }

    #[test]
    fn test_manager_driven_visibility() {
        use crate::mvcc::MvccManager;
        use crate::time::LogicalClock;
        use std::sync::Arc;

        let (store, _dir) = create_test_store();
        let mgr = MvccManager::new(Arc::new(LogicalClock::default()));

        // A committed writer's cell is visible to later snapshots.
        let t1 = mgr.start_transaction();
        store.put(&versioned("doc", "col", t1.raw()), b"committed").unwrap();
        mgr.start_applying_transaction(t1);
        mgr.commit_transaction(t1);

        // An in-flight writer's cell is not.
        let t2 = mgr.start_transaction();
        store.put(&versioned("doc", "col", t2.raw()), b"in-flight").unwrap();

        let snap = mgr.take_snapshot();
        let (ts, value) = store.get(&path("doc", "col"), &snap).unwrap().unwrap();
        assert_eq!(ts, t1);
        assert_eq!(value, b"committed");

        mgr.start_applying_transaction(t2);
        mgr.commit_transaction(t2);
        let snap = mgr.take_snapshot();
        let (ts, value) = store.get(&path("doc", "col"), &snap).unwrap().unwrap();
        assert_eq!(ts, t2);
        assert_eq!(value, b"in-flight");
    }

    #[test]
    fn test_versions_iterate_newest_first() {
        let (store, _dir) = create_test_store();

        for ts in [100u64, 200, 300] {
            store.put(&versioned("doc", "col", ts), b"v").unwrap();
        }

        let snapshot = MvccSnapshot::all_committed();
        let results = store.scan_sub_doc(&path("doc", "col"), &snapshot).unwrap();
        let timestamps: Vec<u64> = results
            .iter()
            .map(|(k, _)| k.timestamp().unwrap().raw())
            .collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }
}
