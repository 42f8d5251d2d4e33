// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! TabletDB: the key-space and visibility core of a distributed storage
//! tablet.
//!
//! Two tightly coupled subsystems make up the crate: the order-preserving
//! DocKey/SubDocKey codec that names every logical cell stored in a flat
//! sorted key/value engine, and the MVCC coordinator that assigns
//! timestamps, tracks in-flight transactions, and constructs the snapshots
//! that determine cell visibility during reads.

pub mod mvcc;
pub mod storage;
pub mod time;

pub use mvcc::{MvccError, MvccManager, MvccSnapshot, ScopedTransaction, TimestampAssignment};
pub use storage::{
    best_effort_doc_db_key_to_string, encoded_doc_key_prefix, encoded_doc_key_prefix_size,
    DocKey, DocKeyAwareFilterPolicy, DocKeyHash, DocStoreConfig, DurabilityMode, PrimitiveValue,
    RocksDocStore, StorageError, SubDocKey, ValueType,
};
pub use time::{Clock, HybridClock, HybridClockConfig, LogicalClock, Timestamp};
