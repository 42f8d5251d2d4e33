// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The document key-space: order-preserving key codec, DocKey-aware bloom
//! policy, and the RocksDB-backed document store.
//!
//! Every logical cell is named by a [`SubDocKey`] whose encoding preserves
//! the hierarchical sort order under a plain byte-lexicographic comparator,
//! which is what lets a flat sorted store model nested documents and serve
//! range and prefix scans at the document, sub-document, and cell levels.

mod bloom;
mod doc_key;
mod error;
mod primitive;
mod rocks;
mod value_type;

pub use bloom::{
    doc_key_prefix_in_domain, doc_key_prefix_transform, encoded_doc_key_prefix,
    encoded_doc_key_prefix_size, DocKeyAwareFilterPolicy, DEFAULT_BLOOM_FP_RATE,
};
pub use doc_key::{best_effort_doc_db_key_to_string, DocKey, DocKeyHash, SubDocKey};
pub use error::StorageError;
pub use primitive::PrimitiveValue;
pub use rocks::{DocStoreConfig, DurabilityMode, RocksDocStore};
pub use value_type::{ValueType, MAX_BYTE};
