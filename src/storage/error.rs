// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

/// Errors that can occur in codec and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A malformed encoded key: unknown type byte, truncated payload,
    /// unterminated string, or trailing bytes after a full decode.
    #[error("corruption: {0}")]
    Corruption(String),

    #[error("key is not persistable without a real timestamp: {0}")]
    NotPersistable(String),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl StorageError {
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        StorageError::Corruption(message.into())
    }
}
