// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC error types.

/// Errors that can occur in MVCC coordinator operations.
///
/// Only recoverable conditions are surfaced here; violations of the
/// transaction lifecycle (committing a non-applying transaction, aborting an
/// applying one, double-finalizing a scoped transaction) are programming
/// errors and panic instead.
#[derive(Debug, thiserror::Error)]
pub enum MvccError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("timed out waiting for MVCC condition")]
    TimedOut,
}
