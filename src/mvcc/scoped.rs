// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Scoped handle to a running transaction.

use crate::time::Timestamp;

use super::manager::MvccManager;
use super::MvccError;

/// How a scoped transaction's timestamp is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampAssignment {
    /// From the clock's current time.
    Now,
    /// From the clock's latest possible current time (now + max error).
    NowLatest,
    /// A caller-supplied timestamp, for offline replay of transactions
    /// during replica catch-up or bootstrap. Commit goes through the
    /// offline path.
    PreAssigned(Timestamp),
}

/// A uniquely-owned handle to a running transaction.
///
/// When the handle goes out of scope the transaction is finalized
/// automatically: committed if [`Self::start_applying`] was called, aborted
/// otherwise.
pub struct ScopedTransaction<'a> {
    manager: &'a MvccManager,
    timestamp: Timestamp,
    offline: bool,
    applying: bool,
    done: bool,
}

impl<'a> ScopedTransaction<'a> {
    /// Starts a new transaction on `manager`. The manager must outlive this
    /// handle. Fails with `IllegalState` only for a pre-assigned timestamp
    /// that cannot be started.
    pub fn new(
        manager: &'a MvccManager,
        assignment: TimestampAssignment,
    ) -> Result<Self, MvccError> {
        let (timestamp, offline) = match assignment {
            TimestampAssignment::Now => (manager.start_transaction(), false),
            TimestampAssignment::NowLatest => (manager.start_transaction_at_latest(), false),
            TimestampAssignment::PreAssigned(ts) => {
                manager.start_transaction_at_timestamp(ts)?;
                (ts, true)
            }
        };
        Ok(ScopedTransaction {
            manager,
            timestamp,
            offline,
            applying: false,
            done: false,
        })
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Marks that this transaction is about to apply its modifications to
    /// in-memory stores. Must be called before [`Self::commit`]; after it,
    /// [`Self::abort`] may no longer be called.
    pub fn start_applying(&mut self) {
        assert!(!self.done, "transaction {} is already finalized", self.timestamp);
        self.manager.start_applying_transaction(self.timestamp);
        self.applying = true;
    }

    /// Commits the transaction. Requires [`Self::start_applying`].
    ///
    /// # Panics
    ///
    /// Panics if the transaction was already finalized, or if
    /// `start_applying` was never called.
    pub fn commit(&mut self) {
        assert!(!self.done, "transaction {} is already finalized", self.timestamp);
        if self.offline {
            self.manager.offline_commit_transaction(self.timestamp);
        } else {
            self.manager.commit_transaction(self.timestamp);
        }
        self.done = true;
    }

    /// Aborts the transaction. Requires that [`Self::start_applying`] was
    /// NOT called.
    ///
    /// # Panics
    ///
    /// Panics if the transaction was already finalized or is applying.
    pub fn abort(&mut self) {
        assert!(!self.done, "transaction {} is already finalized", self.timestamp);
        self.manager.abort_transaction(self.timestamp);
        self.done = true;
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.applying {
            self.commit();
        } else {
            self.abort();
        }
    }
}
