// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Coordinator of MVCC transactions.
//!
//! Threads wishing to make updates obtain a unique timestamp from the
//! manager, usually through [`ScopedTransaction`](super::ScopedTransaction).
//! There are two valid paths for a transaction:
//!
//! 1. `start_transaction` -> `start_applying_transaction` -> `commit_transaction`
//! 2. `start_transaction` -> `abort_transaction`
//!
//! Once a transaction is APPLYING it has begun mutating in-memory stores and
//! must commit; in-memory edits cannot be rolled back. Every operation holds
//! a single mutex for the duration of its critical section; only the wait
//! operations block, and they do so on waiter-owned latches with the mutex
//! released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::time::{Clock, Timestamp};

use super::snapshot::MvccSnapshot;
use super::MvccError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Reserved,
    Applying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitFor {
    AllCommitted,
    NoneApplying,
}

struct WaitingState {
    timestamp: Timestamp,
    wait_for: WaitFor,
    latch: OneShotLatch,
}

/// A latch signaled at most once, owned by the waiter. The manager holds an
/// `Arc` clone only while registered in its queue.
struct OneShotLatch {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl OneShotLatch {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Blocks until signaled or the deadline passes; returns whether the
    /// latch was signaled.
    fn wait_until_deadline(&self, deadline: Instant) -> bool {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }
}

struct Inner {
    cur_snap: MvccSnapshot,

    /// Timestamps of currently in-flight transactions, keyed by raw value.
    in_flight: HashMap<u64, TxnState>,

    /// No new transaction may ever be born at or below this watermark.
    no_new_transactions_at_or_before: Timestamp,

    /// The minimum in-flight timestamp, or `Timestamp::MAX` if none. Cached
    /// to avoid scanning `in_flight` on every commit.
    earliest_in_flight: Timestamp,

    waiters: Vec<Arc<WaitingState>>,
}

/// Per-tablet MVCC coordinator: assigns monotonic transaction timestamps,
/// tracks in-flight transactions, maintains the safe-time watermark, and
/// constructs visibility snapshots.
pub struct MvccManager {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl MvccManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MvccManager {
            clock,
            inner: Mutex::new(Inner {
                cur_snap: MvccSnapshot::none_committed(),
                in_flight: HashMap::new(),
                no_new_transactions_at_or_before: Timestamp::MIN,
                earliest_in_flight: Timestamp::MAX,
                waiters: Vec::new(),
            }),
        }
    }

    /// Begins a new transaction at the clock's current time, returning its
    /// timestamp. Returned timestamps are strictly increasing across calls.
    pub fn start_transaction(&self) -> Timestamp {
        loop {
            let now = self.clock.now();
            let mut inner = self.inner.lock();
            if inner.init_transaction_unlocked(now) {
                return now;
            }
            // Raced with a safe-time advance; re-read the clock.
        }
    }

    /// Begins a new transaction at the latest possible current time,
    /// i.e. now plus the clock's maximum error.
    pub fn start_transaction_at_latest(&self) -> Timestamp {
        let ts = loop {
            let latest = self.clock.now_latest();
            let mut inner = self.inner.lock();
            if inner.init_transaction_unlocked(latest) {
                break latest;
            }
        };
        // Keep issuance monotonic: later plain starts must exceed this.
        self.clock.update(ts);
        ts
    }

    /// Begins a new transaction at a caller-supplied timestamp, e.g. during
    /// bootstrap or follower replay where timestamps arrive from the log.
    pub fn start_transaction_at_timestamp(&self, ts: Timestamp) -> Result<(), MvccError> {
        if !ts.is_valid() || ts >= Timestamp::MAX {
            return Err(MvccError::IllegalState(format!(
                "cannot start a transaction at reserved timestamp {}",
                ts
            )));
        }
        let mut inner = self.inner.lock();
        if ts <= inner.no_new_transactions_at_or_before {
            return Err(MvccError::IllegalState(format!(
                "timestamp {} is at or below the no-new-transactions watermark {}",
                ts, inner.no_new_transactions_at_or_before
            )));
        }
        if inner.in_flight.contains_key(&ts.raw()) {
            return Err(MvccError::IllegalState(format!(
                "a transaction at {} is already in flight",
                ts
            )));
        }
        if inner.cur_snap.is_committed(ts) {
            return Err(MvccError::IllegalState(format!(
                "a transaction at {} is already committed",
                ts
            )));
        }
        inner.in_flight.insert(ts.raw(), TxnState::Reserved);
        inner.earliest_in_flight = inner.earliest_in_flight.min(ts);
        Ok(())
    }

    /// Marks the transaction as starting to apply its writes to in-memory
    /// stores. Must be called before [`Self::commit_transaction`]; after
    /// this, [`Self::abort_transaction`] must never be called.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is not in flight or is already APPLYING.
    pub fn start_applying_transaction(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        match inner.in_flight.get_mut(&ts.raw()) {
            None => panic!("cannot start applying: transaction {} is not in flight", ts),
            Some(state) => match *state {
                TxnState::Reserved => *state = TxnState::Applying,
                TxnState::Applying => panic!("transaction {} is already applying", ts),
            },
        }
    }

    /// Commits the given transaction and advances the safe time.
    ///
    /// This is the online path for leader-side processing: since issued
    /// timestamps increase strictly, nothing can ever again start at or
    /// below a timestamp that committed here, so the no-new-transactions
    /// watermark advances to it and the clean time is adjusted.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is not in flight or is not APPLYING.
    pub fn commit_transaction(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        inner.commit_transaction_unlocked(ts);
        inner.no_new_transactions_at_or_before =
            inner.no_new_transactions_at_or_before.max(ts);
        inner.adjust_clean_time_unlocked();
        inner.wake_satisfied_waiters_unlocked(self.clock.as_ref());
    }

    /// Commits the given transaction without advancing the safe time. Used
    /// for bootstrap and delayed processing on followers, where a
    /// transaction at a lower timestamp may still arrive; the watermark is
    /// advanced separately via [`Self::offline_adjust_safe_time`].
    ///
    /// # Panics
    ///
    /// Panics if the transaction is not in flight or is not APPLYING.
    pub fn offline_commit_transaction(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        inner.commit_transaction_unlocked(ts);
        inner.wake_satisfied_waiters_unlocked(self.clock.as_ref());
    }

    /// Raises the no-new-transactions watermark to `safe_time` and adjusts
    /// the clean time accordingly. The externally supplied timestamps must
    /// arrive in order for this to be sound.
    pub fn offline_adjust_safe_time(&self, safe_time: Timestamp) {
        let mut inner = self.inner.lock();
        inner.no_new_transactions_at_or_before =
            inner.no_new_transactions_at_or_before.max(safe_time);
        inner.adjust_clean_time_unlocked();
        inner.wake_satisfied_waiters_unlocked(self.clock.as_ref());
    }

    /// Aborts the given transaction.
    ///
    /// The timestamp is removed from the in-flight set, but the clean time
    /// is not advanced past it: a new transaction with a lower timestamp
    /// might still be started. This is the asymmetry between abort and
    /// commit.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is not in flight or is APPLYING.
    pub fn abort_transaction(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        let was_earliest = inner.earliest_in_flight == ts;
        let state = inner.remove_in_flight_unlocked(ts);
        if state == TxnState::Applying {
            panic!("cannot abort transaction {}: it is applying and must commit", ts);
        }
        if was_earliest {
            inner.advance_earliest_in_flight_unlocked();
        }
        inner.wake_satisfied_waiters_unlocked(self.clock.as_ref());
    }

    /// Takes a snapshot of the current MVCC state.
    pub fn take_snapshot(&self) -> MvccSnapshot {
        self.inner.lock().cur_snap.clone()
    }

    /// Waits until every transaction at or below `ts` is resolved, then
    /// returns a clean snapshot that includes `ts`.
    ///
    /// `ts` must not be in the future according to the clock. Returns
    /// [`MvccError::TimedOut`] if the deadline expires first.
    pub fn wait_for_clean_snapshot_at_timestamp(
        &self,
        ts: Timestamp,
        deadline: Instant,
    ) -> Result<MvccSnapshot, MvccError> {
        let now = self.clock.now();
        if ts > now {
            return Err(MvccError::IllegalState(format!(
                "cannot wait for a clean snapshot at future timestamp {} (now {})",
                ts, now
            )));
        }
        self.wait_until(WaitFor::AllCommitted, ts, deadline)?;
        Ok(MvccSnapshot::at(ts.next()))
    }

    /// Waits for every transaction that is APPLYING at call time to commit.
    ///
    /// This does not guarantee that no transaction is APPLYING upon return,
    /// only that those observed at entry are finished.
    pub fn wait_for_applying_transactions_to_commit(
        &self,
        deadline: Instant,
    ) -> Result<(), MvccError> {
        let highest_applying = {
            let inner = self.inner.lock();
            inner
                .in_flight
                .iter()
                .filter(|(_, state)| **state == TxnState::Applying)
                .map(|(&raw, _)| raw)
                .max()
        };
        match highest_applying {
            None => Ok(()),
            Some(raw) => self.wait_until(WaitFor::NoneApplying, Timestamp::from_raw(raw), deadline),
        }
    }

    /// True iff no in-flight transaction has a timestamp at or below `ts`.
    /// With nothing in flight, consults the clock: a new transaction can
    /// only start above the clock's current time.
    pub fn are_all_transactions_committed(&self, ts: Timestamp) -> bool {
        let inner = self.inner.lock();
        inner.are_all_transactions_committed_unlocked(ts, self.clock.as_ref())
    }

    /// The safe time: every transaction below this timestamp is committed
    /// or aborted. Non-decreasing across calls.
    pub fn clean_timestamp(&self) -> Timestamp {
        self.inner.lock().cur_snap.all_committed_before
    }

    /// Timestamps of transactions currently in the APPLYING state. These
    /// are guaranteed to eventually commit.
    pub fn applying_transaction_timestamps(&self) -> Vec<Timestamp> {
        let inner = self.inner.lock();
        inner
            .in_flight
            .iter()
            .filter(|(_, state)| **state == TxnState::Applying)
            .map(|(&raw, _)| Timestamp::from_raw(raw))
            .collect()
    }

    /// Number of registered waiters. Test visibility only.
    pub fn num_waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn wait_until(
        &self,
        wait_for: WaitFor,
        ts: Timestamp,
        deadline: Instant,
    ) -> Result<(), MvccError> {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.is_done_waiting_unlocked(wait_for, ts, self.clock.as_ref()) {
                return Ok(());
            }
            let waiter = Arc::new(WaitingState {
                timestamp: ts,
                wait_for,
                latch: OneShotLatch::new(),
            });
            inner.waiters.push(Arc::clone(&waiter));
            waiter
        };

        if waiter.latch.wait_until_deadline(deadline) {
            return Ok(());
        }

        // Deadline expired; deregister unless a signal raced the timeout.
        let mut inner = self.inner.lock();
        if waiter.latch.is_signaled() {
            return Ok(());
        }
        inner.waiters.retain(|w| !Arc::ptr_eq(w, &waiter));
        Err(MvccError::TimedOut)
    }
}

impl Inner {
    fn init_transaction_unlocked(&mut self, ts: Timestamp) -> bool {
        if ts <= self.no_new_transactions_at_or_before {
            return false;
        }
        if self.cur_snap.is_committed(ts) {
            return false;
        }
        if self.in_flight.contains_key(&ts.raw()) {
            return false;
        }
        self.in_flight.insert(ts.raw(), TxnState::Reserved);
        self.earliest_in_flight = self.earliest_in_flight.min(ts);
        true
    }

    fn remove_in_flight_unlocked(&mut self, ts: Timestamp) -> TxnState {
        match self.in_flight.remove(&ts.raw()) {
            Some(state) => state,
            None => panic!("transaction {} is not in flight", ts),
        }
    }

    fn advance_earliest_in_flight_unlocked(&mut self) {
        self.earliest_in_flight = self
            .in_flight
            .keys()
            .min()
            .map(|&raw| Timestamp::from_raw(raw))
            .unwrap_or(Timestamp::MAX);
    }

    fn commit_transaction_unlocked(&mut self, ts: Timestamp) {
        let was_earliest = self.earliest_in_flight == ts;
        let state = self.remove_in_flight_unlocked(ts);
        if state != TxnState::Applying {
            panic!(
                "cannot commit transaction {} in state {:?}: start_applying_transaction must be called first",
                ts, state
            );
        }
        self.cur_snap.add_committed_timestamp(ts);
        if was_earliest {
            self.advance_earliest_in_flight_unlocked();
        }
    }

    /// Advances the clean time to the timestamp below which every
    /// transaction is resolved: the minimum of the earliest in-flight
    /// timestamp and the first timestamp a new transaction could be born
    /// at. Extra committed timestamps below the new watermark become
    /// redundant and are dropped.
    fn adjust_clean_time_unlocked(&mut self) {
        let past_no_new =
            Timestamp::from_raw(self.no_new_transactions_at_or_before.raw().saturating_add(1));
        let new_clean = self.earliest_in_flight.min(past_no_new);
        if new_clean <= self.cur_snap.all_committed_before {
            return;
        }
        self.cur_snap.committed_timestamps.retain(|&t| t >= new_clean);
        self.cur_snap.all_committed_before = new_clean;
        self.cur_snap.none_committed_at_or_after = self
            .cur_snap
            .committed_timestamps
            .iter()
            .map(|t| t.next())
            .max()
            .unwrap_or(new_clean)
            .max(new_clean);
        debug!(clean_time = %new_clean, "advanced clean time");
    }

    fn are_all_transactions_committed_unlocked(&self, ts: Timestamp, clock: &dyn Clock) -> bool {
        if self.in_flight.is_empty() {
            return ts <= clock.now();
        }
        !self
            .in_flight
            .keys()
            .any(|&raw| Timestamp::from_raw(raw) <= ts)
    }

    fn any_applying_at_or_before_unlocked(&self, ts: Timestamp) -> bool {
        self.in_flight
            .iter()
            .any(|(&raw, state)| *state == TxnState::Applying && Timestamp::from_raw(raw) <= ts)
    }

    fn is_done_waiting_unlocked(
        &self,
        wait_for: WaitFor,
        ts: Timestamp,
        clock: &dyn Clock,
    ) -> bool {
        match wait_for {
            WaitFor::AllCommitted => self.are_all_transactions_committed_unlocked(ts, clock),
            WaitFor::NoneApplying => !self.any_applying_at_or_before_unlocked(ts),
        }
    }

    fn wake_satisfied_waiters_unlocked(&mut self, clock: &dyn Clock) {
        if self.waiters.is_empty() {
            return;
        }
        let waiters = std::mem::take(&mut self.waiters);
        let (done, pending): (Vec<_>, Vec<_>) = waiters.into_iter().partition(|waiter| {
            self.is_done_waiting_unlocked(waiter.wait_for, waiter.timestamp, clock)
        });
        self.waiters = pending;
        for waiter in done {
            waiter.latch.signal();
        }
    }
}
