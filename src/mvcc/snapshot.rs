// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Snapshots of the MVCC state.

use tracing::warn;

use crate::time::Timestamp;

/// An immutable visibility predicate over transaction timestamps.
///
/// A timestamp `T` is committed in the snapshot if and only if
/// `T < all_committed_before` or `T` is in the extra committed set:
///
/// ```text
///   CCCCCCCCCCCCCCCCCUUUUUCUUUCU
///                    |    \___\___ extra committed timestamps
///                    |
///                    \- all_committed_before
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccSnapshot {
    /// Every transaction strictly below this timestamp is committed.
    pub(crate) all_committed_before: Timestamp,

    /// No transaction at or beyond this timestamp is committed. Equivalent
    /// to `max(committed_timestamps) + 1`, cached because the vector is
    /// unsorted.
    pub(crate) none_committed_at_or_after: Timestamp,

    /// Committed timestamps at or above `all_committed_before`. Kept as a
    /// small unsorted vector: it stays short in practice and is consulted
    /// only when the two watermarks cannot decide.
    pub(crate) committed_timestamps: Vec<Timestamp>,
}

impl MvccSnapshot {
    /// A clean snapshot at `ts`: every transaction strictly below `ts` is
    /// committed, nothing else is.
    pub fn at(ts: Timestamp) -> Self {
        MvccSnapshot {
            all_committed_before: ts,
            none_committed_at_or_after: ts,
            committed_timestamps: Vec::new(),
        }
    }

    /// A snapshot considering every transaction committed. Mostly useful in
    /// tests.
    pub fn all_committed() -> Self {
        Self::at(Timestamp::MAX)
    }

    /// A snapshot considering no transaction committed.
    pub fn none_committed() -> Self {
        Self::at(Timestamp::MIN)
    }

    /// True if the given transaction timestamp is visible in this snapshot.
    /// Constant-time unless the watermarks cannot decide.
    #[inline]
    pub fn is_committed(&self, ts: Timestamp) -> bool {
        if ts < self.all_committed_before {
            return true;
        }
        if ts >= self.none_committed_at_or_after {
            return false;
        }
        self.committed_timestamps.contains(&ts)
    }

    /// False iff no committed transaction has a timestamp at or above `ts`.
    /// Used to skip reading newer versions entirely.
    #[inline]
    pub fn may_have_committed_at_or_after(&self, ts: Timestamp) -> bool {
        ts < self.none_committed_at_or_after
    }

    /// False iff every transaction at or below `ts` is committed.
    /// Used to skip UNDO processing entirely.
    #[inline]
    pub fn may_have_uncommitted_at_or_before(&self, ts: Timestamp) -> bool {
        ts >= self.all_committed_before
    }

    /// True if this snapshot is determined by its watermark alone.
    pub fn is_clean(&self) -> bool {
        self.committed_timestamps.is_empty()
    }

    /// Considers the given timestamps committed even though they were not
    /// when the snapshot was constructed. Used on the flush path, where the
    /// set of commits going into a file need not be a consistent snapshot.
    pub fn add_committed_timestamps(&mut self, timestamps: &[Timestamp]) {
        for &ts in timestamps {
            self.add_committed_timestamp(ts);
        }
    }

    pub(crate) fn add_committed_timestamp(&mut self, ts: Timestamp) {
        if self.is_committed(ts) {
            return;
        }
        self.committed_timestamps.push(ts);
        self.none_committed_at_or_after = self.none_committed_at_or_after.max(ts.next());
    }

    /// The newest timestamp at or below which everything is committed.
    /// Meaningful for clean snapshots; a dirty snapshot is reported.
    pub fn last_committed_timestamp(&self) -> Timestamp {
        if !self.is_clean() {
            if self.committed_timestamps.len() == 1
                && self.committed_timestamps[0] == self.all_committed_before
            {
                // A dirty snapshot that is in fact clean: all timestamps
                // below X plus the set {X}.
                return self.all_committed_before;
            }
            warn!(snapshot = %self, "last_committed_timestamp called on a dirty snapshot");
        }
        Timestamp::from_raw(self.all_committed_before.raw().saturating_sub(1))
    }
}

impl std::fmt::Display for MvccSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MvccSnapshot[committed={{T|T < {}", self.all_committed_before)?;
        if !self.committed_timestamps.is_empty() {
            write!(f, " or (T in {{")?;
            for (i, ts) in self.committed_timestamps.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", ts)?;
            }
            write!(f, "}})")?;
        }
        write!(f, "}}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> Timestamp {
        Timestamp::from_raw(v)
    }

    #[test]
    fn test_clean_snapshot_visibility() {
        let snap = MvccSnapshot::at(ts(100));
        assert!(snap.is_clean());
        assert!(snap.is_committed(ts(0)));
        assert!(snap.is_committed(ts(99)));
        assert!(!snap.is_committed(ts(100)));
        assert!(!snap.is_committed(ts(5000)));
    }

    #[test]
    fn test_all_and_none_committed() {
        let all = MvccSnapshot::all_committed();
        assert!(all.is_committed(ts(0)));
        assert!(all.is_committed(ts(u64::MAX - 2)));

        let none = MvccSnapshot::none_committed();
        assert!(!none.is_committed(ts(0)));
        assert!(!none.is_committed(ts(100)));
    }

    #[test]
    fn test_extra_committed_timestamps() {
        let mut snap = MvccSnapshot::at(ts(10));
        snap.add_committed_timestamps(&[ts(15), ts(17)]);

        assert!(snap.is_committed(ts(9)));
        assert!(!snap.is_committed(ts(10)));
        assert!(snap.is_committed(ts(15)));
        assert!(!snap.is_committed(ts(16)));
        assert!(snap.is_committed(ts(17)));
        assert!(!snap.is_committed(ts(18)));
        assert!(!snap.is_clean());
    }

    #[test]
    fn test_add_committed_is_idempotent() {
        let mut snap = MvccSnapshot::at(ts(10));
        snap.add_committed_timestamps(&[ts(15)]);
        snap.add_committed_timestamps(&[ts(15), ts(5)]);
        assert_eq!(snap.committed_timestamps.len(), 1);
    }

    #[test]
    fn test_may_have_committed_at_or_after() {
        let mut snap = MvccSnapshot::at(ts(10));
        assert!(!snap.may_have_committed_at_or_after(ts(10)));
        assert!(snap.may_have_committed_at_or_after(ts(9)));

        snap.add_committed_timestamps(&[ts(20)]);
        assert!(snap.may_have_committed_at_or_after(ts(15)));
        assert!(snap.may_have_committed_at_or_after(ts(20)));
        assert!(!snap.may_have_committed_at_or_after(ts(21)));
    }

    #[test]
    fn test_may_have_uncommitted_at_or_before() {
        let snap = MvccSnapshot::at(ts(10));
        assert!(!snap.may_have_uncommitted_at_or_before(ts(9)));
        assert!(snap.may_have_uncommitted_at_or_before(ts(10)));
        assert!(snap.may_have_uncommitted_at_or_before(ts(100)));
    }

    #[test]
    fn test_last_committed_timestamp_clean() {
        let snap = MvccSnapshot::at(ts(100));
        assert_eq!(snap.last_committed_timestamp(), ts(99));
    }

    #[test]
    fn test_last_committed_timestamp_degenerate_dirty() {
        let mut snap = MvccSnapshot::at(ts(100));
        snap.committed_timestamps.push(ts(100));
        snap.none_committed_at_or_after = ts(101);
        assert_eq!(snap.last_committed_timestamp(), ts(100));
    }

    #[test]
    fn test_display() {
        let mut snap = MvccSnapshot::at(ts(5));
        assert_eq!(snap.to_string(), "MvccSnapshot[committed={T|T < TS(5)}]");
        snap.add_committed_timestamps(&[ts(8)]);
        assert_eq!(
            snap.to_string(),
            "MvccSnapshot[committed={T|T < TS(5) or (T in {TS(8)})}]"
        );
    }
}
