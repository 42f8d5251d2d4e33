// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Clock abstraction and the hybrid physical/logical implementation.
//!
//! All timestamp generation flows through the [`Clock`] trait so that the
//! MVCC coordinator can be driven by a deterministic clock in tests and by a
//! hybrid clock in production.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::Timestamp;

/// A monotonic, thread-safe source of transaction timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time. Strictly increasing across calls.
    fn now(&self) -> Timestamp;

    /// Returns the latest possible current time, i.e. `now` plus the maximum
    /// error bound of the underlying time source.
    fn now_latest(&self) -> Timestamp;

    /// Advances the clock to at least `ts`, after observing an external
    /// timestamp. Subsequent `now()` calls return values greater than `ts`.
    fn update(&self, ts: Timestamp);
}

/// Configuration for [`HybridClock`].
#[derive(Debug, Clone, Copy)]
pub struct HybridClockConfig {
    /// Assumed maximum skew between this node's clock and true time. Used as
    /// the `now_latest` error bound and as the backward-jump tolerance.
    pub max_drift: Duration,
}

impl Default for HybridClockConfig {
    fn default() -> Self {
        Self {
            max_drift: Duration::from_millis(500),
        }
    }
}

/// Hybrid physical/logical clock.
///
/// Combines physical time (nanoseconds since the Unix epoch) with a logical
/// counter so that each call to `now()` returns a timestamp greater than all
/// previous calls, even under concurrent access and imperfect physical
/// clocks.
pub struct HybridClock {
    last_timestamp: AtomicU64,
    last_physical: AtomicU64,
    max_drift: Duration,
}

impl HybridClock {
    pub fn new(config: HybridClockConfig) -> Self {
        Self {
            last_timestamp: AtomicU64::new(0),
            last_physical: AtomicU64::new(0),
            max_drift: config.max_drift,
        }
    }

    fn physical_time_nanos() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    /// Samples physical time while maintaining its high-water mark. Aborts
    /// if the sample falls behind the mark by more than the drift
    /// tolerance; smaller regressions are absorbed by the logical counter.
    fn observe_physical(&self) -> u64 {
        let sample = Self::physical_time_nanos();
        let high_water = match self.last_physical.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |mark| (sample > mark).then_some(sample),
        ) {
            Ok(mark) | Err(mark) => mark,
        };
        if sample.saturating_add(self.max_drift.as_nanos() as u64) < high_water {
            panic!(
                "system clock moved backwards beyond tolerance: {} -> {} (max drift {:?})",
                high_water, sample, self.max_drift
            );
        }
        sample
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new(HybridClockConfig::default())
    }
}

impl Clock for HybridClock {
    fn now(&self) -> Timestamp {
        // One logical tick past whatever was issued before, pulled up to
        // physical time when the wall clock is ahead.
        let physical = self.observe_physical();
        let advance = |issued: u64| issued.saturating_add(1).max(physical);
        let issued = match self.last_timestamp.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |issued| Some(advance(issued)),
        ) {
            Ok(prev) | Err(prev) => prev,
        };
        Timestamp::from_raw(advance(issued))
    }

    fn now_latest(&self) -> Timestamp {
        let now = self.now();
        Timestamp::from_raw(now.raw().saturating_add(self.max_drift.as_nanos() as u64))
    }

    fn update(&self, ts: Timestamp) {
        if !ts.is_valid() {
            tracing::warn!(timestamp = %ts, "ignoring clock update to invalid timestamp");
            return;
        }
        let _ = self.last_timestamp.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |issued| (issued < ts.raw()).then_some(ts.raw()),
        );
    }
}

/// A deterministic counter clock for tests and offline replay.
///
/// `now()` returns consecutive timestamps starting just above the initial
/// value; there is no physical component and no error bound.
pub struct LogicalClock {
    now: AtomicU64,
}

impl LogicalClock {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(initial.raw()),
        }
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(Timestamp::MIN)
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_raw(self.now.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn now_latest(&self) -> Timestamp {
        self.now()
    }

    fn update(&self, ts: Timestamp) {
        if !ts.is_valid() {
            return;
        }
        let _ = self.now.fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
            (now < ts.raw()).then_some(ts.raw())
        });
    }
}
