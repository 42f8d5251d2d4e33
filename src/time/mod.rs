// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Timestamps and the injected clock.

mod clock;
mod timestamp;

pub use clock::{Clock, HybridClock, HybridClockConfig, LogicalClock};
pub use timestamp::Timestamp;
