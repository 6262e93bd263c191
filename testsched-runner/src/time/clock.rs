// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// A monotonic nanosecond clock.
///
/// Timestamps are only meaningful relative to other timestamps from the same clock. A forked
/// worker process inherits its parent's clock, so durations measured in a child are comparable to
/// those measured in the parent.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the current time in nanoseconds.
    fn now(&self) -> u64;

    /// Returns the time elapsed since `start`, a value previously returned by [`Self::now`].
    fn elapsed_since(&self, start: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(start))
    }
}

/// The system monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a new clock whose zero point is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        // Saturate rather than wrap: u64 nanoseconds covers centuries.
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
///
/// Every call to [`Clock::now`] advances the clock by a fixed step, which makes per-test durations
/// deterministic.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
    step: u64,
}

impl ManualClock {
    /// Creates a clock that advances by `step` every time it is read.
    pub fn with_step(step: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            step: u64::try_from(step.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.nanos.fetch_add(self.step, Ordering::SeqCst)
    }
}
