// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for testsched-runner.

use std::{fmt, time::Duration};

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "worker thread" if `count` is 1, otherwise "worker threads".
    pub fn worker_threads_str(count: usize) -> &'static str {
        if count == 1 {
            "worker thread"
        } else {
            "worker threads"
        }
    }

    /// Returns "worker process" if `count` is 1, otherwise "worker processes".
    pub fn worker_processes_str(count: usize) -> &'static str {
        if count == 1 {
            "worker process"
        } else {
            "worker processes"
        }
    }

    /// Returns "process" if `count` is 1, otherwise "processes".
    pub fn processes_str(count: usize) -> &'static str {
        if count == 1 { "process" } else { "processes" }
    }
}

/// Displays a duration in the most significant unit.
///
/// Durations below one millisecond are shown without decimals (`532μs`), longer ones with a single
/// decimal (`12.3ms`, `1.5s`).
#[derive(Clone, Copy, Debug)]
pub struct DisplayDuration(pub Duration);

impl DisplayDuration {
    /// Creates a display wrapper from a signed nanosecond count, clamping negatives to zero.
    pub fn from_nanos(nanos: i64) -> Self {
        Self(Duration::from_nanos(u64::try_from(nanos).unwrap_or(0)))
    }
}

impl fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos < 1_000 {
            write!(f, "{nanos}ns")
        } else if nanos < 1_000_000 {
            write!(f, "{}μs", nanos / 1_000)
        } else if nanos < 1_000_000_000 {
            write!(f, "{:.1}ms", self.0.as_secs_f64() * 1_000.0)
        } else {
            write!(f, "{:.1}s", self.0.as_secs_f64())
        }
    }
}

/// Converts a duration to a signed nanosecond count, saturating at `i64::MAX`.
pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
