// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wall-clock timing for a whole run.
//!
//! The length of a run is measured on the monotonic clock. Its start is also recorded on the local
//! realtime clock, so that log lines can say when it happened.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub(crate) struct RunStopwatch {
    started_at: DateTime<Local>,
    origin: Instant,
}

impl RunStopwatch {
    pub(crate) fn start() -> Self {
        Self {
            started_at: Local::now(),
            origin: Instant::now(),
        }
    }

    pub(crate) fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Returns the timing of the run so far.
    pub(crate) fn lap(&self) -> RunTiming {
        RunTiming {
            started_at: self.started_at,
            elapsed: self.origin.elapsed(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RunTiming {
    pub(crate) started_at: DateTime<Local>,
    pub(crate) elapsed: Duration,
}

impl RunTiming {
    pub(crate) fn finished_at(&self) -> DateTime<Local> {
        self.started_at + self.elapsed
    }
}
