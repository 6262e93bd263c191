// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time sources used to measure tests and runs.

mod clock;
mod stopwatch;

pub use clock::*;
pub(crate) use stopwatch::*;
