// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for testsched-runner.

#[cfg(unix)]
mod channel;
#[cfg(unix)]
mod crash_recovery;
mod fixtures;
mod strategies;
