// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for testsched, a scheduler that runs registered test groups under one of
//! several execution models and reports outcomes in registration order.
//!
//! The basic flow: register tests into a [`GroupedTestCases`](test_group::GroupedTestCases),
//! load a [`SchedulerConfig`](config::SchedulerConfig), then build and run a
//! [`TestRunner`](runner::TestRunner) with a [`TestRunnerBuilder`](runner::TestRunnerBuilder).

pub mod config;
pub mod errors;
pub mod helpers;
pub mod ipc;
pub mod list;
pub mod model;
pub mod outcome;
#[cfg(unix)]
pub mod process;
pub mod queue;
pub mod reporter;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod test_filter;
pub mod test_group;
pub mod time;
