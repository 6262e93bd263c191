// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`], which writes the run banner and final
//! report around one of the execution strategies in [`Strategy`].

mod imp;
#[cfg(unix)]
mod process_pool;
mod sequential;
mod strategy;
mod thread_pool;

pub use imp::*;
#[cfg(unix)]
pub use process_per_test::*;
#[cfg(unix)]
pub use process_pool::*;
pub use sequential::*;
pub use strategy::*;
pub use thread_pool::*;
