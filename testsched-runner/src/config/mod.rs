// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for testsched.
//!
//! Configuration is read from an embedded default config, then an optional user config file on
//! top. See `default-config.toml` for the available keys.

mod imp;
mod test_threads;

pub use imp::*;
pub use test_threads::*;

/// The maximum number of worker threads or processes.
pub const MAX_CONCURRENCY: usize = 128;
