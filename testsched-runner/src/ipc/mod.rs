// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-process result delivery.
//!
//! Process-based execution models report outcomes through a [`ShareableResultChannel`], a ring
//! buffer in shared memory, and coordinate test claims through [`SharedState`]. The chunk
//! framing used on the channel lives in [`framing`] and is platform-independent.

pub mod framing;

#[cfg(unix)]
mod channel;
#[cfg(unix)]
mod shared_state;
#[cfg(unix)]
mod shm;
#[cfg(unix)]
mod sync;

#[cfg(unix)]
pub use channel::*;
#[cfg(unix)]
pub use shared_state::*;
