// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::shm::SharedMapping;
use crate::{config::MAX_CONCURRENCY, errors::SharedMemoryError};
use std::sync::atomic::{AtomicU32, Ordering};

// Keeps each worker's marker on its own cache line.
#[repr(C, align(64))]
struct CachePadded(AtomicU32);

#[repr(C)]
struct SharedStateLayout {
    next_test_index: CachePadded,
    crash_markers: [CachePadded; MAX_CONCURRENCY],
}

/// Run state shared between the parent and its worker processes.
///
/// Holds the claim counter for test indexes and one crash marker per worker slot. A marker holds
/// `index + 1` while the worker in that slot is running test `index`, and 0 while it's idle. If a
/// worker dies mid-test its marker is left set, which its replacement uses to report the crash.
///
/// The state lives in a shared mapping created by the parent. Children forked afterwards see the
/// same memory, so the handle is simply borrowed into the child.
#[derive(Debug)]
pub struct SharedState {
    mapping: SharedMapping,
}

impl SharedState {
    /// Creates new shared state with every index unclaimed and every marker clear.
    pub fn new() -> Result<Self, SharedMemoryError> {
        // Zero-filled memory is a valid layout: all counters start at 0.
        let mapping = SharedMapping::new(size_of::<SharedStateLayout>())?;
        Ok(Self { mapping })
    }

    fn layout(&self) -> &SharedStateLayout {
        // SAFETY: the mapping is large enough and suitably aligned (page-aligned) for the layout,
        // and only ever accessed through atomics.
        unsafe { &*self.mapping.as_ptr().cast::<SharedStateLayout>() }
    }

    fn marker(&self, slot: usize) -> &AtomicU32 {
        &self.layout().crash_markers[slot % MAX_CONCURRENCY].0
    }

    /// Claims the next test index. Every index is handed out exactly once across all processes.
    ///
    /// Returns `None` once `count` indexes have been claimed.
    pub fn claim(&self, count: u32) -> Option<u32> {
        let counter = &self.layout().next_test_index.0;
        // fetch_update rather than fetch_add so the counter never runs past `count` and wraps.
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next < count).then_some(next + 1)
            })
            .ok()
    }

    /// Returns true once all `count` indexes have been claimed.
    pub fn is_exhausted(&self, count: u32) -> bool {
        self.layout().next_test_index.0.load(Ordering::SeqCst) >= count
    }

    /// Records that the worker in `slot` is about to run test `index`.
    pub fn mark_running(&self, slot: usize, index: u32) {
        self.marker(slot).store(index + 1, Ordering::SeqCst);
    }

    /// Records that the worker in `slot` is no longer running a test.
    pub fn clear(&self, slot: usize) {
        self.marker(slot).store(0, Ordering::SeqCst);
    }

    /// Returns the index of the test the worker in `slot` is running, without clearing it.
    pub fn running_index(&self, slot: usize) -> Option<u32> {
        self.marker(slot).load(Ordering::SeqCst).checked_sub(1)
    }

    /// Takes the crash marker left in `slot` by a previous occupant, if it died mid-test.
    ///
    /// Returns the index of the test that was running, and clears the marker.
    pub fn take_crash_marker(&self, slot: usize) -> Option<u32> {
        match self.marker(slot).swap(0, Ordering::SeqCst) {
            0 => None,
            marker => Some(marker - 1),
        }
    }
}
