// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::SharedMemoryError;
use std::{io, ptr::NonNull};

/// An anonymous memory mapping shared with every child forked after it was created.
///
/// The mapping is zero-filled and page-aligned. It's unmapped when dropped. Forked children exit
/// without running destructors, so only the creating process ever unmaps it.
#[derive(Debug)]
pub(crate) struct SharedMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl SharedMapping {
    pub(crate) fn new(len: usize) -> Result<Self, SharedMemoryError> {
        let len = len.max(1);
        // SAFETY: an anonymous mapping at an address of the kernel's choosing doesn't alias any
        // existing memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::new("mmap", io::Error::last_os_error()));
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| SharedMemoryError::new("mmap", io::Error::other("null mapping")))?;
        Ok(Self { ptr, len })
    }

    /// Returns a pointer to the start of the mapping.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SharedMapping {
    fn drop(&mut self) {
        // SAFETY: the pointer and length came from a successful mmap, and the mapping isn't
        // referenced after this point.
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if ret != 0 {
            tracing::debug!(
                "failed to unmap shared memory: {}",
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_zeroed_and_writable() {
        let mapping = SharedMapping::new(4096).unwrap();
        assert_eq!(mapping.len(), 4096);
        let bytes = unsafe { std::slice::from_raw_parts_mut(mapping.as_ptr(), mapping.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[4095] = 7;
        assert_eq!(bytes[4095], 7);
    }
}
