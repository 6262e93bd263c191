// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-shared lock and condition primitives.
//!
//! These wrap pthread mutexes and condition variables initialized with `PTHREAD_PROCESS_SHARED`,
//! so they work when placed in a [`SharedMapping`](super::shm::SharedMapping) and used from
//! several processes. On Linux the mutex is also robust: if a process dies while holding it, the
//! next process to lock it recovers it instead of deadlocking.

use crate::errors::{ChannelError, SharedMemoryError};
use std::{cell::UnsafeCell, mem::MaybeUninit, time::Duration};

#[cfg(target_os = "linux")]
const CONDVAR_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(target_os = "linux"))]
const CONDVAR_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

fn check_init(operation: &'static str, ret: libc::c_int) -> Result<(), SharedMemoryError> {
    if ret == 0 {
        Ok(())
    } else {
        Err(SharedMemoryError::from_code(operation, ret))
    }
}

/// A mutex usable across processes.
#[repr(C)]
pub(crate) struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

impl SharedMutex {
    /// Initializes a mutex in place.
    ///
    /// # Safety
    ///
    /// `this` must point to writable memory that stays mapped for as long as the mutex is used,
    /// and that isn't being used as an initialized mutex.
    pub(crate) unsafe fn init(this: *mut Self) -> Result<(), SharedMemoryError> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: `attr` is valid for writes, and init doesn't read it.
        check_init("pthread_mutexattr_init", unsafe {
            libc::pthread_mutexattr_init(attr.as_mut_ptr())
        })?;

        let res = (|| {
            // SAFETY: `attr` was initialized above and is destroyed only after this closure.
            check_init("pthread_mutexattr_setpshared", unsafe {
                libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED)
            })?;
            // SAFETY: `attr` was initialized above and is destroyed only after this closure.
            #[cfg(target_os = "linux")]
            check_init("pthread_mutexattr_setrobust", unsafe {
                libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST)
            })?;
            // SAFETY: the caller guarantees `this` points to writable, mapped memory that isn't an
            // initialized mutex. `raw_get` builds the pointer without creating a reference.
            check_init("pthread_mutex_init", unsafe {
                libc::pthread_mutex_init(UnsafeCell::raw_get(&raw const (*this).inner), attr.as_ptr())
            })
        })();

        // SAFETY: `attr` was initialized, and pthread_mutex_init copies what it needs from it.
        unsafe { libc::pthread_mutexattr_destroy(attr.as_mut_ptr()) };
        res
    }

    /// Acquires the mutex, blocking until it's available.
    pub(crate) fn lock(&self) -> Result<SharedMutexGuard<'_>, ChannelError> {
        // SAFETY: a `SharedMutex` is only reachable after `init` succeeded on its memory, and the
        // mapping outlives `self`.
        let ret = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        self.acquired("pthread_mutex_lock", ret)?;
        Ok(SharedMutexGuard { mutex: self })
    }

    // Interprets the return value of a call that acquires the mutex.
    fn acquired(&self, operation: &'static str, ret: libc::c_int) -> Result<(), ChannelError> {
        match ret {
            0 => Ok(()),
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                tracing::warn!(
                    "a worker process died while holding a shared channel lock, recovering it"
                );
                // SAFETY: EOWNERDEAD means this thread now holds the robust mutex, which is the
                // precondition for marking it consistent.
                let ret = unsafe { libc::pthread_mutex_consistent(self.inner.get()) };
                if ret == 0 {
                    Ok(())
                } else {
                    // SAFETY: this thread holds the mutex, and no guard was created for it.
                    unsafe { libc::pthread_mutex_unlock(self.inner.get()) };
                    Err(ChannelError::sync("pthread_mutex_consistent", ret))
                }
            }
            code => Err(ChannelError::sync(operation, code)),
        }
    }
}

/// Releases a [`SharedMutex`] when dropped.
pub(crate) struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: a guard is only created after a successful lock by this thread, and condvar
        // waits reacquire the mutex before returning, so this thread holds it here.
        unsafe { libc::pthread_mutex_unlock(self.mutex.inner.get()) };
    }
}

/// An absolute point in time on the clock used by [`SharedCondvar`].
#[derive(Clone, Copy)]
pub(crate) struct Deadline(libc::timespec);

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Result<Self, ChannelError> {
        let mut now = MaybeUninit::<libc::timespec>::uninit();
        // SAFETY: `now` is valid for writes of a timespec.
        let ret = unsafe { libc::clock_gettime(CONDVAR_CLOCK, now.as_mut_ptr()) };
        if ret != 0 {
            return Err(ChannelError::Sync {
                operation: "clock_gettime",
                err: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: clock_gettime returned 0, so it filled in `now`.
        let mut ts = unsafe { now.assume_init() };

        let mut nanos = ts.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        let mut secs = timeout.as_secs();
        if nanos >= 1_000_000_000 {
            nanos -= 1_000_000_000;
            secs += 1;
        }
        ts.tv_sec = ts.tv_sec.saturating_add(secs.min(i32::MAX as u64) as libc::time_t);
        ts.tv_nsec = nanos as _;
        Ok(Self(ts))
    }
}

/// Whether a timed wait returned because its deadline passed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WaitStatus {
    Notified,
    TimedOut,
}

/// A condition variable usable across processes.
#[repr(C)]
pub(crate) struct SharedCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

impl SharedCondvar {
    /// Initializes a condition variable in place.
    ///
    /// # Safety
    ///
    /// Same requirements as [`SharedMutex::init`].
    pub(crate) unsafe fn init(this: *mut Self) -> Result<(), SharedMemoryError> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        // SAFETY: `attr` is valid for writes, and init doesn't read it.
        check_init("pthread_condattr_init", unsafe {
            libc::pthread_condattr_init(attr.as_mut_ptr())
        })?;

        let res = (|| {
            // SAFETY: `attr` was initialized above and is destroyed only after this closure.
            check_init("pthread_condattr_setpshared", unsafe {
                libc::pthread_condattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED)
            })?;
            // SAFETY: `attr` was initialized above and is destroyed only after this closure.
            #[cfg(target_os = "linux")]
            check_init("pthread_condattr_setclock", unsafe {
                libc::pthread_condattr_setclock(attr.as_mut_ptr(), CONDVAR_CLOCK)
            })?;
            // SAFETY: same requirements as the mutex, guaranteed by the caller.
            check_init("pthread_cond_init", unsafe {
                libc::pthread_cond_init(UnsafeCell::raw_get(&raw const (*this).inner), attr.as_ptr())
            })
        })();

        // SAFETY: `attr` was initialized, and pthread_cond_init copies what it needs from it.
        unsafe { libc::pthread_condattr_destroy(attr.as_mut_ptr()) };
        res
    }

    /// Blocks until notified. The guarded mutex is released while waiting.
    pub(crate) fn wait(&self, guard: &SharedMutexGuard<'_>) -> Result<(), ChannelError> {
        // SAFETY: both primitives were initialized, and `guard` proves this thread holds the
        // mutex. The wait returns with the mutex held again, so the guard stays valid.
        let ret = unsafe { libc::pthread_cond_wait(self.inner.get(), guard.mutex.inner.get()) };
        guard.mutex.acquired("pthread_cond_wait", ret)
    }

    /// Blocks until notified or until `deadline` passes.
    pub(crate) fn wait_until(
        &self,
        guard: &SharedMutexGuard<'_>,
        deadline: &Deadline,
    ) -> Result<WaitStatus, ChannelError> {
        // SAFETY: as for `wait`. The mutex is held again on return, including on ETIMEDOUT.
        let ret = unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.inner.get(), &deadline.0)
        };
        if ret == libc::ETIMEDOUT {
            return Ok(WaitStatus::TimedOut);
        }
        guard.mutex.acquired("pthread_cond_timedwait", ret)?;
        Ok(WaitStatus::Notified)
    }

    pub(crate) fn notify_all(&self) {
        // SAFETY: the condvar was initialized and its mapping outlives `self`.
        unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
    }
}
