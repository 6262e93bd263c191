// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker process lifecycle: spawning, waiting and termination.
//!
//! Workers are forked from the scheduler process and run a closure, so they share everything set
//! up before the fork (including shared mappings) without any serialization. A worker exits with
//! `_exit`, which skips destructors and atexit handlers that belong to the parent.

use crate::errors::ProcessControlError;
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, fork},
};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};
use tracing::debug;

/// The exit code used by a worker whose entry point panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a child process terminated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminationCode {
    /// The process exited normally with this status.
    Exited(i32),

    /// The process was killed by a signal.
    Killed(Signal),

    /// The process was killed by a signal and dumped core.
    Dumped(Signal),
}

impl TerminationCode {
    /// Returns true if the process was killed by a signal rather than exiting.
    pub fn is_abnormal(self) -> bool {
        matches!(self, Self::Killed(_) | Self::Dumped(_))
    }
}

impl fmt::Display for TerminationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Killed(signal) => write!(f, "killed by {signal}"),
            Self::Dumped(signal) => write!(f, "killed by {signal} (core dumped)"),
        }
    }
}

/// A report of how a child process terminated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TerminationReport {
    /// The child's process ID.
    pub pid: Pid,

    /// How the child terminated.
    pub code: TerminationCode,
}

/// Forks a child process that runs `child_entry` and exits with the code it returns.
///
/// Returns the child's pid in the parent. Never returns in the child. A panic in `child_entry`
/// exits the child with [`PANIC_EXIT_CODE`].
///
/// Only the calling thread is duplicated in the child. `child_entry` must not wait on locks that
/// other threads of the parent might have held at the time of the fork.
pub fn spawn<F>(child_entry: F) -> Result<Pid, ProcessControlError>
where
    F: FnOnce() -> i32,
{
    // SAFETY: the child only runs `child_entry` and then calls `_exit`, never returning into the
    // caller's stack frames.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("spawned worker process {child}");
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            let code =
                panic::catch_unwind(AssertUnwindSafe(child_entry)).unwrap_or(PANIC_EXIT_CODE);
            // SAFETY: `_exit` is async-signal-safe and terminates the child immediately.
            unsafe { libc::_exit(code) }
        }
        Err(errno) => Err(ProcessControlError::Spawn(errno)),
    }
}

fn to_report(status: WaitStatus) -> Option<TerminationReport> {
    match status {
        WaitStatus::Exited(pid, code) => Some(TerminationReport {
            pid,
            code: TerminationCode::Exited(code),
        }),
        WaitStatus::Signaled(pid, signal, core_dumped) => Some(TerminationReport {
            pid,
            code: if core_dumped {
                TerminationCode::Dumped(signal)
            } else {
                TerminationCode::Killed(signal)
            },
        }),
        // Stopped, continued and ptrace events aren't terminations.
        _ => None,
    }
}

/// Waits for `pid` to terminate.
pub fn wait_blocking(pid: Pid) -> Result<TerminationReport, ProcessControlError> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(report) = to_report(status) {
                    return Ok(report);
                }
            }
            Err(Errno::EINTR) => {}
            Err(err) => return Err(ProcessControlError::Wait { pid, err }),
        }
    }
}

/// Checks whether `pid` has terminated, without blocking.
///
/// Returns `Ok(None)` if it's still running.
pub fn wait_nonblocking(pid: Pid) -> Result<Option<TerminationReport>, ProcessControlError> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => return Ok(to_report(status)),
            Err(Errno::EINTR) => {}
            Err(err) => return Err(ProcessControlError::Wait { pid, err }),
        }
    }
}

/// Checks each of `pids` without blocking, returning reports for those that have terminated.
pub fn wait_nonblocking_many(
    pids: impl IntoIterator<Item = Pid>,
) -> Result<Vec<TerminationReport>, ProcessControlError> {
    let mut reports = Vec::new();
    for pid in pids {
        if let Some(report) = wait_nonblocking(pid)? {
            reports.push(report);
        }
    }
    Ok(reports)
}

/// Kills `pid` if it's still running, and reports how it terminated.
pub fn terminate_if_running(pid: Pid) -> Result<TerminationReport, ProcessControlError> {
    if let Some(report) = wait_nonblocking(pid)? {
        return Ok(report);
    }
    match kill(pid, Signal::SIGKILL) {
        // ESRCH: the process exited between the check and the kill. It's still waitable.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => return Err(ProcessControlError::Kill { pid, err }),
    }
    wait_blocking(pid)
}
