// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutionStrategy, process_per_test::lost_reason};
use crate::{
    config::{IpcConfig, MAX_CONCURRENCY},
    errors::RunError,
    ipc::{ShareableResultChannel, SharedState},
    list::TestList,
    model::ExecutionModel,
    outcome::TestOutcome,
    process::{self, TerminationCode, TerminationReport},
    reporter::OrderedReporter,
    scheduler::{LostReason, Scheduler, TestExecutor, synthesize_lost},
};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exit code for a worker that couldn't send an outcome over the channel.
pub(super) const CHANNEL_FAILURE_EXIT_CODE: i32 = 2;

/// Runs tests in a pool of long-lived worker processes.
///
/// Each worker claims indexes from [`SharedState`] until none are left. A worker that terminates
/// mid-test, or while indexes are still unclaimed, is replaced. The replacement reports the test
/// its predecessor was running as a failure before carrying on.
#[derive(Clone, Debug)]
pub struct ProcessPoolStrategy {
    width: usize,
    ipc: IpcConfig,
}

impl ProcessPoolStrategy {
    /// Creates a process pool strategy with `width` worker processes.
    pub fn new(width: usize, ipc: &IpcConfig) -> Self {
        Self {
            width: width.clamp(1, MAX_CONCURRENCY),
            ipc: *ipc,
        }
    }

    /// Returns the number of worker processes.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl ExecutionStrategy for ProcessPoolStrategy {
    fn model(&self) -> ExecutionModel {
        ExecutionModel::PersistentProcessPool
    }

    fn run(&mut self, scheduler: &mut Scheduler<'_>) -> Result<(), RunError> {
        let (list, executor, reporter) = scheduler.split(self.model());
        let width = self.width.min(list.len()).max(1);
        let mut pool = WorkerPool {
            list,
            executor,
            state: SharedState::new()?,
            channel: ShareableResultChannel::new(self.ipc.queue_capacity, self.ipc.slot_size)?,
            slots: vec![None; width],
        };

        let result = pool.run(reporter, &self.ipc);
        let reaped = pool.reap();
        result.and(reaped)
    }
}

struct WorkerPool<'l, 's> {
    list: &'l TestList,
    executor: TestExecutor<'s>,
    state: SharedState,
    channel: ShareableResultChannel<TestOutcome>,
    slots: Vec<Option<Pid>>,
}

impl WorkerPool<'_, '_> {
    fn run(&mut self, reporter: &mut OrderedReporter<'_>, ipc: &IpcConfig) -> Result<(), RunError> {
        for slot in 0..self.slots.len() {
            self.slots[slot] = Some(self.spawn_worker(slot, None)?);
        }

        let mut last_check = Instant::now();
        while !reporter.is_complete() {
            receive_outcome(&mut self.channel, ipc.receive_timeout, self.list, reporter)?;

            if last_check.elapsed() < ipc.liveness_interval {
                continue;
            }
            last_check = Instant::now();
            self.check_workers()?;

            // Slots are only emptied once every index has been claimed, so anything still missing
            // here was claimed and then lost in the channel.
            if self.slots.iter().all(Option::is_none) {
                drain_channel(&mut self.channel, self.list, reporter)?;
                synthesize_lost(
                    self.list,
                    &self.executor,
                    reporter,
                    std::process::id(),
                    &LostReason::NoResult {
                        worker: "a worker process".to_owned(),
                    },
                )?;
                break;
            }
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        slot: usize,
        predecessor: Option<TerminationReport>,
    ) -> Result<Pid, RunError> {
        let count = self.list.len() as u32;
        let pid = process::spawn(|| {
            worker_main(
                slot,
                count,
                predecessor,
                self.list,
                &self.executor,
                &self.state,
                &self.channel,
            )
        })?;
        debug!("worker slot {slot} is now process {pid}");
        Ok(pid)
    }

    fn check_workers(&mut self) -> Result<(), RunError> {
        let count = self.list.len() as u32;
        for slot in 0..self.slots.len() {
            let Some(pid) = self.slots[slot] else {
                continue;
            };
            let Some(report) = process::wait_nonblocking(pid)? else {
                continue;
            };
            let code = report.code;
            // A worker that died mid-test, or before the counter ran out, leaves work behind.
            if code.is_abnormal()
                || self.state.running_index(slot).is_some()
                || !self.state.is_exhausted(count)
            {
                info!("worker process {pid} {code} with tests left, spawning a replacement");
                self.slots[slot] = Some(self.spawn_worker(slot, Some(report))?);
            } else if code == TerminationCode::Exited(0) {
                debug!("worker process {pid} finished");
                self.slots[slot] = None;
            } else {
                warn!("worker process {pid} {code}");
                self.slots[slot] = None;
            }
        }
        Ok(())
    }

    fn reap(&mut self) -> Result<(), RunError> {
        for pid in self.slots.iter_mut().filter_map(Option::take) {
            let report = process::terminate_if_running(pid)?;
            debug!("reaped worker process {pid}: {}", report.code);
        }
        Ok(())
    }
}

fn worker_main(
    slot: usize,
    count: u32,
    predecessor: Option<TerminationReport>,
    list: &TestList,
    executor: &TestExecutor<'_>,
    state: &SharedState,
    channel: &ShareableResultChannel<TestOutcome>,
) -> i32 {
    if let Some(index) = state.take_crash_marker(slot)
        && let Some(case) = list.get(index)
    {
        let (pid, reason) = match predecessor {
            Some(report) => (
                report.pid.as_raw() as u32,
                lost_reason(&report, "worker process"),
            ),
            None => (
                0,
                LostReason::NoResult {
                    worker: "a previous worker process".to_owned(),
                },
            ),
        };
        let outcome = executor.lost(case, pid, &reason);
        if let Err(err) = channel.enqueue(&outcome) {
            warn!("worker could not report crashed test `{}`: {err}", case.name());
            return CHANNEL_FAILURE_EXIT_CODE;
        }
    }

    let prefix = executor.current_line_prefix();
    while let Some(index) = state.claim(count) {
        let Some(case) = list.get(index) else {
            continue;
        };
        state.mark_running(slot, index);
        let outcome = executor.execute(case, &prefix);
        state.clear(slot);
        if let Err(err) = channel.enqueue(&outcome) {
            warn!("worker could not report test `{}`: {err}", case.name());
            return CHANNEL_FAILURE_EXIT_CODE;
        }
    }
    0
}

/// What a single receive from the result channel produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Received {
    /// An outcome for this test index was absorbed.
    Outcome(u32),

    /// A message was lost to a malformed or undecodable payload.
    Lost,

    /// Nothing arrived in time.
    Nothing,
}

/// Receives at most one outcome, waiting up to `timeout`, and absorbs it.
pub(super) fn receive_outcome(
    channel: &mut ShareableResultChannel<TestOutcome>,
    timeout: Duration,
    list: &TestList,
    reporter: &mut OrderedReporter<'_>,
) -> Result<Received, RunError> {
    match channel.try_dequeue(timeout) {
        Ok(Some(outcome)) => {
            let test_index = outcome.test_index;
            reporter.absorb(list, outcome)?;
            Ok(Received::Outcome(test_index))
        }
        Ok(None) => Ok(Received::Nothing),
        Err(err) if err.is_fatal() => Err(RunError::Channel(err)),
        Err(err) => {
            warn!("lost a result message: {err}");
            Ok(Received::Lost)
        }
    }
}

/// Absorbs every complete outcome currently in the channel.
pub(super) fn drain_channel(
    channel: &mut ShareableResultChannel<TestOutcome>,
    list: &TestList,
    reporter: &mut OrderedReporter<'_>,
) -> Result<(), RunError> {
    while receive_outcome(channel, Duration::ZERO, list, reporter)? != Received::Nothing {}
    Ok(())
}
