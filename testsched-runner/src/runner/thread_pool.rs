// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ExecutionStrategy;
use crate::{
    config::IpcConfig,
    errors::RunError,
    model::ExecutionModel,
    outcome::TestOutcome,
    queue::BoundedBlockingQueue,
    scheduler::{LostReason, Scheduler, synthesize_lost},
};
use std::{
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
    thread,
    time::Duration,
};
use tracing::{debug, warn};

/// Runs tests on a pool of worker threads in this process.
///
/// Workers claim indexes from a shared counter and send outcomes over a bounded queue. The
/// calling thread drains the queue, so writing output stays single-threaded.
#[derive(Clone, Debug)]
pub struct ThreadPoolStrategy {
    width: usize,
    queue_capacity: usize,
    receive_timeout: Duration,
}

impl ThreadPoolStrategy {
    /// Creates a thread pool strategy with `width` worker threads.
    pub fn new(width: usize, ipc: &IpcConfig) -> Self {
        Self {
            width: width.max(1),
            queue_capacity: ipc.queue_capacity,
            receive_timeout: ipc.receive_timeout,
        }
    }

    /// Returns the number of worker threads.
    pub fn width(&self) -> usize {
        self.width
    }
}

fn claim(next: &AtomicU32, count: u32) -> Option<u32> {
    next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |index| {
        (index < count).then_some(index + 1)
    })
    .ok()
}

/// Holds a worker thread's place in the active count, releasing it when the thread finishes or
/// unwinds.
struct ActiveWorker<'a>(&'a AtomicUsize);

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionStrategy for ThreadPoolStrategy {
    fn model(&self) -> ExecutionModel {
        ExecutionModel::ThreadPool
    }

    fn run(&mut self, scheduler: &mut Scheduler<'_>) -> Result<(), RunError> {
        let count = scheduler.test_count();
        let (list, executor, reporter) = scheduler.split(self.model());
        let width = self.width.min(list.len()).max(1);
        let prefix = executor.current_line_prefix();

        let next = AtomicU32::new(0);
        let active = AtomicUsize::new(0);
        let queue = BoundedBlockingQueue::<TestOutcome>::new(self.queue_capacity)
            .on_full(|| debug!("result queue is full, workers are waiting"));

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(width);
            for n in 0..width {
                let (next, active, queue, prefix) = (&next, &active, &queue, &prefix);
                active.fetch_add(1, Ordering::SeqCst);
                let spawned = thread::Builder::new()
                    .name(format!("testsched-worker-{n}"))
                    .spawn_scoped(scope, move || {
                        let _active = ActiveWorker(active);
                        while let Some(index) = claim(next, count) {
                            if let Some(case) = list.get(index) {
                                queue.enqueue(executor.execute(case, prefix));
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        active.fetch_sub(1, Ordering::SeqCst);
                        if n == 0 {
                            return Err(RunError::ThreadSpawn(err));
                        }
                        warn!("failed to spawn worker thread ({err}), continuing with {n}");
                        break;
                    }
                }
            }

            let mut result = Ok(());
            while !reporter.is_complete() {
                match queue.try_dequeue(self.receive_timeout) {
                    Some(outcome) => {
                        result = reporter.absorb(list, outcome);
                        if result.is_err() {
                            break;
                        }
                    }
                    None if active.load(Ordering::SeqCst) == 0 && queue.is_empty() => {
                        result = synthesize_lost(
                            list,
                            &executor,
                            reporter,
                            std::process::id(),
                            &LostReason::NoResult {
                                worker: "worker thread".to_owned(),
                            },
                        );
                        break;
                    }
                    None => {}
                }
            }

            if result.is_err() {
                // Stop handing out tests, and keep draining so blocked workers can exit.
                next.store(count, Ordering::SeqCst);
                while active.load(Ordering::SeqCst) > 0 {
                    let _ = queue.try_dequeue(self.receive_timeout);
                }
            }

            // Joined here so a panicked worker is logged rather than re-raised by the scope.
            for handle in handles {
                let name = handle.thread().name().unwrap_or("worker").to_owned();
                if handle.join().is_err() {
                    warn!("{name} panicked outside a test body");
                }
            }
            result
        })
    }
}
