// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{SequentialStrategy, ThreadPoolStrategy};
#[cfg(unix)]
use super::{ProcessPerTestStrategy, ProcessPoolStrategy};
use crate::{config::IpcConfig, errors::RunError, model::ExecutionModel, scheduler::Scheduler};

/// A way of running every test in a [`Scheduler`].
///
/// Implementations differ in how test indexes are claimed and how outcomes travel back to the
/// scheduler. Every implementation blocks until each test has an outcome.
pub trait ExecutionStrategy {
    /// Returns the execution model this strategy implements.
    fn model(&self) -> ExecutionModel;

    /// Runs every test in `scheduler`, returning once all outcomes have been written.
    ///
    /// Test failures, including crashed worker processes, are reported as outcomes. An error is
    /// returned only if the run's own machinery failed.
    fn run(&mut self, scheduler: &mut Scheduler<'_>) -> Result<(), RunError>;
}

/// One of the execution strategies, chosen at runtime.
#[derive(Clone, Debug)]
pub enum Strategy {
    /// Run tests on the calling thread.
    Sequential(SequentialStrategy),

    /// Run tests on a pool of worker threads.
    ThreadPool(ThreadPoolStrategy),

    /// Run tests in a pool of long-lived worker processes.
    #[cfg(unix)]
    PersistentProcessPool(ProcessPoolStrategy),

    /// Run each test in its own process.
    #[cfg(unix)]
    ProcessPerTest(ProcessPerTestStrategy),
}

impl Strategy {
    /// Creates the strategy for `model`, running up to `width` tests at a time.
    ///
    /// On platforms that can't fork, process models fall back to the thread pool.
    pub fn new(model: ExecutionModel, width: usize, ipc: &IpcConfig) -> Self {
        let width = width.max(1);
        match model {
            ExecutionModel::Sequential => Self::Sequential(SequentialStrategy::new()),
            ExecutionModel::ThreadPool => Self::ThreadPool(ThreadPoolStrategy::new(width, ipc)),
            #[cfg(unix)]
            ExecutionModel::PersistentProcessPool => {
                Self::PersistentProcessPool(ProcessPoolStrategy::new(width, ipc))
            }
            #[cfg(unix)]
            ExecutionModel::ProcessPerTest => {
                Self::ProcessPerTest(ProcessPerTestStrategy::new(width, ipc))
            }
            #[cfg(not(unix))]
            ExecutionModel::PersistentProcessPool | ExecutionModel::ProcessPerTest => {
                tracing::warn!(
                    "execution model `{model}` requires fork, which this platform lacks; \
                     running tests on a thread pool instead"
                );
                Self::ThreadPool(ThreadPoolStrategy::new(width, ipc))
            }
        }
    }
}

impl ExecutionStrategy for Strategy {
    fn model(&self) -> ExecutionModel {
        match self {
            Self::Sequential(strategy) => strategy.model(),
            Self::ThreadPool(strategy) => strategy.model(),
            #[cfg(unix)]
            Self::PersistentProcessPool(strategy) => strategy.model(),
            #[cfg(unix)]
            Self::ProcessPerTest(strategy) => strategy.model(),
        }
    }

    fn run(&mut self, scheduler: &mut Scheduler<'_>) -> Result<(), RunError> {
        match self {
            Self::Sequential(strategy) => strategy.run(scheduler),
            Self::ThreadPool(strategy) => strategy.run(scheduler),
            #[cfg(unix)]
            Self::PersistentProcessPool(strategy) => strategy.run(scheduler),
            #[cfg(unix)]
            Self::ProcessPerTest(strategy) => strategy.run(scheduler),
        }
    }
}
