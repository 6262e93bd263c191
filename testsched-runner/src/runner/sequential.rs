// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ExecutionStrategy;
use crate::{errors::RunError, model::ExecutionModel, scheduler::Scheduler};

/// Runs every test on the calling thread, in index order.
#[derive(Clone, Debug, Default)]
pub struct SequentialStrategy {}

impl SequentialStrategy {
    /// Creates a new sequential strategy.
    pub fn new() -> Self {
        Self {}
    }
}

impl ExecutionStrategy for SequentialStrategy {
    fn model(&self) -> ExecutionModel {
        ExecutionModel::Sequential
    }

    fn run(&mut self, scheduler: &mut Scheduler<'_>) -> Result<(), RunError> {
        let (list, executor, reporter) = scheduler.split(self.model());
        let prefix = executor.current_line_prefix();
        for case in list.cases() {
            let outcome = executor.execute(case, &prefix);
            reporter.absorb(list, outcome)?;
        }
        Ok(())
    }
}
