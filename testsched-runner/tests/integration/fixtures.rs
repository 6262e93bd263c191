// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use testsched_runner::{
    config::IpcConfig,
    model::ExecutionModel,
    reporter::OutcomeCounts,
    runner::{ExecutionStrategy, Strategy},
    scheduler::Scheduler,
    sink::SharedBuffer,
    test_filter::NameFilter,
    test_group::{GroupedTestCases, SimpleGroup, TestFailure},
    time::ManualClock,
};

/// The result of running a suite through one strategy.
#[derive(Debug)]
pub(crate) struct SuiteRun {
    pub(crate) counts: OutcomeCounts,
    pub(crate) failed_names: Vec<String>,
    pub(crate) output: String,
}

impl SuiteRun {
    /// Returns the names of tests in the order their result lines were written.
    pub(crate) fn reported_names(&self) -> Vec<String> {
        self.output
            .lines()
            .filter_map(|line| {
                let (_, rest) = line.split_once("Test ")?;
                let (name, _) = rest.split_once(" - ")?;
                Some(name.trim_end().to_owned())
            })
            .collect()
    }
}

/// Runs `grouped` under `model` with `width` workers.
pub(crate) fn run_suite(
    model: ExecutionModel,
    width: usize,
    grouped: GroupedTestCases,
    filter: &str,
) -> SuiteRun {
    let buffer = SharedBuffer::new();
    let filter = NameFilter::new(filter).expect("filter is valid");
    let mut scheduler = Scheduler::new(grouped, &filter, buffer.clone())
        .with_clock(Arc::new(ManualClock::default()));

    let ipc = IpcConfig {
        queue_capacity: 16,
        slot_size: 512,
        ..IpcConfig::default()
    };
    let mut strategy = Strategy::new(model, width, &ipc);
    strategy.run(&mut scheduler).expect("run completes");
    assert!(scheduler.reporter().is_complete(), "every test was reported");

    let failed_names = scheduler
        .reporter()
        .failed_indexes()
        .iter()
        .map(|&index| scheduler.list().cases()[index as usize].name().to_owned())
        .collect();
    SuiteRun {
        counts: scheduler.counts(),
        failed_names,
        output: buffer.contents(),
    }
}

/// Builds a single group of `count` passing tests named `test_0000`, `test_0001`, ...
pub(crate) fn passing_suite(count: usize) -> GroupedTestCases {
    let mut grouped = GroupedTestCases::new();
    let mut registration = grouped.add_group(SimpleGroup::new("Bulk"));
    for index in 0..count {
        registration.add_test(format!("test_{index:04}"), pass);
    }
    grouped
}

/// Builds groups `A: [a1, a2]` and `B: [b1]`.
pub(crate) fn two_groups() -> GroupedTestCases {
    let mut grouped = GroupedTestCases::new();
    grouped
        .add_group(SimpleGroup::new("A"))
        .add_test("a1", pass)
        .add_test("a2", pass);
    grouped.add_group(SimpleGroup::new("B")).add_test("b1", pass);
    grouped
}

pub(crate) fn pass() -> Result<(), TestFailure> {
    Ok(())
}
