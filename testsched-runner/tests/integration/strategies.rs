// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use std::{thread, time::Duration};
use test_case::test_case;
use test_strategy::proptest;
use testsched_runner::{
    ignore_test,
    model::ExecutionModel,
    test_group::{GroupedTestCases, SimpleGroup, TestFailure},
};

#[test_case(ExecutionModel::Sequential, 1; "sequential")]
#[test_case(ExecutionModel::ThreadPool, 8; "thread pool")]
#[test_case(ExecutionModel::PersistentProcessPool, 4; "process pool")]
#[test_case(ExecutionModel::ProcessPerTest, 4; "process per test")]
fn every_index_reported_once(model: ExecutionModel, width: usize) {
    const COUNT: usize = 1000;

    let run = run_suite(model, width, passing_suite(COUNT), "");
    assert_eq!(run.counts.passed, COUNT);
    assert_eq!(run.counts.failed, 0);
    assert_eq!(run.counts.duplicates, 0);

    let expected: Vec<_> = (0..COUNT).map(|index| format!("test_{index:04}")).collect();
    assert_eq!(run.reported_names(), expected);
    assert_eq!(run.output.matches("== Bulk group completed.").count(), 1);
}

#[proptest(cases = 8)]
fn thread_pool_reports_in_registration_order(
    #[strategy(proptest::collection::vec(0_u64..4, 1..24))] delays_ms: Vec<u64>,
) {
    let mut grouped = GroupedTestCases::new();
    let mut registration = grouped.add_group(SimpleGroup::new("Delays"));
    for (index, &delay) in delays_ms.iter().enumerate() {
        registration.add_test(format!("delayed_{index:02}"), move || {
            thread::sleep(Duration::from_millis(delay));
            Ok(())
        });
    }

    let run = run_suite(ExecutionModel::ThreadPool, 4, grouped, "");
    let expected: Vec<_> = (0..delays_ms.len())
        .map(|index| format!("delayed_{index:02}"))
        .collect();
    assert_eq!(run.reported_names(), expected);
}

#[test_case(ExecutionModel::Sequential; "sequential")]
#[test_case(ExecutionModel::ThreadPool; "thread pool")]
#[test_case(ExecutionModel::ProcessPerTest; "process per test")]
fn name_filter_drops_other_groups(model: ExecutionModel) {
    let run = run_suite(model, 2, two_groups(), "a*");
    assert_eq!(run.reported_names(), ["a1", "a2"]);
    assert!(run.output.contains("++ Running test group A"));
    assert!(run.output.contains("== A group completed."));
    assert!(!run.output.contains("group B"), "{}", run.output);
}

#[test_case(ExecutionModel::Sequential, 1; "sequential")]
#[test_case(ExecutionModel::ThreadPool, 2; "thread pool")]
#[test_case(ExecutionModel::PersistentProcessPool, 2; "process pool")]
#[test_case(ExecutionModel::ProcessPerTest, 2; "process per test")]
fn body_can_report_itself_ignored(model: ExecutionModel, width: usize) {
    let mut grouped = GroupedTestCases::new();
    grouped
        .add_group(SimpleGroup::new("Optional"))
        .add_test("needs_gpu", || {
            ignore_test!("no GPU available");
        })
        .add_test("runs_anywhere", pass);

    let run = run_suite(model, width, grouped, "");
    assert_eq!(run.counts.passed, 1);
    assert_eq!(run.counts.ignored, 1);
    assert_eq!(run.counts.failed, 0);
    assert!(run.failed_names.is_empty());

    let line = run
        .output
        .lines()
        .find(|line| line.contains("needs_gpu"))
        .expect("ignored test is reported");
    assert!(line.contains("- ignored. Duration = "), "{line}");
    assert!(!run.output.contains("no GPU available"));
}

#[test]
fn failures_are_reported_not_fatal() {
    let mut grouped = GroupedTestCases::new();
    grouped
        .add_group(SimpleGroup::new("Mixed"))
        .add_test("returns_error", || Err(TestFailure::error("file not found")))
        .add_test("panics", || panic!("index out of bounds"))
        .add_test("passes", pass);

    let run = run_suite(ExecutionModel::ThreadPool, 3, grouped, "");
    assert_eq!(run.counts.passed, 1);
    assert_eq!(run.failed_names, ["returns_error", "panics"]);
    assert!(run.output.contains("Panicked: index out of bounds"));
}
