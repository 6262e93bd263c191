// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use test_case::test_case;
use testsched_runner::{
    config::{SchedulerConfig, TestThreads},
    model::{ExecutionModel, ExecutionModels},
    runner::TestRunnerBuilder,
    sink::SharedBuffer,
    test_group::{GroupedTestCases, SimpleGroup},
};

fn crashing_suite() -> GroupedTestCases {
    let mut grouped = GroupedTestCases::new();
    let mut registration = grouped.add_group(SimpleGroup::new("Crashy"));
    for index in 0..10 {
        registration.add_test(format!("before_{index}"), pass);
    }
    registration.add_test("aborts_mid_test", || std::process::abort());
    for index in 0..10 {
        registration.add_test(format!("after_{index}"), pass);
    }
    grouped
}

#[test_case(ExecutionModel::PersistentProcessPool, 1; "process pool, one worker")]
#[test_case(ExecutionModel::PersistentProcessPool, 3; "process pool, three workers")]
#[test_case(ExecutionModel::ProcessPerTest, 3; "process per test")]
fn crash_is_one_failure(model: ExecutionModel, width: usize) {
    let run = run_suite(model, width, crashing_suite(), "");

    assert_eq!(run.counts.passed, 20);
    assert_eq!(run.counts.failed, 1);
    assert_eq!(run.counts.duplicates, 0);
    assert_eq!(run.failed_names, ["aborts_mid_test"]);
    assert_eq!(run.output.matches("segmentation fault").count(), 1);

    let crash_line = run
        .output
        .lines()
        .find(|line| line.contains("aborts_mid_test"))
        .expect("crashed test is reported");
    assert!(crash_line.ends_with("- FAILED!"), "{crash_line}");
}

#[test_case(ExecutionModel::PersistentProcessPool, 1; "process pool, one worker")]
#[test_case(ExecutionModel::PersistentProcessPool, 2; "process pool, two workers")]
#[test_case(ExecutionModel::ProcessPerTest, 2; "process per test")]
fn exit_mid_test_is_one_failure(model: ExecutionModel, width: usize) {
    let mut grouped = GroupedTestCases::new();
    let mut registration = grouped.add_group(SimpleGroup::new("Exits"));
    registration.add_test("exits_mid_test", || std::process::exit(1));
    for index in 0..10 {
        registration.add_test(format!("after_{index}"), pass);
    }

    let run = run_suite(model, width, grouped, "");
    assert_eq!(run.counts.passed, 10);
    assert_eq!(run.counts.failed, 1);
    assert_eq!(run.failed_names, ["exits_mid_test"]);
    assert_eq!(run.output.matches("Result lost").count(), 1);
    assert!(run.output.contains("(exited with code 1)"));
    assert!(!run.output.contains("segmentation fault"));
}

#[test]
fn repeated_crashes_each_reported() {
    let mut grouped = GroupedTestCases::new();
    let mut registration = grouped.add_group(SimpleGroup::new("Crashy"));
    for index in 0..6 {
        registration.add_test(format!("crash_{index}"), || std::process::abort());
        registration.add_test(format!("pass_{index}"), pass);
    }

    let run = run_suite(ExecutionModel::PersistentProcessPool, 2, grouped, "");
    assert_eq!(run.counts.passed, 6);
    assert_eq!(run.counts.failed, 6);
    assert!(run.failed_names.iter().all(|name| name.starts_with("crash_")));
}

#[test]
fn runner_reports_crash_in_summary() {
    let mut grouped = crashing_suite();
    grouped
        .add_group(SimpleGroup::new("InProcessOnly").with_models(ExecutionModels::IN_PROCESS))
        .add_test("needs_threads", || panic!("must not run in a process model"));

    let buffer = SharedBuffer::new();
    let mut builder = TestRunnerBuilder::default();
    builder
        .set_execution_model(ExecutionModel::PersistentProcessPool)
        .set_test_threads(TestThreads::Count(2));
    let stats = builder
        .build(&SchedulerConfig::default(), grouped, buffer.clone())
        .expect("runner builds")
        .run()
        .expect("run completes");

    assert_eq!(
        (stats.total, stats.passed, stats.failed, stats.ignored),
        (22, 20, 1, 1)
    );
    assert_eq!(stats.exit_code(), 1);

    let output = buffer.contents();
    assert!(output.contains("Run type   = worker processes (2 worker processes)"));
    assert!(output.contains("Failed tests:\n      aborts_mid_test\n"));
    assert!(output.contains(&format!(
        "Test application parent process with pid {} finished execution.",
        std::process::id()
    )));
}
