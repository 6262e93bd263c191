// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduling logic shared by every execution model.
//!
//! The [`Scheduler`] owns the flattened test list and the ordered reporter. Execution models claim
//! test indexes, run them through a [`TestExecutor`] (possibly on another thread or in another
//! process) and hand the resulting outcomes back to [`Scheduler::absorb_outcome`].

use crate::{
    errors::RunError,
    helpers::duration_to_nanos,
    list::{FlattenedTestCase, IN_PROCESS_PREFIX, TestList},
    model::ExecutionModel,
    outcome::{OutcomeKind, TestOutcome, push_duration_line},
    reporter::{OrderedReporter, OutcomeCounts},
    sink::OutputSink,
    test_filter::NameFilter,
    test_group::{GroupedTestCases, TestFailure},
    time::{Clock, MonotonicClock},
};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use swrite::{SWrite, swrite};

/// Why a test's outcome had to be synthesized by the scheduler instead of reported by the worker
/// that ran it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LostReason {
    /// The worker process running the test was killed by a signal.
    Crashed {
        /// The worker's pid.
        pid: u32,

        /// A description of how the worker terminated.
        termination: String,
    },

    /// The worker finished without reporting an outcome for the test.
    NoResult {
        /// A description of the worker, for example `worker process 1234`.
        worker: String,
    },
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crashed { pid, termination } => write!(
                f,
                "Worker process {pid} terminated with a segmentation fault ({termination})"
            ),
            Self::NoResult { worker } => {
                write!(f, "Result lost: {worker} finished without reporting a result")
            }
        }
    }
}

/// Runs individual test cases and renders their outcomes.
///
/// This is cheap to copy and can be shared across threads, or used in a forked worker process.
#[derive(Clone, Copy)]
pub struct TestExecutor<'s> {
    clock: &'s dyn Clock,
    model: ExecutionModel,
    line_width: usize,
}

impl<'s> TestExecutor<'s> {
    /// Returns the execution model tests are run under.
    pub fn model(&self) -> ExecutionModel {
        self.model
    }

    /// Returns the line prefix for a test run by the process with `pid`, or by this process if
    /// the model is in-process.
    pub fn line_prefix(&self, pid: u32) -> String {
        if self.model.is_multi_process() {
            format!(" - {pid:>6} - Test ")
        } else {
            IN_PROCESS_PREFIX.to_owned()
        }
    }

    /// Returns the prefix for a test run by the current process.
    pub fn current_line_prefix(&self) -> String {
        self.line_prefix(std::process::id())
    }

    fn start_line(&self, prefix: &str, case: &FlattenedTestCase) -> String {
        let mut line = String::with_capacity(self.line_width + 64);
        line.push_str(prefix);
        line.push_str(case.name());
        let chars = line.chars().count();
        line.extend(std::iter::repeat_n(' ', self.line_width.saturating_sub(chars)));
        line
    }

    /// Runs `case`, or reports it as ignored if its group doesn't run under the active model.
    pub fn execute(&self, case: &FlattenedTestCase, prefix: &str) -> TestOutcome {
        if case.models().includes(self.model) {
            self.run_one(case, prefix)
        } else {
            self.report_ignored(case, prefix)
        }
    }

    /// Produces a zero-duration ignored outcome without running anything.
    pub fn report_ignored(&self, case: &FlattenedTestCase, prefix: &str) -> TestOutcome {
        let mut text = self.start_line(prefix, case);
        text.push_str(" - ignored.");
        push_duration_line(&mut text, Duration::ZERO);
        TestOutcome {
            elapsed_nanos: 0,
            group_index: case.group_index(),
            test_index: case.index(),
            kind: OutcomeKind::Ignored,
            text,
        }
    }

    /// Runs group setup, the test body and group teardown, capturing failures.
    ///
    /// Teardown always runs. If setup fails the body is skipped. A teardown failure is appended
    /// to an earlier failure, or becomes the failure if nothing else failed. A setup or body that
    /// returns [`TestFailure::ignored`] makes the test ignored, unless teardown then fails.
    pub fn run_one(&self, case: &FlattenedTestCase, prefix: &str) -> TestOutcome {
        let mut text = self.start_line(prefix, case);
        let start = self.clock.now();

        let group = case.group();
        let mut failed = false;
        let mut ignored = None;
        match guarded(|| group.setup()) {
            Ok(()) => match guarded(|| case.body.run()) {
                Ok(()) => {}
                Err(failure) if failure.is_ignored() => ignored = Some(failure),
                Err(failure) => {
                    failed = true;
                    swrite!(text, " - FAILED!\n\n{failure}\n\n");
                }
            },
            Err(failure) if failure.is_ignored() => ignored = Some(failure),
            Err(failure) => {
                failed = true;
                swrite!(text, " - FAILED!\n\nFailure in setup method\n{failure}\n\n");
            }
        }
        match guarded(|| group.teardown()) {
            Err(failure) if !failure.is_ignored() => {
                if !failed {
                    text.push_str(" - FAILED!\n\n");
                }
                failed = true;
                swrite!(text, "Failure in teardown method\n{failure}\n\n");
            }
            _ => {}
        }

        let kind = if failed {
            OutcomeKind::Failure
        } else if let Some(request) = ignored {
            tracing::debug!("`{}` asked to be ignored: {}", case.name(), request.message());
            text.push_str(" - ignored.");
            OutcomeKind::Ignored
        } else {
            text.push_str(" - passed.");
            OutcomeKind::Success
        };

        let elapsed = self.clock.elapsed_since(start);
        push_duration_line(&mut text, elapsed);

        TestOutcome {
            elapsed_nanos: duration_to_nanos(elapsed),
            group_index: case.group_index(),
            test_index: case.index(),
            kind,
            text,
        }
    }

    /// Synthesizes a failure for a test whose outcome was never reported.
    pub fn lost(&self, case: &FlattenedTestCase, pid: u32, reason: &LostReason) -> TestOutcome {
        let mut text = self.start_line(&self.line_prefix(pid), case);
        swrite!(text, " - FAILED!\n\n{reason}\n\n");
        push_duration_line(&mut text, Duration::ZERO);
        TestOutcome {
            elapsed_nanos: 0,
            group_index: case.group_index(),
            test_index: case.index(),
            kind: OutcomeKind::Failure,
            text,
        }
    }
}

impl fmt::Debug for TestExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestExecutor")
            .field("model", &self.model)
            .field("line_width", &self.line_width)
            .finish_non_exhaustive()
    }
}

fn guarded(f: impl FnOnce() -> Result<(), TestFailure>) -> Result<(), TestFailure> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(TestFailure::from_panic(payload)))
}

/// The state of a run shared by every execution model.
pub struct Scheduler<'a> {
    list: TestList,
    reporter: OrderedReporter<'a>,
    clock: Arc<dyn Clock>,
}

impl<'a> Scheduler<'a> {
    /// Creates a scheduler for the tests in `grouped` that match `filter`, writing results to
    /// `sink`.
    pub fn new(
        grouped: GroupedTestCases,
        filter: &NameFilter,
        sink: impl OutputSink + 'a,
    ) -> Self {
        let list = TestList::new(grouped, filter);
        let reporter = OrderedReporter::new(&list, Box::new(sink));
        Self {
            list,
            reporter,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Replaces the clock used to time tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the flattened test list.
    pub fn list(&self) -> &TestList {
        &self.list
    }

    /// Returns the reporter.
    pub fn reporter(&self) -> &OrderedReporter<'a> {
        &self.reporter
    }

    /// Returns counts of the outcomes written so far.
    pub fn counts(&self) -> OutcomeCounts {
        self.reporter.counts()
    }

    /// Returns the total time taken by tests so far.
    pub fn core_time(&self) -> Duration {
        self.reporter.core_time()
    }

    /// Returns the number of tests in the run.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if there are no tests to run.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns the number of tests as a claim bound.
    pub(crate) fn test_count(&self) -> u32 {
        self.list.len() as u32
    }

    /// Returns an executor for running tests under `model`.
    pub fn executor(&self, model: ExecutionModel) -> TestExecutor<'_> {
        TestExecutor {
            clock: &*self.clock,
            model,
            line_width: self.list.line_width(model.is_multi_process()),
        }
    }

    /// Splits the scheduler into an executor, usable from worker threads, and the reporter.
    pub(crate) fn split(
        &mut self,
        model: ExecutionModel,
    ) -> (&TestList, TestExecutor<'_>, &mut OrderedReporter<'a>) {
        let executor = TestExecutor {
            clock: &*self.clock,
            model,
            line_width: self.list.line_width(model.is_multi_process()),
        };
        (&self.list, executor, &mut self.reporter)
    }

    /// Stores an outcome and writes out every outcome that's now ready.
    pub fn absorb_outcome(&mut self, outcome: TestOutcome) -> Result<(), RunError> {
        self.reporter.absorb(&self.list, outcome)
    }

    /// Writes text directly to the output sink.
    pub fn write_str(&mut self, text: &str) -> Result<(), RunError> {
        self.reporter.write_str(text)
    }

    /// Flushes the output sink.
    pub fn flush(&mut self) -> Result<(), RunError> {
        self.reporter.flush_sink()
    }
}

/// Synthesizes failures for every test without an outcome.
///
/// Used once all workers are gone, so that a lost result can never stall the run.
pub(crate) fn synthesize_lost(
    list: &TestList,
    executor: &TestExecutor<'_>,
    reporter: &mut OrderedReporter<'_>,
    pid: u32,
    reason: &LostReason,
) -> Result<(), RunError> {
    let unfilled: Vec<_> = reporter.unfilled().collect();
    for index in unfilled {
        if let Some(case) = list.get(index) {
            tracing::warn!("synthesizing a failure for `{}`: {reason}", case.name());
            reporter.absorb(list, executor.lost(case, pid, reason))?;
        }
    }
    Ok(())
}

impl fmt::Debug for Scheduler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("list", &self.list)
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::ExecutionModels,
        sink::SharedBuffer,
        test_group::{SimpleGroup, TestGroup},
        time::ManualClock,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct InstrumentedGroup {
        fail_setup: bool,
        ignore_setup: bool,
        fail_teardown: bool,
        setups: AtomicUsize,
        teardowns: AtomicUsize,
    }

    impl TestGroup for InstrumentedGroup {
        fn name(&self) -> &str {
            "Instrumented"
        }

        fn setup(&self) -> Result<(), TestFailure> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                return Err(TestFailure::assertion("setup broke"));
            }
            if self.ignore_setup {
                return Err(TestFailure::ignored("fixture unavailable"));
            }
            Ok(())
        }

        fn teardown(&self) -> Result<(), TestFailure> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_teardown {
                return Err(TestFailure::error("teardown broke"));
            }
            Ok(())
        }
    }

    fn scheduler_with(
        group: Arc<InstrumentedGroup>,
        body: impl Fn() -> Result<(), TestFailure> + Send + Sync + 'static,
    ) -> Scheduler<'static> {
        let mut grouped = GroupedTestCases::new();
        grouped.add_shared_group(group).add_test("test", body);
        Scheduler::new(grouped, &NameFilter::all(), String::new())
            .with_clock(Arc::new(ManualClock::with_step(Duration::from_micros(250))))
    }

    fn run_single(scheduler: &Scheduler<'_>) -> TestOutcome {
        let executor = scheduler.executor(ExecutionModel::Sequential);
        let case = &scheduler.list().cases()[0];
        executor.execute(case, &executor.current_line_prefix())
    }

    #[test]
    fn passing_test() {
        let group = Arc::new(InstrumentedGroup::default());
        let scheduler = scheduler_with(group.clone(), || Ok(()));
        let outcome = run_single(&scheduler);
        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert_eq!(outcome.text, " - Test test - passed. Duration = 250μs\n");
        assert_eq!(outcome.elapsed(), Duration::from_micros(250));
        assert_eq!(group.setups.load(Ordering::SeqCst), 1);
        assert_eq!(group.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setup_failure_still_runs_teardown() {
        let group = Arc::new(InstrumentedGroup {
            fail_setup: true,
            fail_teardown: true,
            ..Default::default()
        });
        let body_runs = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler_with(group.clone(), {
            let body_runs = body_runs.clone();
            move || {
                body_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let outcome = run_single(&scheduler);

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert_eq!(body_runs.load(Ordering::SeqCst), 0);
        assert_eq!(group.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome.text,
            " - Test test - FAILED!\n\n\
             Failure in setup method\nAssertion failed: setup broke\n\n\
             Failure in teardown method\nError returned: teardown broke\n\n \
             Duration = 250μs\n"
        );
    }

    #[test]
    fn teardown_failure_replaces_success() {
        let group = Arc::new(InstrumentedGroup {
            fail_teardown: true,
            ..Default::default()
        });
        let scheduler = scheduler_with(group, || Ok(()));
        let outcome = run_single(&scheduler);
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(
            outcome
                .text
                .starts_with(" - Test test - FAILED!\n\nFailure in teardown method\n"),
            "{}",
            outcome.text
        );
        assert!(!outcome.text.contains("passed"));
    }

    #[test]
    fn body_and_teardown_failures_both_reported() {
        let group = Arc::new(InstrumentedGroup {
            fail_teardown: true,
            ..Default::default()
        });
        let scheduler = scheduler_with(group.clone(), || {
            Err(TestFailure::assertion("body broke"))
        });
        let outcome = run_single(&scheduler);

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert_eq!(group.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome.text,
            " - Test test - FAILED!\n\nAssertion failed: body broke\n\nFailure in teardown method\nError returned: teardown broke\n\n Duration = 250μs\n"
        );
        assert_eq!(outcome.text.matches(" - FAILED!").count(), 1);
        let body = outcome.text.find("body broke").unwrap();
        let teardown = outcome.text.find("Failure in teardown method").unwrap();
        assert!(body < teardown);
    }

    #[test]
    fn body_can_ignore_itself() {
        let group = Arc::new(InstrumentedGroup::default());
        let scheduler = scheduler_with(group.clone(), || {
            crate::ignore_test!("no network");
        });
        let outcome = run_single(&scheduler);

        assert_eq!(outcome.kind, OutcomeKind::Ignored);
        assert_eq!(outcome.text, " - Test test - ignored. Duration = 250μs\n");
        assert_eq!(outcome.elapsed(), Duration::from_micros(250));
        assert_eq!(group.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setup_can_ignore_the_test() {
        let group = Arc::new(InstrumentedGroup {
            ignore_setup: true,
            ..Default::default()
        });
        let body_runs = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler_with(group.clone(), {
            let body_runs = body_runs.clone();
            move || {
                body_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let outcome = run_single(&scheduler);

        assert_eq!(outcome.kind, OutcomeKind::Ignored);
        assert_eq!(body_runs.load(Ordering::SeqCst), 0);
        assert_eq!(group.teardowns.load(Ordering::SeqCst), 1);
        assert!(outcome.text.ends_with(" - ignored. Duration = 250μs\n"));
    }

    #[test]
    fn teardown_failure_overrides_ignore() {
        let group = Arc::new(InstrumentedGroup {
            fail_teardown: true,
            ..Default::default()
        });
        let scheduler = scheduler_with(group, || Err(TestFailure::ignored("skip")));
        let outcome = run_single(&scheduler);

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(
            outcome
                .text
                .starts_with(" - Test test - FAILED!\n\nFailure in teardown method\n"),
            "{}",
            outcome.text
        );
        assert!(!outcome.text.contains("ignored"));
    }

    #[test]
    fn panicking_body_is_a_failure() {
        let group = Arc::new(InstrumentedGroup::default());
        let scheduler = scheduler_with(group.clone(), || panic!("boom"));
        let outcome = run_single(&scheduler);
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(outcome.text.contains("Panicked: boom"), "{}", outcome.text);
        assert_eq!(group.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn excluded_model_is_ignored() {
        let mut grouped = GroupedTestCases::new();
        grouped
            .add_group(SimpleGroup::new("G").with_models(ExecutionModels::MULTI_PROCESS))
            .add_test("only_in_processes", || panic!("must not run"));
        let scheduler = Scheduler::new(grouped, &NameFilter::all(), String::new());
        let outcome = run_single(&scheduler);
        assert_eq!(outcome.kind, OutcomeKind::Ignored);
        assert_eq!(outcome.elapsed_nanos, 0);
        assert_eq!(
            outcome.text,
            " - Test only_in_processes - ignored. Duration = 0ns\n"
        );
    }

    #[test]
    fn padding_and_process_prefix() {
        let mut grouped = GroupedTestCases::new();
        grouped
            .add_group(SimpleGroup::new("G"))
            .add_test("short", || Ok(()))
            .add_test("much_longer_name", || Ok(()));
        let scheduler = Scheduler::new(grouped, &NameFilter::all(), String::new());

        let executor = scheduler.executor(ExecutionModel::ThreadPool);
        let outcome = executor.report_ignored(&scheduler.list().cases()[0], " - Test ");
        assert!(
            outcome.text.starts_with(" - Test short            - ignored."),
            "{:?}",
            outcome.text
        );

        let executor = scheduler.executor(ExecutionModel::ProcessPerTest);
        assert_eq!(executor.line_prefix(42), " -     42 - Test ");
        let outcome = executor.lost(
            &scheduler.list().cases()[1],
            42,
            &LostReason::Crashed {
                pid: 42,
                termination: "killed by SIGSEGV".to_owned(),
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(outcome.text.starts_with(" -     42 - Test much_longer_name - FAILED!"));
        assert!(outcome.text.contains("segmentation fault"));
    }

    #[test]
    fn absorb_writes_to_sink() {
        let mut grouped = GroupedTestCases::new();
        grouped
            .add_group(SimpleGroup::new("G"))
            .add_test("t", || Ok(()));
        let buffer = SharedBuffer::new();
        let mut scheduler = Scheduler::new(grouped, &NameFilter::all(), buffer.clone());
        let outcome = run_single(&scheduler);
        scheduler.absorb_outcome(outcome).unwrap();
        assert!(buffer.contents().contains("++ Running test group G"));
        assert!(buffer.contents().contains(" - Test t - passed."));
        assert_eq!(scheduler.counts().passed, 1);
    }
}
