// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutionStrategy, Strategy};
use crate::{
    config::{IpcConfig, SchedulerConfig, TestThreads},
    errors::{RunError, TestRunnerBuildError},
    helpers::{DisplayDuration, plural},
    model::ExecutionModel,
    reporter::RunStats,
    scheduler::Scheduler,
    sink::OutputSink,
    test_filter::NameFilter,
    test_group::GroupedTestCases,
    time::{Clock, RunStopwatch},
};
use std::{sync::Arc, time::Duration};
use swrite::{SWrite, swrite, swriteln};
use tracing::debug;

const STARTING_BANNER: &str =
    "\n------------------------- STARTING TESTS -------------------------\n\n";
const COMPLETED_BANNER: &str =
    "\n------------------------- COMPLETED TESTS ------------------------\n";

/// Test runner options.
///
/// Values not set here are taken from the [`SchedulerConfig`] passed to [`Self::build`].
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    execution_model: Option<ExecutionModel>,
    test_threads: Option<TestThreads>,
    filter: Option<String>,
    ipc: Option<IpcConfig>,
    clock: Option<Arc<dyn Clock>>,
}

impl TestRunnerBuilder {
    /// Sets the execution model for this test runner.
    pub fn set_execution_model(&mut self, model: ExecutionModel) -> &mut Self {
        self.execution_model = Some(model);
        self
    }

    /// Sets the number of tests to run simultaneously.
    pub fn set_test_threads(&mut self, test_threads: TestThreads) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets the name filter, in the syntax accepted by [`NameFilter::new`].
    pub fn set_filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the IPC settings used by process models.
    pub fn set_ipc(&mut self, ipc: IpcConfig) -> &mut Self {
        self.ipc = Some(ipc);
        self
    }

    /// Sets the clock used to time tests.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = Some(clock);
        self
    }

    /// Creates a new test runner for `grouped`, writing results to `sink`.
    pub fn build<'a>(
        self,
        config: &SchedulerConfig,
        grouped: GroupedTestCases,
        sink: impl OutputSink + 'a,
    ) -> Result<TestRunner<'a>, TestRunnerBuildError> {
        let runner_config = config.runner();
        let model = self.execution_model.unwrap_or(runner_config.execution_model);
        let width = self
            .test_threads
            .unwrap_or(runner_config.test_threads)
            .compute();
        let ipc = self.ipc.unwrap_or(*config.ipc());
        let filter = match self.filter.as_deref().or(runner_config.filter.as_deref()) {
            Some(filter) => NameFilter::new(filter)?,
            None => NameFilter::all(),
        };

        let mut scheduler = Scheduler::new(grouped, &filter, sink);
        if let Some(clock) = self.clock {
            scheduler = scheduler.with_clock(clock);
        }
        let strategy = Strategy::new(model, width, &ipc);
        debug!(
            "built test runner: model {}, width {width}, {} {} selected",
            strategy.model(),
            scheduler.len(),
            plural::tests_str(scheduler.len()),
        );

        Ok(TestRunner {
            scheduler,
            strategy,
            width,
        })
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner<'a> {
    scheduler: Scheduler<'a>,
    strategy: Strategy,
    width: usize,
}

impl<'a> TestRunner<'a> {
    /// Returns the execution model tests will run under.
    ///
    /// This may differ from the requested model on platforms without process support.
    pub fn model(&self) -> ExecutionModel {
        self.strategy.model()
    }

    /// Returns the number of tests run simultaneously.
    pub fn width(&self) -> usize {
        match self.model() {
            ExecutionModel::Sequential => 1,
            _ => self.width,
        }
    }

    /// Returns the scheduler, which holds the selected tests.
    pub fn scheduler(&self) -> &Scheduler<'a> {
        &self.scheduler
    }

    /// Runs every selected test, writing the run banner, each outcome and the final report to the
    /// output sink.
    ///
    /// Test failures are reported in the returned [`RunStats`]. An error means the run itself
    /// could not be completed.
    pub fn run(mut self) -> Result<RunStats, RunError> {
        let stopwatch = RunStopwatch::start();
        debug!("test run started at {}", stopwatch.started_at());

        let mut header = String::from(STARTING_BANNER);
        header.push_str(&self.run_type_line());
        self.scheduler.write_str(&header)?;

        if self.scheduler.is_empty() {
            self.scheduler.write_str("\nNo tests to run.\n")?;
            self.scheduler.flush()?;
            return Ok(RunStats {
                wall_time: stopwatch.lap().elapsed,
                ..RunStats::default()
            });
        }

        self.strategy.run(&mut self.scheduler)?;

        let timing = stopwatch.lap();
        let counts = self.scheduler.counts();
        let stats = RunStats {
            total: self.scheduler.len(),
            passed: counts.passed,
            failed: counts.failed,
            ignored: counts.ignored,
            core_time: self.scheduler.core_time(),
            wall_time: timing.elapsed,
        };
        let report = self.final_report(&stats);
        self.scheduler.write_str(&report)?;
        self.scheduler.flush()?;
        debug!("test run finished at {}", timing.finished_at());

        Ok(stats)
    }

    fn run_type_line(&self) -> String {
        let width = self.width();
        match self.model() {
            ExecutionModel::Sequential => {
                "Run type = single process, single threaded\n".to_owned()
            }
            ExecutionModel::ThreadPool => format!(
                "Run type = single process, multi-threaded ({width} {})\n",
                plural::worker_threads_str(width),
            ),
            ExecutionModel::PersistentProcessPool => format!(
                "Run type   = worker processes ({width} {})\nParent pid = {}\n",
                plural::worker_processes_str(width),
                std::process::id(),
            ),
            ExecutionModel::ProcessPerTest => format!(
                "Run type   = process per test ({width} simultaneous {})\nParent pid = {}\n",
                plural::processes_str(width),
                std::process::id(),
            ),
        }
    }

    fn final_report(&self, stats: &RunStats) -> String {
        let average = u32::try_from(stats.total)
            .ok()
            .and_then(|total| stats.core_time.checked_div(total))
            .unwrap_or(Duration::ZERO);

        let mut report = String::from(COMPLETED_BANNER);
        swrite!(
            report,
            "\nTotal duration   (test run clock time)    = {}\
             \nAverage duration (test run clock time)    = {}\
             \nTotal duration   (application clock time) = {}\n",
            DisplayDuration(stats.core_time),
            DisplayDuration(average),
            DisplayDuration(stats.wall_time),
        );

        if stats.is_success() {
            swrite!(
                report,
                "\n***** ALL TESTS PASSED - {} {} executed *****\n",
                stats.total,
                plural::tests_str(stats.total),
            );
        } else {
            swrite!(
                report,
                "\n***** THERE WERE TEST FAILURES. *****\n\n\
                 Total tests run: {}\n\n  \
                 {:>6} {} passed\n  \
                 {:>6} {} failed\n\n\
                 Failed tests:\n",
                stats.total,
                stats.passed,
                plural::tests_str(stats.passed),
                stats.failed,
                plural::tests_str(stats.failed),
            );
            let list = self.scheduler.list();
            for &index in self.scheduler.reporter().failed_indexes() {
                if let Some(case) = list.get(index) {
                    swriteln!(report, "      {}", case.name());
                }
            }
            report.push('\n');
        }

        if self.model().is_multi_process() {
            swrite!(
                report,
                "\nTest application parent process with pid {} finished execution.\n",
                std::process::id(),
            );
        } else {
            swrite!(
                report,
                "\nTest application process with pid {} finished execution.\n",
                std::process::id(),
            );
        }
        report
    }
}
