// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    demo,
    output::{CLI_STYLES, OutputOpts},
};
use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::Result;
use std::io::BufWriter;
use testsched_runner::{
    config::{SchedulerConfig, TestThreads},
    model::ExecutionModel,
    runner::TestRunnerBuilder,
};
use tracing::debug;

/// Run the demonstration test suite under a choice of execution models.
///
/// Results are printed in registration order regardless of the order tests complete in. The exit
/// code is 0 if every test passed or was ignored, and 1 otherwise.
#[derive(Debug, Parser)]
#[command(name = "testsched", version, styles = CLI_STYLES)]
pub(crate) struct TestschedApp {
    /// Execution model: sequential, thread-pool, process-pool or process-per-test
    #[arg(long, short = 'm', value_name = "MODEL", env = "TESTSCHED_MODEL")]
    model: Option<ExecutionModel>,

    /// Number of tests to run simultaneously [possible values: integer or "num-cpus"]
    #[arg(
        long,
        short = 'j',
        value_name = "N",
        env = "TESTSCHED_TEST_THREADS",
        allow_negative_numbers = true
    )]
    test_threads: Option<TestThreads>,

    /// Config file [default: built-in defaults only]
    #[arg(long, value_name = "PATH", env = "TESTSCHED_CONFIG")]
    config_file: Option<Utf8PathBuf>,

    /// Add a test that aborts its process, to show crash recovery under process models
    #[arg(long)]
    include_crash: bool,

    #[command(flatten)]
    output: OutputOpts,

    /// Test name globs to run (`*` and `?` wildcards)
    #[arg(value_name = "FILTERS")]
    filters: Vec<String>,
}

impl TestschedApp {
    /// Runs the suite and returns the process exit code.
    pub(crate) fn exec(self) -> Result<i32> {
        self.output.init();

        let config = SchedulerConfig::from_sources(self.config_file.as_deref())?;
        debug!("loaded config: {config:?}");

        let mut builder = TestRunnerBuilder::default();
        if let Some(model) = self.model {
            builder.set_execution_model(model);
        }
        if let Some(test_threads) = self.test_threads {
            builder.set_test_threads(test_threads);
        }
        if !self.filters.is_empty() {
            builder.set_filter(self.filters.join(","));
        }

        let suite = demo::suite(self.include_crash);
        let runner = builder.build(&config, suite, BufWriter::new(std::io::stdout()))?;
        let stats = runner.run()?;
        debug!("run stats: {stats:?}");

        Ok(stats.exit_code())
    }
}
