// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs a demonstration suite through testsched-runner.

mod app;
mod demo;
mod output;

use app::TestschedApp;
use clap::Parser;
use color_eyre::Result;

fn main() -> Result<()> {
    color_eyre::install()?;

    let app = TestschedApp::parse();
    let code = app.exec()?;
    std::process::exit(code)
}
