// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test outcomes.
//!
//! An outcome is produced by whichever thread or process ran the test, and is sent back to the
//! scheduler to be written out in index order. Outcomes cross process boundaries, so they are
//! serializable.

use crate::helpers::DisplayDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use swrite::{SWrite, swriteln};

/// The result of a single test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// Setup, the test body and teardown all succeeded.
    Success,

    /// Setup, the test body or teardown failed, or the test crashed its worker.
    Failure,

    /// The test was not run under the active execution model.
    Ignored,
}

/// The outcome of a single test, including the text to write for it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestOutcome {
    /// Time taken from just before setup to just after teardown, in nanoseconds.
    pub elapsed_nanos: i64,

    /// The index of the test's group.
    pub group_index: u32,

    /// The index of the test.
    pub test_index: u32,

    /// The result.
    pub kind: OutcomeKind,

    /// The rendered result line(s).
    pub text: String,
}

impl TestOutcome {
    /// Returns the elapsed time as a duration.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.elapsed_nanos).unwrap_or(0))
    }

    /// Returns true if the test failed.
    pub fn is_failure(&self) -> bool {
        self.kind == OutcomeKind::Failure
    }

    /// Merges a later partial outcome for the same test into this one.
    ///
    /// The later outcome's kind and elapsed time replace this one's, and its text is appended.
    pub(crate) fn merge(&mut self, later: TestOutcome) {
        self.elapsed_nanos = later.elapsed_nanos;
        self.group_index = later.group_index;
        self.kind = later.kind;
        self.text.push_str(&later.text);
    }
}

/// Writes the ` Duration = <d>` tail of a result line.
pub(crate) fn push_duration_line(text: &mut String, elapsed: Duration) {
    swriteln!(text, " Duration = {}", DisplayDuration(elapsed));
}
