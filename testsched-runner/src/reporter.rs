// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writing outcomes to the output sink in index order.
//!
//! Outcomes arrive in completion order, which under concurrent execution models is not the order
//! tests were registered in. The [`OrderedReporter`] buffers them, one slot per test, and writes
//! out the contiguous prefix of filled slots each time a new outcome arrives.

use crate::{
    errors::RunError,
    helpers::DisplayDuration,
    list::TestList,
    outcome::{OutcomeKind, TestOutcome},
    sink::OutputSink,
};
use std::{fmt, time::Duration};
use swrite::{SWrite, swriteln};
use tracing::warn;

/// Counts of outcomes written so far.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OutcomeCounts {
    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that were ignored.
    pub ignored: usize,

    /// Outcomes received for a test that already had one.
    pub duplicates: usize,
}

impl OutcomeCounts {
    /// Returns the number of tests with a written outcome.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.ignored
    }
}

/// Buffers outcomes and writes them to a sink in index order.
pub struct OrderedReporter<'a> {
    sink: Box<dyn OutputSink + 'a>,
    slots: Vec<Option<TestOutcome>>,
    next_flush: usize,
    group_completed: Vec<usize>,
    group_elapsed: Vec<Duration>,
    failed_indexes: Vec<u32>,
    counts: OutcomeCounts,
    core_time: Duration,
}

impl<'a> OrderedReporter<'a> {
    pub(crate) fn new(list: &TestList, sink: Box<dyn OutputSink + 'a>) -> Self {
        Self {
            sink,
            slots: vec![None; list.len()],
            next_flush: 0,
            group_completed: vec![0; list.groups().len()],
            group_elapsed: vec![Duration::ZERO; list.groups().len()],
            failed_indexes: Vec::new(),
            counts: OutcomeCounts::default(),
            core_time: Duration::ZERO,
        }
    }

    /// Returns true if test `index` has an outcome, written out or not.
    pub fn is_filled(&self, index: u32) -> bool {
        self.slots
            .get(index as usize)
            .is_some_and(|slot| slot.is_some())
            || (index as usize) < self.next_flush
    }

    /// Returns the indexes of tests without an outcome.
    pub fn unfilled(&self) -> impl Iterator<Item = u32> + '_ {
        (self.next_flush..self.slots.len())
            .filter(|&index| self.slots[index].is_none())
            .map(|index| index as u32)
    }

    /// Returns true once every test's outcome has been written.
    pub fn is_complete(&self) -> bool {
        self.next_flush == self.slots.len()
    }

    /// Returns counts of the outcomes written so far.
    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    /// Returns the sum of elapsed times of all completed groups.
    pub fn core_time(&self) -> Duration {
        self.core_time
    }

    /// Returns the indexes of failed tests in index order.
    pub fn failed_indexes(&self) -> &[u32] {
        &self.failed_indexes
    }

    /// Writes text directly to the sink.
    pub(crate) fn write_str(&mut self, text: &str) -> Result<(), RunError> {
        self.sink.write_str(text).map_err(RunError::Write)
    }

    pub(crate) fn flush_sink(&mut self) -> Result<(), RunError> {
        self.sink.flush_sink().map_err(RunError::Write)
    }

    /// Stores an outcome, then writes out everything that's ready.
    pub fn absorb(&mut self, list: &TestList, outcome: TestOutcome) -> Result<(), RunError> {
        let index = outcome.test_index as usize;
        if index >= self.slots.len() {
            warn!(
                "dropping outcome for test index {index}, out of range for {} tests",
                self.slots.len()
            );
            return Ok(());
        }

        if index < self.next_flush {
            self.counts.duplicates += 1;
            warn!(
                "dropping duplicate outcome for already reported test `{}`",
                list.cases()[index].name()
            );
            return Ok(());
        }

        match &mut self.slots[index] {
            Some(existing) => {
                self.counts.duplicates += 1;
                existing.merge(outcome);
            }
            slot @ None => *slot = Some(outcome),
        }

        self.flush_ready(list)
    }

    /// Writes out the filled slots following the last written one, stopping at the first empty
    /// slot.
    pub fn flush_ready(&mut self, list: &TestList) -> Result<(), RunError> {
        while let Some(outcome) = self.slots.get_mut(self.next_flush).and_then(Option::take) {
            let case = &list.cases()[self.next_flush];
            self.next_flush += 1;

            let mut text = String::with_capacity(
                case.prefix_text().len() + outcome.text.len() + case.suffix_text().len(),
            );
            text.push_str(case.prefix_text());
            text.push_str(&outcome.text);
            text.push_str(case.suffix_text());

            match outcome.kind {
                OutcomeKind::Success => self.counts.passed += 1,
                OutcomeKind::Failure => {
                    self.counts.failed += 1;
                    self.failed_indexes.push(case.index());
                }
                OutcomeKind::Ignored => self.counts.ignored += 1,
            }

            let group = case.group_index() as usize;
            self.group_completed[group] += 1;
            self.group_elapsed[group] += outcome.elapsed();
            if self.group_completed[group] == list.groups()[group].size {
                let group_elapsed = self.group_elapsed[group];
                self.core_time += group_elapsed;
                swriteln!(
                    text,
                    " Group duration (core clock time) = {}",
                    DisplayDuration(group_elapsed)
                );
            }

            self.write_str(&text)?;
        }
        Ok(())
    }
}

impl fmt::Debug for OrderedReporter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedReporter")
            .field("len", &self.slots.len())
            .field("next_flush", &self.next_flush)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

/// Statistics for a completed run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of tests in the run.
    pub total: usize,

    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that were ignored.
    pub ignored: usize,

    /// Sum of the time taken by each test.
    pub core_time: Duration,

    /// Wall-clock time for the whole run.
    pub wall_time: Duration,
}

impl RunStats {
    /// Returns true if no tests failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Returns the process exit code for this run: 0 if no tests failed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sink::SharedBuffer,
        test_filter::NameFilter,
        test_group::{GroupedTestCases, SimpleGroup},
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn list() -> TestList {
        let mut grouped = GroupedTestCases::new();
        grouped
            .add_group(SimpleGroup::new("A"))
            .add_test("a1", || Ok(()))
            .add_test("a2", || Ok(()));
        grouped
            .add_group(SimpleGroup::new("B"))
            .add_test("b1", || Ok(()));
        TestList::new(grouped, &NameFilter::all())
    }

    fn outcome(test_index: u32, group_index: u32, kind: OutcomeKind) -> TestOutcome {
        TestOutcome {
            elapsed_nanos: 2_000_000,
            group_index,
            test_index,
            kind,
            text: format!("[{test_index}]\n"),
        }
    }

    #[test]
    fn writes_in_index_order() {
        let list = list();
        let buffer = SharedBuffer::new();
        let mut reporter = OrderedReporter::new(&list, Box::new(buffer.clone()));

        reporter
            .absorb(&list, outcome(2, 1, OutcomeKind::Failure))
            .unwrap();
        reporter
            .absorb(&list, outcome(1, 0, OutcomeKind::Success))
            .unwrap();
        assert_eq!(buffer.contents(), "");
        assert_eq!(reporter.unfilled().collect::<Vec<_>>(), [0]);
        assert!(reporter.is_filled(2));

        reporter
            .absorb(&list, outcome(0, 0, OutcomeKind::Ignored))
            .unwrap();
        assert!(reporter.is_complete());
        assert_eq!(
            buffer.contents(),
            indoc! {"


                ++ Running test group A

                [0]
                [1]

                == A group completed.
                 Group duration (core clock time) = 4.0ms


                ++ Running test group B

                [2]

                == B group completed.
                 Group duration (core clock time) = 2.0ms
            "}
        );
        assert_eq!(
            reporter.counts(),
            OutcomeCounts {
                passed: 1,
                failed: 1,
                ignored: 1,
                duplicates: 0,
            }
        );
        assert_eq!(reporter.failed_indexes(), [2]);
        assert_eq!(reporter.core_time(), Duration::from_millis(6));
    }

    #[test]
    fn duplicates_merge_or_drop() {
        let list = list();
        let buffer = SharedBuffer::new();
        let mut reporter = OrderedReporter::new(&list, Box::new(buffer.clone()));

        // Not yet flushed: merged.
        reporter
            .absorb(&list, outcome(1, 0, OutcomeKind::Ignored))
            .unwrap();
        reporter
            .absorb(&list, outcome(1, 0, OutcomeKind::Failure))
            .unwrap();
        reporter
            .absorb(&list, outcome(0, 0, OutcomeKind::Success))
            .unwrap();
        assert!(buffer.contents().contains("[1]\n[1]\n"));
        assert_eq!(reporter.counts().failed, 1);

        // Already flushed: dropped.
        reporter
            .absorb(&list, outcome(0, 0, OutcomeKind::Failure))
            .unwrap();
        assert_eq!(reporter.counts().failed, 1);
        assert_eq!(reporter.counts().duplicates, 2);

        // Out of range: dropped.
        reporter
            .absorb(&list, outcome(99, 0, OutcomeKind::Failure))
            .unwrap();
        assert_eq!(reporter.counts().total(), 2);
    }

    #[test]
    fn exit_codes() {
        let stats = RunStats {
            total: 3,
            passed: 2,
            ignored: 1,
            ..RunStats::default()
        };
        assert_eq!(stats.exit_code(), 0);
        let stats = RunStats { failed: 1, ..stats };
        assert_eq!(stats.exit_code(), 1);
    }
}
