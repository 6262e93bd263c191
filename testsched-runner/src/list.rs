// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The flattened list of test cases for a run.
//!
//! Registered tests arrive grouped. For a run they are flattened into a single list with dense,
//! 0-based indexes: groups in registration order, then tests in registration order within each
//! group. The index of a test is its identity for the rest of the run, across threads and
//! processes.

use crate::{
    model::ExecutionModels,
    test_filter::NameFilter,
    test_group::{GroupedTestCases, TestGroup, TestMethod},
};
use std::{fmt, sync::Arc};

/// The line prefix used by in-process execution models.
pub(crate) const IN_PROCESS_PREFIX: &str = " - Test ";

/// A placeholder as wide as the line prefix used by process-based execution models, which
/// includes the worker pid.
pub(crate) const MULTI_PROCESS_PREFIX_PLACEHOLDER: &str = " - ------ - Test ";

/// A single test case in a run.
#[derive(Clone)]
pub struct FlattenedTestCase {
    pub(crate) index: u32,
    pub(crate) models: ExecutionModels,
    pub(crate) prefix_text: String,
    pub(crate) suffix_text: String,
    pub(crate) name: String,
    pub(crate) group: Arc<dyn TestGroup>,
    pub(crate) group_index: u32,
    pub(crate) body: Arc<dyn TestMethod>,
}

impl FlattenedTestCase {
    /// The index of this test in the run.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The execution models this test runs under.
    pub fn models(&self) -> ExecutionModels {
        self.models
    }

    /// The name of the test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The index of this test's group among the groups in the run.
    pub fn group_index(&self) -> u32 {
        self.group_index
    }

    /// The group this test belongs to.
    pub fn group(&self) -> &dyn TestGroup {
        &*self.group
    }

    /// Text written before this test's result: the group banner if this is the first test of its
    /// group, otherwise empty.
    pub fn prefix_text(&self) -> &str {
        &self.prefix_text
    }

    /// Text written after this test's result: the group completion line if this is the last test
    /// of its group, otherwise empty.
    pub fn suffix_text(&self) -> &str {
        &self.suffix_text
    }
}

impl fmt::Debug for FlattenedTestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlattenedTestCase")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("group", &self.group.name())
            .field("group_index", &self.group_index)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

/// Summary information about a group included in a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupInfo {
    /// The group name.
    pub name: String,

    /// The number of the group's tests included in the run.
    pub size: usize,
}

/// The flattened, filtered list of test cases in a run.
#[derive(Clone, Debug)]
pub struct TestList {
    cases: Vec<FlattenedTestCase>,
    groups: Vec<GroupInfo>,
    name_width: usize,
}

impl TestList {
    /// Flattens `grouped`, keeping only tests whose names match `filter`.
    ///
    /// Groups with no matching tests are dropped entirely, so their banners are never written.
    pub fn new(grouped: GroupedTestCases, filter: &NameFilter) -> Self {
        let mut cases = Vec::with_capacity(grouped.test_count());
        let mut groups = Vec::new();
        let mut name_width = 0;

        for (group, group_cases) in grouped.groups {
            let included: Vec<_> = group_cases
                .into_iter()
                .filter(|case| filter.is_match(&case.name))
                .collect();
            if included.is_empty() {
                continue;
            }

            let group_index = groups.len() as u32;
            let group_name = group.name().to_owned();
            let models = group.applicable_models();
            let size = included.len();

            for (i, case) in included.into_iter().enumerate() {
                name_width = name_width.max(case.name.chars().count());
                let prefix_text = if i == 0 {
                    format!("\n\n++ Running test group {group_name}\n\n")
                } else {
                    String::new()
                };
                let suffix_text = if i + 1 == size {
                    format!("\n== {group_name} group completed.\n")
                } else {
                    String::new()
                };
                cases.push(FlattenedTestCase {
                    index: cases.len() as u32,
                    models,
                    prefix_text,
                    suffix_text,
                    name: case.name,
                    group: group.clone(),
                    group_index,
                    body: case.body,
                });
            }

            groups.push(GroupInfo {
                name: group_name,
                size,
            });
        }

        Self {
            cases,
            groups,
            name_width,
        }
    }

    /// Returns the test cases in index order.
    pub fn cases(&self) -> &[FlattenedTestCase] {
        &self.cases
    }

    /// Returns the test case at `index`.
    pub fn get(&self, index: u32) -> Option<&FlattenedTestCase> {
        self.cases.get(index as usize)
    }

    /// Returns the included groups in order.
    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    /// Returns the number of test cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Returns true if no tests are included.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Returns the width that test lines (prefix plus name) are padded to.
    pub fn line_width(&self, multi_process: bool) -> usize {
        if self.cases.is_empty() {
            return 0;
        }
        let prefix = if multi_process {
            MULTI_PROCESS_PREFIX_PLACEHOLDER
        } else {
            IN_PROCESS_PREFIX
        };
        prefix.len() + self.name_width
    }
}
