// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test groups, test methods and the failures they report.
//!
//! How tests are declared is up to the caller. The scheduler only needs the interfaces in this
//! module: a [`TestGroup`] with optional setup and teardown, and a [`TestMethod`] per test case,
//! collected into [`GroupedTestCases`] in registration order.

use crate::model::ExecutionModels;
use std::{any::Any, error::Error, fmt, sync::Arc};

/// The kind of a [`TestFailure`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// An assertion did not hold.
    Assertion,

    /// An error was returned.
    Error,

    /// The code panicked.
    Panic,

    /// The test asked to be reported as ignored. This is not counted as a failure.
    Ignored,
}

/// A failure inside a test body, a group setup or a group teardown.
///
/// This is always turned into a reported outcome for the test, and never stops a run. Any
/// [`std::error::Error`] converts into a `TestFailure`, so test bodies can use `?`.
///
/// A body or setup can also return [`TestFailure::ignored`] to have the test reported as ignored
/// instead of passed, for example when a resource it needs is unavailable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestFailure {
    kind: FailureKind,
    message: String,
}

impl TestFailure {
    /// Creates an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assertion,
            message: message.into(),
        }
    }

    /// Creates a failure from an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }

    /// Creates a request to report the running test as ignored.
    ///
    /// The reason is logged but not written to the test's result line.
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Ignored,
            message: reason.into(),
        }
    }

    /// Returns true if this asks for the test to be reported as ignored.
    pub fn is_ignored(&self) -> bool {
        self.kind == FailureKind::Ignored
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "(non-string panic payload)".to_owned()
        };
        Self {
            kind: FailureKind::Panic,
            message,
        }
    }

    /// Returns the kind of failure.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<E: Error> From<E> for TestFailure {
    fn from(err: E) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(err) = source {
            message.push_str("\n  caused by: ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        Self::error(message)
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Assertion => write!(f, "Assertion failed: {}", self.message),
            FailureKind::Error => write!(f, "Error returned: {}", self.message),
            FailureKind::Panic => write!(f, "Panicked: {}", self.message),
            FailureKind::Ignored => write!(f, "Ignored: {}", self.message),
        }
    }
}

/// Asserts that a condition holds, returning a [`TestFailure`] from the enclosing function if it
/// does not.
#[macro_export]
macro_rules! ensure {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::std::result::Result::Err($crate::test_group::TestFailure::assertion(
                ::std::concat!("condition `", ::std::stringify!($cond), "` is false"),
            ));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::std::result::Result::Err($crate::test_group::TestFailure::assertion(
                ::std::format!($($arg)+),
            ));
        }
    };
}

/// Stops the enclosing test and reports it as ignored.
#[macro_export]
macro_rules! ignore_test {
    () => {
        return ::std::result::Result::Err($crate::test_group::TestFailure::ignored(""))
    };
    ($($arg:tt)+) => {
        return ::std::result::Result::Err($crate::test_group::TestFailure::ignored(
            ::std::format!($($arg)+),
        ))
    };
}

/// A group of tests sharing setup and teardown.
///
/// Setup and teardown run around every test in the group, possibly concurrently on several
/// threads, which is why they take `&self`.
pub trait TestGroup: Send + Sync {
    /// The name of the group, shown in group banners.
    fn name(&self) -> &str;

    /// Runs before each test in the group. Returning [`TestFailure::ignored`] skips the test and
    /// reports it as ignored.
    fn setup(&self) -> Result<(), TestFailure> {
        Ok(())
    }

    /// Runs after each test in the group, even if setup or the test failed.
    fn teardown(&self) -> Result<(), TestFailure> {
        Ok(())
    }

    /// The execution models this group's tests run under. Under any other model they are
    /// reported as ignored.
    fn applicable_models(&self) -> ExecutionModels {
        ExecutionModels::all()
    }
}

/// The body of a single test.
pub trait TestMethod: Send + Sync {
    /// Runs the test.
    fn run(&self) -> Result<(), TestFailure>;
}

impl<F> TestMethod for F
where
    F: Fn() -> Result<(), TestFailure> + Send + Sync,
{
    fn run(&self) -> Result<(), TestFailure> {
        self()
    }
}

/// A group with no setup or teardown.
#[derive(Clone, Debug)]
pub struct SimpleGroup {
    name: String,
    models: ExecutionModels,
}

impl SimpleGroup {
    /// Creates a new group that runs under every execution model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: ExecutionModels::all(),
        }
    }

    /// Restricts the execution models this group runs under.
    pub fn with_models(mut self, models: ExecutionModels) -> Self {
        self.models = models;
        self
    }
}

impl TestGroup for SimpleGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn applicable_models(&self) -> ExecutionModels {
        self.models
    }
}

/// A registered test: a name and a body belonging to a group.
#[derive(Clone)]
pub struct TestCase {
    pub(crate) name: String,
    pub(crate) body: Arc<dyn TestMethod>,
}

impl TestCase {
    /// Returns the test's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registered tests, grouped and in registration order.
#[derive(Clone, Default)]
pub struct GroupedTestCases {
    pub(crate) groups: Vec<(Arc<dyn TestGroup>, Vec<TestCase>)>,
}

impl GroupedTestCases {
    /// Creates an empty set of test cases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group, returning a handle to register its tests with.
    pub fn add_group(&mut self, group: impl TestGroup + 'static) -> GroupRegistration<'_> {
        self.add_shared_group(Arc::new(group))
    }

    /// Adds a group that is shared with the caller.
    pub fn add_shared_group(&mut self, group: Arc<dyn TestGroup>) -> GroupRegistration<'_> {
        self.groups.push((group, Vec::new()));
        let len = self.groups.len();
        GroupRegistration {
            cases: &mut self.groups[len - 1].1,
        }
    }

    /// Returns the total number of registered tests.
    pub fn test_count(&self) -> usize {
        self.groups.iter().map(|(_, cases)| cases.len()).sum()
    }

    /// Returns the number of registered groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl fmt::Debug for GroupedTestCases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.groups
                    .iter()
                    .map(|(group, cases)| (group.name(), cases)),
            )
            .finish()
    }
}

/// Registers tests into one group of a [`GroupedTestCases`].
pub struct GroupRegistration<'a> {
    cases: &'a mut Vec<TestCase>,
}

impl GroupRegistration<'_> {
    /// Registers a test whose body is a closure.
    pub fn add_test<F>(&mut self, name: impl Into<String>, body: F) -> &mut Self
    where
        F: Fn() -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.add_method(name, Arc::new(body))
    }

    /// Registers a test with an arbitrary [`TestMethod`] body.
    pub fn add_method(&mut self, name: impl Into<String>, body: Arc<dyn TestMethod>) -> &mut Self {
        self.cases.push(TestCase {
            name: name.into(),
            body,
        });
        self
    }
}
