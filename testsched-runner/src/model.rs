// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution models: the concurrency approach used for a batch of tests.

use crate::errors::ExecutionModelParseError;
use bitflags::bitflags;
use serde::{Deserialize, de::Visitor};
use std::{fmt, str::FromStr};

/// The execution model (strategy) used to run a batch of tests.
///
/// Each model corresponds to one bit in [`ExecutionModels`], which test groups use to declare the
/// models they can run under.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionModel {
    /// Run every test on the calling thread, in registration order.
    ///
    /// A test that crashes the process takes the whole run down with it.
    Sequential,

    /// Run tests on a pool of worker threads in this process.
    ThreadPool,

    /// Run tests in a pool of long-lived worker processes, respawning any that crash.
    PersistentProcessPool,

    /// Run every test in a fresh, single-shot process.
    ProcessPerTest,
}

impl ExecutionModel {
    /// All execution models, in bit order.
    pub const ALL: [Self; 4] = [
        Self::Sequential,
        Self::ThreadPool,
        Self::PersistentProcessPool,
        Self::ProcessPerTest,
    ];

    /// Returns the bit corresponding to this model.
    pub fn bit(self) -> ExecutionModels {
        match self {
            Self::Sequential => ExecutionModels::SEQUENTIAL,
            Self::ThreadPool => ExecutionModels::THREAD_POOL,
            Self::PersistentProcessPool => ExecutionModels::PROCESS_POOL,
            Self::ProcessPerTest => ExecutionModels::PROCESS_PER_TEST,
        }
    }

    /// Returns true if tests run in child processes under this model.
    pub fn is_multi_process(self) -> bool {
        matches!(self, Self::PersistentProcessPool | Self::ProcessPerTest)
    }

    /// Returns the string values accepted by [`FromStr`].
    pub fn variants() -> &'static [&'static str] {
        &["sequential", "thread-pool", "process-pool", "process-per-test"]
    }

    /// Returns the kebab-case name of this model.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::ThreadPool => "thread-pool",
            Self::PersistentProcessPool => "process-pool",
            Self::ProcessPerTest => "process-per-test",
        }
    }
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionModel {
    type Err = ExecutionModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the legacy CamelCase names as well, ignoring case.
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        let model = match normalized.as_str() {
            "sequential" | "singlethreaded" => Self::Sequential,
            "threadpool" | "workerthreads" => Self::ThreadPool,
            "processpool" | "persistentprocesspool" | "workerprocesses" => {
                Self::PersistentProcessPool
            }
            "processpertest" => Self::ProcessPerTest,
            _ => return Err(ExecutionModelParseError::new(s)),
        };
        Ok(model)
    }
}

impl<'de> Deserialize<'de> for ExecutionModel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl Visitor<'_> for V {
            type Value = ExecutionModel;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "one of: {}",
                    ExecutionModel::variants().join(", ")
                )
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(|_| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Str(v), &self)
                })
            }
        }

        deserializer.deserialize_str(V)
    }
}

bitflags! {
    /// A set of execution models.
    ///
    /// Test groups return this from
    /// [`TestGroup::applicable_models`](crate::test_group::TestGroup::applicable_models); a test
    /// whose group excludes the active model is reported as ignored without being run.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct ExecutionModels: u32 {
        /// [`ExecutionModel::Sequential`].
        const SEQUENTIAL = 1;
        /// [`ExecutionModel::ThreadPool`].
        const THREAD_POOL = 2;
        /// [`ExecutionModel::PersistentProcessPool`].
        const PROCESS_POOL = 4;
        /// [`ExecutionModel::ProcessPerTest`].
        const PROCESS_PER_TEST = 8;
        /// Models that run tests inside the scheduler's own process.
        const IN_PROCESS = Self::SEQUENTIAL.bits() | Self::THREAD_POOL.bits();
        /// Models that run tests in child processes.
        const MULTI_PROCESS = Self::PROCESS_POOL.bits() | Self::PROCESS_PER_TEST.bits();
    }
}

impl ExecutionModels {
    /// Returns true if `model` is a member of this set.
    pub fn includes(self, model: ExecutionModel) -> bool {
        self.contains(model.bit())
    }
}

impl Default for ExecutionModels {
    fn default() -> Self {
        Self::all()
    }
}

impl From<ExecutionModel> for ExecutionModels {
    fn from(model: ExecutionModel) -> Self {
        model.bit()
    }
}
