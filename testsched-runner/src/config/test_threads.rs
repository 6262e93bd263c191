// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{MAX_CONCURRENCY, get_num_cpus},
    errors::TestThreadsParseError,
};
use serde::{
    Deserialize,
    de::{self, Unexpected, Visitor},
};
use std::{fmt, str::FromStr};
use tracing::warn;

/// Type for the test-threads config key: the number of workers to run tests on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestThreads {
    /// Run tests with a specified number of workers.
    Count(usize),

    /// Run tests with a number of workers equal to the logical CPU count.
    NumCpus,
}

impl TestThreads {
    /// Gets the actual number of workers computed at runtime, capped at [`MAX_CONCURRENCY`].
    pub fn compute(self) -> usize {
        let (count, source) = match self {
            Self::Count(threads) => (threads, "requested worker count"),
            Self::NumCpus => (get_num_cpus(), "logical CPU count"),
        };
        if count > MAX_CONCURRENCY {
            warn!(
                "{source} ({count}) exceeds the maximum supported concurrency level, \
                 using {MAX_CONCURRENCY} workers"
            );
            return MAX_CONCURRENCY;
        }
        count.max(1)
    }
}

impl TestThreads {
    /// Interprets a signed worker count: positive values are used as-is and negative ones are
    /// subtracted from the logical CPU count, leaving at least one worker.
    fn from_signed(count: i64) -> Option<Self> {
        match count {
            0 => None,
            count if count < 0 => {
                let cpus = i64::try_from(get_num_cpus()).unwrap_or(i64::MAX);
                let remaining = cpus.saturating_add(count).max(1);
                Some(Self::Count(usize::try_from(remaining).unwrap_or(1)))
            }
            count => Some(Self::Count(usize::try_from(count).unwrap_or(usize::MAX))),
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }
        let count: i64 = s
            .parse()
            .map_err(|err| TestThreadsParseError::new(format!("{s} ({err})")))?;
        Self::from_signed(count)
            .ok_or_else(|| TestThreadsParseError::new("0 (at least one worker is required)"))
    }
}

impl fmt::Display for TestThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => f.write_str("num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for TestThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CountVisitor;

        impl Visitor<'_> for CountVisitor {
            type Value = TestThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a non-zero integer or \"num-cpus\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    "num-cpus" => Ok(TestThreads::NumCpus),
                    _ => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }

            // TOML integers are i64.
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                TestThreads::from_signed(v)
                    .ok_or_else(|| E::invalid_value(Unexpected::Signed(v), &self))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                self.visit_i64(i64::try_from(v).unwrap_or(i64::MAX))
            }
        }

        deserializer.deserialize_any(CountVisitor)
    }
}
