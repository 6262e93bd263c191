// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testsched.

use crate::model::ExecutionModel;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the scheduler config.
#[derive(Debug, Error)]
#[error(
    "failed to parse testsched config{}",
    .config_file.as_ref().map(|file| format!(" at `{file}`")).unwrap_or_default()
)]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the config file that failed to parse, if the error was attributed to one.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the layered config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A value was well-formed but out of range.
    #[error("invalid value for `{key}`: {message}")]
    InvalidValue {
        /// The config key.
        key: &'static str,

        /// A description of what is wrong.
        message: String,
    },
}

/// Error returned while parsing a
/// [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test-threads: {input}")]
pub struct TestThreadsParseError {
    /// The input that failed to parse.
    pub input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing an [`ExecutionModel`] from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for execution model: {input}\n(known values: {})",
    ExecutionModel::variants().join(", "),
)]
pub struct ExecutionModelParseError {
    input: String,
}

impl ExecutionModelParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// A glob token in a name filter could not be compiled.
#[derive(Clone, Debug, Error)]
#[error("invalid test name filter token `{token}`")]
pub struct NameFilterParseError {
    token: String,
    #[source]
    err: regex::Error,
}

impl NameFilterParseError {
    pub(crate) fn new(token: impl Into<String>, err: regex::Error) -> Self {
        Self {
            token: token.into(),
            err,
        }
    }
}

/// An error that occurred while building a [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// The name filter could not be parsed.
    #[error("failed to build test runner")]
    NameFilter(#[from] NameFilterParseError),
}

/// A failure to control a child process.
///
/// This is distinct from a child simply not having terminated yet, which is reported as `None` by
/// the non-blocking wait operations.
#[cfg(unix)]
#[derive(Debug, Error)]
pub enum ProcessControlError {
    /// `fork` failed.
    #[error("failed to spawn child process")]
    Spawn(#[source] nix::errno::Errno),

    /// Waiting on a child failed.
    #[error("failed to wait on child process {pid}")]
    Wait {
        /// The process ID being waited on.
        pid: nix::unistd::Pid,

        /// The underlying error.
        #[source]
        err: nix::errno::Errno,
    },

    /// Sending a kill signal to a child failed.
    #[error("failed to terminate child process {pid}")]
    Kill {
        /// The process ID being terminated.
        pid: nix::unistd::Pid,

        /// The underlying error.
        #[source]
        err: nix::errno::Errno,
    },
}

/// An error mapping or initializing a segment of memory shared across processes.
#[derive(Debug, Error)]
#[error("failed to set up shared memory: {operation}")]
pub struct SharedMemoryError {
    operation: &'static str,
    #[source]
    err: io::Error,
}

impl SharedMemoryError {
    pub(crate) fn new(operation: &'static str, err: io::Error) -> Self {
        Self { operation, err }
    }

    #[cfg(unix)]
    pub(crate) fn from_code(operation: &'static str, code: libc::c_int) -> Self {
        Self::new(operation, io::Error::from_raw_os_error(code))
    }
}

/// An error sending or receiving a message over a shared result channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// A chunk header failed validation.
    #[error("malformed chunk header: {reason}")]
    MalformedHeader {
        /// Why the header was rejected.
        reason: MalformedHeaderReason,
    },

    /// A partially received message was abandoned.
    #[error(
        "abandoned partial message with sequence number {sequence_number} \
         ({received}/{chunk_count} chunks received)"
    )]
    Abandoned {
        /// The sequence number of the abandoned message.
        sequence_number: u32,

        /// Chunks received so far.
        received: u32,

        /// Chunks expected.
        chunk_count: u32,
    },

    /// The message payload could not be serialized.
    #[error("failed to serialize message payload")]
    Serialize(#[source] serde_json::Error),

    /// The reassembled payload could not be deserialized.
    #[error("failed to deserialize message payload (sequence number {sequence_number})")]
    Deserialize {
        /// The sequence number of the message.
        sequence_number: u32,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// A lock or condition primitive in the shared segment failed.
    #[error("shared channel synchronization failed: {operation}")]
    Sync {
        /// The primitive operation that failed.
        operation: &'static str,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}

impl ChannelError {
    #[cfg(unix)]
    pub(crate) fn sync(operation: &'static str, code: libc::c_int) -> Self {
        Self::Sync {
            operation,
            err: io::Error::from_raw_os_error(code),
        }
    }

    /// Returns true if this error means the channel itself is broken, rather than a single message
    /// being lost.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Sync { .. } | Self::Serialize(_))
    }
}

/// The reason a chunk header was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum MalformedHeaderReason {
    /// The entry was shorter than a header.
    Truncated {
        /// The entry length.
        len: usize,
    },

    /// The chunk count was zero.
    ZeroChunkCount,

    /// The chunk number was not less than the chunk count.
    ChunkNumberOutOfRange {
        /// The chunk number.
        chunk_number: u32,

        /// The chunk count.
        chunk_count: u32,
    },

    /// The total byte count doesn't fit the chunk count.
    TotalBytesMismatch {
        /// The declared total bytes.
        total_bytes: u32,

        /// The declared chunk count.
        chunk_count: u32,
    },

    /// The payload length of this chunk doesn't match what the header implies.
    PayloadLengthMismatch {
        /// Expected payload length.
        expected: usize,

        /// Actual payload length.
        actual: usize,
    },

    /// A chunk disagreed with earlier chunks of the same sequence number.
    InconsistentChunk {
        /// The sequence number.
        sequence_number: u32,
    },
}

impl fmt::Display for MalformedHeaderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "entry of {len} bytes is shorter than a header"),
            Self::ZeroChunkCount => write!(f, "chunk count is zero"),
            Self::ChunkNumberOutOfRange {
                chunk_number,
                chunk_count,
            } => write!(f, "chunk number {chunk_number} out of range for {chunk_count} chunks"),
            Self::TotalBytesMismatch {
                total_bytes,
                chunk_count,
            } => write!(
                f,
                "total bytes {total_bytes} inconsistent with chunk count {chunk_count}"
            ),
            Self::PayloadLengthMismatch { expected, actual } => write!(
                f,
                "chunk payload is {actual} bytes, expected {expected}"
            ),
            Self::InconsistentChunk { sequence_number } => write!(
                f,
                "chunk disagrees with earlier chunks of sequence number {sequence_number}"
            ),
        }
    }
}

/// A fatal error that aborted a test run.
///
/// Anything attributable to a single test is reported as that test's outcome instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// Spawning, waiting on or terminating a worker process failed.
    #[cfg(unix)]
    #[error("worker process control failed")]
    ProcessControl(#[from] ProcessControlError),

    /// Shared memory could not be set up.
    #[error(transparent)]
    SharedMemory(#[from] SharedMemoryError),

    /// The shared result channel is broken.
    #[error("result channel failed")]
    Channel(#[source] ChannelError),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    ThreadSpawn(#[source] io::Error),

    /// Writing to the output sink failed.
    #[error("failed to write test output")]
    Write(#[source] io::Error),
}
