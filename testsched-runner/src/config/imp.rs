// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestThreads;
use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    ipc::framing::MIN_SLOT_SIZE,
    model::ExecutionModel,
};
use camino::Utf8Path;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, sync::LazyLock, time::Duration};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Settings for how tests are scheduled.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// The execution model to run tests under.
    pub execution_model: ExecutionModel,

    /// The number of worker threads or processes.
    pub test_threads: TestThreads,

    /// An optional filter on test names.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Settings for cross-process result delivery.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IpcConfig {
    /// The number of slots in the shared result channel.
    pub queue_capacity: usize,

    /// The size of each slot in bytes, header included.
    pub slot_size: usize,

    /// How long to wait for a result before checking on workers.
    #[serde(with = "humantime_serde")]
    pub receive_timeout: Duration,

    /// How often to check whether worker processes are alive.
    #[serde(with = "humantime_serde")]
    pub liveness_interval: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            slot_size: 2048,
            receive_timeout: Duration::from_millis(100),
            liveness_interval: Duration::from_millis(50),
        }
    }
}

/// Overall configuration for testsched.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    runner: RunnerConfig,
    ipc: IpcConfig,
}

impl SchedulerConfig {
    /// The default configuration, which user configuration is layered on top of.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the configuration from the default config and an optional user config file.
    ///
    /// Unknown keys are reported as warnings.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }

        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file.map(Utf8Path::to_owned), kind))?;

        if !unknown.is_empty() {
            let file = config_file.map_or("<default>", Utf8Path::as_str);
            let keys = unknown.into_iter().collect::<Vec<_>>().join(", ");
            warn!("in config file {file}, ignoring unknown configuration keys: {keys}");
        }

        config
            .validate()
            .map_err(|kind| ConfigParseError::new(config_file.map(Utf8Path::to_owned), kind))?;
        Ok(config)
    }

    /// Returns the runner settings.
    pub fn runner(&self) -> &RunnerConfig {
        &self.runner
    }

    /// Returns the runner settings, for overriding individual values.
    pub fn runner_mut(&mut self) -> &mut RunnerConfig {
        &mut self.runner
    }

    /// Returns the IPC settings.
    pub fn ipc(&self) -> &IpcConfig {
        &self.ipc
    }

    /// Returns the IPC settings, for overriding individual values.
    pub fn ipc_mut(&mut self) -> &mut IpcConfig {
        &mut self.ipc
    }

    fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        if self.ipc.queue_capacity == 0 {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "ipc.queue-capacity",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.ipc.slot_size < MIN_SLOT_SIZE {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "ipc.slot-size",
                message: format!("must be at least {MIN_SLOT_SIZE} bytes"),
            });
        }
        if self.ipc.receive_timeout.is_zero() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "ipc.receive-timeout",
                message: "must be non-zero".to_owned(),
            });
        }
        Ok(())
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // serde_path_to_error already reports the key, so drop it from the config error.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((config, ignored))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig {
                execution_model: ExecutionModel::PersistentProcessPool,
                test_threads: TestThreads::NumCpus,
                filter: None,
            },
            ipc: IpcConfig::default(),
        }
    }
}
