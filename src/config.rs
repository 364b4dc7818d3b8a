//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::driver::GraphExecutor;
use crate::operation::StatusPoller;

/// Default pause between status checks, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;
/// Default number of status checks before a poll times out.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 240;
/// Default wall-clock budget of a single poll, in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 3_600;

/// Runtime settings for protection flows, merged from defaults,
/// configuration files, environment variables and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BULWARK",
    discovery(
        app_name = "bulwark",
        env_var = "BULWARK_CONFIG_PATH",
        config_file_name = "bulwark.toml",
        dotfile_name = ".bulwark.toml",
        project_file_name = "bulwark.toml"
    )
)]
pub struct ProtectionConfig {
    /// Pause between backend status checks, in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
    /// Status checks allowed before a poll times out.
    #[ortho_config(default = DEFAULT_POLL_MAX_ATTEMPTS)]
    pub poll_max_attempts: u32,
    /// Wall-clock budget of a single poll, in seconds.
    #[ortho_config(default = DEFAULT_POLL_TIMEOUT_SECS)]
    pub poll_timeout_secs: u64,
    /// Independent graph nodes allowed to run at once.
    #[ortho_config(default = 1)]
    pub max_concurrent_nodes: usize,
}

impl ProtectionConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bulwark")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects zero values, naming the environment variable and file key
    /// that set them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for the first zero field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_positive(self.poll_interval_ms, "poll_interval_ms")?;
        Self::require_positive(u64::from(self.poll_max_attempts), "poll_max_attempts")?;
        Self::require_positive(self.poll_timeout_secs, "poll_timeout_secs")?;
        Self::require_positive(
            u64::try_from(self.max_concurrent_nodes).unwrap_or(u64::MAX),
            "max_concurrent_nodes",
        )?;
        Ok(())
    }

    fn require_positive(value: u64, field: &str) -> Result<(), ConfigError> {
        if value > 0 {
            return Ok(());
        }
        Err(ConfigError::MissingField(format!(
            "{field} must be greater than zero: set BULWARK_{} or add {field} to bulwark.toml",
            field.to_uppercase()
        )))
    }

    /// Builds the status poller used by plugin operations.
    #[must_use]
    pub const fn status_poller(&self) -> StatusPoller {
        StatusPoller::new(Duration::from_millis(self.poll_interval_ms))
            .max_attempts(self.poll_max_attempts)
            .timeout(Duration::from_secs(self.poll_timeout_secs))
    }

    /// Builds a fail-fast executor honouring the concurrency limit.
    #[must_use]
    pub fn executor(&self) -> GraphExecutor {
        GraphExecutor::new().with_max_concurrency(self.max_concurrent_nodes)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a configuration field is missing or unusable.
    #[error("invalid configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
