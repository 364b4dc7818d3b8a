//! Unit tests for configuration validation and projection.

use std::time::Duration;

use bulwark::config::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_MAX_ATTEMPTS, DEFAULT_POLL_TIMEOUT_SECS,
};
use bulwark::test_support::ScriptedStatuses;
use bulwark::{ConfigError, ErrorPolicy, PollError, ProtectionConfig, StatusSets};
use rstest::*;

#[fixture]
fn valid_config() -> ProtectionConfig {
    ProtectionConfig {
        poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        poll_max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        max_concurrent_nodes: 1,
    }
}

#[rstest]
fn defaults_validate(valid_config: ProtectionConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each field.
#[rstest]
#[case::interval(|cfg: &mut ProtectionConfig| cfg.poll_interval_ms = 0, "BULWARK_POLL_INTERVAL_MS", "poll_interval_ms")]
#[case::attempts(|cfg: &mut ProtectionConfig| cfg.poll_max_attempts = 0, "BULWARK_POLL_MAX_ATTEMPTS", "poll_max_attempts")]
#[case::timeout(|cfg: &mut ProtectionConfig| cfg.poll_timeout_secs = 0, "BULWARK_POLL_TIMEOUT_SECS", "poll_timeout_secs")]
#[case::concurrency(|cfg: &mut ProtectionConfig| cfg.max_concurrent_nodes = 0, "BULWARK_MAX_CONCURRENT_NODES", "max_concurrent_nodes")]
fn validation_errors_are_actionable(
    mut valid_config: ProtectionConfig,
    #[case] mutate: fn(&mut ProtectionConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);

    let error = valid_config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("bulwark.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn status_poller_uses_configured_interval(valid_config: ProtectionConfig) {
    let config = ProtectionConfig {
        poll_interval_ms: 250,
        ..valid_config
    };
    assert_eq!(config.status_poller().interval(), Duration::from_millis(250));
}

#[rstest]
#[tokio::test]
async fn status_poller_honours_attempt_budget(valid_config: ProtectionConfig) {
    let config = ProtectionConfig {
        poll_interval_ms: 1,
        poll_max_attempts: 3,
        ..valid_config
    };
    let statuses = ScriptedStatuses::new(["creating"]);
    let sets = StatusSets::success(["available"]).ignore(["creating"]);

    let err = config
        .status_poller()
        .poll(|| statuses.fetch(), &sets)
        .await
        .expect_err("poll should time out");

    assert_eq!(
        err,
        PollError::Timeout {
            attempts: 3,
            last_status: Some(String::from("creating")),
        }
    );
    assert_eq!(statuses.fetches(), 3);
}

#[rstest]
fn executor_is_fail_fast(valid_config: ProtectionConfig) {
    assert_eq!(valid_config.executor().policy(), ErrorPolicy::FailFast);
}

#[test]
fn config_error_wraps_loader_messages() {
    let error = ConfigError::Parse(String::from("bad toml"));
    assert_eq!(error.to_string(), "configuration parsing failed: bad toml");
}
