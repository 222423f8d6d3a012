//! Configuration loading and validation for the runner.
//!
//! The telemetry pipeline itself is configured by `OTEL_BRIDGE_*` variables
//! (see [`otel_bridge::Config`]); this covers the runner's own knobs.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Prefix of the runner's environment variables.
pub const ENV_PREFIX: &str = "OTEL_RUNNER";

/// Validated runner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tracing log level, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between heartbeat metric recordings.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Upper bound on telemetry shutdown after a termination signal.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_heartbeat_interval_secs() -> u64 {
    15
}
fn default_shutdown_timeout_secs() -> u64 {
    20
}

impl Config {
    /// Load and validate configuration from `OTEL_RUNNER_*` variables.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("failed to build runner configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise runner configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("OTEL_RUNNER_HEARTBEAT_INTERVAL_SECS must be greater than zero");
        }
        if self.shutdown_timeout_secs == 0 {
            anyhow::bail!("OTEL_RUNNER_SHUTDOWN_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
