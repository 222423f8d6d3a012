//! Tracing subscriber for the runner.
//!
//! Structured JSON logs go to stdout; every event that passes the filter is
//! also handed to the OTLP bridge through the [`LogSink`] layer, which drops it
//! while no log pipeline is attached.

use anyhow::{Context, Result};
use otel_bridge::LogSink;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init(log_level: &str, sink: &LogSink) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(sink.layer())
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(())
}
