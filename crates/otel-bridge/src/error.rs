//! Error types for the telemetry pipeline.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkError;
use thiserror::Error;

/// Boxed error returned by auxiliary shutdown callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fixed text at the start of every [`EmitError`] message.
pub const EMIT_FAULT_MARKER: &str = "otel log hook panic";

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

/// Errors raised while configuring or building the pipeline.
///
/// Only [`TelemetryError::MissingEndpoint`] and [`TelemetryError::Config`] are
/// returned from [`Manager::start`](crate::Manager::start); the other variants
/// are logged there and the affected signal is left disabled.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Telemetry is enabled but no collector endpoint was configured.
    #[error("telemetry is enabled but no OTLP endpoint is configured (OTEL_BRIDGE_ENDPOINT)")]
    MissingEndpoint,

    /// The configuration source could not be read or deserialised.
    #[error("invalid telemetry configuration: {0}")]
    Config(String),

    /// An OTLP header name or value is not valid on the wire.
    #[error("invalid OTLP header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// A gRPC transport was requested outside of a Tokio runtime.
    #[error("OTLP gRPC {signal} exporter requires a running Tokio runtime")]
    NoRuntime { signal: &'static str },

    /// The OTLP exporter for a signal could not be built.
    #[error("failed to create OTLP {protocol} {signal} exporter: {reason}")]
    Exporter {
        signal: &'static str,
        protocol: &'static str,
        reason: String,
    },
}

impl From<config::ConfigError> for TelemetryError {
    fn from(e: config::ConfigError) -> Self {
        TelemetryError::Config(e.to_string())
    }
}

/// Fault raised while emitting a single log record.
///
/// Returned instead of unwinding into the host application.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The emitter has no logger to emit through.
    #[error("otel log hook panic: logger is not initialised")]
    Uninitialised,

    /// Emission panicked; the payload is carried as text.
    #[error("otel log hook panic: {0}")]
    Panicked(String),
}

/// Failure to close or shut down a single provider.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The SDK reported a failure (including "already shut down").
    #[error(transparent)]
    Sdk(#[from] OTelSdkError),

    /// The deadline passed before the provider finished shutting down.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The helper thread running the shutdown could not be used.
    #[error("shutdown worker failed: {0}")]
    Worker(String),
}

/// One failed step of an ordered teardown.
#[derive(Debug, Error)]
pub enum ShutdownFailure {
    #[error("log hook shutdown: {0}")]
    LogHook(#[source] ComponentError),

    #[error("metrics bridge shutdown: {0}")]
    MetricsBridge(#[source] ComponentError),

    #[error("exporter shutdown ({name}): {source}")]
    Callback {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// Every failure collected during one [`Manager::shutdown`](crate::Manager::shutdown).
#[derive(Debug)]
pub struct ShutdownError {
    failures: Vec<ShutdownFailure>,
}

impl ShutdownError {
    /// Returns `None` when no step failed.
    pub(crate) fn from_failures(failures: Vec<ShutdownFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    /// The individual failures, in teardown order.
    pub fn failures(&self) -> &[ShutdownFailure] {
        &self.failures
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OTEL shutdown errors: [")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        f.write_str("]")
    }
}

impl std::error::Error for ShutdownError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_errors_carry_marker() {
        assert!(EmitError::Uninitialised.to_string().starts_with(EMIT_FAULT_MARKER));
        assert!(EmitError::Panicked("boom".into())
            .to_string()
            .starts_with(EMIT_FAULT_MARKER));
    }

    #[test]
    fn shutdown_error_joins_every_failure() {
        let err = ShutdownError::from_failures(vec![
            ShutdownFailure::MetricsBridge(ComponentError::DeadlineExceeded(Duration::ZERO)),
            ShutdownFailure::Callback {
                name: "flush".into(),
                source: "exporter connection reset".into(),
            },
        ])
        .expect("two failures");
        let text = err.to_string();
        assert!(text.contains("metrics bridge shutdown"));
        assert!(text.contains("exporter connection reset"));
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn no_failures_is_no_error() {
        assert!(ShutdownError::from_failures(Vec::new()).is_none());
    }

    #[test]
    fn missing_endpoint_names_variable() {
        assert!(TelemetryError::MissingEndpoint
            .to_string()
            .contains("OTEL_BRIDGE_ENDPOINT"));
    }
}
