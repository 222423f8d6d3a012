//! OTLP transport construction.
//!
//! [`ExporterFactory`] is the seam between the [`Manager`](crate::Manager) and
//! the network: production uses [`OtlpExporterFactory`], tests inject their
//! own. Both signals honour the configured protocol, TLS mode and headers.
//!
//! # Endpoints
//!
//! The configured endpoint is a bare `host:port`. The scheme is `http` when
//! `insecure` is set and `https` otherwise; an endpoint that already carries a
//! scheme is used as given. OTLP/HTTP appends the per-signal path
//! (`/v1/logs`, `/v1/metrics`).

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use opentelemetry_otlp::tonic_types::metadata::MetadataMap;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::PeriodicReader;
use opentelemetry_sdk::Resource;

use crate::config::{Config, Protocol};
use crate::error::TelemetryError;
use crate::logs::LogEmitter;
use crate::metrics::{MetricsBridge, DEFAULT_METRICS_EXPORT_INTERVAL};

/// Timeout for one log batch export.
pub const LOG_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for one metrics export.
pub const METRIC_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

const LOGS_PATH: &str = "/v1/logs";
const METRICS_PATH: &str = "/v1/metrics";

/// Builds the per-signal pipelines for a [`Manager`](crate::Manager).
#[cfg_attr(test, mockall::automock)]
pub trait ExporterFactory: Send + Sync {
    /// Build a log exporter for `config` and wrap it in a [`LogEmitter`].
    fn log_emitter(&self, config: &Config, resource: &Resource) -> Result<LogEmitter, TelemetryError>;

    /// Build a metric reader for `config` and wrap it in a [`MetricsBridge`].
    fn metrics_bridge(
        &self,
        config: &Config,
        resource: &Resource,
    ) -> Result<MetricsBridge, TelemetryError>;
}

/// [`ExporterFactory`] speaking OTLP to a collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpExporterFactory;

impl ExporterFactory for OtlpExporterFactory {
    fn log_emitter(&self, config: &Config, resource: &Resource) -> Result<LogEmitter, TelemetryError> {
        let exporter = build_log_exporter(config)?;
        Ok(LogEmitter::from_exporter(exporter, Some(resource.clone())))
    }

    fn metrics_bridge(
        &self,
        config: &Config,
        resource: &Resource,
    ) -> Result<MetricsBridge, TelemetryError> {
        let reader = build_metric_reader(config)?;
        Ok(MetricsBridge::from_reader(reader, Some(resource.clone())))
    }
}

/// Build the OTLP log exporter for `config`.
///
/// # Errors
///
/// Returns an error for invalid headers, for gRPC outside a Tokio runtime, or
/// when the exporter rejects its settings.
pub fn build_log_exporter(config: &Config) -> Result<opentelemetry_otlp::LogExporter, TelemetryError> {
    const SIGNAL: &str = "log";
    let builder = opentelemetry_otlp::LogExporter::builder();
    match config.protocol {
        Protocol::Http => builder
            .with_http()
            .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
            .with_endpoint(signal_url(config, LOGS_PATH))
            .with_timeout(LOG_EXPORT_TIMEOUT)
            .with_headers(http_headers(&config.headers)?)
            .build()
            .map_err(|e| build_error(SIGNAL, config.protocol, e)),
        Protocol::Grpc => {
            require_runtime(SIGNAL)?;
            builder
                .with_tonic()
                .with_endpoint(base_url(config))
                .with_timeout(LOG_EXPORT_TIMEOUT)
                .with_metadata(grpc_metadata(&config.headers)?)
                .build()
                .map_err(|e| build_error(SIGNAL, config.protocol, e))
        }
    }
}

/// Build a periodic reader over the OTLP metric exporter for `config`,
/// exporting every [`DEFAULT_METRICS_EXPORT_INTERVAL`].
///
/// # Errors
///
/// Same conditions as [`build_log_exporter`].
pub fn build_metric_reader(config: &Config) -> Result<impl MetricReader, TelemetryError> {
    const SIGNAL: &str = "metric";
    let builder = opentelemetry_otlp::MetricExporter::builder();
    let exporter = match config.protocol {
        Protocol::Http => builder
            .with_http()
            .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
            .with_endpoint(signal_url(config, METRICS_PATH))
            .with_timeout(METRIC_EXPORT_TIMEOUT)
            .with_headers(http_headers(&config.headers)?)
            .build()
            .map_err(|e| build_error(SIGNAL, config.protocol, e))?,
        Protocol::Grpc => {
            require_runtime(SIGNAL)?;
            builder
                .with_tonic()
                .with_endpoint(base_url(config))
                .with_timeout(METRIC_EXPORT_TIMEOUT)
                .with_metadata(grpc_metadata(&config.headers)?)
                .build()
                .map_err(|e| build_error(SIGNAL, config.protocol, e))?
        }
    };

    Ok(PeriodicReader::builder(exporter)
        .with_interval(DEFAULT_METRICS_EXPORT_INTERVAL)
        .build())
}

fn build_error(signal: &'static str, protocol: Protocol, e: impl Display) -> TelemetryError {
    TelemetryError::Exporter {
        signal,
        protocol: protocol.as_str(),
        reason: e.to_string(),
    }
}

// The tonic channel spawns its worker onto the ambient runtime.
fn require_runtime(signal: &'static str) -> Result<(), TelemetryError> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| TelemetryError::NoRuntime { signal })
}

/// `scheme://host:port` for the configured endpoint.
fn base_url(config: &Config) -> String {
    let endpoint = config.endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_owned()
    } else {
        let scheme = if config.insecure { "http" } else { "https" };
        format!("{scheme}://{endpoint}")
    }
}

/// Full OTLP/HTTP URL for one signal.
fn signal_url(config: &Config, path: &str) -> String {
    let base = base_url(config);
    if base.ends_with(path) {
        base
    } else {
        format!("{base}{path}")
    }
}

fn validate_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TelemetryError> {
    let invalid = |reason: String| TelemetryError::InvalidHeader {
        name: name.to_owned(),
        reason,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((header_name, header_value))
}

fn http_headers(headers: &HashMap<String, String>) -> Result<HashMap<String, String>, TelemetryError> {
    for (name, value) in headers {
        validate_header(name, value)?;
    }
    Ok(headers.clone())
}

fn grpc_metadata(headers: &HashMap<String, String>) -> Result<MetadataMap, TelemetryError> {
    let mut map = http::HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let (name, value) = validate_header(name, value)?;
        map.insert(name, value);
    }
    Ok(MetadataMap::from_headers(map))
}
