//! Telemetry configuration.
//!
//! Values are read from `OTEL_BRIDGE_*` environment variables. The collector
//! (customer-managed) routes OTLP on to whatever backend is in use; nothing here
//! is backend specific.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use crate::error::TelemetryError;

/// Prefix of every environment variable read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "OTEL_BRIDGE";

/// Service name reported when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "otel-bridge";

/// OTLP transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// OTLP/gRPC, usually on port 4317.
    #[default]
    Grpc,
    /// OTLP/HTTP with protobuf bodies, usually on port 4318.
    Http,
}

impl Protocol {
    /// Parse a protocol name. Anything other than HTTP selects gRPC.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "http/protobuf" => Protocol::Http,
            _ => Protocol::Grpc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }
}

/// Immutable telemetry settings, copied into the manager on start.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Master switch (`OTEL_BRIDGE_ENABLED`).
    pub enabled: bool,
    /// Collector address, e.g. `localhost:4317` (`OTEL_BRIDGE_ENDPOINT`).
    pub endpoint: String,
    /// Transport (`OTEL_BRIDGE_PROTOCOL`).
    pub protocol: Protocol,
    /// Plaintext transport, no TLS (`OTEL_BRIDGE_INSECURE`).
    pub insecure: bool,
    /// Ship log records (`OTEL_BRIDGE_EXPORT_LOGS`).
    pub export_logs: bool,
    /// Ship metrics (`OTEL_BRIDGE_EXPORT_METRICS`).
    pub export_metrics: bool,
    /// `service.name` resource attribute (`OTEL_BRIDGE_SERVICE_NAME`).
    pub service_name: String,
    /// `service.version` fallback (`OTEL_BRIDGE_SERVICE_VERSION`).
    pub service_version: String,
    /// `deployment.environment.name` (`OTEL_BRIDGE_ENVIRONMENT`).
    pub environment: String,
    /// Extra transport headers, e.g. auth tokens (`OTEL_BRIDGE_HEADERS`).
    pub headers: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            protocol: Protocol::default(),
            insecure: default_true(),
            export_logs: default_true(),
            export_metrics: default_true(),
            service_name: default_service_name(),
            service_version: String::new(),
            environment: String::new(),
            headers: HashMap::new(),
        }
    }
}

/// Raw environment shape before protocol and header parsing.
#[derive(Debug, Deserialize)]
struct EnvConfig {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default = "default_true")]
    insecure: bool,
    #[serde(default = "default_true")]
    export_logs: bool,
    #[serde(default = "default_true")]
    export_metrics: bool,
    #[serde(default = "default_service_name")]
    service_name: String,
    #[serde(default)]
    service_version: String,
    #[serde(default)]
    environment: String,
    #[serde(default)]
    headers: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.into()
}

impl Config {
    /// Load and validate configuration from `OTEL_BRIDGE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed, if `OTEL_BRIDGE_HEADERS`
    /// is malformed, or if telemetry is enabled without an endpoint.
    pub fn from_env() -> Result<Self, TelemetryError> {
        let raw: EnvConfig = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        let cfg = Self::from_raw(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_raw(raw: EnvConfig) -> Result<Self, TelemetryError> {
        let protocol = match raw.protocol.as_deref() {
            None | Some("") => Protocol::default(),
            Some(value) => {
                let parsed = Protocol::parse(value);
                if parsed == Protocol::Grpc && !value.trim().eq_ignore_ascii_case("grpc") {
                    warn!(protocol = %value, "unrecognised OTLP protocol; using grpc");
                }
                parsed
            }
        };
        let headers = match raw.headers.as_deref() {
            Some(list) => parse_headers(list)?,
            None => HashMap::new(),
        };

        Ok(Self {
            enabled: raw.enabled,
            endpoint: raw.endpoint.trim().to_owned(),
            protocol,
            insecure: raw.insecure,
            export_logs: raw.export_logs,
            export_metrics: raw.export_metrics,
            service_name: raw.service_name,
            service_version: raw.service_version,
            environment: raw.environment,
            headers,
        })
    }

    /// Check cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::MissingEndpoint`] when enabled without an endpoint.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.enabled && self.endpoint.trim().is_empty() {
            return Err(TelemetryError::MissingEndpoint);
        }
        Ok(())
    }
}

/// Parse `key=value,key2=value2` into a header map.
///
/// Surrounding whitespace is trimmed and empty pairs are skipped.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidHeader`] for a pair without `=` or with an
/// empty key.
pub fn parse_headers(list: &str) -> Result<HashMap<String, String>, TelemetryError> {
    let mut headers = HashMap::new();
    for pair in list.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            return Err(TelemetryError::InvalidHeader {
                name: pair.to_owned(),
                reason: "expected key=value".into(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(TelemetryError::InvalidHeader {
                name: pair.to_owned(),
                reason: "empty header name".into(),
            });
        }
        headers.insert(key.to_owned(), value.trim().to_owned());
    }
    Ok(headers)
}
