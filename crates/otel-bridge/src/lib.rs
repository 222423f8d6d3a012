//! Bridge from an application's `tracing` logs and metrics to an OpenTelemetry
//! collector over OTLP.
//!
//! # Components
//!
//! - [`logs::LogEmitter`]: turns one log entry into an OTLP log record, with a
//!   shared label map merged into every record and a fault boundary around
//!   emission.
//! - [`logs::LogSink`] / [`logs::OtelLogLayer`]: the `tracing` layer that feeds
//!   the active emitter.
//! - [`metrics::MetricsBridge`]: owns the meter provider handed out for
//!   instrument creation.
//! - [`manager::Manager`]: start / replace / shutdown of the whole pipeline
//!   under one mutex, with ordered teardown.
//!
//! The crate stops at the OTLP boundary: it is backend-agnostic and never
//! exports spans.

pub mod config;
pub mod deadline;
pub mod error;
pub mod exporter;
pub mod logs;
pub mod manager;
pub mod metrics;
pub mod resource;

pub use config::{Config, Protocol};
pub use deadline::Deadline;
pub use error::{ComponentError, EmitError, ShutdownError, ShutdownFailure, TelemetryError};
pub use exporter::{ExporterFactory, OtlpExporterFactory};
pub use logs::{Level, LogEmitter, LogEntry, LogSink, OtelLogLayer};
pub use manager::{Manager, ShutdownHook};
pub use metrics::MetricsBridge;
