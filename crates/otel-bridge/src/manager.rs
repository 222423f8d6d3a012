//! [`Manager`]: lifecycle of the telemetry pipeline.
//!
//! A manager holds at most one active pipeline (log emitter, metrics bridge
//! and auxiliary shutdown hooks). Every operation takes the same mutex, so
//! start, replace and shutdown never interleave.
//!
//! # Invariants
//!
//! - A disabled [`Manager::start`] is a successful no-op; the active pipeline
//!   is left in place.
//! - An enabled start without an endpoint fails before anything is built.
//! - Starting while active shuts the previous pipeline down first; its
//!   failure is logged, not returned.
//! - A signal whose construction fails is left absent. It never takes the
//!   other signal, or the start call, down with it.
//! - [`Manager::shutdown`] tears down logs, then metrics, then the
//!   auxiliary hooks in registration order. Every failure is collected and
//!   the slot is cleared regardless, so a second call is a clean no-op.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::{panic_message, BoxError, ShutdownError, ShutdownFailure, TelemetryError};
use crate::exporter::{ExporterFactory, OtlpExporterFactory};
use crate::logs::emitter::LOG_CLOSE_TIMEOUT;
use crate::logs::{LogEmitter, LogSink};
use crate::metrics::MetricsBridge;
use crate::resource::build_resource;

/// Bound on tearing down a pipeline that a new start replaces.
pub const REPLACE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Auxiliary teardown step, run after the log and metrics providers.
pub type ShutdownHook = Box<dyn FnOnce(Deadline) -> Result<(), BoxError> + Send>;

/// Owner of the active telemetry pipeline.
///
/// Wrap in an [`Arc`] to share it between the composition root and the
/// places that record metrics.
pub struct Manager {
    factory: Arc<dyn ExporterFactory>,
    sink: LogSink,
    active: Mutex<Option<Pipeline>>,
}

struct Pipeline {
    config: Config,
    sink: LogSink,
    log_hook: Option<Arc<LogEmitter>>,
    metrics_bridge: Option<Arc<MetricsBridge>>,
    shutdown_hooks: Vec<(String, ShutdownHook)>,
}

impl Pipeline {
    fn teardown(self, deadline: Deadline) -> Result<(), ShutdownError> {
        let mut failures = Vec::new();

        // Logs first, so diagnostics produced by the metrics shutdown are not
        // routed into a provider that is being torn down.
        if let Some(hook) = self.log_hook {
            self.sink.detach();
            let bound = LOG_CLOSE_TIMEOUT.min(deadline.remaining());
            if let Err(e) = hook.close_within(bound) {
                failures.push(ShutdownFailure::LogHook(e));
            }
        }

        if let Some(bridge) = self.metrics_bridge {
            if let Err(e) = bridge.shutdown(deadline) {
                failures.push(ShutdownFailure::MetricsBridge(e));
            }
        }

        // A panicking hook is recorded like a failing one; later hooks still run.
        for (name, hook) in self.shutdown_hooks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(deadline)))
                .unwrap_or_else(|payload| {
                    Err(format!("panicked: {}", panic_message(payload.as_ref())).into())
                });
            if let Err(source) = outcome {
                failures.push(ShutdownFailure::Callback { name, source });
            }
        }

        match ShutdownError::from_failures(failures) {
            None => {
                info!(endpoint = %self.config.endpoint, "telemetry pipeline shut down");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}

impl Manager {
    /// A manager that exports over OTLP.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(OtlpExporterFactory))
    }

    /// A manager whose signals are built by `factory`.
    pub fn with_factory(factory: Arc<dyn ExporterFactory>) -> Self {
        Self {
            factory,
            sink: LogSink::new(),
            active: Mutex::new(None),
        }
    }

    /// Start (or restart) the pipeline for `config`.
    ///
    /// `version` overrides `config.service_version` in the resource when
    /// non-empty. The new log emitter is attached to `sink`, or to
    /// [`log_sink`](Self::log_sink) when `None`.
    ///
    /// Diagnostics from the OpenTelemetry SDK itself (export timeouts,
    /// connection failures, dropped records) are emitted as `tracing` events
    /// under `opentelemetry*` targets and reach the host's subscriber; the
    /// bridge layer keeps them out of the OTLP stream.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::MissingEndpoint`] when enabled without an
    /// endpoint. Construction failures of individual signals are logged and
    /// never returned.
    pub fn start(
        &self,
        config: &Config,
        version: &str,
        sink: Option<&LogSink>,
    ) -> Result<(), TelemetryError> {
        if !config.enabled {
            info!("OTEL integration is disabled");
            return Ok(());
        }
        config.validate()?;

        let mut active = self.lock();
        if let Some(previous) = active.take() {
            info!("replacing active telemetry pipeline");
            if let Err(e) = previous.teardown(Deadline::after(REPLACE_SHUTDOWN_TIMEOUT)) {
                warn!(error = %e, "previous telemetry pipeline did not shut down cleanly");
            }
        }

        let resource = build_resource(config, version);

        let log_hook = if config.export_logs {
            match self.factory.log_emitter(config, &resource) {
                Ok(emitter) => Some(Arc::new(emitter)),
                Err(e) => {
                    error!(error = %e, "failed to create OTLP log exporter; log export disabled");
                    None
                }
            }
        } else {
            None
        };

        let metrics_bridge = if config.export_metrics {
            match self.factory.metrics_bridge(config, &resource) {
                Ok(bridge) => Some(Arc::new(bridge)),
                Err(e) => {
                    error!(error = %e, "failed to create OTLP metric reader; metric export disabled");
                    None
                }
            }
        } else {
            None
        };

        let sink = sink.cloned().unwrap_or_else(|| self.sink.clone());
        if let Some(hook) = &log_hook {
            sink.attach(Arc::clone(hook));
        }

        info!(
            endpoint = %config.endpoint,
            protocol = config.protocol.as_str(),
            logs = log_hook.is_some(),
            metrics = metrics_bridge.is_some(),
            "telemetry pipeline started; SDK diagnostics are reported through tracing"
        );

        *active = Some(Pipeline {
            config: config.clone(),
            sink,
            log_hook,
            metrics_bridge,
            shutdown_hooks: Vec::new(),
        });
        Ok(())
    }

    /// Tear the active pipeline down, waiting no later than `deadline`.
    ///
    /// A no-op when nothing is active.
    ///
    /// # Errors
    ///
    /// Returns every failed teardown step, in order. The pipeline is
    /// discarded either way.
    pub fn shutdown(&self, deadline: Deadline) -> Result<(), ShutdownError> {
        let mut active = self.lock();
        match active.take() {
            Some(pipeline) => pipeline.teardown(deadline),
            None => Ok(()),
        }
    }

    /// The active metrics bridge, if metrics export is running.
    pub fn metrics_bridge(&self) -> Option<Arc<MetricsBridge>> {
        self.lock().as_ref()?.metrics_bridge.clone()
    }

    /// The active log emitter, if log export is running.
    pub fn log_hook(&self) -> Option<Arc<LogEmitter>> {
        self.lock().as_ref()?.log_hook.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// The sink used when [`start`](Self::start) is given none.
    pub fn log_sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Register `hook` to run at the end of the active pipeline's teardown.
    ///
    /// Returns `false`, dropping the hook, when nothing is active.
    pub fn add_shutdown_hook<F>(&self, name: impl Into<String>, hook: F) -> bool
    where
        F: FnOnce(Deadline) -> Result<(), BoxError> + Send + 'static,
    {
        match self.lock().as_mut() {
            Some(pipeline) => {
                pipeline.shutdown_hooks.push((name.into(), Box::new(hook)));
                true
            }
            None => false,
        }
    }

    // A panic while holding the lock leaves the slot itself consistent.
    fn lock(&self) -> MutexGuard<'_, Option<Pipeline>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("active", &self.is_active())
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}
