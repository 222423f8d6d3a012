//! [`LogEmitter`]: converts [`LogEntry`] values into OTLP log records.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::Key;
use opentelemetry_sdk::logs::{LogExporter, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::Resource;

use super::{Level, LogEntry};
use crate::deadline::run_bounded;
use crate::error::{panic_message, ComponentError, EmitError};

/// Instrumentation scope name of every record this crate emits.
pub const LOGGER_NAME: &str = "otel-bridge";

/// Upper bound on [`LogEmitter::close`].
pub const LOG_CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

const ATTR_CODE_FILEPATH: &str = "code.filepath";
const ATTR_CODE_FUNCTION: &str = "code.function";
const ATTR_CODE_LINENO: &str = "code.lineno";
const ATTR_EXCEPTION_MESSAGE: &str = "exception.message";

// Caller info and exception message.
const BASE_ATTRIBUTE_CAPACITY: usize = 4;

/// Ships log entries to an OTLP log exporter.
///
/// Owns a logger provider and one logger derived from it, plus a label map that
/// is attached to every record. The label map has its own lock, so
/// [`update_context`](Self::update_context) and [`fire`](Self::fire) never wait
/// on the [`Manager`](crate::Manager).
pub struct LogEmitter {
    provider: SdkLoggerProvider,
    logger: Option<SdkLogger>,
    labels: RwLock<HashMap<String, String>>,
}

impl LogEmitter {
    /// Build an emitter that batches records into `exporter`.
    ///
    /// The provider owns the exporter: [`close`](Self::close) flushes the batch
    /// processor, which in turn shuts the exporter down.
    pub fn from_exporter<E>(exporter: E, resource: Option<Resource>) -> Self
    where
        E: LogExporter + 'static,
    {
        let mut builder = SdkLoggerProvider::builder().with_batch_exporter(exporter);
        if let Some(resource) = resource {
            builder = builder.with_resource(resource);
        }
        Self::with_provider(builder.build())
    }

    /// Build an emitter around a provider configured by the caller.
    pub fn with_provider(provider: SdkLoggerProvider) -> Self {
        let logger = provider.logger(LOGGER_NAME);
        Self {
            provider,
            logger: Some(logger),
            labels: RwLock::new(HashMap::new()),
        }
    }

    /// Levels this emitter ships. Filtering is left to the host subscriber.
    pub fn levels(&self) -> &'static [Level] {
        &Level::ALL
    }

    /// Convert `entry` into a log record and emit it.
    ///
    /// An entry without a context is emitted under [`Context::current`], so
    /// the record picks up the trace and span of whatever span is active on
    /// the calling thread. [`LogEntry::with_context`] overrides that.
    ///
    /// [`Context::current`]: opentelemetry::Context::current
    ///
    /// # Errors
    ///
    /// Returns an [`EmitError`] (text starting with `otel log hook panic`) if
    /// the emitter is not initialised or emission panics. The record is dropped
    /// in that case; the caller is never unwound.
    pub fn fire(&self, entry: &LogEntry) -> Result<(), EmitError> {
        contain(|| self.emit(entry))
    }

    fn emit(&self, entry: &LogEntry) -> Result<(), EmitError> {
        let logger = self.logger.as_ref().ok_or(EmitError::Uninitialised)?;

        // Entries without a context are emitted under the current one.
        let _guard = entry.context.clone().map(|cx| cx.attach());

        let mut record = logger.create_log_record();
        record.set_timestamp(entry.time);
        record.set_observed_timestamp(SystemTime::now());
        record.set_body(AnyValue::from(entry.message.clone()));
        record.set_severity_number(entry.level.severity());
        record.set_severity_text(entry.level.as_str());
        record.add_attributes(self.attributes(entry));

        logger.emit(record);
        Ok(())
    }

    /// Entry fields, then labels, then caller info, then the exception message.
    fn attributes(&self, entry: &LogEntry) -> Vec<(Key, AnyValue)> {
        let labels = self.labels.read().unwrap_or_else(PoisonError::into_inner);
        let mut attrs =
            Vec::with_capacity(entry.fields.len() + labels.len() + BASE_ATTRIBUTE_CAPACITY);

        for (k, v) in &entry.fields {
            attrs.push((Key::new(k.clone()), AnyValue::from(v.clone())));
        }
        for (k, v) in labels.iter() {
            attrs.push((Key::new(k.clone()), AnyValue::from(v.clone())));
        }
        drop(labels);

        if let Some(caller) = &entry.caller {
            attrs.push((
                Key::from_static_str(ATTR_CODE_FILEPATH),
                AnyValue::from(caller.file.clone()),
            ));
            attrs.push((
                Key::from_static_str(ATTR_CODE_FUNCTION),
                AnyValue::from(caller.function.clone()),
            ));
            attrs.push((
                Key::from_static_str(ATTR_CODE_LINENO),
                AnyValue::from(i64::from(caller.line)),
            ));
        }
        if let Some(err) = &entry.error {
            attrs.push((
                Key::from_static_str(ATTR_EXCEPTION_MESSAGE),
                AnyValue::from(err.clone()),
            ));
        }
        attrs
    }

    /// Upsert `labels` into the map attached to every record. Keys are never removed.
    pub fn update_context<I, K, V>(&self, labels: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = self.labels.write().unwrap_or_else(PoisonError::into_inner);
        for (k, v) in labels {
            map.insert(k.into(), v.into());
        }
    }

    /// Snapshot of the current labels.
    pub fn labels(&self) -> HashMap<String, String> {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flush pending records and shut the provider down, waiting at most
    /// [`LOG_CLOSE_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns the provider's shutdown error. A second close reports the SDK's
    /// "already shut down" error.
    pub fn close(&self) -> Result<(), ComponentError> {
        self.close_within(LOG_CLOSE_TIMEOUT)
    }

    /// Like [`close`](Self::close) with a caller-chosen bound.
    pub fn close_within(&self, timeout: Duration) -> Result<(), ComponentError> {
        let provider = self.provider.clone();
        run_bounded("log-close", timeout, move || provider.shutdown())?
            .map_err(ComponentError::from)
    }
}

impl fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEmitter")
            .field("initialised", &self.logger.is_some())
            .field("labels", &self.labels())
            .finish_non_exhaustive()
    }
}

/// Run `f`, turning a panic into [`EmitError::Panicked`].
///
/// Nothing is logged here: logging would re-enter the emitter.
fn contain<F>(f: F) -> Result<(), EmitError>
where
    F: FnOnce() -> Result<(), EmitError>,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(EmitError::Panicked(panic_message(payload.as_ref()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EMIT_FAULT_MARKER;
    use opentelemetry::logs::Severity;
    use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLogRecord};
    use std::sync::Arc;
    use std::thread;

    fn in_memory() -> (LogEmitter, InMemoryLogExporter) {
        let exporter = InMemoryLogExporter::default();
        let provider = SdkLoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (LogEmitter::with_provider(provider), exporter)
    }

    fn uninitialised() -> LogEmitter {
        LogEmitter {
            provider: SdkLoggerProvider::builder().build(),
            logger: None,
            labels: RwLock::new(HashMap::new()),
        }
    }

    fn attr(record: &SdkLogRecord, key: &str) -> Option<AnyValue> {
        record
            .attributes_iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.clone())
    }

    fn emitted(exporter: &InMemoryLogExporter) -> Vec<SdkLogRecord> {
        exporter
            .get_emitted_logs()
            .unwrap()
            .into_iter()
            .map(|l| l.record)
            .collect()
    }

    #[test]
    fn levels_are_complete() {
        let (emitter, _) = in_memory();
        assert_eq!(emitter.levels().len(), 7);
    }

    #[test]
    fn fire_builds_record() {
        let (emitter, exporter) = in_memory();
        emitter.update_context([("accountId", "acct-1")]);

        let entry = LogEntry::new(Level::Warn, "disk almost full")
            .with_field("volume", "/data")
            .with_caller("src/disk.rs", "disk::check", 42);
        emitter.fire(&entry).unwrap();

        let records = emitted(&exporter);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.body(), Some(&AnyValue::from("disk almost full".to_owned())));
        assert_eq!(record.severity_number(), Some(Severity::Warn));
        assert_eq!(record.severity_text(), Some("warning"));
        assert_eq!(attr(record, "volume"), Some(AnyValue::from("/data".to_owned())));
        assert_eq!(attr(record, "accountId"), Some(AnyValue::from("acct-1".to_owned())));
        assert_eq!(attr(record, ATTR_CODE_FUNCTION), Some(AnyValue::from("disk::check".to_owned())));
        assert_eq!(attr(record, ATTR_CODE_LINENO), Some(AnyValue::from(42_i64)));
        assert!(attr(record, ATTR_EXCEPTION_MESSAGE).is_none());
    }

    #[test]
    fn fire_adds_exception_message() {
        let (emitter, exporter) = in_memory();
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection refused");
        emitter
            .fire(&LogEntry::new(Level::Error, "upload failed").with_error(&io))
            .unwrap();

        let record = &emitted(&exporter)[0];
        assert_eq!(
            attr(record, ATTR_EXCEPTION_MESSAGE),
            Some(AnyValue::from("connection refused".to_owned()))
        );
        assert_eq!(attr(record, "error"), Some(AnyValue::from("connection refused".to_owned())));
    }

    #[test]
    fn fire_without_caller_has_no_code_attributes() {
        let (emitter, exporter) = in_memory();
        emitter.fire(&LogEntry::new(Level::Info, "plain")).unwrap();
        let record = &emitted(&exporter)[0];
        assert!(attr(record, ATTR_CODE_FILEPATH).is_none());
    }

    #[test]
    fn fire_accepts_explicit_context() {
        let (emitter, exporter) = in_memory();
        let entry = LogEntry::new(Level::Debug, "with context")
            .with_context(opentelemetry::Context::new());
        emitter.fire(&entry).unwrap();
        assert_eq!(emitted(&exporter).len(), 1);
    }

    fn remote_span(trace: u128, span: u64) -> opentelemetry::Context {
        use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
        opentelemetry::Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from(trace),
            SpanId::from(span),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    #[test]
    fn fire_without_context_uses_current() {
        let (emitter, exporter) = in_memory();
        {
            let _active = remote_span(0xabc, 0x12).attach();
            emitter.fire(&LogEntry::new(Level::Info, "inside span")).unwrap();
        }
        emitter.fire(&LogEntry::new(Level::Info, "outside span")).unwrap();

        let records = emitted(&exporter);
        let inside = records[0].trace_context().unwrap();
        assert_eq!(inside.trace_id, opentelemetry::trace::TraceId::from(0xabc_u128));
        assert_eq!(inside.span_id, opentelemetry::trace::SpanId::from(0x12_u64));
        assert!(records[1].trace_context().is_none());
    }

    #[test]
    fn explicit_context_overrides_current() {
        let (emitter, exporter) = in_memory();
        let _active = remote_span(0xabc, 0x12).attach();
        let entry = LogEntry::new(Level::Info, "handed over").with_context(remote_span(0xdef, 0x34));
        emitter.fire(&entry).unwrap();

        let records = emitted(&exporter);
        let trace = records[0].trace_context().unwrap();
        assert_eq!(trace.trace_id, opentelemetry::trace::TraceId::from(0xdef_u128));
    }

    #[test]
    fn fire_all_levels() {
        let (emitter, exporter) = in_memory();
        for level in Level::ALL {
            emitter.fire(&LogEntry::new(level, level.as_str())).unwrap();
        }
        let severities: Vec<_> = emitted(&exporter)
            .iter()
            .map(|r| r.severity_number())
            .collect();
        assert_eq!(severities.len(), 7);
        assert_eq!(severities[0], Some(Severity::Fatal4));
        assert_eq!(severities[6], Some(Severity::Trace));
    }

    #[test]
    fn uninitialised_emitter_returns_error_every_time() {
        let emitter = uninitialised();
        emitter.update_context([("service", "runner")]);
        for i in 0..100 {
            let entry = LogEntry::new(Level::Info, "rapid fire").with_field("i", i);
            let err = emitter.fire(&entry).unwrap_err();
            assert!(err.to_string().contains(EMIT_FAULT_MARKER), "iteration {i}: {err}");
        }
    }

    #[test]
    fn panics_are_contained() {
        let err = contain(|| panic!("exporter exploded")).unwrap_err();
        assert!(matches!(err, EmitError::Panicked(ref m) if m == "exporter exploded"));
        assert!(err.to_string().starts_with(EMIT_FAULT_MARKER));

        let err = contain(|| std::panic::panic_any(17_u8)).unwrap_err();
        assert!(err.to_string().contains("unknown panic payload"));
    }

    #[test]
    fn update_context_overwrites_and_keeps() {
        let (emitter, _) = in_memory();
        emitter.update_context([("a", "1"), ("b", "2")]);
        emitter.update_context([("a", "3")]);
        let labels = emitter.labels();
        assert_eq!(labels["a"], "3");
        assert_eq!(labels["b"], "2");
    }

    #[test]
    fn update_context_concurrent_disjoint_keys() {
        let (emitter, _) = in_memory();
        let emitter = Arc::new(emitter);
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let emitter = emitter.clone();
                thread::spawn(move || {
                    emitter.update_context([(format!("key-{i}"), format!("value-{i}"))]);
                    emitter.fire(&LogEntry::new(Level::Info, "concurrent")).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let labels = emitter.labels();
        assert_eq!(labels.len(), 32);
        for i in 0..32 {
            assert_eq!(labels[&format!("key-{i}")], format!("value-{i}"));
        }
    }

    #[test]
    fn update_context_concurrent_same_key() {
        let (emitter, _) = in_memory();
        let emitter = Arc::new(emitter);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let emitter = emitter.clone();
                thread::spawn(move || {
                    emitter.update_context([
                        ("shared".to_owned(), format!("v{i}")),
                        (format!("own-{i}"), "x".to_owned()),
                    ]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let labels = emitter.labels();
        let written: Vec<String> = (0..16).map(|i| format!("v{i}")).collect();
        assert!(written.contains(&labels["shared"]));
        // Every call's whole map landed.
        assert_eq!(labels.len(), 17);
    }

    #[test]
    fn close_then_close_again() {
        let (emitter, _) = in_memory();
        assert!(emitter.close().is_ok());
        // The SDK reports the second shutdown; it must not panic.
        assert!(emitter.close().is_err());
    }

    #[test]
    fn from_exporter_batches_records() {
        let exporter = InMemoryLogExporter::default();
        let emitter = LogEmitter::from_exporter(exporter.clone(), Some(Resource::builder().build()));
        emitter.fire(&LogEntry::new(Level::Info, "batched")).unwrap();
        emitter.provider.force_flush().unwrap();
        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
        emitter.close().unwrap();
    }
}
