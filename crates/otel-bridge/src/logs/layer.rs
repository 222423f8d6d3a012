//! `tracing` integration: a layer that forwards every event to the active
//! [`LogEmitter`].
//!
//! The layer does not own an emitter. It reads one from a [`LogSink`], which the
//! [`Manager`](crate::Manager) attaches on start and detaches on shutdown. The
//! sink is backed by [`ArcSwapOption`], so the per-event read never blocks.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::entry::{Caller, ERROR_KEY};
use super::{Level, LogEmitter, LogEntry};

/// Targets that belong to the export path itself. Forwarding their events
/// would feed the exporter's own diagnostics back into the exporter.
const EXPORT_PATH_TARGETS: &[&str] = &["opentelemetry", "tonic", "h2", "hyper", "reqwest", "tower"];

/// Shared slot holding the emitter that [`OtelLogLayer`]s forward to.
#[derive(Clone, Default)]
pub struct LogSink {
    current: Arc<ArcSwapOption<LogEmitter>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layer forwarding events to whichever emitter this sink holds.
    pub fn layer(&self) -> OtelLogLayer {
        OtelLogLayer { sink: self.clone() }
    }

    pub fn is_attached(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn current(&self) -> Option<Arc<LogEmitter>> {
        self.current.load_full()
    }

    pub(crate) fn attach(&self, emitter: Arc<LogEmitter>) {
        self.current.store(Some(emitter));
    }

    pub(crate) fn detach(&self) {
        self.current.store(None);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// `tracing_subscriber` layer converting events into [`LogEntry`] values.
#[derive(Clone, Debug)]
pub struct OtelLogLayer {
    sink: LogSink,
}

impl<S> Layer<S> for OtelLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_export_path(meta.target()) {
            return;
        }
        let Some(emitter) = self.sink.current() else {
            return;
        };

        let mut entry = LogEntry::new(Level::from(*meta.level()), String::new());
        event.record(&mut EntryVisitor { entry: &mut entry });
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            entry.caller = Some(Caller {
                file: file.to_owned(),
                function: meta.module_path().unwrap_or(meta.target()).to_owned(),
                line,
            });
        }

        if let Err(e) = emitter.fire(&entry) {
            // Logging through tracing here would recurse into this layer.
            eprintln!("otel-bridge: dropped log record: {e}");
        }
    }
}

fn is_export_path(target: &str) -> bool {
    EXPORT_PATH_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['_', ':']))
    })
}

struct EntryVisitor<'a> {
    entry: &'a mut LogEntry,
}

impl EntryVisitor<'_> {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.entry.message = value;
        } else {
            self.entry.fields.push((field.name().to_owned(), value));
        }
    }
}

impl Visit for EntryVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let text = value.to_string();
        if field.name() == ERROR_KEY {
            self.entry.error = Some(text.clone());
        }
        self.push(field, text);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}
