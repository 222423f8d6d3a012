//! The log entry handed to [`LogEmitter::fire`](super::LogEmitter::fire).

use std::fmt::Display;
use std::time::SystemTime;

use super::Level;

/// Field name under which an error value is recorded.
pub const ERROR_KEY: &str = "error";

/// Source location of the log call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub file: String,
    pub function: String,
    pub line: u32,
}

/// One log line from the host application.
///
/// Structured field values are already text; the error (if any) is carried in
/// its own slot rather than being discovered among the fields.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub time: SystemTime,
    pub level: Level,
    pub message: String,
    /// Structured fields in the order they were recorded.
    pub fields: Vec<(String, String)>,
    pub caller: Option<Caller>,
    /// Text of the error recorded under [`ERROR_KEY`].
    pub error: Option<String>,
    /// Context to emit under. `None` means the caller's current context, so
    /// the active span, if any, is attached to the record.
    pub context: Option<opentelemetry::Context>,
}

impl LogEntry {
    /// An entry stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: SystemTime::now(),
            level,
            message: message.into(),
            fields: Vec::new(),
            caller: None,
            error: None,
            context: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Record `err` under [`ERROR_KEY`], both as a field and as the entry's error.
    pub fn with_error(mut self, err: &dyn std::error::Error) -> Self {
        let text = err.to_string();
        self.fields.push((ERROR_KEY.to_owned(), text.clone()));
        self.error = Some(text);
        self
    }

    pub fn with_caller(mut self, file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        self.caller = Some(Caller {
            file: file.into(),
            function: function.into(),
            line,
        });
        self
    }

    pub fn with_context(mut self, cx: opentelemetry::Context) -> Self {
        self.context = Some(cx);
        self
    }

    pub fn at(mut self, time: SystemTime) -> Self {
        self.time = time;
        self
    }
}
