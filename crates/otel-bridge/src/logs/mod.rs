//! Log shipping: severity mapping, the log entry contract, the emitter that
//! turns entries into OTLP log records, and the `tracing` layer feeding it.
//!
//! # Invariants
//!
//! - Emission never unwinds into the caller; faults come back as [`EmitError`].
//! - The emitter's label map only grows: keys are upserted, never removed.
//! - The layer reads the active emitter lock-free and never takes the
//!   manager's mutex.
//!
//! [`EmitError`]: crate::error::EmitError

pub mod emitter;
pub mod entry;
pub mod layer;
pub mod severity;

pub use emitter::LogEmitter;
pub use entry::{Caller, LogEntry};
pub use layer::{LogSink, OtelLogLayer};
pub use severity::Level;
