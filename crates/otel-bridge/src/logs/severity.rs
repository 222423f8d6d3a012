//! Source log levels and their OpenTelemetry severities.

use opentelemetry::logs::Severity;

/// Levels accepted by [`LogEmitter::fire`](super::LogEmitter::fire), most
/// severe first.
///
/// The numeric codes (`Panic = 0` .. `Trace = 6`) are the wire form used by
/// [`Level::from_code`]; any other code is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Panic,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    /// Every level, most severe first.
    pub const ALL: [Level; 7] = [
        Level::Panic,
        Level::Fatal,
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn code(self) -> u32 {
        match self {
            Level::Panic => 0,
            Level::Fatal => 1,
            Level::Error => 2,
            Level::Warn => 3,
            Level::Info => 4,
            Level::Debug => 5,
            Level::Trace => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Panic => "panic",
            Level::Fatal => "fatal",
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }

    /// OpenTelemetry severity for this level.
    pub fn severity(self) -> Severity {
        match self {
            Level::Trace => Severity::Trace,
            Level::Debug => Severity::Debug,
            Level::Info => Severity::Info,
            Level::Warn => Severity::Warn,
            Level::Error => Severity::Error,
            Level::Fatal => Severity::Fatal,
            Level::Panic => Severity::Fatal4,
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::TRACE => Level::Trace,
        }
    }
}

/// Severity for a raw level code; unknown codes map to `Info`.
pub fn severity_for_code(code: u32) -> Severity {
    Level::from_code(code).map_or(Severity::Info, Level::severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_level() {
        let cases = [
            (Level::Trace, Severity::Trace),
            (Level::Debug, Severity::Debug),
            (Level::Info, Severity::Info),
            (Level::Warn, Severity::Warn),
            (Level::Error, Severity::Error),
            (Level::Fatal, Severity::Fatal),
            (Level::Panic, Severity::Fatal4),
        ];
        for (level, expected) in cases {
            assert_eq!(level.severity(), expected, "level {level:?}");
        }
    }

    #[test]
    fn severities_increase_with_level() {
        // ALL runs most severe first.
        let numbers: Vec<i32> = Level::ALL.iter().map(|l| l.severity() as i32).collect();
        for pair in numbers.windows(2) {
            assert!(pair[0] > pair[1], "not strictly decreasing: {numbers:?}");
        }
        assert_ne!(Level::Fatal.severity(), Level::Panic.severity());
    }

    #[test]
    fn unknown_codes_map_to_info() {
        assert_eq!(severity_for_code(7), Severity::Info);
        assert_eq!(severity_for_code(999), Severity::Info);
        assert_eq!(severity_for_code(u32::MAX), Severity::Info);
    }

    #[test]
    fn codes_round_trip() {
        for level in Level::ALL {
            assert_eq!(Level::from_code(level.code()), Some(level));
            assert_eq!(severity_for_code(level.code()), level.severity());
        }
    }

    #[test]
    fn tracing_levels_convert() {
        assert_eq!(Level::from(tracing::Level::ERROR), Level::Error);
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Trace);
    }
}
