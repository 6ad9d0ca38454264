use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Crates whose events follow `--log-level`. Everything else stays at warn.
const SORTGATE_TARGETS: [&str; 4] = [
    "sortgate",
    "sortgate_transport",
    "sortgate_frame",
    "sortgate_control",
];

/// Shape of the diagnostic lines written to stderr.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Filter directives: the sortgate crates log at `level`, dependencies at
/// most at warn.
pub fn filter_directives(level: LogLevel) -> String {
    let default = if LevelFilter::from(level) > LevelFilter::WARN {
        LogLevel::Warn
    } else {
        level
    };
    std::iter::once(default.as_str().to_string())
        .chain(
            SORTGATE_TARGETS
                .iter()
                .map(|target| format!("{target}={}", level.as_str())),
        )
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Stdout stays reserved for records.
///
/// Event targets are shown from debug up, where it matters whether a line
/// came from the link, the framing or the loop.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(filter_directives(level)))
        .with_ansi(false)
        .with_target(LevelFilter::from(level) >= LevelFilter::DEBUG);

    // A subscriber may already be installed when embedded in tests.
    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().flatten_event(true).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn dependencies_stay_at_warn() {
        assert_eq!(
            filter_directives(LogLevel::Debug),
            "warn,sortgate=debug,sortgate_transport=debug,sortgate_frame=debug,sortgate_control=debug"
        );
        assert!(filter_directives(LogLevel::Error).starts_with("error,sortgate=error,"));
        assert!(EnvFilter::try_new(filter_directives(LogLevel::Trace)).is_ok());
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LogFormat::Text, LogLevel::Error);
        init_logging(LogFormat::Json, LogLevel::Debug);
    }
}
