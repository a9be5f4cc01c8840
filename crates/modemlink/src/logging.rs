use clap::ValueEnum;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Crates whose events follow `--log-level`. Everything else is capped at warn.
const LINK_TARGETS: [&str; 4] = ["modemlink", "modemlink_shm", "modemlink_frame", "modemlink_engine"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    /// One flattened JSON object per event.
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
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

/// `level` for the link crates, at most warn for their dependencies.
pub fn link_filter(level: LogLevel) -> Targets {
    let level = LevelFilter::from(level);
    LINK_TARGETS.iter().fold(
        Targets::new().with_default(level.min(LevelFilter::WARN)),
        |filter, target| filter.with_target(*target, level),
    )
}

/// Install the stderr subscriber. Text lines carry the thread name because
/// the async driver runs engines on the blocking pool.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = link_filter(level);
    let registry = tracing_subscriber::registry();

    // A second init (tests calling main twice) is harmless.
    let _ = match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_thread_names(true),
            )
            .with(filter)
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .with(filter)
            .try_init(),
    };
}
