//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format for the global logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    HumanReadable,
    Json,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "human" | "text" | "pretty" => Some(LogFormat::HumanReadable),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Configure the global tracing subscriber.
///
/// `default_level` is used for any target not otherwise configured through
/// `RUST_LOG`. Calling this more than once is a no-op.
pub fn configure_global_logger(default_level: Level, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true);

    // Already set is fine, e.g. from a test harness.
    let _ = match format {
        LogFormat::HumanReadable => {
            tracing::subscriber::set_global_default(builder.with_target(true).finish())
        }
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
}

/// Parse a log level name, e.g. "info" or "DEBUG".
pub fn parse_level(name: &str) -> Option<Level> {
    name.parse().ok()
}

/// Install a subscriber writing to the test output, ignoring failures.
pub fn init_test() {
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
