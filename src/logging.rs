use std::{
    fs::File,
    io::IsTerminal,
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::{DreamError, Result};

pub const LOG_LEVEL_ENV: &str = "DEEP_DREAM_LOG_LEVEL";
pub const LOG_MODE_ENV: &str = "DEEP_DREAM_LOG_MODE";
pub const LOG_LEVEL_DEF: Level = Level::INFO;
pub const LOG_MODE_DEF: LogMode = LogMode::Debug;

static INITIALISED: OnceLock<()> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogMode {
    /// Human-readable output on stderr with source locations
    Debug,
    /// Full paths written to a temporary log file
    Production,
}

pub fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

pub fn parse_mode(value: &str) -> Option<LogMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "debug" => Some(LogMode::Debug),
        "production" => Some(LogMode::Production),
        _ => None,
    }
}

// Unset is the default, invalid values are reported and ignored
fn from_env<T>(name: &str, default: T, parse: fn(&str) -> Option<T>) -> T {
    match std::env::var(name) {
        Ok(value) => parse(&value).unwrap_or_else(|| {
            eprintln!("WARNING: {}={} is not recognized, ignoring", name, value);
            default
        }),
        Err(_) => default,
    }
}

/// Installs the global subscriber.
///
/// Returns the log file path in production mode. A second call is an error.
pub fn init_logging() -> Result<Option<PathBuf>> {
    INITIALISED
        .set(())
        .map_err(|_| DreamError::InvalidArgument("logging is already initialised".to_string()))?;

    let level = from_env(LOG_LEVEL_ENV, LOG_LEVEL_DEF, parse_level);
    let mode = from_env(LOG_MODE_ENV, LOG_MODE_DEF, parse_mode);
    let filter = EnvFilter::new(level.as_str().to_ascii_lowercase());

    match mode {
        LogMode::Debug => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_file(true)
                .with_line_number(true);
            Registry::default().with(filter).with(layer).init();
            Ok(None)
        }
        LogMode::Production => {
            let path = std::env::temp_dir().join(format!("deep_dream_main_{}.log", std::process::id()));
            let file = File::create(&path)?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true);
            Registry::default().with(filter).with(layer).init();
            println!("{}", path.display());
            Ok(Some(path))
        }
    }
}
