//! File logging.
//!
//! The session owns the terminal, so log output only ever goes to the file
//! named in `[logging] location`. When that file cannot be opened logging is
//! simply off; a login must not fail because of it.

use container_shell_core::Config;
use nix::sys::stat::{Mode, umask};
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, prelude::*};

const DEFAULT_MAX_COUNT: usize = 3;

/// Map a configured level name onto a tracing filter.
///
/// Accepts the names operators already use in the config file, including
/// `WARNING` and `CRITICAL`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_uppercase().as_str() {
        "NOTSET" | "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "WARNING" | "WARN" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Open the rolling log file that every login user may append to.
pub fn open_appender(location: &Path, max_count: usize) -> Result<RollingFileAppender, InitError> {
    let directory = location
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = location
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "messages.log".to_string());

    let previous = umask(Mode::from_bits_truncate(0o001));
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(max_count.max(1))
        .build(directory);
    umask(previous);
    appender
}

/// Install the global subscriber. Returns whether logging is active.
pub fn init_tracing(config: &Config) -> bool {
    let level = parse_level(config.value("logging", "level"));
    let max_count = config
        .parse::<usize>("logging", "max_count", "int")
        .ok()
        .flatten()
        .unwrap_or(DEFAULT_MAX_COUNT);
    let location = Path::new(config.value("logging", "location"));

    let Ok(appender) = open_appender(location, max_count) else {
        return false;
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_target(false);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        // Rotation is by day; the size limit is checked so typos still surface.
        if let Err(e) = config.parse::<u64>("logging", "max_size", "int") {
            tracing::error!("{}", e);
        }
    }
    installed
}
