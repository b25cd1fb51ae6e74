//! File logging for the hook forwarder.
//!
//! The hook's stdout and stderr belong to the upstream agent, so logs go to a
//! daily-rolling file under `<home>/logs/`. If the directory can't be created the
//! forwarder runs without logging rather than failing the hook.

use std::env;
use std::path::Path;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_LOG_ENV: &str = "AGENT_MONITOR_DEBUG_LOG";
const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "monitor-hook.log";

/// Keeps the background log writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

pub fn init(home: &Path) -> Option<LoggingGuard> {
    let log_dir = home.join(LOG_DIR_NAME);
    if fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter())
        .with(layer)
        .try_init()
        .ok()?;

    Some(LoggingGuard { _guard: guard })
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
