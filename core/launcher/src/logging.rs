//! Logging setup: stdout plus a daily-rolling file under the launcher's
//! `logs/` directory.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "launcher.log";

fn debug_enabled() -> bool {
    env::var("DL_LAUNCHER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. Falls back to stdout only when the log
/// directory can't be created. Keep the returned guard alive until exit so
/// buffered file lines get flushed.
pub fn init(logs_dir: &Path) -> Option<WorkerGuard> {
    let stdout_layer = fmt::layer().with_target(false);

    if let Err(err) = fs_err::create_dir_all(logs_dir) {
        tracing_subscriber::registry()
            .with(filter())
            .with(stdout_layer)
            .init();
        tracing::warn!(error = %err, "File logging disabled");
        return None;
    }

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(filter())
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Some(guard)
}
