//! Tracing setup for binaries embedding the engine

use std::path::{Path, PathBuf};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Set up tracing with two layers:
/// - Console: controlled by RUST_LOG (default: warn)
/// - File: always debug-level JSON, rotated daily, in `log_dir`
///
/// When `log_dir` is `None` the default `~/.lodestar/logs` is used. If no
/// directory can be created only the console layer is installed. The
/// returned guard must be kept alive for the file writer to flush.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = match log_dir {
        Some(dir) => std::fs::create_dir_all(dir).ok().map(|_| dir.to_path_buf()),
        None => log_directory(),
    };

    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "lodestar.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let installed = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_filter(console_filter),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_filter(EnvFilter::new("debug")),
            )
            .try_init()
            .is_ok();

        return installed.then_some(guard);
    }

    // Fallback: console only
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init();

    None
}

/// Returns the default log directory path, creating it if needed.
fn log_directory() -> Option<PathBuf> {
    let log_dir = dirs::home_dir()?.join(".lodestar").join("logs");
    std::fs::create_dir_all(&log_dir).ok()?;
    Some(log_dir)
}
