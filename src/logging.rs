//! Logging initialization.
//!
//! Sets up the `tracing` subscriber for a mirror run. Log output goes to
//! stdout by default; with `log_to_file` enabled it is written to daily
//! rotated files instead, which suits cron-driven aggregator deployments.

use crate::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize logging for a mirror run.
///
/// The filter defaults to `info` and honors `RUST_LOG`. When logging to
/// files, the returned guard must stay alive until the process ends or
/// buffered log lines may be lost.
pub fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.log_to_file {
        fmt().with_env_filter(filter).with_target(false).init();
        return None;
    }

    let appender = rolling::daily(&config.log_dir, "csaf-mirror.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Some(guard)
}
