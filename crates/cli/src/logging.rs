//! Logging setup for the long-running stages and one-off commands

use secflow::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "secflow.log";

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging from the `[logging]` section.
///
/// Logs go to the console unless `log_dir` is set, in which case they go to
/// a rolling file there (no ANSI). `RUST_LOG` overrides the configured level.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.level);

  // Build env filter (allows RUST_LOG override)
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let Some(log_dir) = &config.log_dir else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .init();
    return None;
  };

  if let Err(e) = std::fs::create_dir_all(log_dir) {
    // Fall back to console-only logging
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    tracing::warn!(dir = %log_dir.display(), error = %e, "Failed to create log directory, logging to console");
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(log_dir, LOG_FILE_PREFIX),
    "never" => tracing_appender::rolling::never(log_dir, LOG_FILE_PREFIX),
    _ => tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX),
  };

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
