use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Directory for daily log files: $XDG_DATA_HOME/studysync/logs
pub fn log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|d| d.join("studysync").join("logs"))
}

/// Install the global subscriber, writing to a daily rolling file.
///
/// `RUST_LOG` wins over `default_level`. The returned guard flushes the
/// writer on drop and must live until exit.
pub fn init(default_level: &str) -> Result<WorkerGuard> {
  let dir = log_dir().ok_or_else(|| eyre!("Could not determine a data directory for logs"))?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(default_level))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  let appender = tracing_appender::rolling::daily(&dir, "studysync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
