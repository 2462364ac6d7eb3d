//! Global tracing subscriber setup.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const DEFAULT_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "mage-sync";
const LOG_FILE_SUFFIX: &str = "log";
const MAX_LOG_FILES: usize = 10;

/// Install the global subscriber: compact output on stderr plus, when a
/// directory is configured, daily rolling files.
///
/// `RUST_LOG` takes precedence over the configured level. Keep the returned
/// guard alive until shutdown so buffered file output gets flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = env_filter(config)?;

  let mut layers = vec![fmt::layer()
    .compact()
    .with_writer(std::io::stderr)
    .boxed()];

  let guard = match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory).map_err(|e| {
        eyre!(
          "Failed to create log directory {}: {}",
          directory.display(),
          e
        )
      })?;

      let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(directory)
        .map_err(|e| eyre!("Failed to create log file appender: {}", e))?;

      let (writer, guard) = tracing_appender::non_blocking(appender);
      layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
      Some(guard)
    }
    None => None,
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(layers)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
  if let Ok(filter) = EnvFilter::try_from_default_env() {
    return Ok(filter);
  }

  let level = config.level.as_deref().unwrap_or(DEFAULT_LEVEL);
  EnvFilter::try_new(level).map_err(|e| eyre!("Invalid log level '{}': {}", level, e))
}
