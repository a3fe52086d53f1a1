//! Tracing subscriber setup: human-readable stderr plus an optional
//! daily-rolling JSON file.

use crate::config::LoggingConfig;
use crate::error::ConfigError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Keeps the file writer alive; drop it only at shutdown.
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` when set, otherwise `level`.
pub fn env_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| ConfigError::Logging {
        message: format!("invalid log level {level:?}: {e}"),
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, ConfigError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(&config.level)?);

    let mut file_guard = None;
    let json_layer = match &config.json_log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Logging {
                message: format!("cannot create log directory {}: {e}", dir.display()),
            })?;
            let appender = tracing_appender::rolling::daily(dir, "delve.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_filter(EnvFilter::new("debug")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging {
            message: e.to_string(),
        })?;

    Ok(LoggingGuard { _file: file_guard })
}
