use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, config_dir};
use crate::errors::AppError;

/// Set up application logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// must be kept alive for file logging to flush.
pub fn setup_logging(config: &Config) -> Result<Option<WorkerGuard>, AppError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()));

    match config.log_file_path() {
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .finish();

            tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                AppError::Generic {
                    message: format!("Failed to set global tracing subscriber: {}", e),
                }
            })?;

            Ok(None)
        }
        Some(path) => {
            let (file_writer, guard) = create_file_logger(path)?;

            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(file_writer)
                .finish();

            tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                AppError::Generic {
                    message: format!("Failed to set global tracing subscriber: {}", e),
                }
            })?;

            Ok(Some(guard))
        }
    }
}

// Create file logger
fn create_file_logger(path: &str) -> Result<(NonBlocking, WorkerGuard), AppError> {
    let log_path = PathBuf::from(path);
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| config_dir().join("logs"));

    std::fs::create_dir_all(&log_dir).map_err(|e| AppError::Generic {
        message: format!("Failed to create log directory {:?}: {}", log_dir, e),
    })?;

    let log_file_name = log_path
        .file_name()
        .unwrap_or(std::ffi::OsStr::new("backoffice.log"));

    let file_appender = tracing_appender::rolling::never(&log_dir, log_file_name);
    Ok(tracing_appender::non_blocking(file_appender))
}
