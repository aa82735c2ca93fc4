//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after settings are loaded.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log level '{level}': {reason}")]
    InvalidLevel { level: String, reason: String },
    #[error("failed to set subscriber: {0}")]
    Install(String),
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins when set and valid; `level` is the fallback.
pub fn init(level: &str) -> Result<(), LoggerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        // An empty directive would silently mean "errors only"
        Err(_) if level.trim().is_empty() => {
            return Err(LoggerError::InvalidLevel {
                level: level.to_string(),
                reason: "log level must not be empty".to_string(),
            })
        }
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggerError::InvalidLevel {
            level: level.to_string(),
            reason: e.to_string(),
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LoggerError::Install(e.to_string()))
}
