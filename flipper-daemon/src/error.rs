//! Daemon error type

use flipper_core::{ConfigError, FlipperError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Flipper(#[from] FlipperError),

    #[error("Invalid input: {reason}")]
    Input { reason: String },

    #[error("{failed} of {total} tracks failed")]
    TracksFailed { failed: usize, total: usize },

    #[error("Telemetry setup failed: {reason}")]
    Telemetry { reason: String },

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for DaemonError {
    fn from(e: ConfigError) -> Self {
        DaemonError::Flipper(e.into())
    }
}

impl From<flipper_storage::LmdbLedgerError> for DaemonError {
    fn from(e: flipper_storage::LmdbLedgerError) -> Self {
        DaemonError::Flipper(e.into())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
