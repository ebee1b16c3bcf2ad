use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors that reject a whole call before any unit of work starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Target directory {} is not writable: {reason}", path.display())]
    Path { path: PathBuf, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl AppError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        AppError::InvalidArgument(message.into())
    }

    pub fn path<P: Into<PathBuf>>(path: P, reason: impl ToString) -> Self {
        AppError::Path {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a single download ended in `Failed`. Never escalates past its task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("write error: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}
