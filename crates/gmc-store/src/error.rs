//! Error types for gmc-store.

use std::path::PathBuf;

/// Result type for gmc-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gmc-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Data logging or export is switched off in the configuration.
    #[error("Data export is disabled")]
    Disabled,

    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to rotate the active log file.
    #[error("Failed to rotate {path}: {source}")]
    Rotate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The export target is one of the log files.
    #[error("Refusing to export over log file {0}")]
    ExportTarget(PathBuf),

    /// CSV encoding or decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
