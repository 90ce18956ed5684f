//! Error types for gmc-core.
//!
//! This module defines the failures a poll cycle can observe on the serial
//! link to a GMC detector.
//!
//! # Error Recovery Strategies
//!
//! Nothing inside the device link is retried. Every failure surfaces to the
//! caller, which decides per cycle what to do.
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::DeviceUnavailable`] | Close, reopen next cycle | Port absent or unplugged |
//! | [`Error::Timeout`] | Skip cycle | Device busy or asleep |
//! | [`Error::Protocol`] | Skip cycle | Line noise or firmware mismatch |
//! | [`Error::SyncFailed`] | Log and continue | Clock stays as is |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//!
//! Persistent `DeviceUnavailable`, `Timeout` or `Protocol` errors are what
//! drives the device-offline alert.

use std::time::Duration;

use thiserror::Error;

use gmc_types::ParseError;

/// Errors that can occur when communicating with a GMC device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The serial port could not be opened or the link was lost.
    #[error("Device unavailable on {port}: {reason}")]
    DeviceUnavailable {
        /// The serial port path.
        port: String,
        /// What went wrong.
        reason: String,
    },

    /// The device did not answer within the configured timeout.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The command that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The device answered with a malformed or short frame.
    #[error("Protocol error in '{operation}': {source}")]
    Protocol {
        /// The command whose reply could not be decoded.
        operation: String,
        /// The decoding failure.
        #[source]
        source: ParseError,
    },

    /// The device did not acknowledge a set-time command.
    #[error("Clock sync failed: {0}")]
    SyncFailed(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a [`Error::DeviceUnavailable`] for the given port.
    pub fn unavailable(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`Error::Timeout`] for the given command.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a [`Error::Protocol`] for the given command.
    pub fn protocol(operation: impl Into<String>, source: ParseError) -> Self {
        Self::Protocol {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the link itself is gone and must be reopened.
    pub fn is_link_lost(&self) -> bool {
        matches!(self, Error::DeviceUnavailable { .. } | Error::Io(_))
    }
}

/// Result type alias using gmc-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unavailable("/dev/ttyUSB0", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "Device unavailable on /dev/ttyUSB0: No such file or directory"
        );

        let err = Error::timeout("GETCPM", Duration::from_secs(3));
        assert!(err.to_string().contains("GETCPM"));
        assert!(err.to_string().contains("3s"));

        let err = Error::SyncFailed("no ack".to_string());
        assert_eq!(err.to_string(), "Clock sync failed: no ack");
    }

    #[test]
    fn test_protocol_error_keeps_source() {
        use std::error::Error as _;

        let err = Error::protocol(
            "GETCPM",
            ParseError::InsufficientBytes {
                expected: 2,
                actual: 1,
            },
        );
        assert!(err.to_string().contains("expected 2, got 1"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_is_link_lost() {
        assert!(Error::unavailable("/dev/ttyUSB0", "gone").is_link_lost());
        assert!(Error::Io(std::io::Error::other("broken pipe")).is_link_lost());
        assert!(!Error::timeout("GETCPM", Duration::from_secs(1)).is_link_lost());
        assert!(!Error::SyncFailed("nak".into()).is_link_lost());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
