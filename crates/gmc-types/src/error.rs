//! Error types for frame parsing in gmc-types.

use thiserror::Error;

/// Errors that can occur when decoding GMC device frames.
///
/// This error type is transport-agnostic and does not include serial-link
/// errors (those belong in gmc-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The frame was shorter than the command's fixed reply length.
    #[error("Insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Expected frame length.
        expected: usize,
        /// Actual number of bytes received.
        actual: usize,
    },

    /// The frame had the right length but its content is not valid.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using gmc-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
