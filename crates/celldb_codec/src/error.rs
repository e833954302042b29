//! Error types for the codec crate.

use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding to or decoding from a stream.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A boolean byte other than 0 or 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    /// A length prefix is negative or exceeds the allowed maximum.
    #[error("length {claimed} exceeds maximum of {max_allowed}")]
    SizeLimitExceeded {
        /// The length announced by the stream.
        claimed: i64,
        /// The maximum length accepted.
        max_allowed: i64,
    },
}

impl CodecError {
    /// Maps an I/O error, turning a short read into [`CodecError::UnexpectedEof`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(err)
        }
    }
}
