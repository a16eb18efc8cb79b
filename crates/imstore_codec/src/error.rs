//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a complete value was read.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the field being read.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// No decoder is registered for the command.
    #[error("unknown command {cmd}")]
    UnknownCommand {
        /// The command byte.
        cmd: u8,
    },

    /// Text content was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A fixed-size body had bytes left over after decoding.
    #[error("{extra} trailing bytes after {cmd} body")]
    TrailingBytes {
        /// The command byte.
        cmd: u8,
        /// Number of unread bytes.
        extra: usize,
    },

    /// A frame length is out of range for its container.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Length of the frame.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The value cannot be encoded.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// The bytes are structurally invalid.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Returns true if more input could make the decode succeed.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::UnexpectedEof { .. })
    }
}
