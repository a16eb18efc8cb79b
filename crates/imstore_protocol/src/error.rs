//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing or parsing RPC messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("cbor encode failed: {message}")]
    Encode {
        /// Underlying error text.
        message: String,
    },

    /// CBOR deserialization failed.
    #[error("cbor decode failed: {message}")]
    Decode {
        /// Underlying error text.
        message: String,
    },

    /// The frame type byte is not a known request or response.
    #[error("unknown frame type {code}")]
    UnknownType {
        /// The type byte.
        code: u8,
    },

    /// A frame exceeds the size limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Fewer bytes than the frame header requires.
    #[error("truncated frame: needed {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },
}

impl ProtocolError {
    pub(crate) fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode {
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}
