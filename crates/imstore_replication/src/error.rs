//! Error types for replication.

use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether reconnecting may help.
        retryable: bool,
    },

    /// The peer sent something out of protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] imstore_codec::CodecError),

    /// Applying or reading records failed.
    #[error("storage error: {0}")]
    Storage(#[from] imstore_core::CoreError),

    /// A read or connect deadline passed.
    #[error("operation timed out")]
    Timeout,

    /// A blocking task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl ReplicationError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if reconnecting may succeed. Storage errors are never
    /// retryable: the local log cannot take the stream.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Protocol(_) | Self::Codec(_) | Self::Timeout => true,
            Self::Storage(_) | Self::Task(_) => false,
        }
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        Self::transport_retryable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ReplicationError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_core::CoreError;

    #[test]
    fn retryable_errors() {
        assert!(ReplicationError::transport_retryable("reset").is_retryable());
        assert!(!ReplicationError::transport_fatal("bad address").is_retryable());
        assert!(ReplicationError::Timeout.is_retryable());
        assert!(ReplicationError::from(std::io::Error::other("eof")).is_retryable());
        let gap = CoreError::ReplicationGap {
            local_block: 0,
            record_block: 2,
        };
        assert!(!ReplicationError::from(gap).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(ReplicationError::Timeout.to_string(), "operation timed out");
        assert!(ReplicationError::Protocol("bad cmd 4".into())
            .to_string()
            .contains("bad cmd 4"));
    }
}
