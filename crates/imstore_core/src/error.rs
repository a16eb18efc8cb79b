//! Error types for imstore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] imstore_storage::StorageError),

    /// Message codec error.
    #[error("codec error: {0}")]
    Codec(#[from] imstore_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the storage lock.
    #[error("storage locked: another process has exclusive access")]
    StorageLocked,

    /// A block or checkpoint file is not in the expected format.
    #[error("invalid storage format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A record does not fit in an empty block.
    #[error("record of {len} bytes does not fit in a block of {block_size} bytes")]
    RecordTooLarge {
        /// Encoded record length.
        len: usize,
        /// Configured block size.
        block_size: u64,
    },

    /// A replicated record skips one or more whole blocks.
    #[error("replication gap: local block {local_block}, record in block {record_block}")]
    ReplicationGap {
        /// Block currently being written locally.
        local_block: u32,
        /// Block of the incoming record.
        record_block: u32,
    },

    /// A record has a shape the caller cannot handle.
    #[error("unexpected record at {id}: {message}")]
    UnexpectedRecord {
        /// Record id.
        id: i64,
        /// What was wrong.
        message: String,
    },

    /// Configuration failed validation.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an unexpected record error.
    pub fn unexpected_record(id: i64, message: impl Into<String>) -> Self {
        Self::UnexpectedRecord {
            id,
            message: message.into(),
        }
    }

    /// Creates an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true for errors that mean the log or its replica is inconsistent.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::RecordTooLarge { .. }
                | Self::ReplicationGap { .. }
                | Self::UnexpectedRecord { .. }
                | Self::InvalidFormat { .. }
        )
    }
}
