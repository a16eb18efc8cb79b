//! Error types for block storage.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing a block.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the block.
    #[error("read beyond end of block: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current block size.
        size: u64,
    },

    /// A write was attempted through a read-only handle.
    #[error("block opened read-only: {}", path.display())]
    ReadOnly {
        /// Path of the block file.
        path: PathBuf,
    },

    /// Truncation past the current end.
    #[error("cannot truncate to {requested} bytes, block holds {size}")]
    InvalidTruncate {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },
}

impl StorageError {
    /// Returns true if the error only means "no bytes there yet".
    ///
    /// Readers probing the tail of a block treat this as end of data rather
    /// than a failure.
    #[must_use]
    pub fn is_end_of_data(&self) -> bool {
        match self {
            Self::ReadPastEnd { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
