//! In-memory block backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A block held entirely in memory.
///
/// Used by tests that build or corrupt blocks byte by byte, and by tools
/// that decode a block image loaded from elsewhere.
///
/// # Example
///
/// ```rust
/// use imstore_storage::{StorageBackend, InMemoryBackend};
///
/// let mut block = InMemoryBackend::new();
/// assert_eq!(block.append(b"record").unwrap(), 0);
/// assert_eq!(block.size().unwrap(), 6);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a block from existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the block contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_and_read() {
        let mut block = InMemoryBackend::new();
        assert_eq!(block.append(b"abc").unwrap(), 0);
        assert_eq!(block.append(b"def").unwrap(), 3);
        assert_eq!(block.read_at(1, 4).unwrap(), b"bcde");
    }

    #[test]
    fn read_past_end_fails() {
        let block = InMemoryBackend::with_data(b"xy".to_vec());
        assert!(block.read_at(1, 2).unwrap_err().is_end_of_data());
        assert!(block.read_at(5, 0).is_err());
    }

    #[test]
    fn truncate_bounds() {
        let mut block = InMemoryBackend::with_data(vec![1, 2, 3, 4]);
        block.truncate(2).unwrap();
        assert_eq!(block.data(), vec![1, 2]);
        assert!(block.truncate(3).is_err());
    }

    proptest! {
        #[test]
        fn offsets_are_contiguous(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64), 1..32)) {
            let mut block = InMemoryBackend::new();
            let mut expected = 0u64;
            for chunk in &chunks {
                let offset = block.append(chunk).unwrap();
                prop_assert_eq!(offset, expected);
                expected += chunk.len() as u64;
            }
            prop_assert_eq!(block.size().unwrap(), expected);
        }
    }
}
