//! The writable block store.

use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use imstore_codec::Message;
use imstore_storage::{FileBackend, StorageBackend, StorageError};
use lru::LruCache;
use tracing::{debug, error, info, warn};

use super::record::{
    block_header, check_block_header, encode_record, read_record, RecordRead, HEADER_SIZE, MAGIC,
};
use super::scan::LogScanner;
use super::RecordSource;
use crate::dir::{block_file_path, list_blocks};
use crate::error::{CoreError, CoreResult};
use crate::types::RecordPos;

/// Single-writer append log over numbered block files.
///
/// Reads of the block being written go through the write handle. Sealed
/// blocks are read through an LRU of read-only handles; evicted handles are
/// closed.
pub struct BlockStore {
    root: PathBuf,
    block_size: u64,
    block_no: u32,
    write_offset: u64,
    writer: FileBackend,
    readers: LruCache<u32, FileBackend>,
    dirty: bool,
}

impl BlockStore {
    /// Opens the log under `root`, creating block 0 if there is none.
    ///
    /// The highest block is checked: an incomplete header is rewritten and a
    /// torn tail truncates the block to its header.
    pub fn open(root: &Path, block_size: u64, read_cache_size: usize) -> CoreResult<Self> {
        let blocks = list_blocks(root)?;
        for &block in &blocks {
            let len = fs::metadata(block_file_path(root, block))?.len();
            if len > block_size {
                return Err(CoreError::invalid_format(format!(
                    "block {block} is {len} bytes, larger than block size {block_size}"
                )));
            }
        }
        let block_no = blocks.last().copied().unwrap_or(0);
        let writer = FileBackend::open(&block_file_path(root, block_no))?;
        let capacity = NonZeroUsize::new(read_cache_size).unwrap_or(NonZeroUsize::MIN);

        let mut store = Self {
            root: root.to_path_buf(),
            block_size,
            block_no,
            write_offset: 0,
            writer,
            readers: LruCache::new(capacity),
            dirty: false,
        };
        store.check_write_block()?;
        info!(
            blocks = blocks.len().max(1),
            block = store.block_no,
            offset = store.write_offset,
            "block store opened"
        );
        Ok(store)
    }

    fn check_write_block(&mut self) -> CoreResult<()> {
        let size = self.writer.size()?;
        if size < HEADER_SIZE {
            if size > 0 {
                warn!(block = self.block_no, size, "rewriting incomplete block header");
                self.writer.truncate(0)?;
            }
            self.writer.append(&block_header())?;
            self.writer.sync()?;
            self.write_offset = HEADER_SIZE;
            return Ok(());
        }

        let header = self.writer.read_at(0, HEADER_SIZE as usize)?;
        check_block_header(&header)?;
        self.write_offset = size;
        if size == HEADER_SIZE {
            return Ok(());
        }

        let tail = self.writer.read_at(size - 4, 4)?;
        if tail != MAGIC.to_be_bytes() {
            error!(
                block = self.block_no,
                lost_bytes = size - HEADER_SIZE,
                "torn write at block tail, truncating block to header"
            );
            self.writer.truncate(HEADER_SIZE)?;
            self.write_offset = HEADER_SIZE;
        }
        Ok(())
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured block size.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Block currently being written.
    #[must_use]
    pub fn block_no(&self) -> u32 {
        self.block_no
    }

    /// Position the next record will be written at.
    #[must_use]
    pub fn position(&self) -> RecordPos {
        RecordPos {
            block: self.block_no,
            offset: self.write_offset,
        }
    }

    /// Id the next record will get, if it fits in the current block.
    #[must_use]
    pub fn next_id(&self) -> i64 {
        self.position().to_id(self.block_size)
    }

    /// Appends a message and returns its id.
    pub fn append(&mut self, message: &Message) -> CoreResult<i64> {
        let record = encode_record(message)?;
        self.append_record(&record)
    }

    fn append_record(&mut self, record: &[u8]) -> CoreResult<i64> {
        let len = record.len() as u64;
        if HEADER_SIZE + len > self.block_size {
            return Err(CoreError::RecordTooLarge {
                len: record.len(),
                block_size: self.block_size,
            });
        }
        if self.write_offset + len > self.block_size {
            self.rotate_to(self.block_no + 1)?;
        }
        self.write_at_end(record)
    }

    /// Writes raw record bytes at the current position without rotating.
    pub(crate) fn write_at_end(&mut self, record: &[u8]) -> CoreResult<i64> {
        let id = self.next_id();
        self.writer.append(record)?;
        self.write_offset += record.len() as u64;
        self.dirty = true;
        Ok(id)
    }

    /// Writes raw record bytes at `id` in the current block, zero-filling any
    /// gap before it in the same append. Returns `id`.
    pub(crate) fn write_at(&mut self, id: i64, record: &[u8]) -> CoreResult<i64> {
        let pos = RecordPos::from_id(id, self.block_size);
        if pos.block != self.block_no || pos.offset < self.write_offset {
            return Err(CoreError::unexpected_record(
                id,
                format!("cannot write behind the log end {}", self.position()),
            ));
        }
        let gap = (pos.offset - self.write_offset) as usize;
        if gap == 0 {
            return self.write_at_end(record);
        }
        let mut buf = vec![0u8; gap + record.len()];
        buf[gap..].copy_from_slice(record);
        self.writer.append(&buf)?;
        self.write_offset = pos.offset + record.len() as u64;
        self.dirty = true;
        Ok(id)
    }

    /// Seals the current block and starts block `block`.
    pub(crate) fn rotate_to(&mut self, block: u32) -> CoreResult<()> {
        self.writer.flush()?;
        self.writer.sync()?;

        let path = block_file_path(&self.root, block);
        let mut writer = FileBackend::open(&path)?;
        if writer.size()? > 0 {
            writer.truncate(0)?;
        }
        writer.append(&block_header())?;
        writer.sync()?;

        info!(from = self.block_no, to = block, "rotated block");
        self.writer = writer;
        self.block_no = block;
        self.write_offset = HEADER_SIZE;
        self.dirty = false;
        Ok(())
    }

    /// Reads the record at `id`.
    ///
    /// Returns `None` for ids outside the log and for records that fail
    /// validation. I/O errors propagate.
    pub fn read(&mut self, id: i64) -> CoreResult<Option<Message>> {
        if id <= 0 {
            return Ok(None);
        }
        let pos = RecordPos::from_id(id, self.block_size);
        if pos.offset < HEADER_SIZE || pos.block > self.block_no {
            return Ok(None);
        }

        let outcome = if pos.block == self.block_no {
            read_record(&self.writer, pos.offset)?
        } else {
            match self.sealed_reader(pos.block)? {
                Some(reader) => read_record(reader, pos.offset)?,
                None => {
                    warn!(id, block = pos.block, "block file missing");
                    return Ok(None);
                }
            }
        };

        match outcome {
            RecordRead::Record(message, _) => Ok(Some(message)),
            RecordRead::End => Ok(None),
            RecordRead::Invalid(reason) => {
                warn!(id, %reason, "invalid record");
                Ok(None)
            }
        }
    }

    fn sealed_reader(&mut self, block: u32) -> CoreResult<Option<&FileBackend>> {
        if !self.readers.contains(&block) {
            let path = block_file_path(&self.root, block);
            let reader = match FileBackend::open_read_only(&path) {
                Ok(reader) => reader,
                Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                    return Ok(None)
                }
                Err(err) => return Err(err.into()),
            };
            debug!(block, "opened read handle");
            self.readers.put(block, reader);
        }
        Ok(self.readers.get(&block))
    }

    /// Syncs the write block if anything was appended since the last flush.
    pub fn flush(&mut self) -> CoreResult<()> {
        if self.dirty {
            self.writer.flush()?;
            self.writer.sync()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// True if appends are waiting for [`flush`](Self::flush).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Scans forward from `from_id` with independent read handles.
    #[must_use]
    pub fn scan(&self, from_id: i64) -> LogScanner {
        LogScanner::new(&self.root, self.block_size, from_id)
    }
}

impl RecordSource for BlockStore {
    fn load(&mut self, id: i64) -> CoreResult<Option<Message>> {
        self.read(id)
    }
}
