//! Forward scanning over the log.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use imstore_codec::Message;
use imstore_storage::{FileBackend, StorageBackend, StorageError};
use tracing::{debug, warn};

use super::record::{check_block_header, read_record, zero_run, RecordRead, HEADER_SIZE};
use crate::dir::block_file_path;
use crate::error::CoreResult;
use crate::types::RecordPos;

/// Iterator over `(id, message)` from a starting id to the end of the log.
///
/// The scanner opens its own read-only handles, each sized when opened, so a
/// block being appended to concurrently is seen as a consistent prefix. Zero
/// padding between records is stepped over. Any other record that fails
/// validation ends its block; scanning continues with the next block file if
/// one exists.
pub struct LogScanner {
    root: PathBuf,
    block_size: u64,
    pos: RecordPos,
    current: Option<FileBackend>,
    done: bool,
}

impl LogScanner {
    /// Creates a scanner starting at `from_id`.
    #[must_use]
    pub fn new(root: &Path, block_size: u64, from_id: i64) -> Self {
        let mut pos = RecordPos::from_id(from_id, block_size);
        pos.offset = pos.offset.max(HEADER_SIZE);
        Self {
            root: root.to_path_buf(),
            block_size,
            pos,
            current: None,
            done: false,
        }
    }

    /// Id of the next record the scanner will look at.
    #[must_use]
    pub fn next_id(&self) -> i64 {
        self.pos.to_id(self.block_size)
    }

    /// Block the scanner is positioned in.
    #[must_use]
    pub fn block(&self) -> u32 {
        self.pos.block
    }

    fn advance_block(&mut self) {
        let next = self.pos.block + 1;
        if block_file_path(&self.root, next).exists() {
            self.pos = RecordPos {
                block: next,
                offset: HEADER_SIZE,
            };
            self.current = None;
        } else {
            self.done = true;
        }
    }

    fn open_current(&mut self) -> CoreResult<bool> {
        let path = block_file_path(&self.root, self.pos.block);
        let block = match FileBackend::open_read_only(&path) {
            Ok(block) => block,
            Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let header_ok = block.size()? >= HEADER_SIZE
            && check_block_header(&block.read_at(0, HEADER_SIZE as usize)?).is_ok();
        if !header_ok {
            warn!(block = self.pos.block, "skipping block with bad header");
            self.advance_block();
            return Ok(true);
        }
        self.current = Some(block);
        Ok(true)
    }

    fn step(&mut self) -> CoreResult<Option<(i64, Message)>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.current.is_none() {
                if !self.open_current()? {
                    self.done = true;
                }
                continue;
            }
            let Some(block) = self.current.as_ref() else {
                continue;
            };
            match read_record(block, self.pos.offset)? {
                RecordRead::Record(message, len) => {
                    let id = self.pos.to_id(self.block_size);
                    self.pos.offset += len as u64;
                    return Ok(Some((id, message)));
                }
                RecordRead::End => self.advance_block(),
                RecordRead::Invalid(reason) => {
                    let padding = zero_run(block, self.pos.offset)?;
                    if padding > 0 {
                        debug!(
                            block = self.pos.block,
                            offset = self.pos.offset,
                            padding,
                            "skipping zero padding"
                        );
                        self.pos.offset += padding;
                        continue;
                    }
                    warn!(
                        block = self.pos.block,
                        offset = self.pos.offset,
                        %reason,
                        "scan stopped at invalid record"
                    );
                    self.advance_block();
                }
            }
        }
    }
}

impl Iterator for LogScanner {
    type Item = CoreResult<(i64, Message)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
