//! Read-only walk over block files, shared by `inspect` and `verify`.

use std::collections::BTreeMap;
use std::path::Path;

use imstore_codec::command::command_name;
use imstore_core::block::{check_block_header, read_record, zero_run, RecordRead, HEADER_SIZE};
use imstore_core::dir::{block_file_path, list_blocks};
use imstore_storage::{FileBackend, StorageBackend};
use serde::Serialize;

/// What a walk over one block found.
#[derive(Debug, Serialize)]
pub struct BlockReport {
    /// Block number.
    pub block: u32,
    /// File size in bytes.
    pub size: u64,
    /// Valid records.
    pub records: u64,
    /// Valid records by command name.
    pub by_command: BTreeMap<String, u64>,
    /// Zero bytes left by replica padding.
    pub padding: u64,
    /// First bad offset and why, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BlockError>,
}

/// First problem found in a block.
#[derive(Debug, Serialize)]
pub struct BlockError {
    /// Offset in the block file.
    pub offset: u64,
    /// Description.
    pub reason: String,
}

impl BlockReport {
    /// True if the block has no error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Walks every block under `root`, in order.
pub fn scan_all(root: &Path) -> Result<Vec<BlockReport>, Box<dyn std::error::Error>> {
    let mut reports = Vec::new();
    for block in list_blocks(root)? {
        reports.push(scan_block(root, block)?);
    }
    Ok(reports)
}

/// Walks one block, stopping at the first invalid record.
pub fn scan_block(root: &Path, block: u32) -> Result<BlockReport, Box<dyn std::error::Error>> {
    let backend = FileBackend::open_read_only(&block_file_path(root, block))?;
    let size = backend.size()?;
    let mut report = BlockReport {
        block,
        size,
        records: 0,
        by_command: BTreeMap::new(),
        padding: 0,
        error: None,
    };

    let header_ok = if size < HEADER_SIZE {
        Err(format!("file of {size} bytes is shorter than the block header"))
    } else {
        let header = backend.read_at(0, HEADER_SIZE as usize)?;
        check_block_header(&header).map_err(|err| err.to_string())
    };
    if let Err(reason) = header_ok {
        report.error = Some(BlockError { offset: 0, reason });
        return Ok(report);
    }

    let mut offset = HEADER_SIZE;
    loop {
        match read_record(&backend, offset)? {
            RecordRead::Record(message, len) => {
                report.records += 1;
                *report
                    .by_command
                    .entry(command_name(message.cmd).to_string())
                    .or_default() += 1;
                offset += len as u64;
            }
            RecordRead::End => break,
            RecordRead::Invalid(reason) => {
                let padding = zero_run(&backend, offset)?;
                if padding == 0 {
                    report.error = Some(BlockError { offset, reason });
                    break;
                }
                report.padding += padding;
                offset += padding;
            }
        }
    }
    Ok(report)
}
