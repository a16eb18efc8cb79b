//! Dump log command implementation.

use std::path::Path;

use imstore_codec::command::command_name;
use imstore_core::{LogScanner, RecordPos};
use serde::Serialize;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Record id.
    pub id: i64,
    /// Block holding the record.
    pub block: u32,
    /// Offset in the block.
    pub offset: u64,
    /// Command byte.
    pub cmd: u8,
    /// Command name.
    pub command: &'static str,
    /// Body version.
    pub version: u8,
    /// Flags.
    pub flag: u8,
    /// Decoded body.
    pub body: String,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    from: i64,
    limit: Option<usize>,
    block_size: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(path, from, limit, block_size)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }
    Ok(())
}

/// Reads up to `limit` records starting at `from`.
pub fn read_records(
    path: &Path,
    from: i64,
    limit: Option<usize>,
    block_size: u64,
) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No storage found at {}", path.display()).into());
    }
    let mut records = Vec::new();
    for item in LogScanner::new(path, block_size, from).take(limit.unwrap_or(usize::MAX)) {
        let (id, message) = item?;
        let pos = RecordPos::from_id(id, block_size);
        records.push(RecordInfo {
            id,
            block: pos.block,
            offset: pos.offset,
            cmd: message.cmd,
            command: command_name(message.cmd),
            version: message.version,
            flag: message.flag,
            body: format!("{:?}", message.body),
        });
    }
    Ok(records)
}

fn print_text_output(records: &[RecordInfo]) {
    for record in records {
        println!(
            "{:>14} [{}:{}] {} v{} flag={:#04x} {}",
            record.id,
            record.block,
            record.offset,
            record.command,
            record.version,
            record.flag,
            record.body
        );
    }
    println!("{} record(s)", records.len());
}
