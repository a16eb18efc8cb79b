//! Inspect command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use imstore_core::checkpoint::{summarize, CheckpointSummary};
use serde::Serialize;

use super::blocks::{scan_all, BlockReport};

/// Storage inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage root.
    pub path: String,
    /// Number of block files.
    pub block_count: usize,
    /// Total size of block files in bytes.
    pub total_size: u64,
    /// Valid records across all blocks.
    pub record_count: u64,
    /// Valid records by command name.
    pub by_command: BTreeMap<String, u64>,
    /// Checkpoint high-water mark.
    pub checkpoint_high_water: Option<i64>,
    /// Peer chain heads in the checkpoint.
    pub peer_index_entries: u64,
    /// Group chain heads in the checkpoint.
    pub group_index_entries: u64,
    /// Peer ack cursors in the checkpoint.
    pub peer_received_entries: u64,
    /// Member ack cursors in the checkpoint.
    pub group_received_entries: u64,
    /// Per-block details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<BlockReport>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_blocks: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_blocks)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Gathers statistics for a storage root.
pub fn inspect(path: &Path, show_blocks: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No storage found at {}", path.display()).into());
    }
    let reports = scan_all(path)?;
    let checkpoint: CheckpointSummary = summarize(path)?;

    let mut by_command = BTreeMap::new();
    for report in &reports {
        for (name, count) in &report.by_command {
            *by_command.entry(name.clone()).or_insert(0) += count;
        }
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        block_count: reports.len(),
        total_size: reports.iter().map(|r| r.size).sum(),
        record_count: reports.iter().map(|r| r.records).sum(),
        by_command,
        checkpoint_high_water: checkpoint.high_water,
        peer_index_entries: checkpoint.peers,
        group_index_entries: checkpoint.groups,
        peer_received_entries: checkpoint.peer_cursors,
        group_received_entries: checkpoint.member_cursors,
        blocks: show_blocks.then_some(reports),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Storage: {}", result.path);
    println!();
    println!("Blocks:      {}", result.block_count);
    println!("Total size:  {} bytes", result.total_size);
    println!("Records:     {}", result.record_count);
    for (name, count) in &result.by_command {
        println!("  {name:<28} {count}");
    }
    println!();
    match result.checkpoint_high_water {
        Some(high_water) => println!("Checkpoint at id {high_water}"),
        None => println!("No checkpoint"),
    }
    println!("  peer index       {}", result.peer_index_entries);
    println!("  group index      {}", result.group_index_entries);
    println!("  peer received    {}", result.peer_received_entries);
    println!("  group received   {}", result.group_received_entries);

    if let Some(blocks) = &result.blocks {
        println!();
        println!("{:>8} {:>12} {:>10} {:>10}  status", "block", "size", "records", "padding");
        for block in blocks {
            let status = match &block.error {
                None => "ok".to_string(),
                Some(err) => format!("bad at {}: {}", err.offset, err.reason),
            };
            println!(
                "{:>8} {:>12} {:>10} {:>10}  {}",
                block.block, block.size, block.records, block.padding, status
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::{ImMessage, Message};
    use imstore_core::{Storage, StorageConfig};
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_blocks_and_checkpoint() {
        let tmp = tempdir().unwrap();
        {
            let storage = Storage::open(tmp.path(), StorageConfig::default()).unwrap();
            for n in 0..5 {
                let im = Message::im(ImMessage {
                    msgid: n,
                    ..ImMessage::default()
                });
                storage.save_peer_message(1, n.into(), 0, &im).unwrap();
            }
            storage.close().unwrap();
        }

        let result = inspect(tmp.path(), true).unwrap();
        assert_eq!(result.block_count, 1);
        assert_eq!(result.record_count, 10);
        assert_eq!(result.by_command["IM"], 5);
        assert!(result.checkpoint_high_water.is_some());
        assert_eq!(result.peer_index_entries, 5);
        assert_eq!(result.blocks.as_ref().map(Vec::len), Some(1));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["record_count"], 10);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(inspect(&tmp.path().join("nope"), false).is_err());
    }
}
