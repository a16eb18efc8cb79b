//! Checkpoint and rebuild must agree on the index state.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use imstore_codec::{ImMessage, Message};
use imstore_core::checkpoint::META_FILE;
use imstore_core::{IndexState, Storage, StorageConfig};
use tempfile::tempdir;

const BLOCK: u64 = 8192;

fn config() -> StorageConfig {
    StorageConfig::default().block_size(BLOCK)
}

fn im(n: i32) -> Message {
    Message::im(ImMessage {
        sender: 9,
        receiver: i64::from(n % 4),
        timestamp: n,
        msgid: n,
        content: format!("message {n}"),
    })
}

fn write_traffic(storage: &Storage, from: i32, to: i32) {
    for n in from..to {
        let uid = i64::from(n % 4);
        let (msgid, _) = storage.save_peer_message(1, uid, 0, &im(n)).unwrap();
        if n % 5 == 0 {
            storage.save_group_message(1, 77, 0, &im(n)).unwrap();
        }
        if n % 7 == 0 {
            storage
                .save_peer_group_message(1, &[uid, uid + 10], 0, &im(n))
                .unwrap();
        }
        if n % 3 == 0 {
            storage.dequeue_message(1, uid, 1, msgid);
            storage.dequeue_group_message(1, 77, uid, 1, msgid);
        }
        if n % 50 == 0 {
            storage.flush_received().unwrap();
        }
    }
    storage.flush_received().unwrap();
}

fn reopen(path: &Path) -> IndexState {
    Storage::open(path, config()).unwrap().index_snapshot()
}

#[test]
fn checkpoint_repair_equals_rebuild() {
    let tmp = tempdir().unwrap();
    let expected = {
        let storage = Storage::open(tmp.path(), config()).unwrap();
        write_traffic(&storage, 0, 150);
        storage.checkpoint().unwrap();
        // Records after the checkpoint are recovered by replay.
        write_traffic(&storage, 150, 300);
        storage.index_snapshot()
    };
    assert!(expected.peers.len() > 1);

    let repaired = reopen(tmp.path());
    assert_eq!(repaired, expected);

    std::fs::remove_file(tmp.path().join(META_FILE)).unwrap();
    let rebuilt = reopen(tmp.path());
    assert_eq!(rebuilt, expected);
}

#[test]
fn close_writes_a_usable_checkpoint() {
    let tmp = tempdir().unwrap();
    let expected = {
        let storage = Storage::open(tmp.path(), config()).unwrap();
        write_traffic(&storage, 0, 100);
        storage.dequeue_message(1, 0, 1, i64::MAX - 1);
        storage.close().unwrap();
        storage.index_snapshot()
    };
    assert!(expected
        .received
        .peers()
        .any(|(_, &msgid)| msgid == i64::MAX - 1));
    assert_eq!(reopen(tmp.path()), expected);
}

#[test]
fn data_files_newer_than_meta_still_recover() {
    let tmp = tempdir().unwrap();
    let storage = Storage::open(tmp.path(), config()).unwrap();
    write_traffic(&storage, 0, 60);
    storage.checkpoint().unwrap();
    let old_meta = std::fs::read(tmp.path().join(META_FILE)).unwrap();
    write_traffic(&storage, 60, 120);
    storage.checkpoint().unwrap();
    let expected = storage.index_snapshot();
    drop(storage);

    // Crash between the data files and the meta file of the second checkpoint.
    std::fs::write(tmp.path().join(META_FILE), old_meta).unwrap();
    assert_eq!(reopen(tmp.path()), expected);
}

#[test]
fn torn_tail_falls_back_to_rebuild() {
    let tmp = tempdir().unwrap();
    {
        let storage = Storage::open(tmp.path(), config()).unwrap();
        write_traffic(&storage, 0, 200);
        storage.close().unwrap();
    }
    let blocks: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("message_"))
        .collect();
    let last = blocks
        .iter()
        .filter_map(|name| name.trim_start_matches("message_").parse::<u32>().ok())
        .max()
        .unwrap();
    assert!(last > 0);
    let mut file = OpenOptions::new()
        .append(true)
        .open(tmp.path().join(format!("message_{last}")))
        .unwrap();
    file.write_all(b"torn").unwrap();
    drop(file);

    // The last block is cut back to its header, which puts the checkpoint
    // ahead of the log, so the index is rebuilt from what is left.
    let storage = Storage::open(tmp.path(), config()).unwrap();
    let position = storage.position();
    assert_eq!(position.block, last);
    assert_eq!(position.offset, 32);
    let rebuilt = storage.index_snapshot();
    drop(storage);

    std::fs::remove_file(tmp.path().join(META_FILE)).unwrap();
    assert_eq!(reopen(tmp.path()), rebuilt);
}

#[test]
fn checkpoint_past_a_torn_tail_is_rebuilt() {
    let tmp = tempdir().unwrap();
    let storage = Storage::open(tmp.path(), config()).unwrap();
    for n in 0..5 {
        storage.save_peer_message(1, 2, 0, &im(n)).unwrap();
    }
    storage.checkpoint().unwrap();
    let old_meta = std::fs::read(tmp.path().join(META_FILE)).unwrap();

    let mut n = 5;
    while storage.position().block == 0 {
        storage.save_peer_message(1, 2, 0, &im(n)).unwrap();
        n += 1;
    }
    for _ in 0..3 {
        storage.save_peer_message(1, 2, 0, &im(n)).unwrap();
        n += 1;
    }
    storage.checkpoint().unwrap();
    drop(storage);

    // The second checkpoint published its data files but not its meta file,
    // then block 1 was torn. The heads now point past the end of the log.
    std::fs::write(tmp.path().join(META_FILE), old_meta).unwrap();
    let mut file = OpenOptions::new()
        .append(true)
        .open(tmp.path().join("message_1"))
        .unwrap();
    file.write_all(b"torn").unwrap();
    drop(file);

    let storage = Storage::open(tmp.path(), config()).unwrap();
    assert_eq!(storage.position().block, 1);
    assert_eq!(storage.position().offset, 32);
    let head = storage.user_index(1, 2).unwrap();
    assert!(head.last_id < storage.next_id());

    let (fresh, _) = storage.save_peer_message(1, 2, 0, &im(n)).unwrap();
    let sync = storage.sync_history(1, 2, 0, 3000, 0).unwrap();
    assert_eq!(sync.messages.last().map(|m| m.msgid), Some(fresh));
    let expected = storage.index_snapshot();
    drop(storage);

    std::fs::remove_file(tmp.path().join(META_FILE)).unwrap();
    assert_eq!(reopen(tmp.path()), expected);
}
