//! Benchmark utilities.

use imstore_codec::{ImMessage, Message};
use imstore_core::{Storage, StorageConfig};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tempfile::TempDir;

/// Random alphanumeric text of `len` characters.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A peer IM with `content_len` characters of text.
pub fn im(msgid: i32, content_len: usize) -> Message {
    Message::im(ImMessage {
        sender: 1,
        receiver: 2,
        timestamp: 1_700_000_000,
        msgid,
        content: random_text(content_len),
    })
}

/// A group IM with `content_len` characters of text.
pub fn group_im(gid: i64, msgid: i32, content_len: usize) -> Message {
    Message::group_im(ImMessage {
        sender: 1,
        receiver: gid,
        timestamp: 1_700_000_000,
        msgid,
        content: random_text(content_len),
    })
}

/// Opens a fresh storage in a temporary directory.
pub fn temp_storage() -> (TempDir, Storage) {
    let dir = TempDir::new().unwrap();
    let storage = Storage::open(dir.path(), StorageConfig::default()).unwrap();
    (dir, storage)
}

/// Saves `count` peer messages for user `(appid, uid)`. Returns their ids.
pub fn populate_peer(storage: &Storage, appid: i64, uid: i64, count: usize) -> Vec<i64> {
    (0..count)
        .map(|n| {
            storage
                .save_peer_message(appid, uid, 1, &im(n as i32, 64))
                .unwrap()
                .0
        })
        .collect()
}
