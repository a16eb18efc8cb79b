//! Index checkpoint files.
//!
//! A checkpoint is an optimization: the log is always enough to rebuild the
//! index. Each data file is a headerless run of fixed-size big-endian records
//! sorted by key. The meta file is written last and names the log position
//! the snapshot was taken at.
//!
//! | file | record | fields |
//! |---|---|---|
//! | `peer_index.v3` | 56 | appid, uid, last_msgid, last_id, last_peer_id, last_batch_id, last_seq_id |
//! | `group_index.v3` | 32 | appid, gid, last_id, last_msgid |
//! | `peer_received.v1` | 32 | appid, uid, device_id, msgid |
//! | `group_received.v1` | 40 | appid, gid, uid, device_id, msgid |
//! | `index_checkpoint` | 16 | MAGIC u32, FORMAT_VERSION u32, high_water i64 |
//!
//! A checkpoint that fails validation is treated as absent.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::block::{FORMAT_VERSION, MAGIC};
use crate::dir::StorageDir;
use crate::error::CoreResult;
use crate::group::GroupHead;
use crate::index::IndexState;
use crate::peer::UserIndex;
use crate::types::{DeviceKey, GroupKey, MemberKey, UserKey};

/// Peer chain heads.
pub const PEER_INDEX_FILE: &str = "peer_index.v3";
/// Group chain heads.
pub const GROUP_INDEX_FILE: &str = "group_index.v3";
/// Durable peer ack cursors.
pub const PEER_RECEIVED_FILE: &str = "peer_received.v1";
/// Durable member ack cursors.
pub const GROUP_RECEIVED_FILE: &str = "group_received.v1";
/// Meta record, written last.
pub const META_FILE: &str = "index_checkpoint";

const PEER_RECORD: usize = 56;
const GROUP_RECORD: usize = 32;
const PEER_RECEIVED_RECORD: usize = 32;
const GROUP_RECEIVED_RECORD: usize = 40;
const META_RECORD: usize = 16;

/// Writes a checkpoint of `state` taken at log position `high_water`.
///
/// Pending ack cursors are not included.
pub fn save(dir: &StorageDir, state: &IndexState, high_water: i64) -> CoreResult<()> {
    let mut peers: Vec<_> = state.peers.iter().collect();
    peers.sort_unstable_by_key(|(k, _)| **k);
    let mut buf = Vec::with_capacity(peers.len() * PEER_RECORD);
    for (key, ui) in &peers {
        put(&mut buf, &[
            key.appid,
            key.uid,
            ui.last_msgid,
            ui.last_id,
            ui.last_peer_id,
            ui.last_batch_id,
            ui.last_seq_id,
        ]);
    }
    dir.write_file_atomic(PEER_INDEX_FILE, &buf)?;

    let mut groups: Vec<_> = state.groups.iter().collect();
    groups.sort_unstable_by_key(|(k, _)| **k);
    let mut buf = Vec::with_capacity(groups.len() * GROUP_RECORD);
    for (key, head) in &groups {
        put(&mut buf, &[key.appid, key.gid, head.last_id, head.last_msgid]);
    }
    dir.write_file_atomic(GROUP_INDEX_FILE, &buf)?;

    let mut received: Vec<_> = state.received.peers().collect();
    received.sort_unstable_by_key(|(k, _)| **k);
    let mut buf = Vec::with_capacity(received.len() * PEER_RECEIVED_RECORD);
    for (key, msgid) in &received {
        put(&mut buf, &[key.appid, key.uid, key.device_id, **msgid]);
    }
    dir.write_file_atomic(PEER_RECEIVED_FILE, &buf)?;

    let mut members: Vec<_> = state.received.members().collect();
    members.sort_unstable_by_key(|(k, _)| **k);
    let mut buf = Vec::with_capacity(members.len() * GROUP_RECEIVED_RECORD);
    for (key, msgid) in &members {
        put(&mut buf, &[key.appid, key.gid, key.uid, key.device_id, **msgid]);
    }
    dir.write_file_atomic(GROUP_RECEIVED_FILE, &buf)?;
    // Data file renames must be durable before the meta file names them.
    dir.sync_directory()?;

    let mut meta = Vec::with_capacity(META_RECORD);
    meta.extend_from_slice(&MAGIC.to_be_bytes());
    meta.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    meta.extend_from_slice(&high_water.to_be_bytes());
    dir.write_file_atomic(META_FILE, &meta)?;
    dir.sync_directory()?;

    info!(
        high_water,
        peers = peers.len(),
        groups = groups.len(),
        peer_cursors = received.len(),
        member_cursors = members.len(),
        "index checkpoint written"
    );
    Ok(())
}

/// Reads the meta file. `None` if it is missing or malformed.
pub fn read_meta(dir: &StorageDir) -> CoreResult<Option<i64>> {
    let Some(data) = dir.read_file(META_FILE)? else {
        return Ok(None);
    };
    Ok(parse_meta(&data))
}

fn parse_meta(data: &[u8]) -> Option<i64> {
    if data.len() != META_RECORD {
        warn!(len = data.len(), "checkpoint meta has wrong length");
        return None;
    }
    let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if magic != MAGIC || version != FORMAT_VERSION {
        warn!(magic, version, "checkpoint meta has wrong magic or version");
        return None;
    }
    Some(read_i64(&data[8..16]))
}

/// Entry counts of the checkpoint under a root, read without taking the
/// storage lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointSummary {
    /// High-water mark, `None` without a valid meta file.
    pub high_water: Option<i64>,
    /// Peer chain heads.
    pub peers: u64,
    /// Group chain heads.
    pub groups: u64,
    /// Peer ack cursors.
    pub peer_cursors: u64,
    /// Member ack cursors.
    pub member_cursors: u64,
}

/// Summarizes the checkpoint files under `root`.
pub fn summarize(root: &Path) -> CoreResult<CheckpointSummary> {
    let count = |name: &str, record: usize| -> CoreResult<u64> {
        match fs::metadata(root.join(name)) {
            Ok(meta) => Ok(meta.len() / record as u64),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    };
    let high_water = match fs::read(root.join(META_FILE)) {
        Ok(data) => parse_meta(&data),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };
    Ok(CheckpointSummary {
        high_water,
        peers: count(PEER_INDEX_FILE, PEER_RECORD)?,
        groups: count(GROUP_INDEX_FILE, GROUP_RECORD)?,
        peer_cursors: count(PEER_RECEIVED_FILE, PEER_RECEIVED_RECORD)?,
        member_cursors: count(GROUP_RECEIVED_FILE, GROUP_RECEIVED_RECORD)?,
    })
}

/// Loads a checkpoint. Returns the state and its high-water mark, or `None`
/// if there is no usable checkpoint for a log whose next id is `next_id`.
///
/// Every peer and group chain head must name a record below `next_id`. Ack
/// cursors hold client-supplied message ids and are not checked.
pub fn load(dir: &StorageDir, next_id: i64) -> CoreResult<Option<(IndexState, i64)>> {
    let Some(high_water) = read_meta(dir)? else {
        debug!("no checkpoint");
        return Ok(None);
    };
    if high_water > next_id {
        warn!(high_water, next_id, "checkpoint is ahead of the log, ignoring it");
        return Ok(None);
    }

    let mut state = IndexState::new();

    let Some(data) = read_records(dir, PEER_INDEX_FILE, PEER_RECORD)? else {
        return Ok(None);
    };
    for r in data.chunks_exact(PEER_RECORD) {
        let v = fields::<7>(r);
        state.peers.insert(
            UserKey::new(v[0], v[1]),
            UserIndex {
                last_msgid: v[2],
                last_id: v[3],
                last_peer_id: v[4],
                last_batch_id: v[5],
                last_seq_id: v[6],
            },
        );
    }

    let Some(data) = read_records(dir, GROUP_INDEX_FILE, GROUP_RECORD)? else {
        return Ok(None);
    };
    for r in data.chunks_exact(GROUP_RECORD) {
        let v = fields::<4>(r);
        state.groups.insert(
            GroupKey::new(v[0], v[1]),
            GroupHead {
                last_id: v[2],
                last_msgid: v[3],
            },
        );
    }

    // The data files may come from a later snapshot than the meta file. If
    // the log lost its tail since, their heads point past it and replay would
    // skip every record written at those ids again.
    if let Some(head) = newest_head(&state).filter(|&head| head >= next_id) {
        warn!(head, next_id, "checkpoint heads are past the end of the log, ignoring it");
        return Ok(None);
    }

    let Some(data) = read_records(dir, PEER_RECEIVED_FILE, PEER_RECEIVED_RECORD)? else {
        return Ok(None);
    };
    for r in data.chunks_exact(PEER_RECEIVED_RECORD) {
        let v = fields::<4>(r);
        let key = DeviceKey {
            appid: v[0],
            uid: v[1],
            device_id: v[2],
        };
        state.received.insert_peer(key, v[3]);
    }

    let Some(data) = read_records(dir, GROUP_RECEIVED_FILE, GROUP_RECEIVED_RECORD)? else {
        return Ok(None);
    };
    for r in data.chunks_exact(GROUP_RECEIVED_RECORD) {
        let v = fields::<5>(r);
        let key = MemberKey {
            appid: v[0],
            gid: v[1],
            uid: v[2],
            device_id: v[3],
        };
        state.received.insert_member(key, v[4]);
    }

    info!(
        high_water,
        peers = state.peers.len(),
        groups = state.groups.len(),
        "index checkpoint loaded"
    );
    Ok(Some((state, high_water)))
}

fn newest_head(state: &IndexState) -> Option<i64> {
    let peers = state.peers.iter().flat_map(|(_, ui)| {
        [ui.last_msgid, ui.last_id, ui.last_peer_id, ui.last_batch_id]
    });
    let groups = state
        .groups
        .iter()
        .flat_map(|(_, head)| [head.last_id, head.last_msgid]);
    peers.chain(groups).max()
}

fn read_records(dir: &StorageDir, name: &str, record: usize) -> CoreResult<Option<Vec<u8>>> {
    let Some(data) = dir.read_file(name)? else {
        warn!(file = name, "checkpoint file missing");
        return Ok(None);
    };
    if data.len() % record != 0 {
        warn!(file = name, len = data.len(), record, "checkpoint file has a partial record");
        return Ok(None);
    }
    Ok(Some(data))
}

fn put(buf: &mut Vec<u8>, values: &[i64]) {
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(raw)
}

fn fields<const N: usize>(record: &[u8]) -> [i64; N] {
    let mut out = [0i64; N];
    for (i, chunk) in record.chunks_exact(8).take(N).enumerate() {
        out[i] = read_i64(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::{GroupAck, Message, OfflineMessage, PeerAck};
    use tempfile::tempdir;

    fn sample_state() -> IndexState {
        let mut state = IndexState::new();
        for (i, uid) in [5, 3, 9].into_iter().enumerate() {
            let off = OfflineMessage {
                appid: 1,
                receiver: uid,
                msgid: 100 + i as i64,
                ..OfflineMessage::default()
            };
            state.exec_message(200 + i as i64, &Message::offline(off));
            state.exec_message(300 + i as i64, &Message::group_offline(off));
        }
        state.exec_message(
            400,
            &Message::peer_ack(PeerAck {
                appid: 1,
                uid: 5,
                device_id: 2,
                msgid: 100,
            }),
        );
        state.exec_message(
            401,
            &Message::group_ack(GroupAck {
                appid: 1,
                gid: 3,
                uid: 5,
                device_id: 2,
                msgid: 101,
            }),
        );
        state
    }

    #[test]
    fn save_then_load() {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::open(tmp.path(), true).unwrap();
        let state = sample_state();
        save(&dir, &state, 500).unwrap();

        let (loaded, high_water) = load(&dir, 500).unwrap().unwrap();
        assert_eq!(high_water, 500);
        assert_eq!(loaded, state);

        let peer = std::fs::read(tmp.path().join(PEER_INDEX_FILE)).unwrap();
        assert_eq!(peer.len(), 3 * PEER_RECORD);
        assert_eq!(read_i64(&peer[8..16]), 3);
    }

    #[test]
    fn ahead_of_log_is_ignored() {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::open(tmp.path(), true).unwrap();
        save(&dir, &sample_state(), 500).unwrap();
        assert!(load(&dir, 499).unwrap().is_none());
    }

    #[test]
    fn save_publishes_every_file() {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::open(tmp.path(), true).unwrap();
        save(&dir, &sample_state(), 500).unwrap();
        save(&dir, &sample_state(), 600).unwrap();
        for name in [
            PEER_INDEX_FILE,
            GROUP_INDEX_FILE,
            PEER_RECEIVED_FILE,
            GROUP_RECEIVED_FILE,
            META_FILE,
        ] {
            assert!(tmp.path().join(name).is_file(), "{name}");
            assert!(!tmp.path().join(format!("{name}.tmp")).exists(), "{name}");
        }
        assert_eq!(read_meta(&dir).unwrap(), Some(600));
    }

    #[test]
    fn heads_past_the_log_are_ignored() {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::open(tmp.path(), true).unwrap();
        // Highest head in the sample is the group record at 302.
        save(&dir, &sample_state(), 100).unwrap();
        assert!(load(&dir, 302).unwrap().is_none());
        assert!(load(&dir, 303).unwrap().is_some());
    }

    #[test]
    fn partial_record_is_ignored() {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::open(tmp.path(), true).unwrap();
        save(&dir, &sample_state(), 500).unwrap();
        let path = tmp.path().join(GROUP_INDEX_FILE);
        let mut data = std::fs::read(&path).unwrap();
        data.pop();
        std::fs::write(&path, data).unwrap();
        assert!(load(&dir, 500).unwrap().is_none());
    }

    #[test]
    fn missing_meta_or_data_is_ignored() {
        let tmp = tempdir().unwrap();
        let dir = StorageDir::open(tmp.path(), true).unwrap();
        assert!(load(&dir, 0).unwrap().is_none());

        save(&dir, &sample_state(), 10).unwrap();
        std::fs::remove_file(tmp.path().join(PEER_RECEIVED_FILE)).unwrap();
        assert!(load(&dir, 10).unwrap().is_none());

        std::fs::write(tmp.path().join(META_FILE), b"short").unwrap();
        assert_eq!(read_meta(&dir).unwrap(), None);
    }

    #[test]
    fn summary_counts_entries() {
        let tmp = tempdir().unwrap();
        assert_eq!(summarize(tmp.path()).unwrap(), CheckpointSummary::default());

        let dir = StorageDir::open(tmp.path(), true).unwrap();
        save(&dir, &sample_state(), 500).unwrap();
        let summary = summarize(tmp.path()).unwrap();
        assert_eq!(summary.high_water, Some(500));
        assert_eq!(summary.peers, 3);
        assert_eq!(summary.groups, 3);
        assert_eq!(summary.peer_cursors, 1);
        assert_eq!(summary.member_cursors, 1);
    }
}
