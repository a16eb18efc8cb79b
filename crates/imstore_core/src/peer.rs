//! Peer index and offline sync.
//!
//! Every payload saved for a user is followed by an `MSG_OFFLINE` record that
//! links it into three backward chains:
//!
//! - the full chain (`prev_msgid`) through every offline record;
//! - the peer-only chain (`prev_peer_msgid`), which skips records flagged
//!   `MESSAGE_FLAG_GROUP`;
//! - the batch chain (`prev_batch_msgid`), which advances once every
//!   [`BATCH_SIZE`] records.
//!
//! [`UserIndex`] holds the head of each chain. Sync walks the batch chain to
//! skip most of a large backlog, then walks record by record.

use std::collections::HashMap;

use imstore_codec::command::{MESSAGE_FLAG_GROUP, MSG_OFFLINE, MSG_SYSTEM};
use imstore_codec::{EMessage, Message, OfflineMessage};
use tracing::{debug, warn};

use crate::block::RecordSource;
use crate::config::BATCH_SIZE;
use crate::error::CoreResult;
use crate::types::UserKey;

/// Chain heads and counters for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserIndex {
    /// Latest payload id.
    pub last_msgid: i64,
    /// Head of the full chain.
    pub last_id: i64,
    /// Head of the peer-only chain.
    pub last_peer_id: i64,
    /// Head of the batch chain.
    pub last_batch_id: i64,
    /// Number of offline records so far.
    pub last_seq_id: i64,
}

/// Per-user chain heads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIndex {
    users: HashMap<UserKey, UserIndex>,
}

impl PeerIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a user.
    #[must_use]
    pub fn get(&self, key: UserKey) -> Option<&UserIndex> {
        self.users.get(&key)
    }

    /// Number of users with at least one offline record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True if no user has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Iterates over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserKey, &UserIndex)> {
        self.users.iter()
    }

    pub(crate) fn insert(&mut self, key: UserKey, index: UserIndex) {
        self.users.insert(key, index);
    }

    /// Builds the offline record that links `msgid` into `key`'s chains.
    #[must_use]
    pub fn next_offline(&self, key: UserKey, msgid: i64, device_id: i64) -> OfflineMessage {
        let ui = self.users.get(&key).copied().unwrap_or_default();
        OfflineMessage {
            appid: key.appid,
            receiver: key.uid,
            msgid,
            device_id,
            seq_id: ui.last_seq_id + 1,
            prev_msgid: ui.last_id,
            prev_peer_msgid: ui.last_peer_id,
            prev_batch_msgid: ui.last_batch_id,
        }
    }

    /// Applies the offline record stored at `id`.
    ///
    /// Records at or below the current head are ignored, so replaying a
    /// record twice leaves the index unchanged. Returns true if applied.
    pub fn apply_offline(&mut self, id: i64, off: &OfflineMessage, flag: u8) -> bool {
        let ui = self
            .users
            .entry(UserKey::new(off.appid, off.receiver))
            .or_default();
        if id <= ui.last_id {
            return false;
        }
        ui.last_seq_id += 1;
        if ui.last_seq_id % BATCH_SIZE == 0 {
            ui.last_batch_id = id;
        }
        if flag & MESSAGE_FLAG_GROUP == 0 {
            ui.last_peer_id = id;
        }
        ui.last_id = id;
        ui.last_msgid = off.msgid;
        true
    }
}

/// Result of an offline sync.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncResult {
    /// Messages, oldest first.
    pub messages: Vec<EMessage>,
    /// Cursor to pass to the next call.
    pub last_msgid: i64,
    /// True if the walk stopped short of the newest record.
    pub has_more: bool,
}

fn load_offline(
    src: &mut impl RecordSource,
    id: i64,
) -> CoreResult<Option<(OfflineMessage, u8)>> {
    let Some(message) = src.load(id)? else {
        debug!(id, "offline record missing");
        return Ok(None);
    };
    match message.as_offline() {
        Some(off) if message.cmd == MSG_OFFLINE => Ok(Some((*off, message.flag))),
        _ => {
            warn!(id, cmd = message.cmd, "expected offline record");
            Ok(None)
        }
    }
}

/// Loads the messages a user has not seen since `since_id`.
///
/// With `hard_limit > 0`, a backlog deeper than `hard_limit` switches to the
/// peer-only chain starting near the oldest kept batch, and no more than
/// `hard_limit` offline records are examined in total.
pub fn sync_history(
    peers: &PeerIndex,
    src: &mut impl RecordSource,
    key: UserKey,
    since_id: i64,
    limit: usize,
    hard_limit: usize,
) -> CoreResult<SyncResult> {
    let Some(ui) = peers.get(key).copied() else {
        return Ok(SyncResult {
            last_msgid: since_id,
            ..SyncResult::default()
        });
    };

    let batch_size = BATCH_SIZE as usize;
    let hard_batch_count = hard_limit / batch_size;
    let batch_count = (limit / batch_size).max(1);
    let mut examined = 0usize;

    let mut batch_ids = Vec::new();
    let mut batch_id = ui.last_batch_id;
    while batch_id > since_id {
        let Some((off, _)) = load_offline(src, batch_id)? else {
            break;
        };
        examined += 1;
        if off.msgid <= since_id {
            break;
        }
        batch_ids.push(batch_id);
        batch_id = off.prev_batch_msgid;
        if hard_batch_count > 0 && batch_ids.len() >= hard_batch_count {
            break;
        }
    }

    let peer_only = hard_batch_count > 0
        && batch_ids.len() >= hard_batch_count
        && hard_batch_count >= batch_count;
    let mut cursor = if batch_ids.len() >= batch_count {
        batch_ids[batch_ids.len() - batch_count]
    } else {
        ui.last_id
    };

    let mut first: Option<(i64, i64)> = None;
    let mut messages = Vec::new();
    while cursor > since_id {
        if hard_limit > 0 && examined >= hard_limit {
            break;
        }
        let Some((off, flag)) = load_offline(src, cursor)? else {
            break;
        };
        examined += 1;
        if first.is_none() {
            first = Some((cursor, off.msgid));
        }
        if off.msgid <= since_id {
            break;
        }

        let next = if peer_only {
            off.prev_peer_msgid
        } else {
            off.prev_msgid
        };
        if peer_only && flag & MESSAGE_FLAG_GROUP != 0 {
            cursor = next;
            continue;
        }

        let Some(payload) = src.load(off.msgid)? else {
            break;
        };
        if payload.is_user_visible() {
            messages.push(EMessage::new(off.msgid, off.device_id, payload));
            if limit > 0 && messages.len() >= limit {
                break;
            }
        }
        cursor = next;
    }

    messages.reverse();
    let (last_msgid, has_more) = match first {
        Some((offline_id, msgid)) => (msgid.max(since_id), offline_id < ui.last_id),
        None => (since_id, false),
    };
    debug!(
        appid = key.appid,
        uid = key.uid,
        since_id,
        loaded = messages.len(),
        examined,
        last_msgid,
        has_more,
        peer_only,
        "offline sync"
    );
    Ok(SyncResult {
        messages,
        last_msgid,
        has_more,
    })
}

/// Counts offline records newer than the one carrying payload `since_id`.
///
/// `since_id == 0` counts everything. A broken chain, a record belonging to
/// someone else, or a `since_id` not on the chain all give 0.
pub fn new_count(
    peers: &PeerIndex,
    src: &mut impl RecordSource,
    key: UserKey,
    since_id: i64,
) -> CoreResult<u64> {
    let Some(ui) = peers.get(key).copied() else {
        return Ok(0);
    };
    if since_id == 0 {
        return Ok(ui.last_seq_id.max(0) as u64);
    }

    let mut cursor = ui.last_id;
    while cursor > 0 {
        let Some((off, _)) = load_offline(src, cursor)? else {
            return Ok(0);
        };
        if off.appid != key.appid || off.receiver != key.uid {
            warn!(id = cursor, user = %key, "offline chain crosses into another user");
            return Ok(0);
        }
        if off.msgid == since_id {
            return Ok((ui.last_seq_id - off.seq_id).max(0) as u64);
        }
        if off.msgid < since_id {
            return Ok(0);
        }
        cursor = off.prev_msgid;
    }
    Ok(0)
}

/// Newest user-visible messages for a user, newest first. System
/// notifications are left out.
pub fn latest_messages(
    peers: &PeerIndex,
    src: &mut impl RecordSource,
    key: UserKey,
    limit: usize,
) -> CoreResult<Vec<EMessage>> {
    let mut messages = Vec::new();
    let mut cursor = peers.get(key).map_or(0, |ui| ui.last_id);
    while cursor > 0 && messages.len() < limit {
        let Some((off, _)) = load_offline(src, cursor)? else {
            break;
        };
        let Some(payload) = src.load(off.msgid)? else {
            break;
        };
        if payload.is_user_visible() && payload.cmd != MSG_SYSTEM {
            messages.push(EMessage::new(off.msgid, off.device_id, payload));
        }
        cursor = off.prev_msgid;
    }
    Ok(messages)
}

/// Flag for the offline record that follows `payload`.
#[must_use]
pub fn offline_flag(payload: &Message) -> u8 {
    if payload.is_group_fanout() {
        MESSAGE_FLAG_GROUP
    } else {
        0
    }
}
