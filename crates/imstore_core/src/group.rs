//! Group index: one chain of `MSG_GROUP_OFFLINE` records per group.

use std::collections::HashMap;

use imstore_codec::command::{MSG_GROUP_IM, MSG_GROUP_OFFLINE, MSG_IM};
use imstore_codec::{EMessage, OfflineMessage};
use tracing::{debug, warn};

use crate::block::RecordSource;
use crate::error::CoreResult;
use crate::types::GroupKey;

/// Head of a group chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupHead {
    /// Newest group offline record.
    pub last_id: i64,
    /// Newest payload id.
    pub last_msgid: i64,
}

/// Per-group chain heads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupIndex {
    groups: HashMap<GroupKey, GroupHead>,
}

impl GroupIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a group.
    #[must_use]
    pub fn get(&self, key: GroupKey) -> Option<&GroupHead> {
        self.groups.get(&key)
    }

    /// Number of indexed groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True if no group has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterates over all heads in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &GroupHead)> {
        self.groups.iter()
    }

    pub(crate) fn insert(&mut self, key: GroupKey, head: GroupHead) {
        self.groups.insert(key, head);
    }

    /// Builds the group offline record for payload `msgid`.
    #[must_use]
    pub fn next_offline(&self, key: GroupKey, msgid: i64, device_id: i64) -> OfflineMessage {
        OfflineMessage {
            appid: key.appid,
            receiver: key.gid,
            msgid,
            device_id,
            prev_msgid: self.groups.get(&key).map_or(0, |h| h.last_id),
            ..OfflineMessage::default()
        }
    }

    /// Applies a group offline record stored at `id`. Records at or below the
    /// head are ignored.
    pub fn apply_offline(&mut self, id: i64, off: &OfflineMessage) -> bool {
        let head = self
            .groups
            .entry(GroupKey::new(off.appid, off.receiver))
            .or_default();
        if id <= head.last_id {
            return false;
        }
        head.last_id = id;
        head.last_msgid = off.msgid;
        true
    }
}

/// Bounds for a backward group walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupWalk {
    /// Stop at payloads with id `<= since_id`.
    pub since_id: i64,
    /// Maximum messages, 0 for no limit.
    pub limit: usize,
    /// Stop at the first IM older than this timestamp, 0 to disable.
    pub join_ts: i32,
}

/// Walks a group chain from its head. Returns messages oldest first.
///
/// Records whose payload cannot be read are skipped. A record that belongs
/// to another group ends the walk.
pub fn walk_group(
    groups: &GroupIndex,
    src: &mut impl RecordSource,
    key: GroupKey,
    walk: GroupWalk,
) -> CoreResult<Vec<EMessage>> {
    let mut messages = Vec::new();
    let mut cursor = groups.get(key).map_or(0, |h| h.last_id);
    while cursor > 0 {
        let Some(record) = src.load(cursor)? else {
            debug!(id = cursor, "group offline record missing");
            break;
        };
        let off = match record.as_offline() {
            Some(off) if record.cmd == MSG_GROUP_OFFLINE => *off,
            _ => {
                warn!(id = cursor, cmd = record.cmd, "expected group offline record");
                break;
            }
        };
        if off.appid != key.appid || off.receiver != key.gid {
            warn!(id = cursor, appid = key.appid, gid = key.gid, "group chain crosses into another group");
            break;
        }
        if off.msgid <= walk.since_id {
            break;
        }
        cursor = off.prev_msgid;

        let Some(payload) = src.load(off.msgid)? else {
            debug!(msgid = off.msgid, "group payload missing");
            continue;
        };
        if walk.join_ts > 0 && matches!(payload.cmd, MSG_IM | MSG_GROUP_IM) {
            if let Some(im) = payload.as_im() {
                if im.timestamp < walk.join_ts {
                    break;
                }
            }
        }
        messages.push(EMessage::new(off.msgid, off.device_id, payload));
        if walk.limit > 0 && messages.len() >= walk.limit {
            break;
        }
    }
    messages.reverse();
    Ok(messages)
}
