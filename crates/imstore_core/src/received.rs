//! Ack cursors for peers and group members.
//!
//! Acks land in a pending map first. [`ReceivedCursors::pending`] lists them
//! for the storage facade, which persists each as a `MSG_PEER_ACK` or
//! `MSG_GROUP_ACK` record. Applying that record moves the durable cursor and
//! retires the pending entry, so an ack whose record was never written stays
//! pending for the next flush.

use std::collections::HashMap;

use imstore_codec::{GroupAck, PeerAck};

use crate::types::{DeviceKey, MemberKey};

/// Durable and pending ack cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedCursors {
    peers: HashMap<DeviceKey, i64>,
    members: HashMap<MemberKey, i64>,
    pending_peers: HashMap<DeviceKey, i64>,
    pending_members: HashMap<MemberKey, i64>,
}

impl ReceivedCursors {
    /// Creates empty cursor maps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Durable peer cursor.
    #[must_use]
    pub fn peer(&self, key: DeviceKey) -> Option<i64> {
        self.peers.get(&key).copied()
    }

    /// Durable member cursor.
    #[must_use]
    pub fn member(&self, key: MemberKey) -> Option<i64> {
        self.members.get(&key).copied()
    }

    /// Pending cursor if any, else durable, else 0.
    #[must_use]
    pub fn effective_peer(&self, key: DeviceKey) -> i64 {
        self.pending_peers
            .get(&key)
            .or_else(|| self.peers.get(&key))
            .copied()
            .unwrap_or(0)
    }

    /// Pending cursor if any, else durable, else 0.
    #[must_use]
    pub fn effective_member(&self, key: MemberKey) -> i64 {
        self.pending_members
            .get(&key)
            .or_else(|| self.members.get(&key))
            .copied()
            .unwrap_or(0)
    }

    /// Records a peer ack. Returns false if it does not advance the cursor.
    pub fn dequeue_peer(&mut self, key: DeviceKey, msgid: i64) -> bool {
        if msgid <= self.effective_peer(key) {
            return false;
        }
        self.pending_peers.insert(key, msgid);
        true
    }

    /// Records a member ack. Returns false if it does not advance the cursor.
    pub fn dequeue_member(&mut self, key: MemberKey, msgid: i64) -> bool {
        if msgid <= self.effective_member(key) {
            return false;
        }
        self.pending_members.insert(key, msgid);
        true
    }

    /// Number of cursors waiting to be persisted.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_peers.len() + self.pending_members.len()
    }

    /// Pending cursors as ack bodies, sorted by key. They stay pending until
    /// the matching ack record is applied.
    #[must_use]
    pub fn pending(&self) -> (Vec<PeerAck>, Vec<GroupAck>) {
        let mut peers: Vec<_> = self.pending_peers.iter().map(|(k, v)| (*k, *v)).collect();
        peers.sort_unstable();
        let mut members: Vec<_> = self.pending_members.iter().map(|(k, v)| (*k, *v)).collect();
        members.sort_unstable();
        (
            peers
                .into_iter()
                .map(|(k, msgid)| PeerAck {
                    appid: k.appid,
                    uid: k.uid,
                    device_id: k.device_id,
                    msgid,
                })
                .collect(),
            members
                .into_iter()
                .map(|(k, msgid)| GroupAck {
                    appid: k.appid,
                    gid: k.gid,
                    uid: k.uid,
                    device_id: k.device_id,
                    msgid,
                })
                .collect(),
        )
    }

    /// Applies a persisted peer ack. The cursor takes the maximum.
    pub fn apply_peer_ack(&mut self, ack: &PeerAck) -> bool {
        let key = DeviceKey {
            appid: ack.appid,
            uid: ack.uid,
            device_id: ack.device_id,
        };
        retire(&mut self.pending_peers, key, ack.msgid);
        raise(self.peers.entry(key).or_insert(0), ack.msgid)
    }

    /// Applies a persisted group ack. The cursor takes the maximum.
    pub fn apply_group_ack(&mut self, ack: &GroupAck) -> bool {
        let key = MemberKey {
            appid: ack.appid,
            gid: ack.gid,
            uid: ack.uid,
            device_id: ack.device_id,
        };
        retire(&mut self.pending_members, key, ack.msgid);
        raise(self.members.entry(key).or_insert(0), ack.msgid)
    }

    /// Durable peer cursors.
    pub fn peers(&self) -> impl Iterator<Item = (&DeviceKey, &i64)> {
        self.peers.iter()
    }

    /// Durable member cursors.
    pub fn members(&self) -> impl Iterator<Item = (&MemberKey, &i64)> {
        self.members.iter()
    }

    /// Copy of the durable maps with no pending entries.
    #[must_use]
    pub fn durable(&self) -> Self {
        Self {
            peers: self.peers.clone(),
            members: self.members.clone(),
            ..Self::default()
        }
    }

    pub(crate) fn insert_peer(&mut self, key: DeviceKey, msgid: i64) {
        self.peers.insert(key, msgid);
    }

    pub(crate) fn insert_member(&mut self, key: MemberKey, msgid: i64) {
        self.members.insert(key, msgid);
    }
}

fn retire<K: std::hash::Hash + Eq>(pending: &mut HashMap<K, i64>, key: K, msgid: i64) {
    if pending.get(&key).is_some_and(|&p| p <= msgid) {
        pending.remove(&key);
    }
}

fn raise(cursor: &mut i64, msgid: i64) -> bool {
    if msgid > *cursor {
        *cursor = msgid;
        true
    } else {
        false
    }
}
