//! In-memory index state and the record-to-index mapping.

use imstore_codec::command::{MSG_GROUP_ACK, MSG_GROUP_OFFLINE, MSG_OFFLINE, MSG_PEER_ACK};
use imstore_codec::{Message, MessageBody};

use crate::group::GroupIndex;
use crate::peer::PeerIndex;
use crate::received::ReceivedCursors;

/// Everything derived from the log: chain heads and ack cursors.
///
/// The log is the source of truth. This state can always be rebuilt by
/// replaying every record through [`IndexState::exec_message`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexState {
    /// Per-user chain heads.
    pub peers: PeerIndex,
    /// Per-group chain heads.
    pub groups: GroupIndex,
    /// Ack cursors.
    pub received: ReceivedCursors,
}

impl IndexState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the record stored at `id`. Returns true if the state changed.
    ///
    /// Replaying a record that is already reflected is a no-op, so recovery
    /// may start from any point at or before the first unapplied record.
    pub fn exec_message(&mut self, id: i64, message: &Message) -> bool {
        match (&message.body, message.cmd) {
            (MessageBody::Offline(off), MSG_OFFLINE) => {
                self.peers.apply_offline(id, off, message.flag)
            }
            (MessageBody::Offline(off), MSG_GROUP_OFFLINE) => self.groups.apply_offline(id, off),
            (MessageBody::PeerAck(ack), MSG_PEER_ACK) => self.received.apply_peer_ack(ack),
            (MessageBody::GroupAck(ack), MSG_GROUP_ACK) => self.received.apply_group_ack(ack),
            _ => false,
        }
    }

    /// Copy without pending ack cursors, as written to a checkpoint.
    #[must_use]
    pub fn durable(&self) -> Self {
        Self {
            peers: self.peers.clone(),
            groups: self.groups.clone(),
            received: self.received.durable(),
        }
    }
}
