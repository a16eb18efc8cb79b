//! Command bytes and message flags.

/// Peer-to-peer instant message.
pub const MSG_IM: u8 = 4;
/// Group notification text.
pub const MSG_GROUP_NOTIFICATION: u8 = 7;
/// Group instant message.
pub const MSG_GROUP_IM: u8 = 8;
/// System notification text.
pub const MSG_SYSTEM: u8 = 21;
/// Customer-service message between two apps.
pub const MSG_CUSTOMER_V2: u8 = 64;

/// Replication handshake sent by a slave.
pub const MSG_STORAGE_SYNC_BEGIN: u8 = 220;
/// A single replicated record.
pub const MSG_STORAGE_SYNC_MESSAGE: u8 = 221;
/// A batch of replicated records.
pub const MSG_STORAGE_SYNC_MESSAGE_BATCH: u8 = 222;

/// Persisted peer dequeue cursor.
pub const MSG_PEER_ACK: u8 = 245;
/// Persisted group member dequeue cursor.
pub const MSG_GROUP_ACK: u8 = 246;
/// Group chain record.
pub const MSG_GROUP_OFFLINE: u8 = 247;
/// Peer chain record.
pub const MSG_OFFLINE: u8 = 248;

/// Lowest command kept only for reading old logs.
pub const MSG_DEPRECATED_FIRST: u8 = 249;

/// Plain text content.
pub const MESSAGE_FLAG_TEXT: u8 = 0x01;
/// Not stored.
pub const MESSAGE_FLAG_UNPERSISTENT: u8 = 0x02;
/// Payload is a group fan-out message.
pub const MESSAGE_FLAG_GROUP: u8 = 0x04;
/// Echo to the sender's other devices.
pub const MESSAGE_FLAG_SELF: u8 = 0x08;
/// Push notification requested.
pub const MESSAGE_FLAG_PUSH: u8 = 0x10;

/// Returns true for the kinds a client is shown on sync.
#[must_use]
pub const fn is_user_visible(cmd: u8) -> bool {
    matches!(
        cmd,
        MSG_IM | MSG_GROUP_IM | MSG_GROUP_NOTIFICATION | MSG_SYSTEM | MSG_CUSTOMER_V2
    )
}

/// Returns true when the payload fans out through a group.
#[must_use]
pub const fn is_group_fanout(cmd: u8, flag: u8) -> bool {
    cmd == MSG_GROUP_IM || flag & MESSAGE_FLAG_GROUP != 0
}

/// Returns true for commands retained only for old logs.
#[must_use]
pub const fn is_deprecated(cmd: u8) -> bool {
    cmd >= MSG_DEPRECATED_FIRST
}

/// Human-readable command name.
#[must_use]
pub fn command_name(cmd: u8) -> &'static str {
    match cmd {
        MSG_IM => "IM",
        MSG_GROUP_NOTIFICATION => "GROUP_NOTIFICATION",
        MSG_GROUP_IM => "GROUP_IM",
        MSG_SYSTEM => "SYSTEM",
        MSG_CUSTOMER_V2 => "CUSTOMER_V2",
        MSG_STORAGE_SYNC_BEGIN => "STORAGE_SYNC_BEGIN",
        MSG_STORAGE_SYNC_MESSAGE => "STORAGE_SYNC_MESSAGE",
        MSG_STORAGE_SYNC_MESSAGE_BATCH => "STORAGE_SYNC_MESSAGE_BATCH",
        MSG_PEER_ACK => "PEER_ACK",
        MSG_GROUP_ACK => "GROUP_ACK",
        MSG_GROUP_OFFLINE => "GROUP_OFFLINE",
        MSG_OFFLINE => "OFFLINE",
        249 => "OFFLINE_V3",
        250 => "OFFLINE_V2",
        251 => "PENDING_GROUP_MESSAGE",
        252 => "GROUP_IM_LIST",
        253 => "GROUP_ACK_IN",
        254 => "OFFLINE_V1",
        255 => "ACK_IN",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_kinds() {
        for cmd in [MSG_IM, MSG_GROUP_IM, MSG_GROUP_NOTIFICATION, MSG_SYSTEM, MSG_CUSTOMER_V2] {
            assert!(is_user_visible(cmd), "{}", command_name(cmd));
        }
        for cmd in [MSG_OFFLINE, MSG_GROUP_OFFLINE, MSG_PEER_ACK, MSG_STORAGE_SYNC_BEGIN, 250] {
            assert!(!is_user_visible(cmd), "{}", command_name(cmd));
        }
    }

    #[test]
    fn group_fanout_by_cmd_or_flag() {
        assert!(is_group_fanout(MSG_GROUP_IM, 0));
        assert!(is_group_fanout(MSG_IM, MESSAGE_FLAG_GROUP));
        assert!(!is_group_fanout(MSG_IM, MESSAGE_FLAG_TEXT | MESSAGE_FLAG_PUSH));
    }

    #[test]
    fn deprecated_range() {
        assert!(!is_deprecated(MSG_OFFLINE));
        assert!((249..=255).all(is_deprecated));
    }
}
