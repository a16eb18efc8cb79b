//! RPC request and response bodies.

use serde::{Deserialize, Serialize};

/// Save a message for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Application id.
    pub appid: i64,
    /// Receiving user.
    pub uid: i64,
    /// Sending device.
    pub device_id: i64,
    /// Command of `raw`.
    pub cmd: i32,
    /// Encoded body.
    pub raw: Vec<u8>,
}

/// Save one message for every member of an ordinary group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerGroupMessage {
    /// Application id.
    pub appid: i64,
    /// Receiving users.
    pub members: Vec<i64>,
    /// Sending device.
    pub device_id: i64,
    /// Command of `raw`.
    pub cmd: i32,
    /// Encoded body.
    pub raw: Vec<u8>,
}

/// Save a message to a super group's shared queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Application id.
    pub appid: i64,
    /// Group id.
    pub gid: i64,
    /// Sending device.
    pub device_id: i64,
    /// Command of `raw`.
    pub cmd: i32,
    /// Encoded body.
    pub raw: Vec<u8>,
}

/// Offline sync cursor for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistory {
    /// Application id.
    pub appid: i64,
    /// User id.
    pub uid: i64,
    /// Requesting device.
    pub device_id: i64,
    /// Last id the client has.
    pub last_msgid: i64,
}

/// Sync cursor for one group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncGroupHistory {
    /// Application id.
    pub appid: i64,
    /// Member user id.
    pub uid: i64,
    /// Requesting device.
    pub device_id: i64,
    /// Group id.
    pub gid: i64,
    /// Last id the client has.
    pub last_msgid: i64,
    /// Join time of the member, in seconds.
    pub timestamp: i32,
}

/// Latest messages request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Application id.
    pub appid: i64,
    /// User id.
    pub uid: i64,
    /// Maximum number of messages.
    pub limit: i32,
}

/// Peer delivery ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DequeueMessage {
    /// Application id.
    pub appid: i64,
    /// User id.
    pub uid: i64,
    /// Acknowledging device.
    pub device_id: i64,
    /// Last received id.
    pub msgid: i64,
}

/// Group delivery ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DequeueGroupMessage {
    /// Application id.
    pub appid: i64,
    /// Group id.
    pub gid: i64,
    /// Member user id.
    pub uid: i64,
    /// Acknowledging device.
    pub device_id: i64,
    /// Last received id.
    pub msgid: i64,
}

/// Id assigned to a saved message and the receiver's previous head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryMessageId {
    /// Id of the saved payload.
    pub msgid: i64,
    /// Previous latest payload id for the receiver.
    pub prev_msgid: i64,
}

/// A stored message returned to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Log id.
    pub msgid: i64,
    /// Device that sent the message.
    pub device_id: i64,
    /// Command of `raw`.
    pub cmd: i32,
    /// Encoded body.
    pub raw: Vec<u8>,
}

/// Offline sync result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerHistoryMessage {
    /// Messages, oldest first.
    pub messages: Vec<HistoryMessage>,
    /// Cursor for the next call.
    pub last_msgid: i64,
    /// More messages are pending behind the cursor.
    pub has_more: bool,
}

/// Group sync result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupHistoryMessage {
    /// Messages, oldest first.
    pub messages: Vec<HistoryMessage>,
    /// Newest id returned, or the request cursor.
    pub last_msgid: i64,
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error text.
    pub message: String,
    /// Whether the caller may retry.
    pub retryable: bool,
}

/// An RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest {
    /// Save a peer message.
    SavePeerMessage(PeerMessage),
    /// Save a super group message.
    SaveGroupMessage(GroupMessage),
    /// Save a message for each member of an ordinary group.
    SavePeerGroupMessage(PeerGroupMessage),
    /// Offline sync.
    SyncMessage(SyncHistory),
    /// Group sync.
    SyncGroupMessage(SyncGroupHistory),
    /// Count pending messages.
    GetNewCount(SyncHistory),
    /// List latest messages.
    GetLatestMessage(HistoryRequest),
    /// Peer ack.
    DequeueMessage(DequeueMessage),
    /// Group ack.
    DequeueGroupMessage(DequeueGroupMessage),
    /// Liveness check.
    Ping,
}

impl RpcRequest {
    /// Returns the frame type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::SavePeerMessage(_) => 1,
            Self::SaveGroupMessage(_) => 2,
            Self::SavePeerGroupMessage(_) => 3,
            Self::SyncMessage(_) => 4,
            Self::SyncGroupMessage(_) => 5,
            Self::GetNewCount(_) => 6,
            Self::GetLatestMessage(_) => 7,
            Self::DequeueMessage(_) => 8,
            Self::DequeueGroupMessage(_) => 9,
            Self::Ping => 10,
        }
    }

    /// Operation name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SavePeerMessage(_) => "SavePeerMessage",
            Self::SaveGroupMessage(_) => "SaveGroupMessage",
            Self::SavePeerGroupMessage(_) => "SavePeerGroupMessage",
            Self::SyncMessage(_) => "SyncMessage",
            Self::SyncGroupMessage(_) => "SyncGroupMessage",
            Self::GetNewCount(_) => "GetNewCount",
            Self::GetLatestMessage(_) => "GetLatestMessage",
            Self::DequeueMessage(_) => "DequeueMessage",
            Self::DequeueGroupMessage(_) => "DequeueGroupMessage",
            Self::Ping => "Ping",
        }
    }
}

/// An RPC response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResponse {
    /// Reply to a single save.
    HistoryMessageId(HistoryMessageId),
    /// Reply to a fan-out save, one entry per member.
    HistoryMessageIds(Vec<HistoryMessageId>),
    /// Reply to `SyncMessage`.
    PeerHistory(PeerHistoryMessage),
    /// Reply to `SyncGroupMessage`.
    GroupHistory(GroupHistoryMessage),
    /// Reply to `GetNewCount`.
    Count(u64),
    /// Reply to `GetLatestMessage`.
    Messages(Vec<HistoryMessage>),
    /// Reply to a dequeue.
    Ack,
    /// Reply to `Ping`.
    Pong,
    /// Failure.
    Error(ErrorResponse),
}

impl RpcResponse {
    /// Returns the frame type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::HistoryMessageId(_) => 101,
            Self::HistoryMessageIds(_) => 102,
            Self::PeerHistory(_) => 103,
            Self::GroupHistory(_) => 104,
            Self::Count(_) => 105,
            Self::Messages(_) => 106,
            Self::Ack => 107,
            Self::Pong => 108,
            Self::Error(_) => 127,
        }
    }

    /// Builds an error reply.
    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        Self::Error(ErrorResponse {
            message: message.into(),
            retryable,
        })
    }
}
