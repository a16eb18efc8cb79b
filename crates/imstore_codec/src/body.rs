//! Payload bodies and the command registry.

use bytes::BufMut;

use crate::command::*;
use crate::error::{CodecError, CodecResult};
use crate::sync::{EMessage, MessageBatch};
use crate::wire::Reader;

/// Instant message, used for both peer and group traffic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImMessage {
    /// Sending user.
    pub sender: i64,
    /// Receiving user, or the group id for group messages.
    pub receiver: i64,
    /// Send time in seconds. Not carried at version 0.
    pub timestamp: i32,
    /// Client-assigned message id.
    pub msgid: i32,
    /// Message text.
    pub content: String,
}

impl ImMessage {
    fn encode(&self, version: u8, buf: &mut Vec<u8>) {
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver);
        if version != 0 {
            buf.put_i32(self.timestamp);
        }
        buf.put_i32(self.msgid);
        buf.put_slice(self.content.as_bytes());
    }

    fn decode(version: u8, r: &mut Reader<'_>) -> CodecResult<Self> {
        let sender = r.i64()?;
        let receiver = r.i64()?;
        let timestamp = if version == 0 { 0 } else { r.i32()? };
        let msgid = r.i32()?;
        let content = r.utf8_rest()?;
        Ok(Self {
            sender,
            receiver,
            timestamp,
            msgid,
            content,
        })
    }
}

/// Customer-service message between users of two apps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomerMessage {
    /// App of the sender.
    pub sender_appid: i64,
    /// Sending user.
    pub sender: i64,
    /// App of the receiver.
    pub receiver_appid: i64,
    /// Receiving user.
    pub receiver: i64,
    /// Send time in seconds.
    pub timestamp: i32,
    /// Message text.
    pub content: String,
}

impl CustomerMessage {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i64(self.sender_appid);
        buf.put_i64(self.sender);
        buf.put_i64(self.receiver_appid);
        buf.put_i64(self.receiver);
        buf.put_i32(self.timestamp);
        buf.put_slice(self.content.as_bytes());
    }

    fn decode(r: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            sender_appid: r.i64()?,
            sender: r.i64()?,
            receiver_appid: r.i64()?,
            receiver: r.i64()?,
            timestamp: r.i32()?,
            content: r.utf8_rest()?,
        })
    }
}

/// Offline-delivery record linking a payload into a receiver's chains.
///
/// For `MSG_GROUP_OFFLINE` the receiver is the group id and only
/// `prev_msgid` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OfflineMessage {
    /// Application id.
    pub appid: i64,
    /// User id or group id.
    pub receiver: i64,
    /// Id of the payload record.
    pub msgid: i64,
    /// Device that sent the payload.
    pub device_id: i64,
    /// Running sequence number for the receiver, starting at 1.
    pub seq_id: i64,
    /// Previous record on the full chain.
    pub prev_msgid: i64,
    /// Previous record on the peer-only chain.
    pub prev_peer_msgid: i64,
    /// Previous record on the batch chain.
    pub prev_batch_msgid: i64,
}

impl OfflineMessage {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 64;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i64(self.appid);
        buf.put_i64(self.receiver);
        buf.put_i64(self.msgid);
        buf.put_i64(self.device_id);
        buf.put_i64(self.seq_id);
        buf.put_i64(self.prev_msgid);
        buf.put_i64(self.prev_peer_msgid);
        buf.put_i64(self.prev_batch_msgid);
    }

    fn decode(r: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            appid: r.i64()?,
            receiver: r.i64()?,
            msgid: r.i64()?,
            device_id: r.i64()?,
            seq_id: r.i64()?,
            prev_msgid: r.i64()?,
            prev_peer_msgid: r.i64()?,
            prev_batch_msgid: r.i64()?,
        })
    }
}

/// Replication start position sent by a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncCursor {
    /// First id the slave does not have yet.
    pub msgid: i64,
}

/// Durable peer dequeue cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerAck {
    /// Application id.
    pub appid: i64,
    /// User id.
    pub uid: i64,
    /// Acknowledging device.
    pub device_id: i64,
    /// Last received payload id.
    pub msgid: i64,
}

/// Durable group member dequeue cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupAck {
    /// Application id.
    pub appid: i64,
    /// Group id.
    pub gid: i64,
    /// Member user id.
    pub uid: i64,
    /// Acknowledging device.
    pub device_id: i64,
    /// Last received payload id.
    pub msgid: i64,
}

/// A decoded message body, tagged by command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// `MSG_IM` or `MSG_GROUP_IM`.
    Im(ImMessage),
    /// `MSG_GROUP_NOTIFICATION`.
    GroupNotification(String),
    /// `MSG_SYSTEM`.
    System(String),
    /// `MSG_CUSTOMER_V2`.
    Customer(CustomerMessage),
    /// `MSG_OFFLINE` or `MSG_GROUP_OFFLINE`.
    Offline(OfflineMessage),
    /// `MSG_PEER_ACK`.
    PeerAck(PeerAck),
    /// `MSG_GROUP_ACK`.
    GroupAck(GroupAck),
    /// `MSG_STORAGE_SYNC_BEGIN`.
    SyncBegin(SyncCursor),
    /// `MSG_STORAGE_SYNC_MESSAGE`.
    SyncMessage(Box<EMessage>),
    /// `MSG_STORAGE_SYNC_MESSAGE_BATCH`.
    SyncMessageBatch(MessageBatch),
    /// A deprecated command, kept byte for byte.
    Ignored(Vec<u8>),
}

impl MessageBody {
    /// Decodes `body` as the payload of `cmd`.
    ///
    /// Fixed-size bodies must consume the input exactly.
    pub fn decode(cmd: u8, version: u8, body: &[u8]) -> CodecResult<Self> {
        let mut r = Reader::new(body);
        let decoded = match cmd {
            MSG_IM | MSG_GROUP_IM => Self::Im(ImMessage::decode(version, &mut r)?),
            MSG_GROUP_NOTIFICATION => Self::GroupNotification(r.utf8_rest()?),
            MSG_SYSTEM => Self::System(r.utf8_rest()?),
            MSG_CUSTOMER_V2 => Self::Customer(CustomerMessage::decode(&mut r)?),
            MSG_OFFLINE | MSG_GROUP_OFFLINE => Self::Offline(OfflineMessage::decode(&mut r)?),
            MSG_PEER_ACK => Self::PeerAck(PeerAck {
                appid: r.i64()?,
                uid: r.i64()?,
                device_id: r.i64()?,
                msgid: r.i64()?,
            }),
            MSG_GROUP_ACK => Self::GroupAck(GroupAck {
                appid: r.i64()?,
                gid: r.i64()?,
                uid: r.i64()?,
                device_id: r.i64()?,
                msgid: r.i64()?,
            }),
            MSG_STORAGE_SYNC_BEGIN => Self::SyncBegin(SyncCursor { msgid: r.i64()? }),
            MSG_STORAGE_SYNC_MESSAGE => Self::SyncMessage(Box::new(EMessage::decode(&mut r)?)),
            MSG_STORAGE_SYNC_MESSAGE_BATCH => {
                Self::SyncMessageBatch(MessageBatch::decode(&mut r)?)
            }
            c if is_deprecated(c) => Self::Ignored(r.rest().to_vec()),
            c => return Err(CodecError::UnknownCommand { cmd: c }),
        };
        r.finish(cmd)?;
        Ok(decoded)
    }

    /// Appends the encoded body to `buf`.
    pub fn encode(&self, version: u8, buf: &mut Vec<u8>) -> CodecResult<()> {
        match self {
            Self::Im(im) => im.encode(version, buf),
            Self::GroupNotification(text) | Self::System(text) => buf.put_slice(text.as_bytes()),
            Self::Customer(cs) => cs.encode(buf),
            Self::Offline(off) => off.encode(buf),
            Self::PeerAck(ack) => {
                buf.put_i64(ack.appid);
                buf.put_i64(ack.uid);
                buf.put_i64(ack.device_id);
                buf.put_i64(ack.msgid);
            }
            Self::GroupAck(ack) => {
                buf.put_i64(ack.appid);
                buf.put_i64(ack.gid);
                buf.put_i64(ack.uid);
                buf.put_i64(ack.device_id);
                buf.put_i64(ack.msgid);
            }
            Self::SyncBegin(cursor) => buf.put_i64(cursor.msgid),
            Self::SyncMessage(emsg) => emsg.encode(buf)?,
            Self::SyncMessageBatch(batch) => batch.encode(buf)?,
            Self::Ignored(raw) => buf.put_slice(raw),
        }
        Ok(())
    }

    /// Encodes the body into a fresh buffer.
    pub fn to_bytes(&self, version: u8) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(version, &mut buf)?;
        Ok(buf)
    }

    /// Returns true if this body is a valid payload for `cmd`.
    #[must_use]
    pub fn matches_command(&self, cmd: u8) -> bool {
        match self {
            Self::Im(_) => cmd == MSG_IM || cmd == MSG_GROUP_IM,
            Self::GroupNotification(_) => cmd == MSG_GROUP_NOTIFICATION,
            Self::System(_) => cmd == MSG_SYSTEM,
            Self::Customer(_) => cmd == MSG_CUSTOMER_V2,
            Self::Offline(_) => cmd == MSG_OFFLINE || cmd == MSG_GROUP_OFFLINE,
            Self::PeerAck(_) => cmd == MSG_PEER_ACK,
            Self::GroupAck(_) => cmd == MSG_GROUP_ACK,
            Self::SyncBegin(_) => cmd == MSG_STORAGE_SYNC_BEGIN,
            Self::SyncMessage(_) => cmd == MSG_STORAGE_SYNC_MESSAGE,
            Self::SyncMessageBatch(_) => cmd == MSG_STORAGE_SYNC_MESSAGE_BATCH,
            Self::Ignored(_) => is_deprecated(cmd),
        }
    }
}
