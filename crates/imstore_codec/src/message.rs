//! The framed message envelope.

use bytes::{Buf, BufMut};

use crate::body::{GroupAck, ImMessage, MessageBody, OfflineMessage, PeerAck, SyncCursor};
use crate::command::*;
use crate::error::{CodecError, CodecResult};
use crate::sync::{EMessage, MessageBatch};

/// Length of the frame header.
pub const HEADER_LEN: usize = 12;

/// Body version used for new messages.
pub const DEFAULT_VERSION: u8 = 1;

/// Parsed frame header.
///
/// Layout: `len i32 | seq i32 | cmd u8 | version u8 | flag u8 | 0u8`, where
/// `len` counts body bytes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Body length in bytes.
    pub body_len: usize,
    /// Sequence number.
    pub seq: i32,
    /// Command byte.
    pub cmd: u8,
    /// Body version.
    pub version: u8,
    /// Message flags.
    pub flag: u8,
}

impl FrameHeader {
    /// Parses a header.
    pub fn parse(mut buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::UnexpectedEof {
                needed: HEADER_LEN,
                remaining: buf.len(),
            });
        }
        let len = buf.get_i32();
        let body_len = usize::try_from(len)
            .map_err(|_| CodecError::decoding_failed(format!("negative body length {len}")))?;
        let seq = buf.get_i32();
        let cmd = buf.get_u8();
        let version = buf.get_u8();
        let flag = buf.get_u8();
        Ok(Self {
            body_len,
            seq,
            cmd,
            version,
            flag,
        })
    }

    /// Total frame length, header included.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        HEADER_LEN + self.body_len
    }

    fn write(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        let len = i32::try_from(self.body_len).map_err(|_| CodecError::FrameTooLarge {
            len: self.body_len,
            max: i32::MAX as usize,
        })?;
        buf.put_i32(len);
        buf.put_i32(self.seq);
        buf.put_u8(self.cmd);
        buf.put_u8(self.version);
        buf.put_u8(self.flag);
        buf.put_u8(0);
        Ok(())
    }
}

/// A message: header fields plus a decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Command byte selecting the body type.
    pub cmd: u8,
    /// Sequence number, echoed in replies on client connections.
    pub seq: i32,
    /// Body version.
    pub version: u8,
    /// Message flags.
    pub flag: u8,
    /// Decoded body.
    pub body: MessageBody,
}

impl Message {
    /// Creates a message at [`DEFAULT_VERSION`] with no flags.
    #[must_use]
    pub fn new(cmd: u8, body: MessageBody) -> Self {
        Self {
            cmd,
            seq: 0,
            version: DEFAULT_VERSION,
            flag: 0,
            body,
        }
    }

    /// Peer instant message.
    #[must_use]
    pub fn im(im: ImMessage) -> Self {
        Self::new(MSG_IM, MessageBody::Im(im))
    }

    /// Group instant message.
    #[must_use]
    pub fn group_im(im: ImMessage) -> Self {
        Self::new(MSG_GROUP_IM, MessageBody::Im(im))
    }

    /// Peer chain record.
    #[must_use]
    pub fn offline(off: OfflineMessage) -> Self {
        Self::new(MSG_OFFLINE, MessageBody::Offline(off))
    }

    /// Group chain record.
    #[must_use]
    pub fn group_offline(off: OfflineMessage) -> Self {
        Self::new(MSG_GROUP_OFFLINE, MessageBody::Offline(off))
    }

    /// Peer ack record.
    #[must_use]
    pub fn peer_ack(ack: PeerAck) -> Self {
        Self::new(MSG_PEER_ACK, MessageBody::PeerAck(ack))
    }

    /// Group ack record.
    #[must_use]
    pub fn group_ack(ack: GroupAck) -> Self {
        Self::new(MSG_GROUP_ACK, MessageBody::GroupAck(ack))
    }

    /// Replication handshake.
    #[must_use]
    pub fn sync_begin(msgid: i64) -> Self {
        Self::new(MSG_STORAGE_SYNC_BEGIN, MessageBody::SyncBegin(SyncCursor { msgid }))
    }

    /// Single replicated record.
    #[must_use]
    pub fn sync_message(emsg: EMessage) -> Self {
        Self::new(MSG_STORAGE_SYNC_MESSAGE, MessageBody::SyncMessage(Box::new(emsg)))
    }

    /// Batch of replicated records.
    #[must_use]
    pub fn sync_batch(batch: MessageBatch) -> Self {
        Self::new(
            MSG_STORAGE_SYNC_MESSAGE_BATCH,
            MessageBody::SyncMessageBatch(batch),
        )
    }

    /// Sets the flags.
    #[must_use]
    pub fn with_flag(mut self, flag: u8) -> Self {
        self.flag = flag;
        self
    }

    /// Sets the body version.
    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Builds a message from a raw body, decoding it through the registry.
    pub fn from_body_bytes(cmd: u8, version: u8, flag: u8, body: &[u8]) -> CodecResult<Self> {
        Ok(Self {
            cmd,
            seq: 0,
            version,
            flag,
            body: MessageBody::decode(cmd, version, body)?,
        })
    }

    /// Encodes the body alone at this message's version.
    pub fn body_bytes(&self) -> CodecResult<Vec<u8>> {
        self.body.to_bytes(self.version)
    }

    /// Appends the framed encoding to `buf`.
    pub fn encode_frame_into(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        if !self.body.matches_command(self.cmd) {
            return Err(CodecError::encoding_failed(format!(
                "body does not match command {}",
                command_name(self.cmd)
            )));
        }
        let start = buf.len();
        buf.resize(start + HEADER_LEN, 0);
        self.body.encode(self.version, buf)?;
        let body_len = buf.len() - start - HEADER_LEN;
        let mut header = Vec::with_capacity(HEADER_LEN);
        FrameHeader {
            body_len,
            seq: self.seq,
            cmd: self.cmd,
            version: self.version,
            flag: self.flag,
        }
        .write(&mut header)?;
        buf[start..start + HEADER_LEN].copy_from_slice(&header);
        Ok(())
    }

    /// Encodes header and body.
    pub fn encode_frame(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + 64);
        self.encode_frame_into(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the message and the number of bytes consumed.
    pub fn decode_frame(buf: &[u8]) -> CodecResult<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len();
        if buf.len() < total {
            return Err(CodecError::UnexpectedEof {
                needed: total,
                remaining: buf.len(),
            });
        }
        let body = MessageBody::decode(header.cmd, header.version, &buf[HEADER_LEN..total])?;
        Ok((
            Self {
                cmd: header.cmd,
                seq: header.seq,
                version: header.version,
                flag: header.flag,
                body,
            },
            total,
        ))
    }

    /// True for kinds shown to clients on sync.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        is_user_visible(self.cmd)
    }

    /// True when the payload fans out through a group.
    #[must_use]
    pub fn is_group_fanout(&self) -> bool {
        is_group_fanout(self.cmd, self.flag)
    }

    /// The offline record, for `MSG_OFFLINE` and `MSG_GROUP_OFFLINE`.
    #[must_use]
    pub fn as_offline(&self) -> Option<&OfflineMessage> {
        match &self.body {
            MessageBody::Offline(off) => Some(off),
            _ => None,
        }
    }

    /// The instant message body, for `MSG_IM` and `MSG_GROUP_IM`.
    #[must_use]
    pub fn as_im(&self) -> Option<&ImMessage> {
        match &self.body {
            MessageBody::Im(im) => Some(im),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::im(ImMessage {
            sender: 10,
            receiver: 20,
            timestamp: 1_700_000_000,
            msgid: 5,
            content: "hello".into(),
        })
        .with_flag(MESSAGE_FLAG_TEXT)
    }

    #[test]
    fn header_layout() {
        let frame = sample().encode_frame().unwrap();
        assert_eq!(&frame[0..4], &(24i32 + 5).to_be_bytes());
        assert_eq!(&frame[4..8], &0i32.to_be_bytes());
        assert_eq!(frame[8], MSG_IM);
        assert_eq!(frame[9], DEFAULT_VERSION);
        assert_eq!(frame[10], MESSAGE_FLAG_TEXT);
        assert_eq!(frame[11], 0);
        assert_eq!(frame.len(), HEADER_LEN + 29);
    }

    #[test]
    fn decode_consumes_one_frame() {
        let mut buf = sample().encode_frame().unwrap();
        let first_len = buf.len();
        Message::offline(OfflineMessage::default())
            .encode_frame_into(&mut buf)
            .unwrap();

        let (first, used) = Message::decode_frame(&buf).unwrap();
        assert_eq!(used, first_len);
        assert_eq!(first, sample());

        let (second, used2) = Message::decode_frame(&buf[used..]).unwrap();
        assert_eq!(used2, HEADER_LEN + OfflineMessage::ENCODED_LEN);
        assert_eq!(second.cmd, MSG_OFFLINE);
    }

    #[test]
    fn truncated_frame_is_incomplete() {
        let frame = sample().encode_frame().unwrap();
        for cut in [0, 5, HEADER_LEN, frame.len() - 1] {
            let err = Message::decode_frame(&frame[..cut]).unwrap_err();
            assert!(err.is_incomplete(), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn negative_length_rejected() {
        let mut frame = sample().encode_frame().unwrap();
        frame[0..4].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(
            Message::decode_frame(&frame),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn mismatched_body_fails_to_encode() {
        let msg = Message::new(MSG_SYSTEM, MessageBody::Offline(OfflineMessage::default()));
        assert!(matches!(
            msg.encode_frame(),
            Err(CodecError::EncodingFailed { .. })
        ));
    }

    #[test]
    fn fanout_and_visibility() {
        let im = sample();
        assert!(im.is_user_visible());
        assert!(!im.is_group_fanout());
        assert!(im.clone().with_flag(MESSAGE_FLAG_GROUP).is_group_fanout());
        assert!(!Message::offline(OfflineMessage::default()).is_user_visible());
    }

    #[test]
    fn body_bytes_round_trip_through_raw() {
        let msg = sample();
        let raw = msg.body_bytes().unwrap();
        let back = Message::from_body_bytes(MSG_IM, DEFAULT_VERSION, MESSAGE_FLAG_TEXT, &raw).unwrap();
        assert_eq!(back, msg);
    }
}
