//! Replication bodies that carry whole framed messages.

use bytes::BufMut;

use crate::error::{CodecError, CodecResult};
use crate::message::{Message, HEADER_LEN};
use crate::wire::Reader;

/// A log record tagged with its id.
///
/// Also used as the unit of the live replication channel and of sync
/// results, where `device_id` is the sender's device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EMessage {
    /// Record id in the log.
    pub msgid: i64,
    /// Sending device, 0 when unknown.
    pub device_id: i64,
    /// The record.
    pub message: Message,
}

impl EMessage {
    /// Largest frame an `EMessage` can carry.
    pub const MAX_FRAME_LEN: usize = i16::MAX as usize;

    /// Creates a tagged record.
    #[must_use]
    pub fn new(msgid: i64, device_id: i64, message: Message) -> Self {
        Self {
            msgid,
            device_id,
            message,
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        let frame = self.message.encode_frame()?;
        let len = i16::try_from(frame.len()).map_err(|_| CodecError::FrameTooLarge {
            len: frame.len(),
            max: Self::MAX_FRAME_LEN,
        })?;
        buf.put_i64(self.msgid);
        buf.put_i64(self.device_id);
        buf.put_i16(len);
        buf.put_slice(&frame);
        Ok(())
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> CodecResult<Self> {
        let msgid = r.i64()?;
        let device_id = r.i64()?;
        let len = r.i16()?;
        let len = usize::try_from(len)
            .map_err(|_| CodecError::decoding_failed(format!("negative frame length {len}")))?;
        let frame = r.take(len)?;
        let (message, used) = Message::decode_frame(frame)?;
        if used != frame.len() {
            return Err(CodecError::decoding_failed(format!(
                "embedded frame is {used} bytes, length field says {len}"
            )));
        }
        Ok(Self {
            msgid,
            device_id,
            message,
        })
    }
}

/// A run of consecutive log records shipped to a replica.
///
/// Messages are framed back to back with no extra length prefix. `last_id`
/// is the id of the last record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageBatch {
    /// Id of the first record.
    pub first_id: i64,
    /// Id of the last record.
    pub last_id: i64,
    /// Records in log order.
    pub messages: Vec<Message>,
}

impl MessageBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(first_id: i64, last_id: i64, messages: Vec<Message>) -> Self {
        Self {
            first_id,
            last_id,
            messages,
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        let count = i32::try_from(self.messages.len())
            .map_err(|_| CodecError::encoding_failed("too many messages in batch"))?;
        buf.put_i64(self.first_id);
        buf.put_i64(self.last_id);
        buf.put_i32(count);
        for message in &self.messages {
            message.encode_frame_into(buf)?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> CodecResult<Self> {
        let first_id = r.i64()?;
        let last_id = r.i64()?;
        let count = r.i32()?;
        let count = usize::try_from(count)
            .map_err(|_| CodecError::decoding_failed(format!("negative batch count {count}")))?;
        let mut messages = Vec::with_capacity(count.min(r.remaining() / HEADER_LEN));
        for _ in 0..count {
            let (message, used) = Message::decode_frame(r.peek())?;
            r.take(used)?;
            messages.push(message);
        }
        Ok(Self {
            first_id,
            last_id,
            messages,
        })
    }
}
