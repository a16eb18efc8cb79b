//! # imstore codec
//!
//! Binary message envelope shared by the block log, replication and the
//! client-facing protocol.
//!
//! A frame is a 12-byte big-endian header followed by a body whose layout is
//! chosen by the command byte:
//!
//! ```text
//! len: i32 | seq: i32 | cmd: u8 | version: u8 | flag: u8 | 0u8 | body[len]
//! ```
//!
//! ```
//! use imstore_codec::{ImMessage, Message};
//!
//! let msg = Message::im(ImMessage {
//!     sender: 1,
//!     receiver: 2,
//!     timestamp: 1_700_000_000,
//!     msgid: 1,
//!     content: "hi".into(),
//! });
//! let frame = msg.encode_frame().unwrap();
//! let (decoded, used) = Message::decode_frame(&frame).unwrap();
//! assert_eq!(decoded, msg);
//! assert_eq!(used, frame.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
pub mod command;
mod error;
mod message;
mod sync;
mod wire;

pub use body::{
    CustomerMessage, GroupAck, ImMessage, MessageBody, OfflineMessage, PeerAck, SyncCursor,
};
pub use error::{CodecError, CodecResult};
pub use message::{FrameHeader, Message, DEFAULT_VERSION, HEADER_LEN};
pub use sync::{EMessage, MessageBatch};

#[cfg(test)]
mod proptests {
    use super::command::*;
    use super::*;
    use proptest::prelude::*;

    fn arb_im() -> impl Strategy<Value = ImMessage> {
        (any::<i64>(), any::<i64>(), any::<i32>(), any::<i32>(), ".{0,40}").prop_map(
            |(sender, receiver, timestamp, msgid, content)| ImMessage {
                sender,
                receiver,
                timestamp,
                msgid,
                content,
            },
        )
    }

    fn arb_offline() -> impl Strategy<Value = OfflineMessage> {
        prop::array::uniform8(any::<i64>()).prop_map(|f| OfflineMessage {
            appid: f[0],
            receiver: f[1],
            msgid: f[2],
            device_id: f[3],
            seq_id: f[4],
            prev_msgid: f[5],
            prev_peer_msgid: f[6],
            prev_batch_msgid: f[7],
        })
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        let body = prop_oneof![
            arb_im().prop_map(Message::im),
            arb_im().prop_map(Message::group_im),
            arb_offline().prop_map(Message::offline),
            arb_offline().prop_map(Message::group_offline),
            ".{0,40}".prop_map(|s| Message::new(MSG_SYSTEM, MessageBody::System(s))),
            (any::<i64>(), any::<i64>(), any::<i64>(), any::<i64>()).prop_map(
                |(appid, uid, device_id, msgid)| Message::peer_ack(PeerAck {
                    appid,
                    uid,
                    device_id,
                    msgid
                })
            ),
            (249u8..=255, prop::collection::vec(any::<u8>(), 0..32))
                .prop_map(|(cmd, raw)| Message::new(cmd, MessageBody::Ignored(raw))),
        ];
        (body, any::<i32>(), any::<u8>()).prop_map(|(mut msg, seq, flag)| {
            msg.seq = seq;
            msg.flag = flag;
            msg
        })
    }

    proptest! {
        #[test]
        fn frame_roundtrip(msg in arb_message()) {
            let frame = msg.encode_frame().unwrap();
            let (decoded, used) = Message::decode_frame(&frame).unwrap();
            prop_assert_eq!(used, frame.len());
            prop_assert_eq!(decoded.encode_frame().unwrap(), frame);
            prop_assert_eq!(decoded, msg);
        }

        #[test]
        fn im_v0_roundtrip(im in arb_im()) {
            let msg = Message::im(ImMessage { timestamp: 0, ..im }).with_version(0);
            let frame = msg.encode_frame().unwrap();
            prop_assert_eq!(Message::decode_frame(&frame).unwrap().0, msg);
        }

        #[test]
        fn batch_roundtrip(msgs in prop::collection::vec(arb_message(), 0..8), first in 0i64..1 << 40) {
            let batch = Message::sync_batch(MessageBatch::new(first, first + 1, msgs));
            let frame = batch.encode_frame().unwrap();
            prop_assert_eq!(Message::decode_frame(&frame).unwrap().0, batch);
        }

        #[test]
        fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = Message::decode_frame(&data);
        }
    }
}
