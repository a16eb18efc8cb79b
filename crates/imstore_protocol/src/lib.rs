//! # imstore protocol
//!
//! RPC request/response types and the framing used on the RPC socket.
//!
//! This is a pure protocol crate with no I/O operations. The server and
//! client in `imstore_server` read and write these frames over TCP.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{
    decode_request, decode_response, encode_request, encode_response, parse_header,
    FRAME_HEADER_LEN, MAX_FRAME_SIZE,
};
pub use messages::{
    DequeueGroupMessage, DequeueMessage, ErrorResponse, GroupHistoryMessage, GroupMessage,
    HistoryMessage, HistoryMessageId, HistoryRequest, PeerGroupMessage, PeerHistoryMessage,
    PeerMessage, RpcRequest, RpcResponse, SyncGroupHistory, SyncHistory,
};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn peer_message_roundtrip(
            appid in any::<i64>(),
            uid in any::<i64>(),
            device_id in any::<i64>(),
            cmd in any::<i32>(),
            raw in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let request = RpcRequest::SavePeerMessage(PeerMessage { appid, uid, device_id, cmd, raw });
            let frame = encode_request(&request, MAX_FRAME_SIZE).unwrap();
            let (code, len) = parse_header(&frame, MAX_FRAME_SIZE).unwrap();
            prop_assert_eq!(len, frame.len() - FRAME_HEADER_LEN);
            prop_assert_eq!(decode_request(code, &frame[FRAME_HEADER_LEN..]).unwrap(), request);
        }
    }
}
