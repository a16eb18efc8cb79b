//! Length-prefixed CBOR framing for the RPC socket.
//!
//! ```text
//! len: u32 BE | type: u8 | body: CBOR[len - 1]
//! ```
//!
//! `len` counts the type byte and the body. The type byte selects the
//! request or response variant; the body is the CBOR encoding of that
//! variant's payload (`null` for payload-less variants).

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{RpcRequest, RpcResponse};

/// Bytes before the CBOR body: length plus type.
pub const FRAME_HEADER_LEN: usize = 5;

/// Default upper bound on `len`.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(ProtocolError::encode)?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(body: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(body).map_err(ProtocolError::decode)
}

fn frame(type_code: u8, body: &[u8], max: usize) -> ProtocolResult<Vec<u8>> {
    let len = body.len() + 1;
    if len > max {
        return Err(ProtocolError::FrameTooLarge { len, max });
    }
    let len32 = u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge { len, max })?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&len32.to_be_bytes());
    out.push(type_code);
    out.extend_from_slice(body);
    Ok(out)
}

/// Parses a frame header into `(type_code, body_len)`.
pub fn parse_header(header: &[u8], max: usize) -> ProtocolResult<(u8, usize)> {
    if header.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: FRAME_HEADER_LEN,
            got: header.len(),
        });
    }
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len == 0 {
        return Err(ProtocolError::decode("zero-length frame"));
    }
    if len > max {
        return Err(ProtocolError::FrameTooLarge { len, max });
    }
    Ok((header[4], len - 1))
}

/// Encodes a request as a complete frame.
pub fn encode_request(request: &RpcRequest, max: usize) -> ProtocolResult<Vec<u8>> {
    let body = match request {
        RpcRequest::SavePeerMessage(m) => to_cbor(m)?,
        RpcRequest::SaveGroupMessage(m) => to_cbor(m)?,
        RpcRequest::SavePeerGroupMessage(m) => to_cbor(m)?,
        RpcRequest::SyncMessage(m) | RpcRequest::GetNewCount(m) => to_cbor(m)?,
        RpcRequest::SyncGroupMessage(m) => to_cbor(m)?,
        RpcRequest::GetLatestMessage(m) => to_cbor(m)?,
        RpcRequest::DequeueMessage(m) => to_cbor(m)?,
        RpcRequest::DequeueGroupMessage(m) => to_cbor(m)?,
        RpcRequest::Ping => to_cbor(&())?,
    };
    frame(request.type_code(), &body, max)
}

/// Decodes a request body for the given type code.
pub fn decode_request(type_code: u8, body: &[u8]) -> ProtocolResult<RpcRequest> {
    Ok(match type_code {
        1 => RpcRequest::SavePeerMessage(from_cbor(body)?),
        2 => RpcRequest::SaveGroupMessage(from_cbor(body)?),
        3 => RpcRequest::SavePeerGroupMessage(from_cbor(body)?),
        4 => RpcRequest::SyncMessage(from_cbor(body)?),
        5 => RpcRequest::SyncGroupMessage(from_cbor(body)?),
        6 => RpcRequest::GetNewCount(from_cbor(body)?),
        7 => RpcRequest::GetLatestMessage(from_cbor(body)?),
        8 => RpcRequest::DequeueMessage(from_cbor(body)?),
        9 => RpcRequest::DequeueGroupMessage(from_cbor(body)?),
        10 => RpcRequest::Ping,
        code => return Err(ProtocolError::UnknownType { code }),
    })
}

/// Encodes a response as a complete frame.
pub fn encode_response(response: &RpcResponse, max: usize) -> ProtocolResult<Vec<u8>> {
    let body = match response {
        RpcResponse::HistoryMessageId(m) => to_cbor(m)?,
        RpcResponse::HistoryMessageIds(m) => to_cbor(m)?,
        RpcResponse::PeerHistory(m) => to_cbor(m)?,
        RpcResponse::GroupHistory(m) => to_cbor(m)?,
        RpcResponse::Count(n) => to_cbor(n)?,
        RpcResponse::Messages(m) => to_cbor(m)?,
        RpcResponse::Ack | RpcResponse::Pong => to_cbor(&())?,
        RpcResponse::Error(e) => to_cbor(e)?,
    };
    frame(response.type_code(), &body, max)
}

/// Decodes a response body for the given type code.
pub fn decode_response(type_code: u8, body: &[u8]) -> ProtocolResult<RpcResponse> {
    Ok(match type_code {
        101 => RpcResponse::HistoryMessageId(from_cbor(body)?),
        102 => RpcResponse::HistoryMessageIds(from_cbor(body)?),
        103 => RpcResponse::PeerHistory(from_cbor(body)?),
        104 => RpcResponse::GroupHistory(from_cbor(body)?),
        105 => RpcResponse::Count(from_cbor(body)?),
        106 => RpcResponse::Messages(from_cbor(body)?),
        107 => RpcResponse::Ack,
        108 => RpcResponse::Pong,
        127 => RpcResponse::Error(from_cbor(body)?),
        code => return Err(ProtocolError::UnknownType { code }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::*;

    fn split(frame: &[u8]) -> (u8, &[u8]) {
        let (code, len) = parse_header(frame, MAX_FRAME_SIZE).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + len);
        (code, &frame[FRAME_HEADER_LEN..])
    }

    #[test]
    fn request_roundtrip() {
        let requests = vec![
            RpcRequest::SavePeerMessage(PeerMessage {
                appid: 1,
                uid: 2,
                device_id: 3,
                cmd: 4,
                raw: vec![1, 2, 3],
            }),
            RpcRequest::SavePeerGroupMessage(PeerGroupMessage {
                appid: 1,
                members: vec![5, 6, 7],
                device_id: 0,
                cmd: 8,
                raw: vec![],
            }),
            RpcRequest::SyncGroupMessage(SyncGroupHistory {
                appid: 1,
                uid: 2,
                device_id: 3,
                gid: 4,
                last_msgid: 5,
                timestamp: 6,
            }),
            RpcRequest::GetNewCount(SyncHistory {
                appid: 1,
                uid: 2,
                device_id: 3,
                last_msgid: 4,
            }),
            RpcRequest::Ping,
        ];
        for request in requests {
            let frame = encode_request(&request, MAX_FRAME_SIZE).unwrap();
            let (code, body) = split(&frame);
            assert_eq!(decode_request(code, body).unwrap(), request);
        }
    }

    #[test]
    fn response_roundtrip() {
        let responses = vec![
            RpcResponse::HistoryMessageId(HistoryMessageId {
                msgid: 100,
                prev_msgid: 32,
            }),
            RpcResponse::PeerHistory(PeerHistoryMessage {
                messages: vec![HistoryMessage {
                    msgid: 1,
                    device_id: 2,
                    cmd: 4,
                    raw: vec![9; 30],
                }],
                last_msgid: 1,
                has_more: true,
            }),
            RpcResponse::Count(42),
            RpcResponse::Ack,
            RpcResponse::error("storage unavailable", true),
        ];
        for response in responses {
            let frame = encode_response(&response, MAX_FRAME_SIZE).unwrap();
            let (code, body) = split(&frame);
            assert_eq!(decode_response(code, body).unwrap(), response);
        }
    }

    #[test]
    fn oversized_frame_rejected() {
        let request = RpcRequest::SavePeerMessage(PeerMessage {
            appid: 1,
            uid: 1,
            device_id: 1,
            cmd: 4,
            raw: vec![0; 64],
        });
        assert!(matches!(
            encode_request(&request, 16),
            Err(ProtocolError::FrameTooLarge { max: 16, .. })
        ));

        let mut header = [0u8; FRAME_HEADER_LEN];
        header[..4].copy_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            parse_header(&header, MAX_FRAME_SIZE),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        assert_eq!(
            decode_request(200, &[]).unwrap_err(),
            ProtocolError::UnknownType { code: 200 }
        );
        assert_eq!(
            decode_response(1, &[]).unwrap_err(),
            ProtocolError::UnknownType { code: 1 }
        );
    }

    #[test]
    fn garbage_body_is_decode_error() {
        assert!(matches!(
            decode_request(4, &[0xff, 0x00]),
            Err(ProtocolError::Decode { .. })
        ));
    }
}
