//! Dispatch of RPC requests onto the storage engine.

use std::sync::Arc;

use imstore_codec::command::{command_name, MSG_STORAGE_SYNC_BEGIN};
use imstore_codec::{EMessage, Message, DEFAULT_VERSION};
use imstore_core::Storage;
use imstore_protocol::{
    DequeueGroupMessage, DequeueMessage, GroupHistoryMessage, GroupMessage, HistoryMessage,
    HistoryMessageId, HistoryRequest, PeerGroupMessage, PeerHistoryMessage, PeerMessage,
    RpcRequest, RpcResponse, SyncGroupHistory, SyncHistory,
};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// Result sizes applied to sync requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLimits {
    /// Messages per offline sync.
    pub limit: usize,
    /// Offline records examined per sync, 0 for no bound.
    pub hard_limit: usize,
    /// Messages per group sync.
    pub group_limit: usize,
}

/// Serves RPC requests against one storage.
///
/// Every method blocks on the storage mutex; async callers run them under
/// `spawn_blocking`.
pub struct RpcHandler {
    storage: Arc<Storage>,
    limits: SyncLimits,
    read_only: bool,
}

impl RpcHandler {
    /// Creates a handler using the storage's configured limits.
    pub fn new(storage: Arc<Storage>) -> Self {
        let config = storage.config();
        let limits = SyncLimits {
            limit: config.limit,
            hard_limit: config.hard_limit,
            group_limit: config.group_limit,
        };
        Self {
            storage,
            limits,
            read_only: false,
        }
    }

    /// Refuses saves and acks. Used on replicas, whose log must only grow
    /// through replication.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Overrides the sync limits.
    pub fn with_limits(mut self, limits: SyncLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The limits in effect.
    pub fn limits(&self) -> SyncLimits {
        self.limits
    }

    /// Handles a request, turning failures into error replies.
    pub fn respond(&self, request: RpcRequest) -> RpcResponse {
        let name = request.name();
        match self.handle(request) {
            Ok(response) => response,
            Err(err) => {
                warn!(request = name, %err, "rpc failed");
                RpcResponse::error(err.to_string(), err.is_retryable())
            }
        }
    }

    /// Handles a request.
    pub fn handle(&self, request: RpcRequest) -> ServerResult<RpcResponse> {
        if self.read_only && writes(&request) {
            return Err(ServerError::InvalidRequest(format!(
                "{} refused: storage is a read-only replica",
                request.name()
            )));
        }
        match request {
            RpcRequest::SavePeerMessage(m) => self.save_peer_message(m).map(RpcResponse::HistoryMessageId),
            RpcRequest::SaveGroupMessage(m) => self.save_group_message(m).map(RpcResponse::HistoryMessageId),
            RpcRequest::SavePeerGroupMessage(m) => {
                self.save_peer_group_message(m).map(RpcResponse::HistoryMessageIds)
            }
            RpcRequest::SyncMessage(s) => self.sync_message(s).map(RpcResponse::PeerHistory),
            RpcRequest::SyncGroupMessage(s) => self.sync_group_message(s).map(RpcResponse::GroupHistory),
            RpcRequest::GetNewCount(s) => Ok(RpcResponse::Count(
                self.storage.get_new_count(s.appid, s.uid, s.last_msgid)?,
            )),
            RpcRequest::GetLatestMessage(r) => self.latest_messages(r).map(RpcResponse::Messages),
            RpcRequest::DequeueMessage(d) => {
                self.dequeue_message(d);
                Ok(RpcResponse::Ack)
            }
            RpcRequest::DequeueGroupMessage(d) => {
                self.dequeue_group_message(d);
                Ok(RpcResponse::Ack)
            }
            RpcRequest::Ping => Ok(RpcResponse::Pong),
        }
    }

    fn save_peer_message(&self, m: PeerMessage) -> ServerResult<HistoryMessageId> {
        let message = decode_raw(m.cmd, &m.raw)?;
        let (msgid, prev_msgid) =
            self.storage
                .save_peer_message(m.appid, m.uid, m.device_id, &message)?;
        Ok(HistoryMessageId { msgid, prev_msgid })
    }

    fn save_group_message(&self, m: GroupMessage) -> ServerResult<HistoryMessageId> {
        let message = decode_raw(m.cmd, &m.raw)?;
        let (msgid, prev_msgid) =
            self.storage
                .save_group_message(m.appid, m.gid, m.device_id, &message)?;
        Ok(HistoryMessageId { msgid, prev_msgid })
    }

    fn save_peer_group_message(&self, m: PeerGroupMessage) -> ServerResult<Vec<HistoryMessageId>> {
        let message = decode_raw(m.cmd, &m.raw)?;
        let ids = self
            .storage
            .save_peer_group_message(m.appid, &m.members, m.device_id, &message)?;
        Ok(ids
            .into_iter()
            .map(|(msgid, prev_msgid)| HistoryMessageId { msgid, prev_msgid })
            .collect())
    }

    fn sync_message(&self, s: SyncHistory) -> ServerResult<PeerHistoryMessage> {
        let result = self.storage.sync_history(
            s.appid,
            s.uid,
            s.last_msgid,
            self.limits.limit,
            self.limits.hard_limit,
        )?;
        debug!(
            appid = s.appid,
            uid = s.uid,
            device_id = s.device_id,
            since = s.last_msgid,
            count = result.messages.len(),
            last_msgid = result.last_msgid,
            has_more = result.has_more,
            "sync message"
        );
        Ok(PeerHistoryMessage {
            messages: to_history(result.messages)?,
            last_msgid: result.last_msgid,
            has_more: result.has_more,
        })
    }

    fn sync_group_message(&self, s: SyncGroupHistory) -> ServerResult<GroupHistoryMessage> {
        let (messages, last_msgid) = self.storage.sync_group_messages(
            s.appid,
            s.gid,
            s.last_msgid,
            s.timestamp,
            self.limits.group_limit,
        )?;
        debug!(
            appid = s.appid,
            gid = s.gid,
            uid = s.uid,
            since = s.last_msgid,
            count = messages.len(),
            "sync group message"
        );
        Ok(GroupHistoryMessage {
            messages: to_history(messages)?,
            last_msgid,
        })
    }

    fn latest_messages(&self, r: HistoryRequest) -> ServerResult<Vec<HistoryMessage>> {
        let limit = usize::try_from(r.limit)
            .map_err(|_| ServerError::InvalidRequest(format!("negative limit {}", r.limit)))?;
        to_history(self.storage.get_latest_messages(r.appid, r.uid, limit)?)
    }

    fn dequeue_message(&self, d: DequeueMessage) {
        if !self
            .storage
            .dequeue_message(d.appid, d.uid, d.device_id, d.msgid)
        {
            debug!(appid = d.appid, uid = d.uid, device_id = d.device_id, msgid = d.msgid, "stale peer ack");
        }
    }

    fn dequeue_group_message(&self, d: DequeueGroupMessage) {
        if !self
            .storage
            .dequeue_group_message(d.appid, d.gid, d.uid, d.device_id, d.msgid)
        {
            debug!(appid = d.appid, gid = d.gid, uid = d.uid, msgid = d.msgid, "stale group ack");
        }
    }
}

fn writes(request: &RpcRequest) -> bool {
    matches!(
        request,
        RpcRequest::SavePeerMessage(_)
            | RpcRequest::SaveGroupMessage(_)
            | RpcRequest::SavePeerGroupMessage(_)
            | RpcRequest::DequeueMessage(_)
            | RpcRequest::DequeueGroupMessage(_)
    )
}

/// Decodes a client-supplied body. Storage-internal commands are refused.
pub fn decode_raw(cmd: i32, raw: &[u8]) -> ServerResult<Message> {
    let cmd = u8::try_from(cmd)
        .map_err(|_| ServerError::InvalidRequest(format!("command {cmd} out of range")))?;
    if cmd >= MSG_STORAGE_SYNC_BEGIN {
        return Err(ServerError::InvalidRequest(format!(
            "command {} is reserved",
            command_name(cmd)
        )));
    }
    Message::from_body_bytes(cmd, DEFAULT_VERSION, 0, raw)
        .map_err(|err| ServerError::InvalidRequest(format!("undecodable {}: {err}", command_name(cmd))))
}

/// Converts stored records to wire form, bodies re-encoded at
/// [`DEFAULT_VERSION`].
fn to_history(messages: Vec<EMessage>) -> ServerResult<Vec<HistoryMessage>> {
    messages
        .into_iter()
        .map(|emsg| {
            let message = emsg.message.with_version(DEFAULT_VERSION);
            let raw = message.body_bytes().map_err(|err| {
                ServerError::Internal(format!("cannot re-encode message {}: {err}", emsg.msgid))
            })?;
            Ok(HistoryMessage {
                msgid: emsg.msgid,
                device_id: emsg.device_id,
                cmd: i32::from(message.cmd),
                raw,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::command::{MSG_IM, MSG_OFFLINE};
    use imstore_codec::ImMessage;
    use imstore_core::StorageConfig;
    use tempfile::{tempdir, TempDir};

    fn handler() -> (TempDir, RpcHandler) {
        let tmp = tempdir().unwrap();
        let storage = Arc::new(Storage::open(tmp.path(), StorageConfig::default()).unwrap());
        (tmp, RpcHandler::new(storage))
    }

    fn im_raw(msgid: i32) -> Vec<u8> {
        Message::im(ImMessage {
            sender: 1,
            receiver: 2,
            timestamp: 100,
            msgid,
            content: format!("hi {msgid}"),
        })
        .body_bytes()
        .unwrap()
    }

    fn save(handler: &RpcHandler, n: i32) -> HistoryMessageId {
        match handler
            .handle(RpcRequest::SavePeerMessage(PeerMessage {
                appid: 1,
                uid: 2,
                device_id: 9,
                cmd: i32::from(MSG_IM),
                raw: im_raw(n),
            }))
            .unwrap()
        {
            RpcResponse::HistoryMessageId(id) => id,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn limits_come_from_storage_config() {
        let (_tmp, handler) = handler();
        assert_eq!(handler.limits().limit, 3000);
        assert_eq!(handler.limits().group_limit, 100);
    }

    #[test]
    fn save_then_sync() {
        let (_tmp, handler) = handler();
        let a = save(&handler, 1);
        let b = save(&handler, 2);
        assert_eq!(a.prev_msgid, 0);
        assert_eq!(b.prev_msgid, a.msgid);

        let sync = SyncHistory {
            appid: 1,
            uid: 2,
            device_id: 9,
            last_msgid: a.msgid,
        };
        match handler.handle(RpcRequest::SyncMessage(sync)).unwrap() {
            RpcResponse::PeerHistory(history) => {
                assert_eq!(history.messages.len(), 1);
                let m = &history.messages[0];
                assert_eq!(m.msgid, b.msgid);
                assert_eq!(m.device_id, 9);
                assert_eq!(m.raw, im_raw(2));
                assert_eq!(history.last_msgid, b.msgid);
                assert!(!history.has_more);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            handler.handle(RpcRequest::GetNewCount(sync)).unwrap(),
            RpcResponse::Count(1)
        );
    }

    #[test]
    fn undecodable_body_is_invalid_request() {
        let (_tmp, handler) = handler();
        let err = handler
            .handle(RpcRequest::SavePeerMessage(PeerMessage {
                appid: 1,
                uid: 2,
                device_id: 0,
                cmd: i32::from(MSG_IM),
                raw: vec![1, 2],
            }))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn internal_commands_are_refused() {
        assert!(decode_raw(i32::from(MSG_OFFLINE), &[0; 64]).is_err());
        assert!(decode_raw(300, &[]).is_err());
        assert!(decode_raw(-1, &[]).is_err());
    }

    #[test]
    fn errors_become_replies() {
        let (_tmp, handler) = handler();
        let reply = handler.respond(RpcRequest::GetLatestMessage(HistoryRequest {
            appid: 1,
            uid: 2,
            limit: -5,
        }));
        match reply {
            RpcResponse::Error(err) => {
                assert!(err.message.contains("negative limit"));
                assert!(!err.retryable);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handler.respond(RpcRequest::Ping), RpcResponse::Pong);
    }

    #[test]
    fn read_only_refuses_writes() {
        let (_tmp, handler) = handler();
        let handler = handler.with_read_only(true);
        let err = handler
            .handle(RpcRequest::SavePeerMessage(PeerMessage {
                appid: 1,
                uid: 2,
                device_id: 0,
                cmd: i32::from(MSG_IM),
                raw: im_raw(1),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
        let sync = SyncHistory {
            appid: 1,
            uid: 2,
            device_id: 0,
            last_msgid: 0,
        };
        assert!(handler.handle(RpcRequest::SyncMessage(sync)).is_ok());
    }

    #[test]
    fn dequeue_acks() {
        let (_tmp, handler) = handler();
        let a = save(&handler, 1);
        let ack = DequeueMessage {
            appid: 1,
            uid: 2,
            device_id: 9,
            msgid: a.msgid,
        };
        assert_eq!(handler.handle(RpcRequest::DequeueMessage(ack)).unwrap(), RpcResponse::Ack);
        assert_eq!(handler.handle(RpcRequest::DequeueMessage(ack)).unwrap(), RpcResponse::Ack);
    }
}
