//! TCP RPC client.

use std::time::Duration;

use imstore_protocol::{
    decode_response, encode_request, DequeueGroupMessage, DequeueMessage, GroupHistoryMessage,
    GroupMessage, HistoryMessage, HistoryMessageId, HistoryRequest, PeerGroupMessage,
    PeerHistoryMessage, PeerMessage, RpcRequest, RpcResponse, SyncGroupHistory, SyncHistory,
    MAX_FRAME_SIZE,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use crate::error::{ServerError, ServerResult};
use crate::server::{read_frame, write_frame};

/// Default deadline for one call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// A connection to an RPC server.
///
/// Calls are sequential. A call that fails on the transport or times out
/// leaves the connection unusable; later calls fail with a retryable error
/// until the caller reconnects.
pub struct RpcClient {
    stream: Option<TcpStream>,
    call_timeout: Duration,
    max_frame_size: usize,
}

impl RpcClient {
    /// Connects to `addr` within the call timeout.
    pub async fn connect(addr: impl ToSocketAddrs) -> ServerResult<Self> {
        let stream = timeout(DEFAULT_CALL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ServerError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: Some(stream),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
        })
    }

    /// Sets the per-call deadline.
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Sends a request and waits for its reply. Timeouts are not retried.
    pub async fn call(&mut self, request: &RpcRequest) -> ServerResult<RpcResponse> {
        let frame = encode_request(request, self.max_frame_size)?;
        let mut stream = self.stream.take().ok_or_else(|| {
            ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection lost by an earlier call",
            ))
        })?;
        let max = self.max_frame_size;
        let exchange = async {
            write_frame(&mut stream, &frame).await?;
            read_frame(&mut stream, max).await
        };
        let reply = timeout(self.call_timeout, exchange)
            .await
            .map_err(|_| ServerError::Timeout)??;
        let (type_code, body) = reply.ok_or_else(|| {
            ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))
        })?;
        let response = decode_response(type_code, &body)?;
        self.stream = Some(stream);
        match response {
            RpcResponse::Error(err) => Err(ServerError::Remote {
                message: err.message,
                retryable: err.retryable,
            }),
            response => Ok(response),
        }
    }

    /// Liveness check.
    pub async fn ping(&mut self) -> ServerResult<()> {
        match self.call(&RpcRequest::Ping).await? {
            RpcResponse::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Saves a peer message.
    pub async fn save_peer_message(&mut self, m: PeerMessage) -> ServerResult<HistoryMessageId> {
        match self.call(&RpcRequest::SavePeerMessage(m)).await? {
            RpcResponse::HistoryMessageId(id) => Ok(id),
            other => Err(unexpected(&other)),
        }
    }

    /// Saves a super group message.
    pub async fn save_group_message(&mut self, m: GroupMessage) -> ServerResult<HistoryMessageId> {
        match self.call(&RpcRequest::SaveGroupMessage(m)).await? {
            RpcResponse::HistoryMessageId(id) => Ok(id),
            other => Err(unexpected(&other)),
        }
    }

    /// Saves one message for each member of an ordinary group.
    pub async fn save_peer_group_message(
        &mut self,
        m: PeerGroupMessage,
    ) -> ServerResult<Vec<HistoryMessageId>> {
        match self.call(&RpcRequest::SavePeerGroupMessage(m)).await? {
            RpcResponse::HistoryMessageIds(ids) => Ok(ids),
            other => Err(unexpected(&other)),
        }
    }

    /// Offline sync.
    pub async fn sync_message(&mut self, s: SyncHistory) -> ServerResult<PeerHistoryMessage> {
        match self.call(&RpcRequest::SyncMessage(s)).await? {
            RpcResponse::PeerHistory(history) => Ok(history),
            other => Err(unexpected(&other)),
        }
    }

    /// Group sync.
    pub async fn sync_group_message(&mut self, s: SyncGroupHistory) -> ServerResult<GroupHistoryMessage> {
        match self.call(&RpcRequest::SyncGroupMessage(s)).await? {
            RpcResponse::GroupHistory(history) => Ok(history),
            other => Err(unexpected(&other)),
        }
    }

    /// Pending message count.
    pub async fn get_new_count(&mut self, s: SyncHistory) -> ServerResult<u64> {
        match self.call(&RpcRequest::GetNewCount(s)).await? {
            RpcResponse::Count(count) => Ok(count),
            other => Err(unexpected(&other)),
        }
    }

    /// Latest visible messages, newest first.
    pub async fn get_latest_message(&mut self, r: HistoryRequest) -> ServerResult<Vec<HistoryMessage>> {
        match self.call(&RpcRequest::GetLatestMessage(r)).await? {
            RpcResponse::Messages(messages) => Ok(messages),
            other => Err(unexpected(&other)),
        }
    }

    /// Peer ack.
    pub async fn dequeue_message(&mut self, d: DequeueMessage) -> ServerResult<()> {
        match self.call(&RpcRequest::DequeueMessage(d)).await? {
            RpcResponse::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Group ack.
    pub async fn dequeue_group_message(&mut self, d: DequeueGroupMessage) -> ServerResult<()> {
        match self.call(&RpcRequest::DequeueGroupMessage(d)).await? {
            RpcResponse::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &RpcResponse) -> ServerError {
    ServerError::Internal(format!(
        "unexpected response type {}",
        response.type_code()
    ))
}
