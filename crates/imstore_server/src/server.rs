//! TCP RPC server.

use std::net::SocketAddr;
use std::sync::Arc;

use imstore_protocol::{
    decode_request, encode_response, parse_header, RpcRequest, RpcResponse, FRAME_HEADER_LEN,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::RpcHandler;

/// Reads one frame. `None` on a clean end of stream before a header.
pub(crate) async fn read_frame<R>(reader: &mut R, max: usize) -> ServerResult<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[n..]).await?;
    let (type_code, len) = parse_header(&header, max)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some((type_code, body)))
}

/// Writes one complete frame and flushes it.
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// The RPC server.
///
/// Each connection is served by its own task. Requests on one connection are
/// answered in order.
pub struct RpcServer {
    handler: Arc<RpcHandler>,
    config: ServerConfig,
    permits: Arc<Semaphore>,
}

impl RpcServer {
    /// Creates a server around a handler.
    pub fn new(handler: RpcHandler, config: ServerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            handler: Arc::new(handler),
            config,
            permits,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds `config.bind_addr` and serves until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` turns true.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServerResult<()> {
        info!(addr = ?listener.local_addr().ok(), "rpc server listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                        warn!(%addr, "connection limit reached, refusing");
                        continue;
                    };
                    let server = Arc::clone(&self);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.connection(stream, addr, shutdown).await {
                            debug!(%addr, %err, "rpc connection ended");
                        }
                        drop(permit);
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("rpc server stopped");
        Ok(())
    }

    async fn connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServerResult<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        debug!(%addr, "rpc connection opened");
        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader, self.config.max_frame_size) => frame?,
                _ = shutdown.changed() => return Ok(()),
            };
            let Some((type_code, body)) = frame else {
                debug!(%addr, "rpc connection closed");
                return Ok(());
            };
            let response = match decode_request(type_code, &body) {
                Ok(request) => self.dispatch(request).await,
                Err(err) => {
                    warn!(%addr, %err, "undecodable request");
                    RpcResponse::error(err.to_string(), false)
                }
            };
            let frame = match encode_response(&response, self.config.max_frame_size) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%addr, %err, "cannot encode response");
                    encode_response(&RpcResponse::error(err.to_string(), false), self.config.max_frame_size)?
                }
            };
            write_frame(&mut writer, &frame).await?;
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let name = request.name();
        let handler = Arc::clone(&self.handler);
        let task = tokio::task::spawn_blocking(move || handler.respond(request));
        match timeout(self.config.request_timeout, task).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(request = name, %err, "rpc task failed");
                RpcResponse::error(format!("internal error: {err}"), false)
            }
            Err(_) => {
                warn!(request = name, "rpc timed out");
                RpcResponse::error("request timed out", true)
            }
        }
    }
}
