//! Master side: catch-up from the log, then live fan-out.
//!
//! Appended records reach the broadcaster thread through the storage's
//! replication channel. The broadcaster groups them into batches and offers
//! each encoded batch to every streaming slave's bounded queue. A slave whose
//! queue is full is dropped; it reconnects and catches up from its own cursor.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use imstore_codec::command::MSG_STORAGE_SYNC_BEGIN;
use imstore_codec::{EMessage, Message, MessageBatch, MessageBody};
use imstore_core::{CoreResult, RecordPos, Storage};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{ReplicationConfig, MAX_FRAME_SIZE};
use crate::error::{ReplicationError, ReplicationResult};
use crate::state::{ReplicaState, ReplicationStats};
use crate::wire::{read_message, write_frame, write_message};

/// Encoded `SYNC_MESSAGE_BATCH` frame shared by all slaves.
type Frame = Arc<Vec<u8>>;

/// Batches stop growing past this many bytes, well under the frame limit.
const MAX_BATCH_BYTES: i64 = (MAX_FRAME_SIZE / 2) as i64;

struct Client {
    addr: SocketAddr,
    state: ReplicaState,
    tx: Option<mpsc::Sender<Frame>>,
}

/// A replica connection as seen by the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Connection id.
    pub id: u64,
    /// Remote address.
    pub addr: SocketAddr,
    /// Lifecycle state.
    pub state: ReplicaState,
}

/// Replica connections and their live queues.
#[derive(Default)]
pub struct ClientSet {
    clients: Mutex<HashMap<u64, Client>>,
    next_id: AtomicU64,
}

impl ClientSet {
    fn add(&self, addr: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().insert(
            id,
            Client {
                addr,
                state: ReplicaState::Catchup,
                tx: None,
            },
        );
        id
    }

    /// Gives a connection a live queue. `None` if it has been removed.
    fn subscribe(&self, id: u64, capacity: usize) -> Option<mpsc::Receiver<Frame>> {
        let mut clients = self.clients.lock();
        let client = clients.get_mut(&id)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        client.tx = Some(tx);
        Some(rx)
    }

    fn set_state(&self, id: u64, state: ReplicaState) {
        if let Some(client) = self.clients.lock().get_mut(&id) {
            if client.state.can_transition_to(state) {
                client.state = state;
            }
        }
    }

    fn remove(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    fn clear(&self) {
        self.clients.lock().clear();
    }

    /// Offers a frame to every subscribed connection. Connections whose
    /// queue is full or closed are removed. Returns how many were dropped.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let mut clients = self.clients.lock();
        let mut dropped = Vec::new();
        for (&id, client) in clients.iter() {
            let Some(tx) = &client.tx else { continue };
            match tx.try_send(Arc::clone(frame)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(addr = %client.addr, "replica queue full, dropping replica");
                    dropped.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(id),
            }
        }
        for id in &dropped {
            clients.remove(id);
        }
        dropped.len()
    }

    /// Number of connections.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// True if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Current connections, ordered by id.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        let mut out: Vec<_> = self
            .clients
            .lock()
            .iter()
            .map(|(&id, c)| ClientInfo {
                id,
                addr: c.addr,
                state: c.state,
            })
            .collect();
        out.sort_by_key(|c| c.id);
        out
    }
}

/// Groups live records into batches for the client set.
struct Broadcaster {
    clients: Arc<ClientSet>,
    stats: Arc<Mutex<ReplicationStats>>,
    block_size: u64,
    batch_size: usize,
    interval: Duration,
    pending: Vec<Message>,
    first_id: i64,
    last_id: i64,
    started: Option<Instant>,
}

impl Broadcaster {
    fn run(mut self, rx: Receiver<EMessage>) {
        info!("replication broadcaster started");
        loop {
            let wait = self
                .started
                .map_or(self.interval, |t| self.interval.saturating_sub(t.elapsed()));
            match rx.recv_timeout(wait) {
                Ok(emsg) => self.push(emsg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush();
                    break;
                }
            }
            if self.started.is_some_and(|t| t.elapsed() >= self.interval) {
                self.flush();
            }
        }
        info!("replication broadcaster stopped");
    }

    fn push(&mut self, emsg: EMessage) {
        if !self.pending.is_empty() {
            let same_block = RecordPos::from_id(emsg.msgid, self.block_size).block
                == RecordPos::from_id(self.first_id, self.block_size).block;
            if !same_block || emsg.msgid - self.first_id >= MAX_BATCH_BYTES {
                self.flush();
            }
        }
        if self.pending.is_empty() {
            self.first_id = emsg.msgid;
            self.started = Some(Instant::now());
        }
        self.last_id = emsg.msgid;
        self.pending.push(emsg.message);
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.started = None;
        if self.pending.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut self.pending);
        let count = messages.len() as u64;
        let batch = MessageBatch::new(self.first_id, self.last_id, messages);
        match Message::sync_batch(batch).encode_frame() {
            Ok(frame) => {
                let dropped = self.clients.broadcast(&Arc::new(frame));
                let mut stats = self.stats.lock();
                stats.batches += 1;
                stats.records += count;
                stats.dropped_clients += dropped as u64;
            }
            Err(err) => {
                // Every replica would miss this batch, so all of them resync.
                error!(%err, first_id = self.first_id, "cannot encode live batch, dropping all replicas");
                self.clients.clear();
            }
        }
    }
}

/// Reads up to `max` records from `from`, never crossing a block.
///
/// Returns the batch and the id to continue from, or `None` at the end of
/// the log.
pub fn read_batch(
    storage: &Storage,
    from: i64,
    max: usize,
) -> CoreResult<Option<(MessageBatch, i64)>> {
    let block_size = storage.block_size();
    let mut scanner = storage.scan(from);
    let mut messages = Vec::new();
    let (mut first_id, mut last_id, mut cursor) = (0, 0, from);
    while messages.len() < max {
        let Some(item) = scanner.next() else { break };
        let (id, message) = item?;
        if messages.is_empty() {
            first_id = id;
        } else if RecordPos::from_id(id, block_size).block
            != RecordPos::from_id(first_id, block_size).block
            || id - first_id >= MAX_BATCH_BYTES
        {
            cursor = id;
            break;
        }
        last_id = id;
        messages.push(message);
        cursor = scanner.next_id();
    }
    if messages.is_empty() {
        return Ok(None);
    }
    Ok(Some((MessageBatch::new(first_id, last_id, messages), cursor)))
}

/// The master end of replication.
pub struct ReplicationMaster {
    storage: Arc<Storage>,
    config: ReplicationConfig,
    clients: Arc<ClientSet>,
    stats: Arc<Mutex<ReplicationStats>>,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationMaster {
    /// Attaches to the storage's replication channel and starts the
    /// broadcaster thread.
    pub fn start(storage: Arc<Storage>, config: ReplicationConfig) -> ReplicationResult<Arc<Self>> {
        let rx = storage.open_replication_channel();
        let clients = Arc::new(ClientSet::default());
        let stats = Arc::new(Mutex::new(ReplicationStats::default()));
        let broadcaster = Broadcaster {
            clients: Arc::clone(&clients),
            stats: Arc::clone(&stats),
            block_size: storage.block_size(),
            batch_size: config.live_batch_size.max(1),
            interval: config.live_flush_interval,
            pending: Vec::new(),
            first_id: 0,
            last_id: 0,
            started: None,
        };
        let handle = std::thread::Builder::new()
            .name("imstore-broadcast".into())
            .spawn(move || broadcaster.run(rx))
            .map_err(|err| ReplicationError::Task(err.to_string()))?;

        Ok(Arc::new(Self {
            storage,
            config,
            clients,
            stats,
            broadcaster: Mutex::new(Some(handle)),
        }))
    }

    /// Accepts replica connections until `shutdown` turns true.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReplicationResult<()> {
        info!(addr = ?listener.local_addr().ok(), "replication master listening");
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
                    let master = Arc::clone(&self);
                    tokio::spawn(async move { master.handle_connection(stream, addr).await });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.clients.clear();
        info!("replication master stopped accepting");
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let id = self.clients.add(addr);
        self.stats.lock().sessions += 1;
        let result = self.session(id, stream, addr).await;
        self.clients.remove(id);
        match result {
            Ok(()) => info!(%addr, "replica disconnected"),
            Err(err) => {
                warn!(%addr, %err, "replica session failed");
                self.stats.lock().last_error = Some(err.to_string());
            }
        }
    }

    async fn session(&self, id: u64, stream: TcpStream, addr: SocketAddr) -> ReplicationResult<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let begin = timeout(self.config.read_timeout, read_message(&mut reader))
            .await
            .map_err(|_| ReplicationError::Timeout)??;
        let cursor = match begin.body {
            MessageBody::SyncBegin(cursor) if begin.cmd == MSG_STORAGE_SYNC_BEGIN => cursor.msgid,
            _ => {
                return Err(ReplicationError::Protocol(format!(
                    "expected SYNC_BEGIN, got command {}",
                    begin.cmd
                )))
            }
        };
        info!(%addr, cursor, "replica catching up");

        let cursor = self.catch_up(&mut writer, cursor).await?;
        let Some(mut live) = self.clients.subscribe(id, self.config.client_queue_capacity) else {
            return Ok(());
        };
        // Records appended between the scan and the subscription.
        let cursor = self.catch_up(&mut writer, cursor).await?;
        self.clients.set_state(id, ReplicaState::Streaming);
        info!(%addr, cursor, "replica streaming");

        let mut probe = [0u8; 1];
        loop {
            tokio::select! {
                frame = live.recv() => match frame {
                    Some(frame) => write_frame(&mut writer, &frame).await?,
                    None => {
                        debug!(%addr, "live queue closed");
                        return Ok(());
                    }
                },
                read = reader.read(&mut probe) => match read {
                    Ok(0) => return Ok(()),
                    Ok(_) => {
                        return Err(ReplicationError::Protocol(
                            "replica sent data while streaming".into(),
                        ))
                    }
                    Err(err) => return Err(err.into()),
                },
            }
        }
    }

    async fn catch_up<W>(&self, writer: &mut W, mut cursor: i64) -> ReplicationResult<i64>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let storage = Arc::clone(&self.storage);
            let max = self.config.catchup_batch_size.max(1);
            let next = tokio::task::spawn_blocking(move || read_batch(&storage, cursor, max)).await??;
            let Some((batch, next_cursor)) = next else {
                return Ok(cursor);
            };
            let count = batch.len() as u64;
            debug!(first_id = batch.first_id, last_id = batch.last_id, count, "catch-up batch");
            write_message(writer, &Message::sync_batch(batch)).await?;
            {
                let mut stats = self.stats.lock();
                stats.batches += 1;
                stats.records += count;
            }
            cursor = next_cursor;
        }
    }

    /// Current replica connections.
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.clients.snapshot()
    }

    /// Counters so far.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.lock().clone()
    }

    /// Detaches from storage and waits for the broadcaster to drain.
    pub fn stop(&self) {
        self.storage.detach_replication();
        if let Some(handle) = self.broadcaster.lock().take() {
            if handle.join().is_err() {
                error!("replication broadcaster panicked");
            }
        }
        self.clients.clear();
    }
}

impl Drop for ReplicationMaster {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::ImMessage;
    use imstore_core::StorageConfig;
    use tempfile::tempdir;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    #[test]
    fn full_queue_drops_client() {
        let set = ClientSet::default();
        let slow = set.add(addr());
        let fast = set.add(addr());
        let _slow_rx = set.subscribe(slow, 1).unwrap();
        let mut fast_rx = set.subscribe(fast, 4).unwrap();

        let frame: Frame = Arc::new(vec![1, 2, 3]);
        assert_eq!(set.broadcast(&frame), 0);
        assert_eq!(set.broadcast(&frame), 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot()[0].id, fast);
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn catchup_clients_get_no_live_frames() {
        let set = ClientSet::default();
        let id = set.add(addr());
        assert_eq!(set.broadcast(&Arc::new(vec![0])), 0);
        assert_eq!(set.snapshot()[0].state, ReplicaState::Catchup);
        set.set_state(id, ReplicaState::Streaming);
        set.set_state(id, ReplicaState::Catchup);
        assert_eq!(set.snapshot()[0].state, ReplicaState::Streaming);
    }

    #[test]
    fn batches_stop_at_block_boundary() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), StorageConfig::default().block_size(2048)).unwrap();
        for n in 0..100 {
            let im = Message::im(ImMessage {
                msgid: n,
                content: "batch".into(),
                ..ImMessage::default()
            });
            storage.save_peer_message(1, 2, 0, &im).unwrap();
        }
        assert!(storage.position().block > 1);

        let mut cursor = 0;
        let mut total = 0;
        while let Some((batch, next)) = read_batch(&storage, cursor, 5000).unwrap() {
            let first = RecordPos::from_id(batch.first_id, 2048).block;
            let last = RecordPos::from_id(batch.last_id, 2048).block;
            assert_eq!(first, last);
            assert!(next > batch.last_id);
            total += batch.len();
            cursor = next;
        }
        assert_eq!(total, storage.scan(0).count());

        let (small, _) = read_batch(&storage, 0, 3).unwrap().unwrap();
        assert_eq!(small.len(), 3);
    }
}
