//! Slave side: follow a master and apply its records verbatim.

use std::sync::Arc;

use imstore_codec::command::command_name;
use imstore_codec::{Message, MessageBody};
use imstore_core::Storage;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::state::ReplicationStats;
use crate::wire::{read_message, write_message};

/// Connects to a master and keeps the local log identical to it.
///
/// Each session sends `SYNC_BEGIN` with the local next id, then applies
/// batches as they arrive. Transport failures reconnect with backoff;
/// storage failures stop replication.
pub struct ReplicationSlave {
    storage: Arc<Storage>,
    config: ReplicationConfig,
    master_addr: String,
    stats: Mutex<ReplicationStats>,
}

impl ReplicationSlave {
    /// Creates a slave for `config.master_addr`.
    pub fn new(storage: Arc<Storage>, config: ReplicationConfig) -> ReplicationResult<Self> {
        let master_addr = config
            .master_addr
            .clone()
            .ok_or_else(|| ReplicationError::transport_fatal("no master address configured"))?;
        Ok(Self {
            storage,
            config,
            master_addr,
            stats: Mutex::new(ReplicationStats::default()),
        })
    }

    /// Address of the master.
    pub fn master_addr(&self) -> &str {
        &self.master_addr
    }

    /// Counters so far.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.lock().clone()
    }

    /// Replicates until `shutdown` turns true or a non-retryable error occurs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ReplicationResult<()> {
        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let mut applied = 0u64;
            let result = tokio::select! {
                result = self.run_once(&mut applied) => result,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            if applied > 0 {
                attempt = 0;
            }
            match result {
                Ok(()) => {}
                Err(err) if err.is_retryable() => {
                    warn!(master = %self.master_addr, %err, "replication session failed");
                    self.stats.lock().last_error = Some(err.to_string());
                }
                Err(err) => {
                    error!(master = %self.master_addr, %err, "replication stopped");
                    self.stats.lock().last_error = Some(err.to_string());
                    return Err(err);
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.config.retry.delay_for_attempt(attempt);
            debug!(attempt, ?delay, "reconnecting to master");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("replication slave stopped");
        Ok(())
    }

    /// One session. `applied` counts frames applied, even if the session
    /// later fails.
    async fn run_once(&self, applied: &mut u64) -> ReplicationResult<()> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&self.master_addr))
            .await
            .map_err(|_| ReplicationError::Timeout)??;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let cursor = self.storage.next_id();
        write_message(&mut writer, &Message::sync_begin(cursor)).await?;
        self.stats.lock().sessions += 1;
        info!(master = %self.master_addr, cursor, "connected to master");

        loop {
            let message = timeout(self.config.read_timeout, read_message(&mut reader))
                .await
                .map_err(|_| ReplicationError::Timeout)??;
            let storage = Arc::clone(&self.storage);
            let records = tokio::task::spawn_blocking(move || apply(&storage, message)).await??;
            *applied += 1;
            {
                let mut stats = self.stats.lock();
                stats.batches += 1;
                stats.records += records as u64;
            }
        }
    }
}

/// Applies one replication frame, returning the records written.
fn apply(storage: &Storage, message: Message) -> ReplicationResult<usize> {
    match message.body {
        MessageBody::SyncMessageBatch(batch) => Ok(storage.save_sync_message_batch(&batch)?),
        MessageBody::SyncMessage(emsg) => {
            Ok(usize::from(storage.save_sync_message(emsg.msgid, &emsg.message)?))
        }
        _ => Err(ReplicationError::Protocol(format!(
            "unexpected {} from master",
            command_name(message.cmd)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::{EMessage, ImMessage, MessageBatch};
    use imstore_core::StorageConfig;
    use std::net::SocketAddr;
    use tempfile::tempdir;

    fn config() -> ReplicationConfig {
        ReplicationConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    #[test]
    fn requires_master_address() {
        let tmp = tempdir().unwrap();
        let storage = Arc::new(Storage::open(tmp.path(), StorageConfig::default()).unwrap());
        assert!(ReplicationSlave::new(Arc::clone(&storage), config()).is_err());
        let slave = ReplicationSlave::new(storage, config().with_master("127.0.0.1:1")).unwrap();
        assert_eq!(slave.master_addr(), "127.0.0.1:1");
    }

    #[test]
    fn apply_rejects_non_sync_frames() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), StorageConfig::default()).unwrap();
        let err = apply(&storage, Message::sync_begin(0)).unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol(_)));
        assert!(apply(&storage, Message::sync_batch(MessageBatch::default())).is_ok());
    }

    #[test]
    fn apply_single_record() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), StorageConfig::default()).unwrap();
        let id = storage.next_id();
        let im = Message::im(ImMessage {
            msgid: 7,
            content: "one".into(),
            ..ImMessage::default()
        });
        let emsg = EMessage::new(id, 0, im.clone());
        assert_eq!(apply(&storage, Message::sync_message(emsg.clone())).unwrap(), 1);
        assert_eq!(storage.read_message(id).unwrap(), Some(im));
        assert_eq!(apply(&storage, Message::sync_message(emsg)).unwrap(), 0);
    }
}
