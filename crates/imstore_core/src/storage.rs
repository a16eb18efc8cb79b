//! Storage facade and recovery.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};

use imstore_codec::command::MESSAGE_FLAG_GROUP;
use imstore_codec::{EMessage, Message};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::block::{BlockStore, LogScanner};
use crate::checkpoint;
use crate::config::StorageConfig;
use crate::dir::StorageDir;
use crate::error::CoreResult;
use crate::group::{walk_group, GroupHead, GroupWalk};
use crate::index::IndexState;
use crate::peer::{self, offline_flag, SyncResult, UserIndex};
use crate::types::{DeviceKey, GroupKey, MemberKey, RecordPos, UserKey};

/// Everything guarded by the storage mutex.
pub(crate) struct StorageState {
    pub(crate) blocks: BlockStore,
    pub(crate) index: IndexState,
    replication: Option<SyncSender<EMessage>>,
}

impl StorageState {
    /// Appends, indexes and forwards one record.
    fn write(&mut self, message: &Message) -> CoreResult<i64> {
        let id = self.blocks.append(message)?;
        self.index.exec_message(id, message);
        self.forward(id, message);
        Ok(id)
    }

    fn forward(&mut self, id: i64, message: &Message) {
        if let Some(sender) = &self.replication {
            if sender.send(EMessage::new(id, 0, message.clone())).is_err() {
                warn!(id, "replication channel closed, detaching");
                self.replication = None;
            }
        }
    }
}

/// The IM storage engine.
///
/// `Storage` owns the block log and the indices derived from it. All
/// operations take `&self` and serialize on one mutex; share it behind an
/// `Arc`.
///
/// ```rust,no_run
/// use imstore_codec::{ImMessage, Message};
/// use imstore_core::{Storage, StorageConfig};
/// use std::path::Path;
///
/// let storage = Storage::open(Path::new("data"), StorageConfig::default())?;
/// let im = Message::im(ImMessage { sender: 1, receiver: 2, ..ImMessage::default() });
/// let (msgid, _) = storage.save_peer_message(7, 2, 0, &im)?;
/// let sync = storage.sync_history(7, 2, 0, 100, 0)?;
/// assert_eq!(sync.messages.last().map(|m| m.msgid), Some(msgid));
/// # Ok::<(), imstore_core::CoreError>(())
/// ```
pub struct Storage {
    config: StorageConfig,
    dir: StorageDir,
    pub(crate) state: Mutex<StorageState>,
    checkpoint_lock: Mutex<()>,
}

impl Storage {
    /// Opens or creates a store under `path`.
    ///
    /// The index is loaded from the checkpoint and repaired from the log
    /// records written after it. Without a usable checkpoint it is rebuilt
    /// from the whole log.
    pub fn open(path: &Path, config: StorageConfig) -> CoreResult<Self> {
        config.validate()?;
        let dir = StorageDir::open(path, config.create_if_missing)?;
        let blocks = BlockStore::open(dir.path(), config.block_size, config.read_cache_size)?;
        let next_id = blocks.next_id();

        let (mut index, from_id) = match checkpoint::load(&dir, next_id)? {
            Some((index, high_water)) => (index, high_water),
            None => (IndexState::new(), 0),
        };
        let mut replayed = 0usize;
        let mut applied = 0usize;
        for item in blocks.scan(from_id) {
            let (id, message) = item?;
            replayed += 1;
            if index.exec_message(id, &message) {
                applied += 1;
            }
        }
        info!(
            root = %dir.path().display(),
            from_id,
            next_id,
            replayed,
            applied,
            users = index.peers.len(),
            groups = index.groups.len(),
            mode = if from_id == 0 { "rebuild" } else { "repair" },
            "storage recovered"
        );

        Ok(Self {
            config,
            dir,
            state: Mutex::new(StorageState {
                blocks,
                index,
                replication: None,
            }),
            checkpoint_lock: Mutex::new(()),
        })
    }

    /// Configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Storage root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configured block size.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.config.block_size
    }

    /// Id the next record will be written at, before any rotation.
    #[must_use]
    pub fn next_id(&self) -> i64 {
        self.state.lock().blocks.next_id()
    }

    /// Current write position.
    #[must_use]
    pub fn position(&self) -> RecordPos {
        self.state.lock().blocks.position()
    }

    /// Creates the live replication channel and attaches its sender.
    ///
    /// Every record appended afterwards is sent, in append order, while the
    /// storage lock is held. A full channel blocks the writer.
    pub fn open_replication_channel(&self) -> Receiver<EMessage> {
        let (tx, rx) = mpsc::sync_channel(self.config.replication_channel_capacity);
        self.state.lock().replication = Some(tx);
        rx
    }

    /// Stops forwarding appended records.
    pub fn detach_replication(&self) {
        self.state.lock().replication = None;
    }

    /// Saves a peer message for one receiver.
    ///
    /// Returns the payload id and the receiver's previous latest payload id.
    pub fn save_peer_message(
        &self,
        appid: i64,
        uid: i64,
        device_id: i64,
        message: &Message,
    ) -> CoreResult<(i64, i64)> {
        let key = UserKey::new(appid, uid);
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let prev = st.index.peers.get(key).map_or(0, |ui| ui.last_msgid);
        let msgid = st.write(message)?;
        let off = st.index.peers.next_offline(key, msgid, device_id);
        st.write(&Message::offline(off).with_flag(offline_flag(message)))?;
        debug!(appid, uid, msgid, prev, cmd = message.cmd, "saved peer message");
        Ok((msgid, prev))
    }

    /// Saves one payload for every member of an ordinary group.
    ///
    /// Each member gets a group-flagged offline record. Returns one
    /// `(msgid, prev)` pair per member, in member order.
    pub fn save_peer_group_message(
        &self,
        appid: i64,
        members: &[i64],
        device_id: i64,
        message: &Message,
    ) -> CoreResult<Vec<(i64, i64)>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let msgid = st.write(message)?;
        let mut out = Vec::with_capacity(members.len());
        for &uid in members {
            let key = UserKey::new(appid, uid);
            let prev = st.index.peers.get(key).map_or(0, |ui| ui.last_msgid);
            let off = st.index.peers.next_offline(key, msgid, device_id);
            st.write(&Message::offline(off).with_flag(MESSAGE_FLAG_GROUP))?;
            out.push((msgid, prev));
        }
        debug!(appid, msgid, members = members.len(), "saved peer group message");
        Ok(out)
    }

    /// Saves a message to a group chain. Returns the payload id and the
    /// group's previous latest payload id.
    pub fn save_group_message(
        &self,
        appid: i64,
        gid: i64,
        device_id: i64,
        message: &Message,
    ) -> CoreResult<(i64, i64)> {
        let key = GroupKey::new(appid, gid);
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let prev = st.index.groups.get(key).map_or(0, |h| h.last_msgid);
        let msgid = st.write(message)?;
        let off = st.index.groups.next_offline(key, msgid, device_id);
        st.write(&Message::group_offline(off))?;
        debug!(appid, gid, msgid, prev, "saved group message");
        Ok((msgid, prev))
    }

    /// Offline sync for one user. See [`peer::sync_history`].
    pub fn sync_history(
        &self,
        appid: i64,
        uid: i64,
        since_id: i64,
        limit: usize,
        hard_limit: usize,
    ) -> CoreResult<SyncResult> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        peer::sync_history(
            &st.index.peers,
            &mut st.blocks,
            UserKey::new(appid, uid),
            since_id,
            limit,
            hard_limit,
        )
    }

    /// Offline records newer than payload `since_id`.
    pub fn get_new_count(&self, appid: i64, uid: i64, since_id: i64) -> CoreResult<u64> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        peer::new_count(
            &st.index.peers,
            &mut st.blocks,
            UserKey::new(appid, uid),
            since_id,
        )
    }

    /// Newest visible messages for a user, newest first.
    pub fn get_latest_messages(
        &self,
        appid: i64,
        uid: i64,
        limit: usize,
    ) -> CoreResult<Vec<EMessage>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        peer::latest_messages(&st.index.peers, &mut st.blocks, UserKey::new(appid, uid), limit)
    }

    /// Group messages newer than `since_id`, oldest first. `limit` 0 means
    /// no limit.
    pub fn load_group_history(
        &self,
        appid: i64,
        gid: i64,
        since_id: i64,
        limit: usize,
    ) -> CoreResult<Vec<EMessage>> {
        self.walk_group(
            GroupKey::new(appid, gid),
            GroupWalk {
                since_id,
                limit,
                join_ts: 0,
            },
        )
    }

    /// Group messages a member device has not acked, oldest first.
    pub fn load_group_offline(
        &self,
        appid: i64,
        gid: i64,
        uid: i64,
        device_id: i64,
        limit: usize,
    ) -> CoreResult<Vec<EMessage>> {
        let member = MemberKey {
            appid,
            gid,
            uid,
            device_id,
        };
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let since_id = st.index.received.effective_member(member);
        walk_group(
            &st.index.groups,
            &mut st.blocks,
            GroupKey::new(appid, gid),
            GroupWalk {
                since_id,
                limit,
                join_ts: 0,
            },
        )
    }

    /// Group sync for a member who joined at `join_ts`.
    ///
    /// Returns messages oldest first and the newest returned payload id, or
    /// `since_id` when nothing is returned.
    pub fn sync_group_messages(
        &self,
        appid: i64,
        gid: i64,
        since_id: i64,
        join_ts: i32,
        limit: usize,
    ) -> CoreResult<(Vec<EMessage>, i64)> {
        let messages = self.walk_group(
            GroupKey::new(appid, gid),
            GroupWalk {
                since_id,
                limit,
                join_ts,
            },
        )?;
        let last_msgid = messages.last().map_or(since_id, |m| m.msgid.max(since_id));
        Ok((messages, last_msgid))
    }

    fn walk_group(&self, key: GroupKey, walk: GroupWalk) -> CoreResult<Vec<EMessage>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        walk_group(&st.index.groups, &mut st.blocks, key, walk)
    }

    /// Acks peer messages up to `msgid` for one device. Returns false if the
    /// cursor was already there.
    pub fn dequeue_message(&self, appid: i64, uid: i64, device_id: i64, msgid: i64) -> bool {
        let key = DeviceKey {
            appid,
            uid,
            device_id,
        };
        self.state.lock().index.received.dequeue_peer(key, msgid)
    }

    /// Acks group messages up to `msgid` for one member device.
    pub fn dequeue_group_message(
        &self,
        appid: i64,
        gid: i64,
        uid: i64,
        device_id: i64,
        msgid: i64,
    ) -> bool {
        let key = MemberKey {
            appid,
            gid,
            uid,
            device_id,
        };
        self.state.lock().index.received.dequeue_member(key, msgid)
    }

    /// Persists pending ack cursors as log records. Returns how many were
    /// written.
    ///
    /// A cursor leaves the pending set only once its record is appended, so
    /// after a failed write the rest are retried by the next call.
    pub fn flush_received(&self) -> CoreResult<usize> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let (peers, groups) = st.index.received.pending();
        let count = peers.len() + groups.len();
        for ack in peers {
            st.write(&Message::peer_ack(ack))?;
        }
        for ack in groups {
            st.write(&Message::group_ack(ack))?;
        }
        if count > 0 {
            debug!(count, "flushed received cursors");
        }
        Ok(count)
    }

    /// Syncs the write block if it is dirty.
    pub fn flush(&self) -> CoreResult<()> {
        self.state.lock().blocks.flush()
    }

    /// Writes an index checkpoint. Returns its high-water mark.
    ///
    /// Blocks are flushed before the snapshot so the checkpoint never names
    /// records that are not on disk.
    pub fn checkpoint(&self) -> CoreResult<i64> {
        let _checkpoint = self.checkpoint_lock.lock();
        let (snapshot, high_water) = {
            let mut st = self.state.lock();
            st.blocks.flush()?;
            (st.index.durable(), st.blocks.next_id())
        };
        checkpoint::save(&self.dir, &snapshot, high_water)?;
        Ok(high_water)
    }

    /// Flushes acks and blocks, then writes a checkpoint.
    pub fn close(&self) -> CoreResult<()> {
        self.flush_received()?;
        self.flush()?;
        let high_water = self.checkpoint()?;
        info!(high_water, "storage closed");
        Ok(())
    }

    /// Reads one record.
    pub fn read_message(&self, id: i64) -> CoreResult<Option<Message>> {
        self.state.lock().blocks.read(id)
    }

    /// Forward scan with its own read handles; does not hold the lock.
    #[must_use]
    pub fn scan(&self, from_id: i64) -> LogScanner {
        LogScanner::new(self.dir.path(), self.config.block_size, from_id)
    }

    /// Chain heads of one user.
    #[must_use]
    pub fn user_index(&self, appid: i64, uid: i64) -> Option<UserIndex> {
        self.state.lock().index.peers.get(UserKey::new(appid, uid)).copied()
    }

    /// Chain head of one group.
    #[must_use]
    pub fn group_head(&self, appid: i64, gid: i64) -> Option<GroupHead> {
        self.state.lock().index.groups.get(GroupKey::new(appid, gid)).copied()
    }

    /// Durable peer ack cursor.
    #[must_use]
    pub fn peer_received(&self, key: DeviceKey) -> Option<i64> {
        self.state.lock().index.received.peer(key)
    }

    /// Durable member ack cursor.
    #[must_use]
    pub fn group_received(&self, key: MemberKey) -> Option<i64> {
        self.state.lock().index.received.member(key)
    }

    /// Copy of the durable index state.
    #[must_use]
    pub fn index_snapshot(&self) -> IndexState {
        self.state.lock().index.durable()
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.dir.path())
            .field("block_size", &self.config.block_size)
            .finish_non_exhaustive()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        st.replication = None;
        if let Err(err) = st.blocks.flush() {
            error!(%err, "flush on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::ImMessage;
    use tempfile::tempdir;

    fn im(n: i32) -> Message {
        Message::im(ImMessage {
            sender: 1,
            receiver: 2,
            timestamp: n,
            msgid: n,
            content: format!("hello {n}"),
        })
    }

    fn small_config() -> StorageConfig {
        StorageConfig::default().block_size(4096)
    }

    #[test]
    fn save_and_read_back() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        let (a, prev) = storage.save_peer_message(1, 2, 5, &im(1)).unwrap();
        assert_eq!(prev, 0);
        let (b, prev) = storage.save_peer_message(1, 2, 5, &im(2)).unwrap();
        assert_eq!(prev, a);
        assert!(b > a);
        assert_eq!(storage.read_message(a).unwrap(), Some(im(1)));

        let ui = storage.user_index(1, 2).unwrap();
        assert_eq!(ui.last_msgid, b);
        assert_eq!(ui.last_seq_id, 2);
    }

    #[test]
    fn ids_increase_across_rotation() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        let mut last = 0;
        for n in 0..200 {
            let (id, _) = storage.save_peer_message(1, 2, 0, &im(n)).unwrap();
            assert!(id > last);
            last = id;
        }
        assert!(storage.position().block > 0);
        let sync = storage.sync_history(1, 2, 0, 1000, 0).unwrap();
        assert_eq!(sync.messages.len(), 200);
    }

    #[test]
    fn replication_channel_sees_appends_in_order() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        let rx = storage.open_replication_channel();
        let (msgid, _) = storage.save_peer_message(1, 2, 0, &im(1)).unwrap();
        let payload = rx.try_recv().unwrap();
        let offline = rx.try_recv().unwrap();
        assert_eq!(payload.msgid, msgid);
        assert!(offline.msgid > msgid);

        drop(rx);
        storage.save_peer_message(1, 2, 0, &im(2)).unwrap();
        storage.save_peer_message(1, 2, 0, &im(3)).unwrap();
    }

    #[test]
    fn acks_survive_reopen() {
        let tmp = tempdir().unwrap();
        let key = DeviceKey {
            appid: 1,
            uid: 2,
            device_id: 3,
        };
        {
            let storage = Storage::open(tmp.path(), small_config()).unwrap();
            assert!(storage.dequeue_message(1, 2, 3, 40));
            assert_eq!(storage.peer_received(key), None);
            assert_eq!(storage.flush_received().unwrap(), 1);
            assert_eq!(storage.peer_received(key), Some(40));
        }
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        assert_eq!(storage.peer_received(key), Some(40));
        assert!(!storage.dequeue_message(1, 2, 3, 39));
    }

    #[test]
    fn failed_ack_flush_keeps_unwritten_cursors() {
        let tmp = tempdir().unwrap();
        let key = |device_id| DeviceKey {
            appid: 1,
            uid: 2,
            device_id,
        };
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        for device in 0..120 {
            assert!(storage.dequeue_message(1, 2, device, 1000 + device));
        }

        // Block 1 cannot be created, so the flush fails once block 0 is full.
        let blocker = tmp.path().join("message_1");
        std::fs::create_dir(&blocker).unwrap();
        assert!(storage.flush_received().is_err());
        assert_eq!(storage.position().block, 0);
        let written = (0..120)
            .filter(|&d| storage.peer_received(key(d)).is_some())
            .count();
        assert!(written > 0 && written < 120);

        std::fs::remove_dir(&blocker).unwrap();
        assert_eq!(storage.flush_received().unwrap(), 120 - written);
        drop(storage);

        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        for device in 0..120 {
            assert_eq!(storage.peer_received(key(device)), Some(1000 + device));
        }
    }

    #[test]
    fn group_offline_uses_member_cursor() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        let (a, _) = storage.save_group_message(1, 9, 0, &im(1)).unwrap();
        let (b, prev) = storage.save_group_message(1, 9, 0, &im(2)).unwrap();
        assert_eq!(prev, a);

        storage.dequeue_group_message(1, 9, 2, 3, a);
        let pending = storage.load_group_offline(1, 9, 2, 3, 0).unwrap();
        assert_eq!(pending.iter().map(|m| m.msgid).collect::<Vec<_>>(), vec![b]);

        let (msgs, last) = storage.sync_group_messages(1, 9, 0, 0, 10).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(last, b);
        let (msgs, last) = storage.sync_group_messages(1, 9, b, 0, 10).unwrap();
        assert!(msgs.is_empty());
        assert_eq!(last, b);
    }

    #[test]
    fn peer_group_fanout() {
        let tmp = tempdir().unwrap();
        let storage = Storage::open(tmp.path(), small_config()).unwrap();
        let out = storage
            .save_peer_group_message(1, &[10, 11, 12], 0, &im(1))
            .unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|&(id, prev)| id == out[0].0 && prev == 0));
        for uid in [10, 11, 12] {
            let ui = storage.user_index(1, uid).unwrap();
            assert_eq!(ui.last_peer_id, 0);
            assert_eq!(ui.last_msgid, out[0].0);
        }
    }
}
