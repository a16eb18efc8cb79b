//! Applying records streamed from a master.
//!
//! A replica writes each record at exactly the id the master gave it, so its
//! block files end up byte-identical to the master's.

use imstore_codec::{Message, MessageBatch};
use tracing::{debug, warn};

use crate::block::{encode_record, HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::storage::{Storage, StorageState};
use crate::types::RecordPos;

impl StorageState {
    fn apply_replica(&mut self, id: i64, message: &Message, record: &[u8]) -> CoreResult<bool> {
        let block_size = self.blocks.block_size();
        let rec = RecordPos::from_id(id, block_size);
        let local = self.blocks.position();

        if rec < local {
            debug!(id, %rec, %local, "replicated record already applied");
            return Ok(false);
        }
        if rec.block > local.block + 1 {
            return Err(CoreError::ReplicationGap {
                local_block: local.block,
                record_block: rec.block,
            });
        }
        if rec.offset < HEADER_SIZE {
            return Err(CoreError::unexpected_record(id, "offset inside block header"));
        }
        if rec.offset + record.len() as u64 > block_size {
            return Err(CoreError::unexpected_record(
                id,
                format!("{} byte record overruns the block", record.len()),
            ));
        }

        if rec.block == local.block + 1 {
            self.blocks.rotate_to(rec.block)?;
        }
        let local = self.blocks.position();
        if rec.offset > local.offset {
            warn!(id, from = local.offset, to = rec.offset, "padding replica block");
        }
        self.blocks.write_at(id, record)?;
        self.index.exec_message(id, message);
        Ok(true)
    }
}

impl Storage {
    /// Applies one record received from the master at `id`.
    ///
    /// Returns false if the record was already present. A record more than
    /// one block ahead of the local log fails with
    /// [`CoreError::ReplicationGap`].
    pub fn save_sync_message(&self, id: i64, message: &Message) -> CoreResult<bool> {
        let record = encode_record(message)?;
        self.state.lock().apply_replica(id, message, &record)
    }

    /// Applies a batch. Returns the number of records written.
    ///
    /// Record ids are recomputed from `first_id` by encoded record length;
    /// a batch whose computed last id differs from `last_id` is rejected
    /// before anything is written.
    pub fn save_sync_message_batch(&self, batch: &MessageBatch) -> CoreResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let block_size = self.block_size();
        let block = RecordPos::from_id(batch.first_id, block_size).block;
        let mut records = Vec::with_capacity(batch.len());
        let mut id = batch.first_id;
        let mut last = id;
        for message in &batch.messages {
            if RecordPos::from_id(id, block_size).block != block {
                return Err(CoreError::unexpected_record(id, "batch crosses a block boundary"));
            }
            let record = encode_record(message)?;
            let len = record.len() as i64;
            records.push((id, record));
            last = id;
            id += len;
        }
        if last != batch.last_id {
            return Err(CoreError::unexpected_record(
                batch.first_id,
                format!("batch ends at {last}, header says {}", batch.last_id),
            ));
        }

        let mut st = self.state.lock();
        let mut written = 0;
        for ((id, record), message) in records.iter().zip(&batch.messages) {
            if st.apply_replica(*id, message, record)? {
                written += 1;
            }
        }
        debug!(first_id = batch.first_id, last_id = batch.last_id, written, "applied batch");
        Ok(written)
    }
}
