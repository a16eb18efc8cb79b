//! # imstore Replication
//!
//! Master/slave replication of the imstore log.
//!
//! This crate provides:
//! - A master that serves catch-up batches from the log, then live batches
//! - A slave that follows one master and applies records verbatim
//! - Reconnect with exponential backoff
//! - Framed transport over TCP using the storage frame codec
//!
//! ## Protocol
//!
//! 1. The slave connects and sends `SYNC_BEGIN` with its next id
//! 2. The master streams `SYNC_MESSAGE_BATCH` frames from that id to the end
//!    of its log, one block at most per batch
//! 3. The master registers the slave for live batches and scans again for
//!    records appended in between
//! 4. Live batches flow until either side disconnects
//!
//! ## Key Invariants
//!
//! - A slave's log is a byte-identical prefix of its master's
//! - Records already present on the slave are skipped, never rewritten
//! - A slave that cannot keep up is dropped and catches up again
//! - Storage errors on the slave stop replication

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod master;
mod slave;
mod state;
mod wire;

pub use config::{ReplicationConfig, RetryConfig, MAX_FRAME_SIZE};
pub use error::{ReplicationError, ReplicationResult};
pub use master::{read_batch, ClientInfo, ClientSet, ReplicationMaster};
pub use slave::ReplicationSlave;
pub use state::{ReplicaState, ReplicationStats};
pub use wire::{read_message, write_frame, write_message};
