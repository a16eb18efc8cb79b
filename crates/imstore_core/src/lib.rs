//! # imstore Core
//!
//! Storage engine for instant-messaging history.
//!
//! This crate provides:
//! - The block-segmented append log, where a message id is its disk address
//! - Per-user offline chains (full, peer-only and batch) with bounded sync
//! - Per-group chains with join-time filtering
//! - Ack cursors persisted as log records
//! - Index checkpoints with replay-based repair
//! - Replica apply for master/slave replication
//!
//! ## Invariants
//!
//! - Ids are strictly increasing and never reused
//! - The index is derived state; replaying the log always rebuilds it
//! - Applying a record twice leaves the index unchanged

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
pub mod checkpoint;
mod config;
pub mod dir;
mod error;
pub mod group;
mod index;
pub mod peer;
mod received;
mod replica;
mod storage;
mod types;

pub use block::{BlockStore, LogScanner, RecordSource};
pub use config::{StorageConfig, BATCH_SIZE, DEFAULT_BLOCK_SIZE};
pub use error::{CoreError, CoreResult};
pub use group::{GroupHead, GroupIndex};
pub use index::IndexState;
pub use peer::{PeerIndex, SyncResult, UserIndex};
pub use received::ReceivedCursors;
pub use storage::Storage;
pub use types::{DeviceKey, GroupKey, MemberKey, RecordPos, UserKey};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
