//! Storage configuration.

use std::time::Duration;

use crate::block::HEADER_SIZE;
use crate::error::{CoreError, CoreResult};

/// Default block size: 128 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

/// Offline records between two batch-chain pointers.
pub const BATCH_SIZE: i64 = 1000;

/// Configuration for opening a [`Storage`](crate::Storage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Whether to create the storage directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of one block file. Must never change for an existing store.
    pub block_size: u64,

    /// Maximum messages returned by one offline sync.
    pub limit: usize,

    /// Bound on offline records examined per sync (0 = unbounded).
    pub hard_limit: usize,

    /// Maximum messages returned by one group sync.
    pub group_limit: usize,

    /// Number of read-only block handles kept open.
    pub read_cache_size: usize,

    /// Capacity of the live replication channel.
    pub replication_channel_capacity: usize,

    /// How often dirty blocks and received cursors are flushed.
    pub flush_interval: Duration,

    /// How often the indices are checkpointed.
    pub checkpoint_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            block_size: DEFAULT_BLOCK_SIZE,
            limit: 3000,
            hard_limit: 0,
            group_limit: 100,
            read_cache_size: 128,
            replication_channel_capacity: 1000,
            flush_interval: Duration::from_secs(1),
            checkpoint_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the block size.
    #[must_use]
    pub const fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the offline sync limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the offline sync hard limit.
    #[must_use]
    pub const fn hard_limit(mut self, hard_limit: usize) -> Self {
        self.hard_limit = hard_limit;
        self
    }

    /// Sets the group sync limit.
    #[must_use]
    pub const fn group_limit(mut self, limit: usize) -> Self {
        self.group_limit = limit;
        self
    }

    /// Sets the read handle cache size.
    #[must_use]
    pub const fn read_cache_size(mut self, size: usize) -> Self {
        self.read_cache_size = size;
        self
    }

    /// Sets the replication channel capacity.
    #[must_use]
    pub const fn replication_channel_capacity(mut self, capacity: usize) -> Self {
        self.replication_channel_capacity = capacity;
        self
    }

    /// Sets the checkpoint interval.
    #[must_use]
    pub const fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Checks the limits against each other and the block layout.
    pub fn validate(&self) -> CoreResult<()> {
        if self.limit == 0 {
            return Err(CoreError::invalid_config("limit must be greater than 0"));
        }
        if self.hard_limit != 0 && self.hard_limit / self.limit < 2 {
            return Err(CoreError::invalid_config(format!(
                "hard_limit {} must be 0 or at least twice limit {}",
                self.hard_limit, self.limit
            )));
        }
        if self.group_limit == 0 {
            return Err(CoreError::invalid_config("group_limit must be greater than 0"));
        }
        if self.block_size <= HEADER_SIZE * 2 || self.block_size > i64::MAX as u64 / 1024 {
            return Err(CoreError::invalid_config(format!(
                "block_size {} out of range",
                self.block_size
            )));
        }
        if self.read_cache_size == 0 || self.replication_channel_capacity == 0 {
            return Err(CoreError::invalid_config(
                "read_cache_size and replication_channel_capacity must be positive",
            ));
        }
        Ok(())
    }
}
