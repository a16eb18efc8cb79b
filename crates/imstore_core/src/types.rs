//! Key types for the index maps.

use std::fmt;

/// A user within an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserKey {
    /// Application id.
    pub appid: i64,
    /// User id.
    pub uid: i64,
}

impl UserKey {
    /// Creates a user key.
    #[must_use]
    pub const fn new(appid: i64, uid: i64) -> Self {
        Self { appid, uid }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.appid, self.uid)
    }
}

/// A group within an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    /// Application id.
    pub appid: i64,
    /// Group id.
    pub gid: i64,
}

impl GroupKey {
    /// Creates a group key.
    #[must_use]
    pub const fn new(appid: i64, gid: i64) -> Self {
        Self { appid, gid }
    }
}

/// One device of a user, for peer ack cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
    /// Application id.
    pub appid: i64,
    /// User id.
    pub uid: i64,
    /// Device id.
    pub device_id: i64,
}

/// One device of a group member, for group ack cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberKey {
    /// Application id.
    pub appid: i64,
    /// Group id.
    pub gid: i64,
    /// Member user id.
    pub uid: i64,
    /// Device id.
    pub device_id: i64,
}

/// Position of a record: block number and byte offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordPos {
    /// Block number.
    pub block: u32,
    /// Offset within the block.
    pub offset: u64,
}

impl RecordPos {
    /// Splits a global id.
    #[must_use]
    pub fn from_id(id: i64, block_size: u64) -> Self {
        let id = id.max(0) as u64;
        Self {
            block: (id / block_size) as u32,
            offset: id % block_size,
        }
    }

    /// Joins back into a global id.
    #[must_use]
    pub fn to_id(self, block_size: u64) -> i64 {
        (u64::from(self.block) * block_size + self.offset) as i64
    }
}

impl fmt::Display for RecordPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.block, self.offset)
    }
}
