//! Replica connection lifecycle.

use std::fmt;

/// Where a replica connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    /// Reading the log from the slave's cursor.
    Catchup,
    /// Receiving live batches.
    Streaming,
    /// Torn down.
    Closed,
}

impl ReplicaState {
    /// True while the connection is in use.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Catchup | Self::Streaming)
    }

    /// Whether moving to `next` is allowed. States only move forward.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Catchup, Self::Streaming) | (Self::Catchup, Self::Closed) | (Self::Streaming, Self::Closed)
        )
    }
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Catchup => "CATCHUP",
            Self::Streaming => "STREAMING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Counters for one side of replication.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Sessions started.
    pub sessions: u64,
    /// Batches sent or applied.
    pub batches: u64,
    /// Records sent or applied.
    pub records: u64,
    /// Slaves dropped for a full queue.
    pub dropped_clients: u64,
    /// Last error seen.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only() {
        assert!(ReplicaState::Catchup.can_transition_to(ReplicaState::Streaming));
        assert!(ReplicaState::Streaming.can_transition_to(ReplicaState::Closed));
        assert!(!ReplicaState::Streaming.can_transition_to(ReplicaState::Catchup));
        assert!(!ReplicaState::Closed.can_transition_to(ReplicaState::Streaming));
        assert!(!ReplicaState::Closed.is_active());
        assert_eq!(ReplicaState::Streaming.to_string(), "STREAMING");
    }
}
