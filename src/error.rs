//! Error types for slot partitioning and ownership resolution.

use crate::types::{Epoch, NodeId, NodeStatus, Slot};
use thiserror::Error;

/// Result type alias for partitioning operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Tenant key cannot be assigned a slot. Caller bug, never retried.
    #[error("invalid tenant key: key must not be empty")]
    InvalidKey,

    /// A slot outside `[0, N)` was looked up directly.
    #[error("invalid slot {slot}: slot space has {slot_count} slots")]
    InvalidSlot { slot: Slot, slot_count: u32 },

    /// A topology violates the coverage/non-overlap invariant.
    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),

    /// The publish was based on an epoch that is no longer current.
    #[error("stale epoch: publish based on epoch {base}, current epoch is {current}")]
    StaleEpoch { base: Epoch, current: Epoch },

    /// Concurrent rebalances kept winning the epoch race.
    #[error("rebalance conflict: gave up after {attempts} attempts")]
    RebalanceConflict { attempts: u32 },

    /// The resolved owner is not serving tenants.
    #[error("owner unavailable: slot {slot} resolved to {node_id} ({status}) at epoch {epoch}")]
    OwnerUnavailable {
        node_id: NodeId,
        status: NodeStatus,
        slot: Slot,
        epoch: Epoch,
    },

    /// No node is left to own the slot space.
    #[error("no active nodes: cluster is unavailable until a node joins")]
    NoActiveNodes,

    /// Every range is down to a single slot; no room for another node.
    #[error("slot space exhausted: {slot_count} slots cannot be split across {nodes} nodes")]
    SlotSpaceExhausted { slot_count: u32, nodes: usize },

    /// Cluster membership errors.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// Coordination store errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// A coordination store round trip timed out.
    #[error("operation timed out")]
    Timeout,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying with fresh state can succeed.
    ///
    /// Structural failures (`InvalidTopology`, `NoActiveNodes`) are never
    /// transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StaleEpoch { .. } | Error::Timeout => true,
            Error::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether this error reflects a logic or membership problem that no retry can fix.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::InvalidTopology(_) | Error::NoActiveNodes | Error::SlotSpaceExhausted { .. }
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidKey => "invalid_key",
            Error::InvalidSlot { .. } => "invalid_slot",
            Error::InvalidTopology(_) => "invalid_topology",
            Error::StaleEpoch { .. } => "stale_epoch",
            Error::RebalanceConflict { .. } => "rebalance_conflict",
            Error::OwnerUnavailable { .. } => "owner_unavailable",
            Error::NoActiveNodes => "no_active_nodes",
            Error::SlotSpaceExhausted { .. } => "slot_space_exhausted",
            Error::Membership(_) => "membership",
            Error::Store(_) => "store",
            Error::Config(_) => "config",
            Error::Timeout => "timeout",
            Error::Internal(_) => "internal",
        }
    }
}

/// Coverage and shape violations of a topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A node has an empty identifier.
    #[error("node with empty id")]
    EmptyNodeId,

    /// A node appears more than once.
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// `slot_min > slot_max`.
    #[error("inverted range on {node_id}: {slot_min} > {slot_max}")]
    InvertedRange {
        node_id: NodeId,
        slot_min: Slot,
        slot_max: Slot,
    },

    /// `slot_max >= N`.
    #[error("range of {node_id} ends at {slot_max}, outside slot space of {slot_count}")]
    SlotOutOfRange {
        node_id: NodeId,
        slot_max: Slot,
        slot_count: u32,
    },

    /// The topology was built for a different slot space.
    #[error("slot count mismatch: expected {expected}, got {actual}")]
    SlotCountMismatch { expected: u32, actual: u32 },

    /// Two Active ranges share at least one slot.
    #[error("ranges of {first} and {second} overlap at slot {slot}")]
    Overlap {
        first: NodeId,
        second: NodeId,
        slot: Slot,
    },

    /// Slots `[start, end]` are owned by no Active node.
    #[error("slots {start}-{end} are not covered")]
    Gap { start: Slot, end: Slot },

    /// No Active node at all.
    #[error("no active nodes")]
    NoActiveNodes,

    /// Epoch `0` marks an unpublished view and can never be published.
    #[error("epoch 0 is reserved for unpublished topologies")]
    ReservedEpoch,
}

/// Cluster membership errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    /// Node identifiers must be non-empty.
    #[error("invalid node id: must not be empty")]
    InvalidNodeId,

    /// The node already owns a range.
    #[error("node already active: {0}")]
    NodeAlreadyActive(NodeId),

    /// Node not found in cluster.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
}

/// Coordination store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another writer holds the store lock.
    #[error("store busy")]
    Busy,

    /// I/O error.
    #[error("store io error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored topology could not be trusted.
    #[error("corrupted store: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Whether retrying the store operation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy | StoreError::Io(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Store(StoreError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::StaleEpoch { base: 1, current: 2 }.is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(Error::Store(StoreError::Busy).is_transient());
        assert!(!Error::Store(StoreError::Corrupted("bad".into())).is_transient());
        assert!(!Error::NoActiveNodes.is_transient());
        assert!(!Error::InvalidKey.is_transient());
    }

    #[test]
    fn test_structural_classification() {
        assert!(Error::NoActiveNodes.is_structural());
        assert!(Error::from(TopologyError::Gap { start: 15, end: 15 }).is_structural());
        assert!(!Error::RebalanceConflict { attempts: 5 }.is_structural());
    }

    #[test]
    fn test_error_display() {
        let err = Error::from(TopologyError::Gap { start: 15, end: 15 });
        assert_eq!(err.to_string(), "invalid topology: slots 15-15 are not covered");
        assert_eq!(err.kind(), "invalid_topology");
    }
}
