//! Core types used throughout the partitioning subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier in the cluster.
pub type NodeId = String;

/// A slot number in `[0, N)`.
pub type Slot = u32;

/// Version of a published cluster topology.
///
/// Epoch `0` means nothing has been published yet.
pub type Epoch = u64;

/// Lifecycle status of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Announced, not yet assigned a slot range.
    Joining,
    /// Owns a slot range and serves its tenants.
    Active,
    /// Leaving gracefully; its range is about to be reassigned.
    Draining,
    /// Gone from the cluster.
    Left,
}

impl NodeStatus {
    /// Whether a node in this status may serve tenants.
    pub fn is_serving(&self) -> bool {
        matches!(self, NodeStatus::Active)
    }

    /// Whether a node in this status is on its way out (or already out).
    pub fn is_departing(&self) -> bool {
        matches!(self, NodeStatus::Draining | NodeStatus::Left)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Joining => "joining",
            NodeStatus::Active => "active",
            NodeStatus::Draining => "draining",
            NodeStatus::Left => "left",
        };
        f.write_str(s)
    }
}

/// Result of resolving a tenant key to its owner.
///
/// Not persisted. Callers must not cache it past an epoch change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Slot the tenant key hashes into.
    pub slot: Slot,
    /// Node owning the slot.
    pub node_id: NodeId,
    /// Epoch of the topology the lookup was answered from.
    pub epoch: Epoch,
}

impl Assignment {
    /// Create a new assignment.
    pub fn new(slot: Slot, node_id: impl Into<NodeId>, epoch: Epoch) -> Self {
        Self {
            slot,
            node_id: node_id.into(),
            epoch,
        }
    }

    /// Check whether the given node owns this assignment.
    pub fn is_owned_by(&self, node_id: &str) -> bool {
        self.node_id == node_id
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} -> {} @ epoch {}", self.slot, self.node_id, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_classification() {
        assert!(NodeStatus::Active.is_serving());
        assert!(!NodeStatus::Joining.is_serving());
        assert!(NodeStatus::Draining.is_departing());
        assert!(NodeStatus::Left.is_departing());
        assert!(!NodeStatus::Active.is_departing());
    }

    #[test]
    fn test_assignment_ownership() {
        let assignment = Assignment::new(42, "node-a", 3);
        assert!(assignment.is_owned_by("node-a"));
        assert!(!assignment.is_owned_by("node-b"));
        assert_eq!(assignment.to_string(), "slot 42 -> node-a @ epoch 3");
    }
}
