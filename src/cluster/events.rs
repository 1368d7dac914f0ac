//! Cluster membership events.

use crate::types::{Epoch, NodeId};

/// Events related to cluster membership changes.
///
/// Membership events are detection only: they request a rebalance but never
/// change slot ranges themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    /// A node announced itself and wants a slot range.
    NodeJoined {
        /// The node's ID.
        node_id: NodeId,
    },

    /// A node is leaving gracefully and is draining.
    NodeLeft {
        /// The node's ID.
        node_id: NodeId,
    },

    /// A node was declared failed by an external heartbeat/lease layer.
    NodeFailed {
        /// The node's ID.
        node_id: NodeId,
    },

    /// A new topology was adopted.
    TopologyChanged {
        /// Epoch before the change.
        previous_epoch: Epoch,
        /// Epoch now in effect.
        epoch: Epoch,
    },
}

impl MemberEvent {
    /// Get the node ID associated with this event, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            MemberEvent::NodeJoined { node_id } => Some(node_id),
            MemberEvent::NodeLeft { node_id } => Some(node_id),
            MemberEvent::NodeFailed { node_id } => Some(node_id),
            MemberEvent::TopologyChanged { .. } => None,
        }
    }

    /// Check if this is a join-type event.
    pub fn is_join(&self) -> bool {
        matches!(self, MemberEvent::NodeJoined { .. })
    }

    /// Check if this is a leave-type event.
    pub fn is_leave(&self) -> bool {
        matches!(self, MemberEvent::NodeLeft { .. } | MemberEvent::NodeFailed { .. })
    }
}

/// Listener for membership events.
pub trait MemberEventListener: Send + Sync + 'static {
    /// Called when a membership event occurs.
    fn on_event(&self, event: MemberEvent);
}

/// No-op event listener.
pub struct NoopEventListener;

impl MemberEventListener for NoopEventListener {
    fn on_event(&self, _event: MemberEvent) {}
}

/// Event listener that logs events.
pub struct LoggingEventListener;

impl MemberEventListener for LoggingEventListener {
    fn on_event(&self, event: MemberEvent) {
        match &event {
            MemberEvent::NodeJoined { node_id } => {
                tracing::info!(node_id = %node_id, "Node joined cluster");
            }
            MemberEvent::NodeLeft { node_id } => {
                tracing::info!(node_id = %node_id, "Node left cluster");
            }
            MemberEvent::NodeFailed { node_id } => {
                tracing::error!(node_id = %node_id, "Node confirmed failed");
            }
            MemberEvent::TopologyChanged {
                previous_epoch,
                epoch,
            } => {
                tracing::debug!(previous_epoch, epoch, "Topology changed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_node_id() {
        let event = MemberEvent::NodeJoined {
            node_id: "node-42".into(),
        };
        assert_eq!(event.node_id(), Some("node-42"));

        let changed = MemberEvent::TopologyChanged {
            previous_epoch: 1,
            epoch: 2,
        };
        assert_eq!(changed.node_id(), None);
    }

    #[test]
    fn test_event_types() {
        let join = MemberEvent::NodeJoined { node_id: "a".into() };
        assert!(join.is_join());
        assert!(!join.is_leave());

        let failed = MemberEvent::NodeFailed { node_id: "a".into() };
        assert!(!failed.is_join());
        assert!(failed.is_leave());
    }
}
