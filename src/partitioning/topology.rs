//! Versioned slot range tables.
//!
//! A [`ClusterTopology`] is an immutable value: every change produces a new
//! topology with the next epoch. Validation enforces the ownership invariant
//! (Active ranges are pairwise disjoint and together cover `[0, N)`).

use crate::error::TopologyError;
use crate::partitioning::slot_space::{SlotRange, SlotSpace};
use crate::types::{Epoch, NodeId, NodeStatus, Slot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// A cluster node and the slot range it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Unique node identifier.
    pub node_id: NodeId,
    /// First owned slot (inclusive).
    pub slot_min: Slot,
    /// Last owned slot (inclusive).
    pub slot_max: Slot,
    /// Lifecycle status. Only Active ranges count toward ownership.
    pub status: NodeStatus,
}

impl ClusterNode {
    /// Create a node.
    pub fn new(node_id: impl Into<NodeId>, slot_min: Slot, slot_max: Slot, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            slot_min,
            slot_max,
            status,
        }
    }

    /// Create an Active node owning `range`.
    pub fn active(node_id: impl Into<NodeId>, range: SlotRange) -> Self {
        Self::new(node_id, range.start, range.end, NodeStatus::Active)
    }

    /// The owned range.
    pub fn range(&self) -> SlotRange {
        SlotRange {
            start: self.slot_min,
            end: self.slot_max,
        }
    }

    /// Number of owned slots.
    pub fn slot_count(&self) -> u32 {
        self.slot_max.saturating_sub(self.slot_min) + 1
    }

    /// Whether the node is Active.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Whether the node is Active and owns `slot`.
    pub fn owns(&self, slot: Slot) -> bool {
        self.is_active() && self.range().contains(slot)
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.node_id, self.range())?;
        if !self.is_active() {
            write!(f, "({})", self.status)?;
        }
        Ok(())
    }
}

/// A contiguous run of slots changing owner between two topologies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMove {
    /// Slots that move.
    pub range: SlotRange,
    /// Previous owner.
    pub from: NodeId,
    /// New owner.
    pub to: NodeId,
}

impl SlotMove {
    /// Number of slots moved.
    pub fn slot_count(&self) -> u32 {
        self.range.count()
    }
}

/// The versioned partition of the slot space among cluster nodes.
///
/// Nodes are kept ordered: Active nodes first by `slot_min`, then the rest by
/// id. Lookups binary-search the Active prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    cluster_id: String,
    slot_space: SlotSpace,
    epoch: Epoch,
    nodes: Vec<ClusterNode>,
}

impl ClusterTopology {
    /// Create a topology. Node order is normalized.
    pub fn new(
        cluster_id: impl Into<String>,
        slot_space: SlotSpace,
        epoch: Epoch,
        nodes: Vec<ClusterNode>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            slot_space,
            epoch,
            nodes,
        }
        .normalize()
    }

    /// The unpublished, empty topology (epoch 0).
    pub fn empty(cluster_id: impl Into<String>, slot_space: SlotSpace) -> Self {
        Self::new(cluster_id, slot_space, 0, Vec::new())
    }

    /// The first topology of a cluster: one node owning the full range at epoch 1.
    pub fn bootstrap(cluster_id: impl Into<String>, slot_space: SlotSpace, node_id: impl Into<NodeId>) -> Self {
        let node = ClusterNode::active(node_id, slot_space.full_range());
        Self::new(cluster_id, slot_space, 1, vec![node])
    }

    /// An unpublished local view (epoch 0) in which `node_id` owns only its seeded range.
    ///
    /// Does not satisfy coverage unless the seed spans the whole space.
    pub fn seeded(
        cluster_id: impl Into<String>,
        slot_space: SlotSpace,
        node_id: impl Into<NodeId>,
        range: SlotRange,
    ) -> Self {
        Self::new(cluster_id, slot_space, 0, vec![ClusterNode::active(node_id, range)])
    }

    /// The topology following this one, with the given nodes.
    pub fn successor(&self, nodes: Vec<ClusterNode>) -> Self {
        Self::new(self.cluster_id.clone(), self.slot_space, self.epoch + 1, nodes)
    }

    /// Restore the node ordering lookups rely on.
    pub fn normalize(mut self) -> Self {
        self.nodes.sort_by(|a, b| match (a.is_active(), b.is_active()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => a
                .slot_min
                .cmp(&b.slot_min)
                .then_with(|| a.node_id.cmp(&b.node_id)),
            (false, false) => a.node_id.cmp(&b.node_id),
        });
        self
    }

    /// Cluster identifier.
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// The slot space this topology partitions.
    pub fn slot_space(&self) -> SlotSpace {
        self.slot_space
    }

    /// Topology version.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether this topology was ever published.
    pub fn is_published(&self) -> bool {
        self.epoch > 0
    }

    /// All nodes.
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// Active nodes, ordered by `slot_min`.
    pub fn active_nodes(&self) -> &[ClusterNode] {
        let len = self.nodes.partition_point(|n| n.is_active());
        &self.nodes[..len]
    }

    /// Number of Active nodes.
    pub fn active_count(&self) -> usize {
        self.active_nodes().len()
    }

    /// Look up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Whether `node_id` is an Active owner.
    pub fn is_active(&self, node_id: &str) -> bool {
        self.node(node_id).map(|n| n.is_active()).unwrap_or(false)
    }

    /// Find the Active node owning `slot`.
    pub fn owner_of(&self, slot: Slot) -> Option<&ClusterNode> {
        let active = self.active_nodes();

        // Rightmost node whose range starts at or before the slot
        let idx = active.partition_point(|n| n.slot_min <= slot);
        if idx == 0 {
            return None;
        }

        let candidate = &active[idx - 1];
        candidate.range().contains(slot).then_some(candidate)
    }

    /// Slot counts per Active node, in slot order.
    pub fn distribution(&self) -> Vec<(NodeId, u32)> {
        self.active_nodes()
            .iter()
            .map(|n| (n.node_id.clone(), n.slot_count()))
            .collect()
    }

    /// Check the ownership invariant.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let slot_count = self.slot_space.slot_count();
        let mut seen = HashSet::with_capacity(self.nodes.len());

        for node in &self.nodes {
            if node.node_id.is_empty() {
                return Err(TopologyError::EmptyNodeId);
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(TopologyError::DuplicateNode(node.node_id.clone()));
            }
            if node.slot_min > node.slot_max {
                return Err(TopologyError::InvertedRange {
                    node_id: node.node_id.clone(),
                    slot_min: node.slot_min,
                    slot_max: node.slot_max,
                });
            }
            if node.slot_max >= slot_count {
                return Err(TopologyError::SlotOutOfRange {
                    node_id: node.node_id.clone(),
                    slot_max: node.slot_max,
                    slot_count,
                });
            }
        }

        let mut active: Vec<&ClusterNode> = self.nodes.iter().filter(|n| n.is_active()).collect();
        if active.is_empty() {
            return Err(TopologyError::NoActiveNodes);
        }
        active.sort_by_key(|n| n.slot_min);

        // First slot not yet covered, and the node covering the slot before it
        let mut next: u64 = 0;
        let mut previous: Option<&ClusterNode> = None;
        for node in active {
            let start = node.slot_min as u64;
            if start > next {
                return Err(TopologyError::Gap {
                    start: next as Slot,
                    end: node.slot_min - 1,
                });
            }
            if start < next {
                let first = previous.map(|p| p.node_id.clone()).unwrap_or_default();
                return Err(TopologyError::Overlap {
                    first,
                    second: node.node_id.clone(),
                    slot: node.slot_min,
                });
            }
            next = node.slot_max as u64 + 1;
            previous = Some(node);
        }

        if next < slot_count as u64 {
            return Err(TopologyError::Gap {
                start: next as Slot,
                end: slot_count - 1,
            });
        }

        Ok(())
    }

    /// Check the ownership invariant against an expected slot space.
    pub fn validate_for(&self, slot_space: SlotSpace) -> Result<(), TopologyError> {
        if self.slot_space != slot_space {
            return Err(TopologyError::SlotCountMismatch {
                expected: slot_space.slot_count(),
                actual: self.slot_space.slot_count(),
            });
        }
        self.validate()
    }

    /// Runs of slots whose Active owner differs in `next`.
    ///
    /// Slots owned in only one of the two topologies are not reported.
    pub fn moves_to(&self, next: &ClusterTopology) -> Vec<SlotMove> {
        let before = self.active_nodes();
        let after = next.active_nodes();
        let mut moves: Vec<SlotMove> = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < before.len() && j < after.len() {
            let old = &before[i];
            let new = &after[j];

            if let Some(overlap) = old.range().intersection(&new.range()) {
                if old.node_id != new.node_id {
                    match moves.last_mut() {
                        Some(last)
                            if last.from == old.node_id
                                && last.to == new.node_id
                                && last.range.end + 1 == overlap.start =>
                        {
                            last.range.end = overlap.end;
                        }
                        _ => moves.push(SlotMove {
                            range: overlap,
                            from: old.node_id.clone(),
                            to: new.node_id.clone(),
                        }),
                    }
                }
            }

            match old.slot_max.cmp(&new.slot_max) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }

        moves
    }

    /// Number of slots whose Active owner differs in `next`.
    pub fn churn(&self, next: &ClusterTopology) -> u64 {
        self.moves_to(next)
            .iter()
            .map(|m| m.slot_count() as u64)
            .sum()
    }
}

impl fmt::Display for ClusterTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:", self.cluster_id, self.epoch)?;
        for node in &self.nodes {
            write!(f, " {}", node)?;
        }
        Ok(())
    }
}
