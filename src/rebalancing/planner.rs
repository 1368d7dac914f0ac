//! Range planning for membership changes.
//!
//! The planner is pure: given the topology preceding a change it computes
//! the successor topology without touching any store, so every replica
//! planning the same change from the same epoch gets the same answer.

use crate::config::RebalancePolicy;
use crate::error::{Error, Result};
use crate::partitioning::{ClusterNode, ClusterTopology, SlotMove, SlotRange, SlotSpace};
use crate::types::NodeId;
use std::cmp::Ordering;
use std::fmt;

/// A membership change the planner reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MembershipChange {
    /// The node should receive a range.
    Join(NodeId),
    /// The node's range should be handed to its neighbours.
    Leave(NodeId),
}

impl MembershipChange {
    /// The node this change is about.
    pub fn node_id(&self) -> &str {
        match self {
            MembershipChange::Join(id) | MembershipChange::Leave(id) => id,
        }
    }
}

impl fmt::Display for MembershipChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipChange::Join(id) => write!(f, "join {}", id),
            MembershipChange::Leave(id) => write!(f, "leave {}", id),
        }
    }
}

/// A successor topology together with what it moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalancePlan {
    /// The topology to publish, at `prior.epoch() + 1`.
    pub topology: ClusterTopology,
    /// Slot runs changing owner.
    pub moves: Vec<SlotMove>,
    /// Total number of slots changing owner.
    pub churn: u64,
}

impl RebalancePlan {
    fn between(prior: &ClusterTopology, topology: ClusterTopology) -> Self {
        let moves = prior.moves_to(&topology);
        let churn = moves.iter().map(|m| m.slot_count() as u64).sum();
        Self {
            topology,
            moves,
            churn,
        }
    }
}

/// Working copy of the Active ranges, in slot order.
type Ranges = Vec<(NodeId, SlotRange)>;

/// Computes new slot ranges on membership change.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rebalancer {
    policy: RebalancePolicy,
}

impl Rebalancer {
    /// Create a rebalancer with the given policy.
    pub fn new(policy: RebalancePolicy) -> Self {
        Self { policy }
    }

    /// The configured policy.
    pub fn policy(&self) -> RebalancePolicy {
        self.policy
    }

    /// Plan the topology following `prior` after `changes`.
    ///
    /// Joins are applied before leaves so that a cluster whose last owner is
    /// departing can hand its range straight to the newcomer. Returns `None`
    /// when no change affects the Active ranges.
    pub fn plan(
        &self,
        prior: &ClusterTopology,
        changes: &[MembershipChange],
    ) -> Result<Option<RebalancePlan>> {
        let space = prior.slot_space();
        let current = active_ranges(prior);

        let joins = changes.iter().filter_map(|c| match c {
            MembershipChange::Join(id) => Some(id),
            MembershipChange::Leave(_) => None,
        });
        let leaves = changes.iter().filter_map(|c| match c {
            MembershipChange::Leave(id) => Some(id),
            MembershipChange::Join(_) => None,
        });

        let next = match self.policy {
            RebalancePolicy::MinimalChurn => {
                let mut ranges = current.clone();
                for id in joins {
                    join(&mut ranges, id, space)?;
                }
                for id in leaves {
                    leave(&mut ranges, id)?;
                }
                ranges
            }
            RebalancePolicy::Even => {
                let mut order: Vec<NodeId> = current.iter().map(|(id, _)| id.clone()).collect();
                for id in joins {
                    if !order.contains(id) {
                        order.push(id.clone());
                    }
                }
                for id in leaves {
                    if order.len() == 1 && order[0] == *id {
                        return Err(Error::NoActiveNodes);
                    }
                    order.retain(|existing| existing != id);
                }
                even_ranges(&order, space)?
            }
        };

        Ok(self.finish(prior, &current, next))
    }

    /// Re-divide the whole space evenly, keeping the node order.
    ///
    /// Used for operator-triggered rebalances regardless of policy.
    pub fn plan_even(&self, prior: &ClusterTopology) -> Result<Option<RebalancePlan>> {
        let current = active_ranges(prior);
        if current.is_empty() {
            return Err(Error::NoActiveNodes);
        }
        let order: Vec<NodeId> = current.iter().map(|(id, _)| id.clone()).collect();
        let next = even_ranges(&order, prior.slot_space())?;
        Ok(self.finish(prior, &current, next))
    }

    fn finish(&self, prior: &ClusterTopology, current: &Ranges, next: Ranges) -> Option<RebalancePlan> {
        if *current == next {
            return None;
        }

        let nodes = next
            .into_iter()
            .map(|(id, range)| ClusterNode::active(id, range))
            .collect();
        let topology = prior.successor(nodes);
        debug_assert!(topology.validate().is_ok(), "planned {}", topology);

        Some(RebalancePlan::between(prior, topology))
    }
}

fn active_ranges(topology: &ClusterTopology) -> Ranges {
    topology
        .active_nodes()
        .iter()
        .map(|n| (n.node_id.clone(), n.range()))
        .collect()
}

/// Carve a range of `N / (C + 1)` slots for `node_id`.
fn join(ranges: &mut Ranges, node_id: &str, space: SlotSpace) -> Result<()> {
    if ranges.iter().any(|(id, _)| id == node_id) {
        return Ok(());
    }

    if ranges.is_empty() {
        ranges.push((node_id.to_string(), space.full_range()));
        return Ok(());
    }

    let nodes = ranges.len() + 1;
    let exhausted = Error::SlotSpaceExhausted {
        slot_count: space.slot_count(),
        nodes,
    };
    let target = space.share(nodes);
    if target == 0 {
        return Err(exhausted);
    }

    if ranges.len() == 1 {
        let donor = ranges[0].1;
        if donor.count() <= target {
            return Err(exhausted);
        }
        ranges[0].1.end = donor.end - target;
        ranges.push((node_id.to_string(), SlotRange::new(donor.end - target + 1, donor.end)));
        return Ok(());
    }

    // Adjacent pair with the most slots; ties go to the lowest left node id
    let left = (0..ranges.len() - 1)
        .max_by(|&a, &b| {
            let size_a = ranges[a].1.count() + ranges[a + 1].1.count();
            let size_b = ranges[b].1.count() + ranges[b + 1].1.count();
            size_a
                .cmp(&size_b)
                .then_with(|| ranges[b].0.cmp(&ranges[a].0))
        })
        .ok_or_else(|| Error::Internal("no adjacent ranges".to_string()))?;

    let left_range = ranges[left].1;
    let right_range = ranges[left + 1].1;
    let (left_size, right_size) = (left_range.count() as i64, right_range.count() as i64);
    let target = target as i64;
    if left_size + right_size - target < 2 {
        return Err(exhausted);
    }

    // Take `from_left` off the left tail and the rest off the right head,
    // leaving both donors as equal as possible and each with a slot
    let lower = (target - (right_size - 1)).max(0);
    let upper = target.min(left_size - 1);
    let from_left = ((target + left_size - right_size) / 2).clamp(lower, upper) as u32;
    let from_right = target as u32 - from_left;

    let taken = SlotRange::new(
        left_range.end + 1 - from_left,
        right_range.start + from_right - 1,
    );
    ranges[left].1.end = left_range.end - from_left;
    ranges[left + 1].1.start = right_range.start + from_right;
    ranges.insert(left + 1, (node_id.to_string(), taken));
    Ok(())
}

/// Merge the range of `node_id` into its smaller neighbour.
fn leave(ranges: &mut Ranges, node_id: &str) -> Result<()> {
    let Some(idx) = ranges.iter().position(|(id, _)| id == node_id) else {
        return Ok(());
    };
    if ranges.len() == 1 {
        return Err(Error::NoActiveNodes);
    }

    let leaving = ranges[idx].1;
    let neighbour = match (idx.checked_sub(1), ranges.get(idx + 1).map(|_| idx + 1)) {
        (Some(l), Some(r)) => {
            let (left, right) = (&ranges[l], &ranges[r]);
            match left.1.count().cmp(&right.1.count()) {
                Ordering::Less => l,
                Ordering::Greater => r,
                Ordering::Equal if left.0 <= right.0 => l,
                Ordering::Equal => r,
            }
        }
        (Some(l), None) => l,
        (None, Some(r)) => r,
        (None, None) => return Err(Error::NoActiveNodes),
    };

    if neighbour < idx {
        ranges[neighbour].1.end = leaving.end;
    } else {
        ranges[neighbour].1.start = leaving.start;
    }
    ranges.remove(idx);
    Ok(())
}

/// Split the space into `order.len()` contiguous ranges differing by at most one slot.
fn even_ranges(order: &[NodeId], space: SlotSpace) -> Result<Ranges> {
    if order.is_empty() {
        return Err(Error::NoActiveNodes);
    }
    let slot_count = space.slot_count();
    if order.len() as u64 > slot_count as u64 {
        return Err(Error::SlotSpaceExhausted {
            slot_count,
            nodes: order.len(),
        });
    }

    let base = space.share(order.len());
    let remainder = slot_count - base * order.len() as u32;
    let mut start = 0;

    Ok(order
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let size = base + u32::from((i as u32) < remainder);
            let range = SlotRange::new(start, start + size - 1);
            start += size;
            (id.clone(), range)
        })
        .collect())
}
