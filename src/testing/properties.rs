//! Property-based tests for assignment and rebalancing.
//!
//! Uses proptest to drive random join/leave sequences through the planner
//! and check the ownership invariant after every step.

use crate::config::RebalancePolicy;
use crate::error::Error;
use crate::partitioning::{ClusterTopology, SlotAssigner, SlotSpace};
use crate::rebalancing::{MembershipChange, Rebalancer};
use proptest::prelude::*;

/// A membership step: join or leave of one of a small pool of nodes.
#[derive(Debug, Clone)]
enum Step {
    Join(u8),
    Leave(u8),
}

fn any_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => (0..12u8).prop_map(Step::Join),
        1 => (0..12u8).prop_map(Step::Leave),
    ]
}

fn any_policy() -> impl Strategy<Value = RebalancePolicy> {
    prop_oneof![Just(RebalancePolicy::MinimalChurn), Just(RebalancePolicy::Even)]
}

fn node_name(idx: u8) -> String {
    format!("node-{:02}", idx)
}

/// Owner of every slot by linear scan, the reference for the binary search.
fn owner_by_scan(topology: &ClusterTopology, slot: u32) -> Option<String> {
    topology
        .active_nodes()
        .iter()
        .find(|n| n.range().contains(slot))
        .map(|n| n.node_id.clone())
}

proptest! {
    /// Property: the same key always maps to the same slot inside the space.
    #[test]
    fn assign_is_deterministic(key in "[a-zA-Z0-9:_-]{1,40}", slots in 1..=65536u32) {
        let space = SlotSpace::new(slots).unwrap();
        let first = SlotAssigner::new(space).assign(&key).unwrap();
        let second = SlotAssigner::new(space).assign(&key).unwrap();
        prop_assert_eq!(first, second);
        prop_assert!(first < slots);
    }

    /// Property: every published topology covers the space exactly once and
    /// lookups agree with a linear scan.
    #[test]
    fn coverage_holds_after_every_step(
        slots in 64..=4096u32,
        policy in any_policy(),
        steps in prop::collection::vec(any_step(), 1..40),
    ) {
        let space = SlotSpace::new(slots).unwrap();
        let rebalancer = Rebalancer::new(policy);
        let mut topology = ClusterTopology::bootstrap("prop", space, node_name(0));

        for step in steps {
            let change = match step {
                Step::Join(idx) => MembershipChange::Join(node_name(idx)),
                Step::Leave(idx) => MembershipChange::Leave(node_name(idx)),
            };
            let last_owner = topology.active_count() == 1 && topology.is_active(change.node_id());

            match rebalancer.plan(&topology, &[change.clone()]) {
                Ok(Some(plan)) => {
                    prop_assert_eq!(plan.topology.epoch(), topology.epoch() + 1);
                    prop_assert!(plan.topology.validate().is_ok(), "{}", plan.topology);
                    topology = plan.topology;
                }
                Ok(None) => {}
                Err(Error::NoActiveNodes) => {
                    prop_assert!(matches!(change, MembershipChange::Leave(_)) && last_owner);
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }

        for slot in (0..slots).step_by(7) {
            let owner = topology.owner_of(slot).map(|n| n.node_id.clone());
            prop_assert_eq!(owner, owner_by_scan(&topology, slot));
        }
    }

    /// Property: joining one node into C nodes moves exactly N / (C + 1) slots,
    /// and leaving moves exactly the leaver's range.
    #[test]
    fn churn_is_bounded(
        slots in 64..=16384u32,
        steps in prop::collection::vec(any_step(), 1..40),
    ) {
        let space = SlotSpace::new(slots).unwrap();
        let rebalancer = Rebalancer::new(RebalancePolicy::MinimalChurn);
        let mut topology = ClusterTopology::bootstrap("prop", space, node_name(0));

        for step in steps {
            match step {
                Step::Join(idx) => {
                    let nodes = topology.active_count();
                    let Ok(Some(plan)) = rebalancer.plan(&topology, &[MembershipChange::Join(node_name(idx))]) else {
                        continue;
                    };
                    prop_assert_eq!(plan.churn, (slots / (nodes as u32 + 1)) as u64);
                    topology = plan.topology;
                }
                Step::Leave(idx) => {
                    let name = node_name(idx);
                    let Some(size) = topology.node(&name).filter(|n| n.is_active()).map(|n| n.slot_count()) else {
                        continue;
                    };
                    let Ok(Some(plan)) = rebalancer.plan(&topology, &[MembershipChange::Leave(name)]) else {
                        continue;
                    };
                    prop_assert_eq!(plan.churn, size as u64);
                    topology = plan.topology;
                }
            }
        }
    }

    /// Property: replicas planning the same change from the same epoch agree.
    #[test]
    fn planning_is_deterministic(
        slots in 16..=4096u32,
        policy in any_policy(),
        joins in prop::collection::vec(0..12u8, 1..8),
    ) {
        let space = SlotSpace::new(slots).unwrap();
        let rebalancer = Rebalancer::new(policy);
        let prior = ClusterTopology::bootstrap("prop", space, node_name(0));
        let changes: Vec<MembershipChange> =
            joins.into_iter().map(|i| MembershipChange::Join(node_name(i))).collect();

        prop_assert_eq!(
            rebalancer.plan(&prior, &changes),
            rebalancer.plan(&prior, &changes)
        );
    }
}
