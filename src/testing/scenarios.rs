//! Multi-node scenarios over a shared coordination store.

use super::{init_test_tracing, TestCluster, TEST_CLUSTER_ID};
use crate::cluster::{FileCoordinationStore, InMemoryCoordinationStore, MembershipDirectory};
use crate::config::{PartitionConfig, RebalanceConfig};
use crate::error::{Error, TopologyError};
use crate::partitioning::{ClusterNode, OwnershipResolver, SlotRange};
use crate::rebalancing::RebalanceCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("tenant-{}", i)).collect()
}

#[tokio::test]
async fn test_join_splits_space_in_half() {
    init_test_tracing();
    let mut cluster = TestCluster::start(PartitionConfig::new(16), "a").await.unwrap();

    let a = cluster.node("a").unwrap().resolver.clone();
    let before: Vec<(String, u32)> = keys(200)
        .into_iter()
        .map(|k| {
            let slot = a.resolve(&k).unwrap().slot;
            (k, slot)
        })
        .collect();

    let record = cluster.add_node("b").await.unwrap().unwrap();
    assert_eq!(record.from_epoch, 1);
    assert_eq!(record.to_epoch, 2);

    let topology = cluster.canonical_topology().await.unwrap().unwrap();
    assert_eq!(topology.epoch(), 2);
    assert_eq!(topology.node("a").unwrap().range(), SlotRange::new(0, 7));
    assert_eq!(topology.node("b").unwrap().range(), SlotRange::new(8, 15));

    cluster.sync_all().await.unwrap();
    for (key, slot) in before {
        let assignment = a.resolve(&key).unwrap();
        let expected = if slot >= 8 { "b" } else { "a" };
        assert_eq!(assignment.node_id, expected, "key {} in slot {}", key, slot);
        assert_eq!(assignment.epoch, 2);
    }
}

#[tokio::test]
async fn test_leave_merges_back_to_single_owner() {
    init_test_tracing();
    let mut cluster = TestCluster::start(PartitionConfig::new(16), "a").await.unwrap();
    cluster.add_node("b").await.unwrap();
    cluster.sync_all().await.unwrap();

    let a = cluster.node("a").unwrap().resolver.clone();
    let owned_by_b: Vec<String> = keys(200)
        .into_iter()
        .filter(|k| a.resolve(k).unwrap().node_id == "b")
        .collect();
    assert!(!owned_by_b.is_empty());

    let record = cluster.remove_node("b").await.unwrap().unwrap();
    assert_eq!(record.to_epoch, 3);

    let topology = cluster.canonical_topology().await.unwrap().unwrap();
    assert_eq!(topology.active_count(), 1);
    assert_eq!(topology.node("a").unwrap().range(), SlotRange::new(0, 15));

    cluster.sync_all().await.unwrap();
    for key in owned_by_b {
        let assignment = a.resolve(&key).unwrap();
        assert_eq!(assignment.node_id, "a");
        assert_eq!(assignment.epoch, 3);
    }
}

#[tokio::test]
async fn test_incomplete_topology_rejected() {
    let cluster = TestCluster::start(PartitionConfig::new(16), "a").await.unwrap();
    let directory = cluster.node("a").unwrap().directory.clone();
    let prior = directory.current_topology();

    let result = directory
        .publish(prior.successor(vec![ClusterNode::active("a", SlotRange::new(0, 14))]))
        .await;
    assert!(matches!(
        result,
        Err(Error::InvalidTopology(TopologyError::Gap { start: 15, end: 15 }))
    ));

    let stored = cluster.canonical_topology().await.unwrap().unwrap();
    assert_eq!(stored, *prior);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_publish_exactly_one_wins() {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let (first, _rx1) =
        MembershipDirectory::new(store.clone(), PartitionConfig::new(16), TEST_CLUSTER_ID).unwrap();
    let (second, _rx2) =
        MembershipDirectory::new(store.clone(), PartitionConfig::new(16), TEST_CLUSTER_ID).unwrap();

    let base = first.bootstrap("a").await.unwrap();
    second.refresh().await.unwrap();
    store.set_latency(Some(Duration::from_millis(10)));

    let left = base.successor(vec![
        ClusterNode::active("a", SlotRange::new(0, 7)),
        ClusterNode::active("b", SlotRange::new(8, 15)),
    ]);
    let right = base.successor(vec![
        ClusterNode::active("a", SlotRange::new(0, 7)),
        ClusterNode::active("c", SlotRange::new(8, 15)),
    ]);

    let (r1, r2) = tokio::join!(first.publish(left), second.publish(right));
    let outcomes = [r1.is_ok(), r2.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

    let loser = if r1.is_ok() { r2 } else { r1 };
    assert_eq!(loser.unwrap_err(), Error::StaleEpoch { base: 1, current: 2 });
    assert_eq!(store.epoch(), 2);

    // Both directories converge on the winner
    assert_eq!(first.epoch(), 2);
    assert_eq!(second.epoch(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joins_both_land() {
    init_test_tracing();
    let mut cluster = TestCluster::start(PartitionConfig::new(64), "a").await.unwrap();
    cluster.add_node("b").await.unwrap();
    cluster.store().set_latency(Some(Duration::from_millis(5)));

    let a = cluster.node("a").unwrap().clone();
    let b = cluster.node("b").unwrap().clone();
    a.directory.node_joined("c").unwrap();
    b.directory.node_joined("d").unwrap();

    let (rc, rd) = tokio::join!(a.coordinator.node_join("c"), b.coordinator.node_join("d"));
    let (rc, rd) = (rc.unwrap().unwrap(), rd.unwrap().unwrap());

    // One of them lost the race on epoch 2 and replanned on epoch 3
    assert_eq!(rc.attempts + rd.attempts, 3);
    let mut published = [rc.to_epoch, rd.to_epoch];
    published.sort();
    assert_eq!(published, [3, 4]);

    let topology = cluster.canonical_topology().await.unwrap().unwrap();
    assert_eq!(topology.epoch(), 4);
    assert_eq!(topology.active_count(), 4);
    assert!(topology.validate().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_contention_surfaces_rebalance_conflict() {
    let config = PartitionConfig::new(64)
        .with_rebalance_config(RebalanceConfig::default().with_max_attempts(1));
    let mut cluster = TestCluster::start(config, "a").await.unwrap();
    cluster.add_node("b").await.unwrap();
    cluster.store().set_latency(Some(Duration::from_millis(5)));

    let a = cluster.node("a").unwrap().clone();
    let b = cluster.node("b").unwrap().clone();
    a.directory.node_joined("c").unwrap();
    b.directory.node_joined("d").unwrap();

    let (rc, rd) = tokio::join!(a.coordinator.node_join("c"), b.coordinator.node_join("d"));
    let errors: Vec<Error> = [rc, rd].into_iter().filter_map(|r| r.err()).collect();
    assert_eq!(errors, vec![Error::RebalanceConflict { attempts: 1 }]);
}

#[tokio::test]
async fn test_resolution_is_consistent_across_nodes() {
    let mut cluster = TestCluster::start(PartitionConfig::new(1024), "a").await.unwrap();
    for node in ["b", "c", "d"] {
        cluster.add_node(node).await.unwrap();
    }
    cluster.sync_all().await.unwrap();

    let epoch = cluster.canonical_topology().await.unwrap().unwrap().epoch();
    for key in keys(500) {
        let answers: Vec<_> = cluster
            .nodes()
            .iter()
            .map(|n| n.resolver.resolve(&key).unwrap())
            .collect();
        assert!(answers.iter().all(|a| *a == answers[0]), "key {}", key);
        assert_eq!(answers[0].epoch, epoch);
    }

    // Each tenant is local to exactly one node
    for key in keys(100) {
        let owners = cluster
            .nodes()
            .iter()
            .filter(|n| n.resolver.is_local(&key).unwrap())
            .count();
        assert_eq!(owners, 1);
    }
}

#[tokio::test]
async fn test_draining_owner_unavailable_until_rebalanced() {
    let mut cluster = TestCluster::start(PartitionConfig::new(16), "a").await.unwrap();
    cluster.add_node("b").await.unwrap();
    cluster.sync_all().await.unwrap();

    let a = cluster.node("a").unwrap().clone();
    let key = keys(200)
        .into_iter()
        .find(|k| a.resolver.resolve(k).unwrap().node_id == "b")
        .unwrap();

    a.directory.node_left("b").unwrap();
    a.resolver.invalidate_cache();
    assert!(matches!(
        a.resolver.resolve(&key),
        Err(Error::OwnerUnavailable { ref node_id, .. }) if node_id == "b"
    ));

    a.coordinator.node_leave("b").await.unwrap().unwrap();
    assert_eq!(a.resolver.resolve(&key).unwrap().node_id, "a");
}

#[tokio::test]
async fn test_cluster_unavailable_until_node_joins() {
    let mut cluster = TestCluster::start(PartitionConfig::new(16), "a").await.unwrap();
    let a = cluster.node("a").unwrap().clone();

    assert_eq!(cluster.remove_node("a").await, Err(Error::NoActiveNodes));
    assert_eq!(cluster.store().epoch(), 1);
    assert_eq!(a.resolver.resolve("tenant-1"), Err(Error::NoActiveNodes));

    // Announce the replacement through the surviving directory
    a.directory.node_joined("b").unwrap();
    let record = a.coordinator.node_join("b").await.unwrap().unwrap();
    assert_eq!(record.to_epoch, 2);

    let assignment = a.resolver.resolve("tenant-1").unwrap();
    assert_eq!(assignment.node_id, "b");
    assert_eq!(assignment.epoch, 2);
}

#[tokio::test]
async fn test_event_driven_rebalancing() {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let (directory, events) =
        MembershipDirectory::new(store, PartitionConfig::new(16), TEST_CLUSTER_ID).unwrap();
    directory.bootstrap("a").await.unwrap();
    let coordinator = Arc::new(RebalanceCoordinator::new(directory.clone()));
    let handle = coordinator.spawn(events);
    let mut updates = directory.subscribe();

    directory.node_joined("b").unwrap();
    updates.changed().await.unwrap();
    assert_eq!(updates.borrow_and_update().epoch(), 2);

    directory.node_failed("b").unwrap();
    updates.changed().await.unwrap();
    let topology = updates.borrow_and_update().clone();
    assert_eq!(topology.epoch(), 3);
    assert_eq!(topology.active_count(), 1);

    handle.abort();
}

#[tokio::test]
async fn test_file_store_backed_cluster() {
    let temp_dir = TempDir::new().unwrap();
    let config = PartitionConfig::new(16);

    let store_a = Arc::new(FileCoordinationStore::new(temp_dir.path()).await.unwrap());
    let store_b = Arc::new(FileCoordinationStore::new(temp_dir.path()).await.unwrap());
    let (dir_a, _rx_a) = MembershipDirectory::new(store_a, config.clone(), TEST_CLUSTER_ID).unwrap();
    let (dir_b, _rx_b) = MembershipDirectory::new(store_b, config, TEST_CLUSTER_ID).unwrap();

    dir_a.bootstrap("a").await.unwrap();
    dir_b.bootstrap("b").await.unwrap();
    dir_b.node_joined("b").unwrap();
    RebalanceCoordinator::new(dir_b.clone())
        .node_join("b")
        .await
        .unwrap()
        .unwrap();

    dir_a.refresh().await.unwrap();
    let resolver = OwnershipResolver::for_directory("a", dir_a).unwrap();
    assert_eq!(resolver.resolve_slot(12).unwrap().node_id, "b");
    assert_eq!(resolver.resolve_slot(3).unwrap().node_id, "a");
}
