//! Testing utilities for partitioned clusters.
//!
//! This module provides an in-process cluster harness: every node gets its
//! own directory, resolver and coordinator, all sharing one in-memory
//! coordination store, so races between nodes can be reproduced
//! deterministically.
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_partition::testing::TestCluster;
//! use tenant_partition::config::PartitionConfig;
//!
//! let mut cluster = TestCluster::start(PartitionConfig::new(16), "a").await?;
//! cluster.add_node("b").await?;
//! cluster.sync_all().await?;
//!
//! let assignment = cluster.node("a").unwrap().resolver.resolve("tenant-42")?;
//! ```

#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;

use crate::cluster::{CoordinationStore, InMemoryCoordinationStore, MembershipDirectory};
use crate::config::PartitionConfig;
use crate::error::Result;
use crate::partitioning::{ClusterTopology, OwnershipResolver};
use crate::rebalancing::{RebalanceCoordinator, RebalanceRecord};
use crate::types::NodeId;
use std::sync::Arc;
use std::time::Instant;

/// Cluster identifier used by [`TestCluster`].
pub const TEST_CLUSTER_ID: &str = "test-cluster";

/// One node of a [`TestCluster`].
#[derive(Debug, Clone)]
pub struct TestNode {
    /// Node ID.
    pub node_id: NodeId,
    /// The node's view of membership.
    pub directory: Arc<MembershipDirectory>,
    /// The node's resolver.
    pub resolver: Arc<OwnershipResolver>,
    /// The node's rebalance coordinator.
    pub coordinator: Arc<RebalanceCoordinator>,
}

/// A test cluster for integration testing.
#[derive(Debug)]
pub struct TestCluster {
    /// Shared coordination store.
    store: Arc<InMemoryCoordinationStore>,

    /// Configuration for every node.
    config: PartitionConfig,

    /// Nodes currently in the cluster.
    nodes: Vec<TestNode>,

    /// When the test started.
    pub started_at: Instant,
}

impl TestCluster {
    /// Bootstrap a cluster whose first node owns the whole space.
    pub async fn start(config: PartitionConfig, first_node: &str) -> Result<Self> {
        let mut cluster = Self {
            store: Arc::new(InMemoryCoordinationStore::new()),
            config,
            nodes: Vec::new(),
            started_at: Instant::now(),
        };
        let node = cluster.spawn_node(first_node).await?;
        cluster.nodes.push(node);
        Ok(cluster)
    }

    async fn spawn_node(&self, node_id: &str) -> Result<TestNode> {
        let store: Arc<dyn CoordinationStore> = self.store.clone();
        // Events are driven explicitly by the harness
        let (directory, _events) =
            MembershipDirectory::new(store, self.config.clone(), TEST_CLUSTER_ID)?;
        directory.bootstrap(node_id).await?;

        let resolver = Arc::new(OwnershipResolver::for_directory(node_id, directory.clone())?);
        let coordinator = Arc::new(RebalanceCoordinator::new(directory.clone()));

        Ok(TestNode {
            node_id: node_id.to_string(),
            directory,
            resolver,
            coordinator,
        })
    }

    /// Start a node and rebalance it into the cluster from its own coordinator.
    pub async fn add_node(&mut self, node_id: &str) -> Result<Option<RebalanceRecord>> {
        let node = self.spawn_node(node_id).await?;
        node.directory.node_joined(node_id)?;
        let record = node.coordinator.node_join(node_id).await?;
        self.nodes.push(node);
        Ok(record)
    }

    /// Drain a node out of the cluster from its own coordinator.
    ///
    /// The node is kept in the harness if the rebalance fails.
    pub async fn remove_node(&mut self, node_id: &str) -> Result<Option<RebalanceRecord>> {
        let Some(idx) = self.nodes.iter().position(|n| n.node_id == node_id) else {
            return Ok(None);
        };

        let node = &self.nodes[idx];
        node.directory.node_left(node_id)?;
        let record = node.coordinator.node_leave(node_id).await?;
        self.nodes.remove(idx);
        Ok(record)
    }

    /// Refresh every node's directory and resolver from the store.
    pub async fn sync_all(&self) -> Result<()> {
        for node in &self.nodes {
            node.directory.refresh().await?;
            node.resolver.sync();
        }
        Ok(())
    }

    /// The topology currently in the store.
    pub async fn canonical_topology(&self) -> Result<Option<ClusterTopology>> {
        Ok(self.store.read().await?)
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<InMemoryCoordinationStore> {
        &self.store
    }

    /// The node configuration.
    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Get a node by ID.
    pub fn node(&self, node_id: &str) -> Option<&TestNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// All nodes in the harness.
    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG` for the current test binary.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
