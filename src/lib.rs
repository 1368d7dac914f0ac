//! Tenant slot partitioning and ownership resolution.
//!
//! This crate maps tenant keys onto a fixed slot space and splits that space
//! into contiguous ranges, one per active node:
//! - **Slot assignment** hashes a tenant key to a stable slot
//! - **Topologies** are versioned by epoch and published by compare-and-set
//! - **Rebalancing** moves the fewest slots needed when nodes join or leave
//! - **Resolution** answers "which node owns this tenant?" from a local snapshot
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_partition::cluster::{InMemoryCoordinationStore, MembershipDirectory};
//! use tenant_partition::{OwnershipResolver, PartitionConfig, RebalanceCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryCoordinationStore::new());
//!     let (directory, events) =
//!         MembershipDirectory::new(store, PartitionConfig::default(), "tenants")?;
//!
//!     // The first node owns the whole space at epoch 1
//!     directory.bootstrap("node-a").await?;
//!
//!     // Membership events drive rebalancing in the background
//!     let coordinator = Arc::new(RebalanceCoordinator::new(directory.clone()));
//!     coordinator.spawn(events);
//!
//!     let resolver = OwnershipResolver::for_directory("node-a", directory.clone())?;
//!     let assignment = resolver.resolve("tenant-42")?;
//!     println!("{} -> {}", assignment.slot, assignment.node_id);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Request Router                    │
//! └─────────────────────────────────────────────┘
//!                     │ resolve(tenant)
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │          OwnershipResolver                   │
//! │  • SlotAssigner: key -> slot                 │
//! │  • topology snapshot: slot -> node           │
//! └─────────────────────────────────────────────┘
//!                     │ snapshot / refresh
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌──────────┐  ┌───────────┐  ┌─────────────┐
//! │Membership│  │ Rebalance │  │Coordination │
//! │Directory │◄─│Coordinator│  │   Store     │
//! └──────────┘  └───────────┘  └─────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Publishes**: linearizable through the store's compare-and-set on epoch
//! - **Resolution**: answers from the local snapshot and reports its epoch
//! - **Stale owners**: a draining or departed owner triggers one refresh

pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod partitioning;
pub mod rebalancing;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::{ClusterOptions, PartitionConfig, RebalanceConfig, RebalancePolicy};
pub use error::{Error, MembershipError, Result, StoreError, TopologyError};
pub use types::{Assignment, Epoch, NodeId, NodeStatus, Slot};

// Re-export cluster types
pub use cluster::{CoordinationStore, MemberEvent, MembershipDirectory};

// Re-export partitioning types
pub use partitioning::{
    ClusterNode, ClusterTopology, OwnershipResolver, SlotAssigner, SlotMove, SlotRange, SlotSpace,
    DEFAULT_SLOT_COUNT,
};

// Re-export rebalancing types
pub use rebalancing::{
    MembershipChange, RebalanceCoordinator, RebalanceKind, RebalancePlan, RebalanceRecord,
    Rebalancer,
};

// Re-export metrics types
pub use metrics::{MetricsSnapshot, PartitionMetrics};

// Re-export testing types
pub use testing::{TestCluster, TestNode};
