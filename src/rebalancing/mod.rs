//! Rebalancing of slot ranges on membership change.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RebalanceCoordinator                        │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  1. Refresh                                          │  │
//! │  │  - Read the canonical topology (epoch E)             │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                          ↓                                   │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  2. Plan (Rebalancer, pure)                          │  │
//! │  │  - Join: carve N/(C+1) slots from the largest pair   │  │
//! │  │  - Leave: merge into the smaller neighbour           │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                          ↓                                   │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  3. Publish epoch E+1 (compare-and-set)              │  │
//! │  │  - Lost race: back off, go to 1                      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_partition::rebalancing::RebalanceCoordinator;
//!
//! let (directory, events) = MembershipDirectory::new(store, config, "tenants")?;
//! let coordinator = Arc::new(RebalanceCoordinator::new(directory.clone()));
//! coordinator.spawn(events);
//!
//! directory.node_joined("node-b")?;
//! ```

mod coordinator;
mod planner;

pub use coordinator::{RebalanceCoordinator, RebalanceKind, RebalanceRecord};
pub use planner::{MembershipChange, RebalancePlan, Rebalancer};
