//! Slot partitioning of the tenant space.
//!
//! Tenants hash into a fixed space of `N` slots; every Active node owns one
//! contiguous range of it, and a versioned [`ClusterTopology`] records who
//! owns what.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    OwnershipResolver                         │
//! │                                                              │
//! │  "tenant-42" ──► SlotAssigner ──► slot 9731                 │
//! │                                       │                      │
//! │  ClusterTopology @ epoch 7            ▼ binary search        │
//! │  ┌────────────┬────────────┬────────────┬────────────┐     │
//! │  │ a [0-4095] │ b [4096-   │ c [8192-   │ d [12288-  │     │
//! │  │            │     8191]  │    12287]  │    16383]  │     │
//! │  └────────────┴────────────┴────────────┴────────────┘     │
//! │                                   └──► Assignment(c, 7)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tenant_partition::partitioning::{OwnershipResolver, SlotAssigner, SlotSpace};
//!
//! let resolver = OwnershipResolver::for_directory("node-a", directory)?;
//!
//! if resolver.is_local("tenant-42")? {
//!     serve_locally();
//! }
//! ```

mod assigner;
mod resolver;
mod slot_space;
mod topology;

pub use assigner::SlotAssigner;
pub use resolver::OwnershipResolver;
pub use slot_space::{SlotRange, SlotSpace, DEFAULT_SLOT_COUNT};
pub use topology::{ClusterNode, ClusterTopology, SlotMove};
