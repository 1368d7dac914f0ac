//! Cluster membership and the coordination store.
//!
//! The [`MembershipDirectory`] owns the canonical [`ClusterTopology`]: it
//! publishes new epochs through a [`CoordinationStore`] compare-and-set and
//! turns join/leave/failure notices into [`MemberEvent`]s for the rebalancer.
//!
//! [`ClusterTopology`]: crate::partitioning::ClusterTopology

pub mod directory;
pub mod events;
pub mod store;

pub use directory::MembershipDirectory;
pub use events::{LoggingEventListener, MemberEvent, MemberEventListener, NoopEventListener};
pub use store::{CoordinationStore, FileCoordinationStore, InMemoryCoordinationStore};
