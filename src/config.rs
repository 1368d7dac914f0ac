//! Configuration types for slot partitioning.

use crate::error::{Error, Result};
use crate::partitioning::{SlotRange, DEFAULT_SLOT_COUNT};
use crate::types::Slot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Seed used by the slot assigner unless configured otherwise.
///
/// Changing it remaps every tenant, so it is fixed for the cluster lifetime
/// just like the slot count.
pub const DEFAULT_HASH_SEED: u64 = 0x7E4A_17D5_0C0F_FEE5;

/// Process-wide startup options identifying the tenant cluster.
///
/// The slot bounds seed this node's ownership before it has observed a
/// published topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOptions {
    /// The cluster identifier.
    pub cluster_id: String,

    /// The minimum tenant slot number (inclusive).
    pub slot_min: Slot,

    /// The maximum tenant slot number (inclusive).
    pub slot_max: Slot,
}

impl ClusterOptions {
    /// Create options seeding the given inclusive slot bounds.
    pub fn new(cluster_id: impl Into<String>, slot_min: Slot, slot_max: Slot) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            slot_min,
            slot_max,
        }
    }

    /// Create options seeding the whole slot space.
    pub fn full_range(cluster_id: impl Into<String>, slot_count: u32) -> Self {
        Self::new(cluster_id, 0, slot_count.saturating_sub(1))
    }

    /// Validate the options against a slot space size.
    pub fn validate(&self, slot_count: u32) -> Result<()> {
        if self.cluster_id.is_empty() {
            return Err(Error::Config("cluster id must not be empty".to_string()));
        }
        if self.slot_min > self.slot_max {
            return Err(Error::Config(format!(
                "slot_min {} is greater than slot_max {}",
                self.slot_min, self.slot_max
            )));
        }
        if self.slot_max >= slot_count {
            return Err(Error::Config(format!(
                "slot_max {} is outside the slot space of {}",
                self.slot_max, slot_count
            )));
        }
        Ok(())
    }

    /// The seeded slot range, validated against the slot space.
    pub fn seed_range(&self, slot_count: u32) -> Result<SlotRange> {
        self.validate(slot_count)?;
        Ok(SlotRange::new(self.slot_min, self.slot_max))
    }
}

/// Main configuration for a partitioned node.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Size of the slot space. Fixed for the cluster lifetime.
    pub slot_count: u32,

    /// Seed of the tenant key hash.
    pub hash_seed: u64,

    /// Timeout for a single coordination store round trip.
    pub store_timeout: Duration,

    /// Interval at which resolvers re-read the coordination store.
    pub refresh_interval: Duration,

    /// Maximum number of cached tenant assignments per resolver.
    pub assignment_cache_capacity: usize,

    /// Rebalancing configuration.
    pub rebalance: RebalanceConfig,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            hash_seed: DEFAULT_HASH_SEED,
            store_timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(10),
            assignment_cache_capacity: 10_000,
            rebalance: RebalanceConfig::default(),
        }
    }
}

impl PartitionConfig {
    /// Create a configuration with the given slot count.
    pub fn new(slot_count: u32) -> Self {
        Self {
            slot_count,
            ..Default::default()
        }
    }

    /// Set the hash seed.
    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    /// Set the store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the assignment cache capacity. Zero disables caching.
    pub fn with_assignment_cache_capacity(mut self, capacity: usize) -> Self {
        self.assignment_cache_capacity = capacity;
        self
    }

    /// Set rebalancing configuration.
    pub fn with_rebalance_config(mut self, rebalance: RebalanceConfig) -> Self {
        self.rebalance = rebalance;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::Config("slot_count must be greater than zero".to_string()));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::Config("store_timeout must be greater than zero".to_string()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::Config("refresh_interval must be greater than zero".to_string()));
        }
        self.rebalance.validate()
    }
}

/// Strategy used to recompute ranges on membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalancePolicy {
    /// Move only the slots the joining node takes (or the leaving node gives up).
    #[default]
    MinimalChurn,

    /// Re-divide the whole space evenly on every change.
    Even,
}

/// Configuration for rebalancing.
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// Maximum publish attempts before giving up with `RebalanceConflict`.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles on every further attempt.
    pub base_backoff: Duration,

    /// Upper bound of the backoff.
    pub max_backoff: Duration,

    /// Range recomputation strategy.
    pub policy: RebalancePolicy,

    /// Number of completed rebalances kept in history.
    pub max_history: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
            policy: RebalancePolicy::MinimalChurn,
            max_history: 100,
        }
    }
}

impl RebalanceConfig {
    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff bounds.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Set the rebalance policy.
    pub fn with_policy(mut self, policy: RebalancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.base_backoff > self.max_backoff {
            return Err(Error::Config("base_backoff exceeds max_backoff".to_string()));
        }
        Ok(())
    }

    /// Backoff to wait after the given failed attempt (1-based), before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PartitionConfig::default();
        assert_eq!(config.slot_count, 16384);
        assert_eq!(config.rebalance.policy, RebalancePolicy::MinimalChurn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PartitionConfig::new(16)
            .with_hash_seed(7)
            .with_store_timeout(Duration::from_millis(250))
            .with_assignment_cache_capacity(0)
            .with_rebalance_config(RebalanceConfig::default().with_max_attempts(2));

        assert_eq!(config.slot_count, 16);
        assert_eq!(config.hash_seed, 7);
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.assignment_cache_capacity, 0);
        assert_eq!(config.rebalance.max_attempts, 2);
    }

    #[test]
    fn test_invalid_config() {
        assert!(PartitionConfig::new(0).validate().is_err());
        assert!(PartitionConfig::default()
            .with_store_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RebalanceConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RebalanceConfig::default()
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(config.backoff_for(1), Duration::from_millis(10));
        assert_eq!(config.backoff_for(2), Duration::from_millis(20));
        assert_eq!(config.backoff_for(3), Duration::from_millis(40));
        assert_eq!(config.backoff_for(4), Duration::from_millis(50));
        assert_eq!(config.backoff_for(40), Duration::from_millis(50));
    }

    #[test]
    fn test_cluster_options_seed_range() {
        let options = ClusterOptions::new("tenants", 0, 15);
        assert_eq!(options.seed_range(16).unwrap(), SlotRange::new(0, 15));

        assert!(ClusterOptions::new("tenants", 0, 16).validate(16).is_err());
        assert!(ClusterOptions::new("tenants", 9, 3).validate(16).is_err());
        assert!(ClusterOptions::new("", 0, 3).validate(16).is_err());
        assert_eq!(ClusterOptions::full_range("tenants", 16).slot_max, 15);
    }
}
