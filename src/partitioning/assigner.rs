//! Deterministic mapping of tenant keys to slots.

use crate::config::DEFAULT_HASH_SEED;
use crate::error::{Error, Result};
use crate::partitioning::slot_space::SlotSpace;
use crate::types::Slot;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Maps a tenant key to a slot with a stable hash reduced modulo `N`.
///
/// Only the raw key bytes are fed to the hasher (no length prefix), so every
/// node computes the same slot regardless of platform word size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssigner {
    space: SlotSpace,
    seed: u64,
}

impl SlotAssigner {
    /// Create an assigner with the default hash seed.
    pub fn new(space: SlotSpace) -> Self {
        Self::with_seed(space, DEFAULT_HASH_SEED)
    }

    /// Create an assigner with a custom hash seed.
    pub fn with_seed(space: SlotSpace, seed: u64) -> Self {
        Self { space, seed }
    }

    /// The slot space this assigner reduces into.
    pub fn slot_space(&self) -> SlotSpace {
        self.space
    }

    /// Assign a tenant key to its slot.
    pub fn assign(&self, tenant_key: &str) -> Result<Slot> {
        self.assign_bytes(tenant_key.as_bytes())
    }

    /// Assign a raw tenant key to its slot.
    pub fn assign_bytes(&self, tenant_key: &[u8]) -> Result<Slot> {
        if tenant_key.is_empty() {
            return Err(Error::InvalidKey);
        }
        let hash = self.hash_key(tenant_key);
        Ok((hash % self.space.slot_count() as u64) as Slot)
    }

    fn hash_key(&self, key: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(key);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn assigner(slots: u32) -> SlotAssigner {
        SlotAssigner::new(SlotSpace::new(slots).unwrap())
    }

    #[test]
    fn test_assign_is_deterministic() {
        let a = assigner(16384);
        let b = assigner(16384);
        for i in 0..100 {
            let key = format!("tenant-{}", i);
            assert_eq!(a.assign(&key).unwrap(), a.assign(&key).unwrap());
            assert_eq!(a.assign(&key).unwrap(), b.assign(&key).unwrap());
        }
    }

    #[test]
    fn test_assign_within_space() {
        let a = assigner(16);
        for i in 0..1000 {
            let slot = a.assign(&format!("tenant-{}", i)).unwrap();
            assert!(slot < 16);
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert_eq!(assigner(16).assign(""), Err(Error::InvalidKey));
        assert_eq!(assigner(16).assign_bytes(b""), Err(Error::InvalidKey));
    }

    #[test]
    fn test_seed_changes_mapping() {
        let space = SlotSpace::new(16384).unwrap();
        let a = SlotAssigner::with_seed(space, 1);
        let b = SlotAssigner::with_seed(space, 2);
        let differing = (0..100)
            .filter(|i| {
                let key = format!("tenant-{}", i);
                a.assign(&key).unwrap() != b.assign(&key).unwrap()
            })
            .count();
        assert!(differing > 90);
    }

    #[test]
    fn test_distribution() {
        let a = assigner(4);
        let mut counts: HashMap<Slot, usize> = HashMap::new();
        for i in 0..10_000 {
            *counts.entry(a.assign(&format!("tenant-{}", i)).unwrap()).or_insert(0) += 1;
        }
        // Each slot should get roughly a quarter of the keys
        for slot in 0..4 {
            let count = counts.get(&slot).copied().unwrap_or(0);
            assert!(count > 2000 && count < 3000, "slot {} has {} keys", slot, count);
        }
    }
}
