//! The fixed slot space every tenant key hashes into.

use crate::error::{Error, Result};
use crate::types::Slot;
use serde::{Deserialize, Serialize};

/// Default number of slots.
///
/// A power of two large enough that per-node shares stay within a fraction of
/// a percent of each other even with dozens of nodes (16384 / 48 = 341.3).
pub const DEFAULT_SLOT_COUNT: u32 = 16384;

/// The fixed integer range `[0, N)`.
///
/// Immutable for the lifetime of a cluster: changing it remaps every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotSpace {
    size: u32,
}

impl SlotSpace {
    /// Create a slot space of `size` slots.
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("slot space must contain at least one slot".to_string()));
        }
        Ok(Self { size })
    }

    /// Number of slots, `N`.
    pub fn slot_count(&self) -> u32 {
        self.size
    }

    /// Highest valid slot, `N - 1`.
    pub fn max_slot(&self) -> Slot {
        self.size - 1
    }

    /// Check if a slot lies within the space.
    pub fn contains(&self, slot: Slot) -> bool {
        slot < self.size
    }

    /// The range covering the whole space.
    pub fn full_range(&self) -> SlotRange {
        SlotRange::new(0, self.max_slot())
    }

    /// Even share per node for the given node count, ignoring the remainder.
    pub fn share(&self, nodes: usize) -> u32 {
        if nodes == 0 {
            return 0;
        }
        (self.size as u64 / nodes as u64) as u32
    }
}

impl Default for SlotSpace {
    fn default() -> Self {
        Self {
            size: DEFAULT_SLOT_COUNT,
        }
    }
}

/// A contiguous range of slots `[start, end]`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRange {
    /// First slot of the range.
    pub start: Slot,
    /// Last slot of the range.
    pub end: Slot,
}

impl SlotRange {
    /// Create a new slot range.
    pub fn new(start: Slot, end: Slot) -> Self {
        debug_assert!(start <= end, "start ({}) must be <= end ({})", start, end);
        Self { start, end }
    }

    /// Create a single-slot range.
    pub fn single(slot: Slot) -> Self {
        Self { start: slot, end: slot }
    }

    /// Number of slots in the range.
    pub fn count(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Check if the range contains a slot.
    pub fn contains(&self, slot: Slot) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// The overlapping part of two ranges, if any.
    pub fn intersection(&self, other: &SlotRange) -> Option<SlotRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then(|| SlotRange::new(start, end))
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_space() {
        let space = SlotSpace::new(16).unwrap();
        assert_eq!(space.slot_count(), 16);
        assert_eq!(space.max_slot(), 15);
        assert!(space.contains(15));
        assert!(!space.contains(16));
        assert_eq!(space.full_range(), SlotRange::new(0, 15));
        assert_eq!(space.share(3), 5);
        assert_eq!(space.share(0), 0);
    }

    #[test]
    fn test_empty_slot_space_rejected() {
        assert!(matches!(SlotSpace::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_slot_space() {
        assert_eq!(SlotSpace::default().slot_count(), DEFAULT_SLOT_COUNT);
        assert!(DEFAULT_SLOT_COUNT.is_power_of_two());
    }

    #[test]
    fn test_slot_range() {
        let range = SlotRange::new(100, 200);
        assert_eq!(range.count(), 101);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(99));
        assert!(!range.contains(201));
        assert_eq!(SlotRange::single(7).count(), 1);
    }

    #[test]
    fn test_slot_range_intersection() {
        let a = SlotRange::new(0, 9);
        assert_eq!(a.intersection(&SlotRange::new(5, 20)), Some(SlotRange::new(5, 9)));
        assert_eq!(a.intersection(&SlotRange::new(10, 20)), None);
    }

    #[test]
    fn test_slot_range_display() {
        assert_eq!(SlotRange::new(0, 5461).to_string(), "0-5461");
        assert_eq!(SlotRange::single(100).to_string(), "100");
    }
}
