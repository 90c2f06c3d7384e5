//! Fixed-size slot allocator.
//!
//! Every slot of a store has identical size, so allocation reduces to an
//! arena of whole slots: an append point past the last slot ever written,
//! plus a FIFO free list of reclaimed slot ids. Reuse is preferred over
//! appending to bound file growth.

use crate::types::SlotId;
use std::collections::VecDeque;

/// Where an allocated slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Allocation {
    /// A reclaimed slot that already exists in the file; written in place.
    Reused(SlotId),
    /// A brand-new slot past the current end of the file; appended.
    Fresh(SlotId),
}

impl Allocation {
    /// Returns the allocated slot id.
    pub(crate) const fn slot(self) -> SlotId {
        match self {
            Self::Reused(slot) | Self::Fresh(slot) => slot,
        }
    }
}

/// Tracks free and used slots in the backing file.
#[derive(Debug, Default)]
pub(crate) struct SlotAllocator {
    /// Id of the next never-used slot (the append point).
    next_slot: u64,
    /// Reclaimed slots available for reuse, in FIFO order.
    free: VecDeque<SlotId>,
}

impl SlotAllocator {
    /// Creates an allocator for a file containing `slot_count` slots,
    /// all initially considered live.
    pub(crate) fn with_slot_count(slot_count: u64) -> Self {
        Self {
            next_slot: slot_count,
            free: VecDeque::new(),
        }
    }

    /// Allocates a slot, preferring free-list reuse over extending the file.
    pub(crate) fn allocate(&mut self) -> Allocation {
        if let Some(slot) = self.free.pop_front() {
            return Allocation::Reused(slot);
        }
        let slot = SlotId::new(self.next_slot);
        self.next_slot += 1;
        Allocation::Fresh(slot)
    }

    /// Returns a slot to the free list.
    pub(crate) fn release(&mut self, slot: SlotId) {
        self.free.push_back(slot);
    }

    /// Undoes a failed allocation.
    ///
    /// A fresh slot whose append never materialized is handed back to the
    /// append point; anything else (the slot exists in the file but holds
    /// unknown bytes) goes to the free list.
    pub(crate) fn retract(&mut self, allocation: Allocation, materialized: bool) {
        match allocation {
            Allocation::Fresh(slot) if !materialized && slot.as_u64() + 1 == self.next_slot => {
                self.next_slot -= 1;
            }
            other => self.release(other.slot()),
        }
    }

    /// Returns the number of slots the file holds (live or free).
    pub(crate) const fn slot_count(&self) -> u64 {
        self.next_slot
    }

    /// Returns the number of reclaimed slots awaiting reuse.
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_are_sequential() {
        let mut alloc = SlotAllocator::default();

        assert_eq!(alloc.allocate(), Allocation::Fresh(SlotId::new(0)));
        assert_eq!(alloc.allocate(), Allocation::Fresh(SlotId::new(1)));
        assert_eq!(alloc.slot_count(), 2);
    }

    #[test]
    fn free_list_is_fifo() {
        let mut alloc = SlotAllocator::with_slot_count(5);

        alloc.release(SlotId::new(3));
        alloc.release(SlotId::new(1));

        assert_eq!(alloc.allocate(), Allocation::Reused(SlotId::new(3)));
        assert_eq!(alloc.allocate(), Allocation::Reused(SlotId::new(1)));
        // Free list drained, back to appending
        assert_eq!(alloc.allocate(), Allocation::Fresh(SlotId::new(5)));
    }

    #[test]
    fn reuse_preferred_over_append() {
        let mut alloc = SlotAllocator::with_slot_count(2);
        alloc.release(SlotId::new(0));

        assert_eq!(alloc.allocate(), Allocation::Reused(SlotId::new(0)));
        assert_eq!(alloc.slot_count(), 2);
    }

    #[test]
    fn retract_unmaterialized_fresh_slot() {
        let mut alloc = SlotAllocator::default();

        let allocation = alloc.allocate();
        alloc.retract(allocation, false);

        assert_eq!(alloc.slot_count(), 0);
        assert_eq!(alloc.allocate(), Allocation::Fresh(SlotId::new(0)));
    }

    #[test]
    fn retract_materialized_slot_goes_to_free_list() {
        let mut alloc = SlotAllocator::default();

        let allocation = alloc.allocate();
        alloc.retract(allocation, true);

        assert_eq!(alloc.slot_count(), 1);
        assert_eq!(alloc.free_count(), 1);
        assert_eq!(alloc.allocate(), Allocation::Reused(SlotId::new(0)));
    }

    #[test]
    fn retract_reused_slot_goes_to_free_list() {
        let mut alloc = SlotAllocator::with_slot_count(1);
        alloc.release(SlotId::new(0));

        let allocation = alloc.allocate();
        assert_eq!(allocation, Allocation::Reused(SlotId::new(0)));

        alloc.retract(allocation, true);
        assert_eq!(alloc.free_count(), 1);
    }
}
