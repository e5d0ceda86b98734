//! The compact parent-pointer forest table.
//!
//! After trimming converges, the scratch arena is re-zeroed and viewed as an
//! open-addressed map from node to parent node, used to grow a spanning
//! forest over surviving edges and detect cycles by path collision. A slot
//! packs the owning node's compressed key above its parent:
//!
//! ```text
//! slot = key(u) << node_bits | parent(u)
//! ```
//!
//! Probing is linear from the node's home slot `u >> idx_shift`; the geometry
//! guarantees (and [`crate::params::Params`] validates) that a node survives
//! key compression intact, so a key match identifies the node exactly. The
//! load threshold enforced after trimming keeps probe chains far below
//! `max_drift`. Slot value 0 means empty, which is why node 0 is reserved as
//! the "no parent" sentinel and never inserted.
//!
//! Inserts claim empty slots with compare-exchange, so concurrent searchers
//! in lock-light mode cannot tear an entry; a race can still interleave two
//! logically conflicting attaches, which at worst loses a cycle for this
//! attempt (never reports a wrong one).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::params::Params;

// ============================================================================
// ForestTable
// ============================================================================

/// View of the scratch arena as the node -> parent table.
pub struct ForestTable<'a> {
    slots: &'a [AtomicU64],
    node_bits: u32,
    node_mask: u64,
    key_mask: u64,
    idx_shift: u32,
    /// `capacity - 1`; capacity is a power of two.
    index_mask: u64,
    max_drift: u64,
}

impl<'a> ForestTable<'a> {
    /// Wraps the scratch words for the cycle-search phase.
    #[inline]
    pub fn new(params: &Params, slots: &'a [AtomicU64]) -> Self {
        debug_assert_eq!(slots.len() as u64, params.forest_capacity());
        Self {
            slots,
            node_bits: params.node_bits(),
            node_mask: params.node_mask(),
            key_mask: params.key_mask(),
            idx_shift: params.idx_shift(),
            index_mask: params.forest_capacity() - 1,
            max_drift: params.max_drift(),
        }
    }

    /// Zeroes the table. Called by one thread between barriers, after the
    /// degree map's last use of the arena.
    pub fn clear(&self) {
        for s in self.slots {
            s.store(0, Ordering::Relaxed);
        }
    }

    /// Table capacity in slots.
    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.index_mask + 1
    }

    /// Records `v` as the parent of `u`, claiming the first free probe slot
    /// or updating `u`'s existing entry.
    ///
    /// A full probe ring without a match drops the attach: the load threshold
    /// makes that unreachable in practice, and a lost attach only prunes this
    /// attempt's forest, it cannot corrupt it.
    pub fn attach(&self, u: u64, v: u64) {
        debug_assert!(u != 0, "node 0 is the empty sentinel");
        let entry = (u << self.node_bits) | v;
        let mut ui = (u >> self.idx_shift) & self.index_mask;
        for _ in 0..=self.index_mask {
            match self.slots[ui as usize].compare_exchange(
                0,
                entry,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(old) => {
                    if (old >> self.node_bits) == (u & self.key_mask) {
                        self.slots[ui as usize].store(entry, Ordering::Relaxed);
                        return;
                    }
                }
            }
            ui = (ui + 1) & self.index_mask;
        }
        debug_assert!(false, "forest table full during attach");
    }

    /// Parent of `u`, or 0 if `u` is a root (no entry).
    pub fn parent(&self, u: u64) -> u64 {
        let home = (u >> self.idx_shift) & self.index_mask;
        let mut ui = home;
        for _ in 0..=self.index_mask {
            let cu = self.slots[ui as usize].load(Ordering::Relaxed);
            if cu == 0 {
                return 0;
            }
            if (cu >> self.node_bits) == (u & self.key_mask) {
                debug_assert!(
                    ((ui.wrapping_sub(home)) & self.index_mask) < self.max_drift,
                    "probe drift exceeded max_drift"
                );
                return cu & self.node_mask;
            }
            ui = (ui + 1) & self.index_mask;
        }
        0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;

    fn arena(params: &Params) -> Vec<AtomicU64> {
        (0..params.forest_capacity()).map(|_| AtomicU64::new(0)).collect()
    }

    #[test]
    fn empty_table_reports_roots() {
        let params = Params::new(10, 0, 4).unwrap();
        let slots = arena(&params);
        let table = ForestTable::new(&params, &slots);
        for u in [1u64, 2, 777, params.node_mask()] {
            assert_eq!(table.parent(u), 0);
        }
    }

    #[test]
    fn attach_then_lookup() {
        let params = Params::new(10, 0, 4).unwrap();
        let slots = arena(&params);
        let table = ForestTable::new(&params, &slots);
        table.attach(100, 7);
        assert_eq!(table.parent(100), 7);
        assert_eq!(table.parent(101), 0);
    }

    #[test]
    fn attach_updates_existing_entry() {
        let params = Params::new(10, 0, 4).unwrap();
        let slots = arena(&params);
        let table = ForestTable::new(&params, &slots);
        table.attach(100, 7);
        table.attach(100, 9);
        assert_eq!(table.parent(100), 9);
    }

    #[test]
    fn colliding_home_slots_probe_linearly() {
        let params = Params::new(10, 0, 4).unwrap();
        let slots = arena(&params);
        let table = ForestTable::new(&params, &slots);
        // idx_shift = 6, so nodes 64..127 share home slot 1.
        table.attach(64, 3);
        table.attach(65, 5);
        table.attach(66, 9);
        assert_eq!(table.parent(64), 3);
        assert_eq!(table.parent(65), 5);
        assert_eq!(table.parent(66), 9);
        assert_eq!(table.parent(67), 0);
    }

    #[test]
    fn clear_empties_the_table() {
        let params = Params::new(10, 0, 4).unwrap();
        let slots = arena(&params);
        let table = ForestTable::new(&params, &slots);
        table.attach(12, 34);
        table.clear();
        assert_eq!(table.parent(12), 0);
    }

    #[test]
    fn parents_round_trip_through_key_compression() {
        let params = Params::new(12, 0, 4).unwrap();
        let slots = arena(&params);
        let table = ForestTable::new(&params, &slots);
        // Spread nodes across the whole node space (8191 is prime, so the
        // multiples are distinct); each must come back with its own parent
        // despite key compression and probing.
        let pairs: Vec<(u64, u64)> = (1..100u64)
            .map(|i| (i * 37 % params.node_mask() + 1, i))
            .collect();
        for &(u, v) in &pairs {
            table.attach(u, v);
        }
        for &(u, v) in &pairs {
            assert_eq!(table.parent(u), v, "node {u}");
        }
    }
}
