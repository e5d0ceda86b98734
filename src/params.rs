//! Graph geometry: edge/node spaces, partitioning, and derived table sizes.
//!
//! The original lean miner fixes all of these at compile time (EDGEBITS,
//! PART_BITS, IDXSHIFT, PROOFSIZE). Here they are runtime values so tests can
//! instantiate tiny graphs (e.g. `edge_bits = 10`) next to production-sized
//! ones, with every derived quantity computed once and validated up front.

use crate::{Error, Result};

// ============================================================================
// Params
// ============================================================================

/// Validated graph geometry for one solver instance.
///
/// The graph has `2^edge_bits` candidate edges. Each edge nonce hashes to one
/// endpoint in each bipartition; node ids are the masked hash doubled with a
/// side bit, so u-side nodes are even, v-side odd, and node 0 is reserved as
/// the forest's "no parent" sentinel.
///
/// `part_bits` splits each side's node space into `2^part_bits` partitions
/// trimmed separately, shrinking the degree map at the cost of extra passes.
///
/// The central sizing invariant, that the forest table occupies exactly the
/// bytes of the degree map (the two are never live in the same phase), is
/// checked in [`Params::new`] and never re-derived elsewhere:
///
/// ```text
/// forest slots (u64) = nedges >> (idx_shift - 1)
/// degree words (u64) = 2 * (nedges >> part_bits) / 64
/// idx_shift = part_bits + 6  makes these equal
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    edge_bits: u32,
    part_bits: u32,
    proof_size: usize,
    // Derived.
    nedges: u64,
    edge_mask: u64,
    node_bits: u32,
    node_mask: u64,
    part_mask: u64,
    idx_shift: u32,
    key_mask: u64,
    max_drift: u64,
    forest_capacity: u64,
    max_path_len: usize,
}

impl Params {
    /// Builds and validates geometry for a `2^edge_bits`-edge graph.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParams`] if the geometry is degenerate:
    /// `edge_bits` outside `[6, 31]`, too few node bits left over for probe
    /// drift or key compression, a degree map smaller than one word, or an
    /// odd / too-small `proof_size`.
    pub fn new(edge_bits: u32, part_bits: u32, proof_size: usize) -> Result<Self> {
        if !(6..=31).contains(&edge_bits) {
            return Err(Error::InvalidParams(format!(
                "edge_bits must be in [6, 31], got {edge_bits}"
            )));
        }
        if proof_size < 2 || proof_size % 2 != 0 {
            return Err(Error::InvalidParams(format!(
                "proof_size must be even and >= 2, got {proof_size}"
            )));
        }

        let node_bits = edge_bits + 1;
        let idx_shift = part_bits + 6;
        let key_bits = 64 - node_bits;

        // One u64 word holds 32 two-bit counters; each partition must fill at
        // least one word.
        if edge_bits < part_bits + 5 {
            return Err(Error::InvalidParams(format!(
                "part_bits {part_bits} too large for edge_bits {edge_bits}"
            )));
        }
        // Key compression stores the low `key_bits` of a node above its
        // parent; every node must survive that truncation intact.
        if node_bits > key_bits {
            return Err(Error::InvalidParams(format!(
                "node_bits {node_bits} exceeds key_bits {key_bits}"
            )));
        }
        if key_bits <= idx_shift {
            return Err(Error::InvalidParams(format!(
                "no probe-drift headroom: key_bits {key_bits} <= idx_shift {idx_shift}"
            )));
        }

        let nedges = 1u64 << edge_bits;
        let edge_mask = nedges - 1;
        let forest_capacity = nedges >> (idx_shift - 1);
        let degree_words = (2 * (nedges >> part_bits)) / 64;

        // The overlay of the forest table onto the degree map's storage is
        // only sound if the two layouts occupy identical word counts.
        if forest_capacity != degree_words {
            return Err(Error::InvalidParams(format!(
                "sizing identity violated: {forest_capacity} forest slots vs \
                 {degree_words} degree words"
            )));
        }

        Ok(Self {
            edge_bits,
            part_bits,
            proof_size,
            nedges,
            edge_mask,
            node_bits,
            node_mask: (edge_mask << 1) | 1,
            part_mask: (1u64 << part_bits) - 1,
            idx_shift,
            key_mask: (1u64 << key_bits) - 1,
            max_drift: 1u64 << (key_bits - idx_shift),
            forest_capacity,
            // Paths grow with the cube root of the node count and are hardly
            // affected by trimming.
            max_path_len: 8usize << (node_bits / 3),
        })
    }

    /// Number of edge bits; the graph has `2^edge_bits` candidate edges.
    #[inline(always)]
    pub const fn edge_bits(&self) -> u32 {
        self.edge_bits
    }

    /// Number of node-space partition bits.
    #[inline(always)]
    pub const fn part_bits(&self) -> u32 {
        self.part_bits
    }

    /// Target cycle length in edges.
    #[inline(always)]
    pub const fn proof_size(&self) -> usize {
        self.proof_size
    }

    /// Number of candidate edges, `2^edge_bits`.
    #[inline(always)]
    pub const fn nedges(&self) -> u64 {
        self.nedges
    }

    /// Mask selecting a masked endpoint hash, `nedges - 1`.
    #[inline(always)]
    pub const fn edge_mask(&self) -> u64 {
        self.edge_mask
    }

    /// Bits in a full node id (`edge_bits + 1`, for the side bit).
    #[inline(always)]
    pub const fn node_bits(&self) -> u32 {
        self.node_bits
    }

    /// Mask selecting a full node id.
    #[inline(always)]
    pub const fn node_mask(&self) -> u64 {
        self.node_mask
    }

    /// Mask selecting the partition of a masked endpoint hash.
    #[inline(always)]
    pub const fn part_mask(&self) -> u64 {
        self.part_mask
    }

    /// Right shift taking a node id to its home forest slot.
    #[inline(always)]
    pub const fn idx_shift(&self) -> u32 {
        self.idx_shift
    }

    /// Mask selecting the compressed key bits of a node id.
    #[inline(always)]
    pub const fn key_mask(&self) -> u64 {
        self.key_mask
    }

    /// Maximum legal linear-probe distance in the forest table.
    #[inline(always)]
    pub const fn max_drift(&self) -> u64 {
        self.max_drift
    }

    /// Forest-table capacity in u64 slots; by the sizing identity this is
    /// also the degree map's size in u64 words.
    #[inline(always)]
    pub const fn forest_capacity(&self) -> u64 {
        self.forest_capacity
    }

    /// Cap on parent-pointer walk length; exceeding it means corruption.
    #[inline(always)]
    pub const fn max_path_len(&self) -> usize {
        self.max_path_len
    }

    /// Combines a masked endpoint hash and a side selector into a node id.
    ///
    /// u-side nodes are even, v-side odd; `0` (u-side hash 0) is the reserved
    /// sentinel and edges producing it are skipped during cycle search.
    #[inline(always)]
    pub const fn node_id(&self, masked_hash: u64, side: u64) -> u64 {
        (masked_hash << 1) | side
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_identity_holds_across_geometries() {
        for edge_bits in [10, 12, 16, 20, 27, 31] {
            for part_bits in 0..=2 {
                let p = Params::new(edge_bits, part_bits, 42).unwrap();
                let degree_words = (2 * (p.nedges() >> part_bits)) / 64;
                assert_eq!(p.forest_capacity(), degree_words);
            }
        }
    }

    #[test]
    fn derived_values_match_hand_computation() {
        // edge_bits=10, part_bits=0: 1024 edges, 2048 nodes, 32-slot table.
        let p = Params::new(10, 0, 4).unwrap();
        assert_eq!(p.nedges(), 1024);
        assert_eq!(p.edge_mask(), 1023);
        assert_eq!(p.node_bits(), 11);
        assert_eq!(p.node_mask(), 2047);
        assert_eq!(p.idx_shift(), 6);
        assert_eq!(p.forest_capacity(), 32);
        assert_eq!(p.key_mask(), (1u64 << 53) - 1);
        assert_eq!(p.max_drift(), 1u64 << 47);
        assert_eq!(p.max_path_len(), 8 << 3);
    }

    #[test]
    fn rejects_odd_or_tiny_proof_size() {
        assert!(Params::new(10, 0, 3).is_err());
        assert!(Params::new(10, 0, 0).is_err());
        assert!(Params::new(10, 0, 2).is_ok());
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(Params::new(5, 0, 4).is_err()); // edge_bits too small
        assert!(Params::new(32, 0, 4).is_err()); // edge_bits too large
        assert!(Params::new(10, 6, 4).is_err()); // partition swallows the map
    }

    #[test]
    fn node_id_keeps_sides_disjoint() {
        let p = Params::new(10, 0, 4).unwrap();
        assert_eq!(p.node_id(0, 0), 0); // the sentinel
        assert_eq!(p.node_id(0, 1), 1);
        assert_eq!(p.node_id(p.edge_mask(), 0), p.node_mask() - 1);
        assert_eq!(p.node_id(p.edge_mask(), 1), p.node_mask());
    }
}
