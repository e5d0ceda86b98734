//! Saturating 2-bit node-degree counters.
//!
//! A phase-scoped view over the shared scratch arena, live only during
//! trimming. Each node of the side/partition being trimmed gets a two-bit
//! code: 0 = unseen, 1 = degree exactly one so far, 2+ = non-leaf for the
//! rest of the round. Callers pass node indices already reduced by the
//! partition shift, so a word packs 32 consecutive reduced nodes.
//!
//! Concurrent bumps of the same node from different threads race benignly:
//! the OR-based update can at worst leave a node that reached degree two
//! looking like degree one, which keeps one trimmable edge alive for a later
//! round. It can never make a leaf look like a non-leaf on the kill side of
//! the same round, because kills only read codes written in the preceding,
//! barrier-separated degree pass.

use std::sync::atomic::{AtomicU64, Ordering};

/// Reduced nodes per scratch word (two bits each).
const NODES_PER_WORD: u64 = 32;

// ============================================================================
// DegreeMap
// ============================================================================

/// View of the scratch arena as an array of 2-bit saturating counters.
pub struct DegreeMap<'a> {
    words: &'a [AtomicU64],
}

impl<'a> DegreeMap<'a> {
    /// Wraps the scratch words for one (round, side, partition) pass.
    #[inline]
    pub fn new(words: &'a [AtomicU64]) -> Self {
        Self { words }
    }

    /// Zeroes every counter. Called by one thread between barriers, never
    /// concurrently with bumps or tests.
    pub fn clear(&self) {
        for w in self.words {
            w.store(0, Ordering::Relaxed);
        }
    }

    /// Pulls the counter word for `node` toward the cache ahead of a
    /// [`bump`](Self::bump) or [`is_nonleaf`](Self::is_nonleaf).
    ///
    /// The crate forbids unsafe code, so instead of a prefetch intrinsic this
    /// issues a discarded relaxed load, which equally brings the line in.
    #[inline(always)]
    pub fn prefetch(&self, node: u64) {
        let _ = self.words[(node / NODES_PER_WORD) as usize].load(Ordering::Relaxed);
    }

    /// Saturating increment of `node`'s degree code: 0 -> 1 -> 2-and-stays.
    #[inline]
    pub fn bump(&self, node: u64) {
        let word = &self.words[(node / NODES_PER_WORD) as usize];
        let bit = 1u64 << (2 * (node % NODES_PER_WORD));
        let old = word.fetch_or(bit, Ordering::Relaxed);
        if old & bit != 0 {
            word.fetch_or(bit << 1, Ordering::Relaxed);
        }
    }

    /// Whether `node` has been bumped at least twice this pass.
    ///
    /// An alive edge whose endpoint fails this test has degree exactly one
    /// (its own bump) and is safe to kill.
    #[inline]
    pub fn is_nonleaf(&self, node: u64) -> bool {
        let word = self.words[(node / NODES_PER_WORD) as usize].load(Ordering::Relaxed);
        (word >> (2 * (node % NODES_PER_WORD))) & 2 != 0
    }
}

// ============================================================================
// Tests
// ============================================================================
