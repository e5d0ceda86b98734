//! The shrinking alive-edge bitset.
//!
//! One bit per candidate edge, all alive at the start of an attempt, cleared
//! monotonically as trimming proves edges dead. Threads stride over 64-edge
//! blocks (`thread_id * 64`, stepping by `nthreads * 64`), so every word is
//! written by exactly one thread and kills need no cross-thread ordering;
//! relaxed atomics are used only to make the sharing expressible in safe
//! Rust, not to arbitrate contended writes.
//!
//! Storage is inverted (a set bit marks a *dead* edge) so the per-attempt
//! reset is a plain zero fill.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// ============================================================================
// AliveSet
// ============================================================================

/// Bitset over all edge nonces with per-thread live counters.
pub struct AliveSet {
    /// Dead-edge bits, one word per 64 nonces.
    bits: Box<[AtomicU64]>,
    /// Per-thread live-count deltas, padded to avoid false sharing.
    ///
    /// Thread 0's counter starts at the edge count; kills decrement the
    /// killing thread's own counter. The sum is exact between phases and at
    /// worst momentarily stale mid-pass, which is fine for the progress and
    /// load-threshold decisions it feeds.
    live: Box<[CachePadded<AtomicI64>]>,
    nedges: u64,
}

impl AliveSet {
    /// Creates a set of `nedges` edges killed by up to `nthreads` threads,
    /// initially all alive.
    pub fn new(nedges: u64, nthreads: usize) -> Self {
        debug_assert!(nedges % 64 == 0, "edge count must fill whole words");
        let words = (nedges / 64) as usize;
        let set = Self {
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            live: (0..nthreads)
                .map(|_| CachePadded::new(AtomicI64::new(0)))
                .collect(),
            nedges,
        };
        set.clear();
        set
    }

    /// Resets every edge to alive for a fresh attempt.
    pub fn clear(&self) {
        for w in self.bits.iter() {
            w.store(0, Ordering::Relaxed);
        }
        for (t, c) in self.live.iter().enumerate() {
            c.store(if t == 0 { self.nedges as i64 } else { 0 }, Ordering::Relaxed);
        }
    }

    /// Number of edges covered by the set.
    #[inline(always)]
    pub const fn nedges(&self) -> u64 {
        self.nedges
    }

    /// Marks an edge dead on behalf of `thread`. Idempotent: a second kill of
    /// the same nonce neither flips the bit back nor double-decrements.
    #[inline]
    pub fn kill(&self, nonce: u64, thread: usize) {
        let bit = 1u64 << (nonce % 64);
        let old = self.bits[(nonce / 64) as usize].fetch_or(bit, Ordering::Relaxed);
        if old & bit == 0 {
            self.live[thread].fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Whether an edge is still alive.
    #[inline]
    pub fn is_alive(&self, nonce: u64) -> bool {
        self.bits[(nonce / 64) as usize].load(Ordering::Relaxed) & (1u64 << (nonce % 64)) == 0
    }

    /// The 64-edge aliveness window containing `base` (bit i = alive), for
    /// bit-scan iteration instead of per-edge testing.
    #[inline]
    pub fn block(&self, base: u64) -> u64 {
        !self.bits[(base / 64) as usize].load(Ordering::Relaxed)
    }

    /// Total live edges, summed over the per-thread counters.
    pub fn live_count(&self) -> u64 {
        let sum: i64 = self.live.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        debug_assert!(sum >= 0, "live count went negative");
        sum.max(0) as u64
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn starts_all_alive() {
        let set = AliveSet::new(256, 2);
        assert_eq!(set.live_count(), 256);
        for n in 0..256 {
            assert!(set.is_alive(n));
        }
        assert_eq!(set.block(0), u64::MAX);
    }

    #[test]
    fn kill_clears_exactly_one_bit() {
        let set = AliveSet::new(128, 1);
        set.kill(70, 0);
        assert!(!set.is_alive(70));
        assert!(set.is_alive(69));
        assert!(set.is_alive(71));
        assert_eq!(set.live_count(), 127);
        assert_eq!(set.block(64), !(1u64 << 6));
    }

    #[test]
    fn kill_is_idempotent() {
        let set = AliveSet::new(64, 1);
        set.kill(3, 0);
        set.kill(3, 0);
        assert_eq!(set.live_count(), 63);
    }

    #[test]
    fn counters_are_per_thread_and_sum_exactly() {
        let set = AliveSet::new(256, 4);
        // Each thread kills inside its own striped words.
        set.kill(0, 0);
        set.kill(64 + 1, 1);
        set.kill(128 + 2, 2);
        set.kill(192 + 3, 3);
        assert_eq!(set.live_count(), 252);
    }

    #[test]
    fn live_count_is_monotonically_nonincreasing() {
        let set = AliveSet::new(1024, 1);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut prev = set.live_count();
        for _ in 0..500 {
            set.kill(rng.random_range(0..1024), 0);
            let now = set.live_count();
            assert!(now <= prev);
            prev = now;
        }
    }

    #[test]
    fn clear_revives_everything() {
        let set = AliveSet::new(128, 2);
        set.kill(5, 0);
        set.kill(64, 1);
        set.clear();
        assert_eq!(set.live_count(), 128);
        assert!(set.is_alive(5));
        assert!(set.is_alive(64));
    }

    #[test]
    fn block_iteration_visits_exactly_the_live_edges() {
        let set = AliveSet::new(128, 1);
        for n in [1u64, 3, 64, 100] {
            set.kill(n, 0);
        }
        let mut seen = Vec::new();
        let mut base = 0;
        while base < 128 {
            let mut window = set.block(base);
            while window != 0 {
                let bit = u64::from(window.trailing_zeros());
                window &= window - 1;
                seen.push(base + bit);
            }
            base += 64;
        }
        assert_eq!(seen.len(), 124);
        for n in [1u64, 3, 64, 100] {
            assert!(!seen.contains(&n));
        }
    }
}
