//! The shared solver context: configuration, graph state, phase
//! synchronization, and the solution buffer.
//!
//! One context serves one attempt (header + nonce) at a time. Workers borrow
//! it immutably and coordinate exclusively through its barrier, its latched
//! stop flag, and the partitioned-by-construction shared structures it owns.
//! Between attempts the caller holds the context exclusively and resets it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Barrier, Mutex};

use log::{info, warn};

use crate::alive::AliveSet;
use crate::degree::DegreeMap;
use crate::forest::ForestTable;
use crate::params::Params;
use crate::sip::{NodeHasher, SipKeys, SIP_BATCH};
use crate::{Error, Result};

/// Hashes kept in flight ahead of their structural operation, so the counter
/// or table word for each endpoint is prefetched well before it is touched.
const NPREFETCH: usize = 32;

/// Ring depth in whole hash batches.
const RING: usize = NPREFETCH / SIP_BATCH;

// ============================================================================
// Configuration
// ============================================================================

/// Solver configuration, fixed at context construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolverConfig {
    /// Worker threads in the pool. Every worker must call
    /// [`crate::worker::worker`] exactly once per attempt.
    pub nthreads: usize,
    /// Trimming rounds before cycle search. The original derivation is
    /// `1 + (part_bits + 3) * (part_bits + 4) / 2`; 7 suits `part_bits = 0`.
    pub ntrims: usize,
    /// Maximum solutions to collect before workers stop searching.
    pub max_sols: usize,
    /// Abort the attempt if live edges reach this percentage of forest-table
    /// capacity after trimming.
    pub max_load_pct: u64,
    /// Restrict cycle search to thread 0.
    ///
    /// The default lock-light mode searches on all threads with
    /// compare-exchange inserts; rare insert races can cost a cycle, which a
    /// retried nonce absorbs. Single-threaded mode trades that throughput for
    /// a race-free forest.
    pub single_threaded_search: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            nthreads: 1,
            ntrims: 7,
            max_sols: 8,
            max_load_pct: 90,
            single_threaded_search: false,
        }
    }
}

// ============================================================================
// Solutions
// ============================================================================

/// One discovered cycle: the edge nonces whose endpoints close a cycle of
/// exactly the target length in the keyed graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    /// The `proof_size` edge nonces, in ascending nonce order (the extraction
    /// scan visits edges in order).
    pub nonces: Vec<u64>,
}

/// Why an attempt stopped before completing cycle search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// The external running flag went false.
    Cancelled,
    /// Trimming left the graph over the load threshold.
    TooDense,
}

const STOP_NONE: u8 = 0;
const STOP_CANCELLED: u8 = 1;
const STOP_DENSE: u8 = 2;

// ============================================================================
// SolverContext
// ============================================================================

/// Shared state for one solver instance.
///
/// Generic over the endpoint hasher so tests can plant known graphs; callers
/// use the default [`SipKeys`] instantiation.
pub struct SolverContext<H: NodeHasher = SipKeys> {
    params: Params,
    cfg: SolverConfig,
    hasher: H,
    alive: AliveSet,
    /// The scratch arena: degree counters during trimming, forest slots
    /// during cycle search. The sizing identity validated by [`Params`] makes
    /// one buffer exactly fit both; the phase structure (all threads pass the
    /// post-trimming barrier before the first attach) keeps the two views
    /// from ever being live together.
    scratch: Box<[AtomicU64]>,
    barrier: Barrier,
    stop: AtomicU8,
    nsols: AtomicUsize,
    sols: Mutex<Vec<Solution>>,
}

impl SolverContext<SipKeys> {
    /// Creates a context using the production SipHash edge generator.
    ///
    /// Keys are all-zero until [`Self::set_header_nonce`] seeds an attempt.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParams`] for an unusable configuration.
    pub fn new(params: Params, cfg: SolverConfig) -> Result<Self> {
        Self::with_hasher(params, cfg, SipKeys::default())
    }

    /// Seeds an attempt: writes `nonce` into the trailing four header bytes,
    /// derives the sip keys, and resets all per-attempt state.
    ///
    /// # Errors
    /// Returns [`Error::HeaderTooShort`] if the header cannot hold the nonce.
    pub fn set_header_nonce(&mut self, header: &mut [u8], nonce: u32) -> Result<()> {
        self.hasher = SipKeys::from_header_nonce(header, nonce)?;
        self.reset();
        Ok(())
    }
}

impl<H: NodeHasher> SolverContext<H> {
    /// Creates a context with an explicit hasher (tests plant graphs here).
    ///
    /// # Errors
    /// Returns [`Error::InvalidParams`] for an unusable configuration.
    pub fn with_hasher(params: Params, cfg: SolverConfig, hasher: H) -> Result<Self> {
        if cfg.nthreads == 0 {
            return Err(Error::InvalidParams("nthreads must be >= 1".into()));
        }
        if cfg.ntrims == 0 {
            return Err(Error::InvalidParams("ntrims must be >= 1".into()));
        }
        if cfg.max_sols == 0 {
            return Err(Error::InvalidParams("max_sols must be >= 1".into()));
        }
        if !(1..=100).contains(&cfg.max_load_pct) {
            return Err(Error::InvalidParams(format!(
                "max_load_pct must be in [1, 100], got {}",
                cfg.max_load_pct
            )));
        }
        let capacity = params.forest_capacity() as usize;
        Ok(Self {
            params,
            cfg,
            hasher,
            alive: AliveSet::new(params.nedges(), cfg.nthreads),
            scratch: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            barrier: Barrier::new(cfg.nthreads),
            stop: AtomicU8::new(STOP_NONE),
            nsols: AtomicUsize::new(0),
            sols: Mutex::new(Vec::new()),
        })
    }

    /// Resets per-attempt state: every edge alive, no solutions, stop latch
    /// rearmed. Exclusive access guarantees no worker is mid-attempt.
    pub fn reset(&mut self) {
        self.alive.clear();
        self.stop.store(STOP_NONE, Ordering::Relaxed);
        self.nsols.store(0, Ordering::Relaxed);
        self.sols.lock().expect("solution buffer poisoned").clear();
    }

    /// Graph geometry.
    #[inline(always)]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Solver configuration.
    #[inline(always)]
    pub fn config(&self) -> &SolverConfig {
        &self.cfg
    }

    /// The endpoint hasher for the current attempt.
    #[inline(always)]
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// The alive-edge set.
    #[inline(always)]
    pub fn alive(&self) -> &AliveSet {
        &self.alive
    }

    /// Blocks until every worker thread has arrived.
    #[inline]
    pub(crate) fn sync(&self) {
        self.barrier.wait();
    }

    /// The scratch arena viewed as degree counters (trimming phase only).
    #[inline]
    pub(crate) fn degree_map(&self) -> DegreeMap<'_> {
        DegreeMap::new(&self.scratch)
    }

    /// The scratch arena viewed as the forest table (search phase only).
    #[inline]
    pub(crate) fn forest(&self) -> ForestTable<'_> {
        ForestTable::new(&self.params, &self.scratch)
    }

    /// Latches a stop reason; the first latch wins.
    pub(crate) fn latch_stop(&self, reason: StopReason) {
        let code = match reason {
            StopReason::Cancelled => STOP_CANCELLED,
            StopReason::TooDense => STOP_DENSE,
        };
        let _ = self
            .stop
            .compare_exchange(STOP_NONE, code, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// The latched stop reason, if any.
    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        match self.stop.load(Ordering::Relaxed) {
            STOP_CANCELLED => Some(StopReason::Cancelled),
            STOP_DENSE => Some(StopReason::TooDense),
            _ => None,
        }
    }

    /// Number of committed solutions.
    #[inline]
    pub fn num_solutions(&self) -> usize {
        self.nsols.load(Ordering::Relaxed)
    }

    /// Whether the solution buffer has reached its cap.
    #[inline]
    pub(crate) fn solutions_full(&self) -> bool {
        self.num_solutions() >= self.cfg.max_sols
    }

    /// Snapshot of the committed solutions.
    pub fn solutions(&self) -> Vec<Solution> {
        self.sols.lock().expect("solution buffer poisoned").clone()
    }

    // ------------------------------------------------------------------------
    // Trimming passes
    // ------------------------------------------------------------------------

    /// Degree pass: bump the active-side endpoint of every alive edge in
    /// thread `id`'s stripe that falls in `part`.
    pub(crate) fn count_node_deg(&self, id: usize, side: u64, part: u64) {
        let deg = self.degree_map();
        let edge_mask = self.params.edge_mask();
        let part_mask = self.params.part_mask();
        let part_bits = self.params.part_bits();
        self.hashed_stripe(
            id,
            side,
            |hash| {
                let u = hash & edge_mask;
                if u & part_mask == part {
                    deg.prefetch(u >> part_bits);
                }
            },
            |_, hash| {
                let u = hash & edge_mask;
                // The masked-zero endpoint is the forest sentinel's preimage;
                // it takes no part in degree accounting.
                if u != 0 && u & part_mask == part {
                    deg.bump(u >> part_bits);
                }
            },
        );
    }

    /// Kill pass: clear every alive edge in thread `id`'s stripe whose
    /// active-side endpoint is a leaf under the degree codes of the
    /// just-finished degree pass.
    pub(crate) fn kill_leaf_edges(&self, id: usize, side: u64, part: u64) {
        let deg = self.degree_map();
        let edge_mask = self.params.edge_mask();
        let part_mask = self.params.part_mask();
        let part_bits = self.params.part_bits();
        self.hashed_stripe(
            id,
            side,
            |hash| {
                let u = hash & edge_mask;
                if u & part_mask == part {
                    deg.prefetch(u >> part_bits);
                }
            },
            |index, hash| {
                let u = hash & edge_mask;
                if u != 0 && u & part_mask == part && !deg.is_nonleaf(u >> part_bits) {
                    self.alive.kill(index >> 1, id);
                }
            },
        );
    }

    /// Drives the batched-hash pipeline over thread `id`'s stripe of alive
    /// edges on one side.
    ///
    /// Indices (`2 * nonce + side`) are gathered into batches of
    /// [`SIP_BATCH`]; each freshly hashed batch is announced to `prefetch`
    /// immediately, then sits in a ring of [`RING`] batches before `visit`
    /// consumes it, so roughly [`NPREFETCH`] endpoint words are in flight
    /// between the cache hint and the dependent access.
    fn hashed_stripe<P, F>(&self, id: usize, side: u64, prefetch: P, mut visit: F)
    where
        P: Fn(u64),
        F: FnMut(u64, u64),
    {
        #[derive(Clone, Copy)]
        struct Batch {
            indices: [u64; SIP_BATCH],
            hashes: [u64; SIP_BATCH],
            len: usize,
        }
        const EMPTY: Batch = Batch {
            indices: [0; SIP_BATCH],
            hashes: [0; SIP_BATCH],
            len: 0,
        };

        let nedges = self.params.nedges();
        let stride = 64 * self.cfg.nthreads as u64;
        let mut ring = [EMPTY; RING];
        let mut slot = 0usize;
        let mut cur = [0u64; SIP_BATCH];
        let mut cur_len = 0usize;

        let mut base = 64 * id as u64;
        while base < nedges {
            let mut window = self.alive.block(base);
            while window != 0 {
                let bit = u64::from(window.trailing_zeros());
                window &= window - 1;
                cur[cur_len] = 2 * (base + bit) + side;
                cur_len += 1;
                if cur_len == SIP_BATCH {
                    let retired = ring[slot];
                    for i in 0..retired.len {
                        visit(retired.indices[i], retired.hashes[i]);
                    }
                    let hashes = self.hasher.hash_batch(&cur);
                    for &h in &hashes {
                        prefetch(h);
                    }
                    ring[slot] = Batch {
                        indices: cur,
                        hashes,
                        len: SIP_BATCH,
                    };
                    slot = (slot + 1) % RING;
                    cur_len = 0;
                }
            }
            base += stride;
        }

        // Drain: retire ring batches oldest-first, then the partial batch.
        for i in 0..RING {
            let b = ring[(slot + i) % RING];
            for j in 0..b.len {
                visit(b.indices[j], b.hashes[j]);
            }
        }
        if cur_len > 0 {
            let hashes = self.hasher.hash_batch(&cur);
            for j in 0..cur_len {
                visit(cur[j], hashes[j]);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Solution extraction
    // ------------------------------------------------------------------------

    /// Materializes a proof-length cycle from the two divergence-truncated
    /// paths plus the closing edge, and commits it if the buffer has room.
    ///
    /// `us`/`vs` hold the paths from the closing edge's endpoints; `nu`/`nv`
    /// index the first node the two paths share (the common tail up to the
    /// root is already trimmed off). Returns whether a solution was committed: a
    /// rescan that does not produce exactly `proof_size` matching edges is an
    /// internal inconsistency and drops the candidate with a warning.
    pub(crate) fn record_solution(&self, us: &[u64], nu: usize, vs: &[u64], nv: usize) -> bool {
        let proof_size = self.params.proof_size();

        // Tree edges as (u-side node, v-side node): path nodes alternate
        // sides, with u-side nodes at even positions of `us` and odd
        // positions of `vs`.
        let mut cycle: HashSet<(u64, u64)> = HashSet::with_capacity(proof_size + 1);
        cycle.insert((us[0], vs[0]));
        for i in (0..nu).rev() {
            cycle.insert((us[(i + 1) & !1], us[i | 1]));
        }
        for i in (0..nv).rev() {
            cycle.insert((vs[i | 1], vs[(i + 1) & !1]));
        }

        let params = &self.params;
        let mut nonces = Vec::with_capacity(proof_size);
        let mut base = 0u64;
        while base < params.nedges() {
            let mut window = self.alive.block(base);
            while window != 0 {
                let bit = u64::from(window.trailing_zeros());
                window &= window - 1;
                let nonce = base + bit;
                let e = (
                    self.hasher.node(params, nonce, 0),
                    self.hasher.node(params, nonce, 1),
                );
                if cycle.contains(&e) {
                    nonces.push(nonce);
                    if proof_size > 2 {
                        // A 2-cycle legitimately reuses one (u, v) pair.
                        cycle.remove(&e);
                    }
                }
            }
            base += 64;
        }

        if nonces.len() != proof_size {
            warn!(
                "dropping solution candidate: rescan matched {} edges, expected {}",
                nonces.len(),
                proof_size
            );
            return false;
        }

        let mut sols = self.sols.lock().expect("solution buffer poisoned");
        if sols.len() >= self.cfg.max_sols {
            return false;
        }
        info!("solution {}: nonces {:?}", sols.len(), nonces);
        sols.push(Solution { nonces });
        self.nsols.store(sols.len(), Ordering::Relaxed);
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        let params = Params::new(10, 0, 4).unwrap();
        let bad = |cfg: SolverConfig| SolverContext::new(params, cfg).is_err();
        assert!(bad(SolverConfig {
            nthreads: 0,
            ..Default::default()
        }));
        assert!(bad(SolverConfig {
            ntrims: 0,
            ..Default::default()
        }));
        assert!(bad(SolverConfig {
            max_sols: 0,
            ..Default::default()
        }));
        assert!(bad(SolverConfig {
            max_load_pct: 0,
            ..Default::default()
        }));
        assert!(SolverContext::new(params, SolverConfig::default()).is_ok());
    }

    #[test]
    fn scratch_is_sized_by_the_identity() {
        let params = Params::new(12, 1, 4).unwrap();
        let ctx = SolverContext::new(params, SolverConfig::default()).unwrap();
        assert_eq!(ctx.scratch.len() as u64, params.forest_capacity());
    }

    #[test]
    fn set_header_nonce_resets_state() {
        let params = Params::new(10, 0, 4).unwrap();
        let mut ctx = SolverContext::new(params, SolverConfig::default()).unwrap();
        ctx.alive().kill(3, 0);
        ctx.latch_stop(StopReason::Cancelled);
        let mut header = vec![0u8; 40];
        ctx.set_header_nonce(&mut header, 7).unwrap();
        assert_eq!(ctx.alive().live_count(), params.nedges());
        assert!(ctx.stop_reason().is_none());
        assert_eq!(ctx.num_solutions(), 0);
    }

    #[test]
    fn stop_latch_keeps_first_reason() {
        let params = Params::new(10, 0, 4).unwrap();
        let ctx = SolverContext::new(params, SolverConfig::default()).unwrap();
        assert!(ctx.stop_reason().is_none());
        ctx.latch_stop(StopReason::TooDense);
        ctx.latch_stop(StopReason::Cancelled);
        assert_eq!(ctx.stop_reason(), Some(StopReason::TooDense));
    }

    #[test]
    fn degree_pass_counts_every_alive_edge_once() {
        // One thread, no partitioning: after a degree pass, the code of each
        // endpoint must match a brute-force count over all edges.
        let params = Params::new(10, 0, 4).unwrap();
        let ctx = SolverContext::new(params, SolverConfig::default()).unwrap();
        ctx.count_node_deg(0, 0, 0);

        let deg = ctx.degree_map();
        let mut brute = std::collections::HashMap::new();
        for nonce in 0..params.nedges() {
            let u = ctx.hasher().hash(2 * nonce) & params.edge_mask();
            if u != 0 {
                *brute.entry(u).or_insert(0u32) += 1;
            }
        }
        for node in 1..params.nedges() {
            let expected = brute.get(&node).copied().unwrap_or(0) >= 2;
            assert_eq!(deg.is_nonleaf(node), expected, "node {node}");
        }
    }

    #[test]
    fn kill_pass_removes_exactly_the_leaves() {
        let params = Params::new(10, 0, 4).unwrap();
        let ctx = SolverContext::new(params, SolverConfig::default()).unwrap();

        // Brute-force the u-side degree of every edge's endpoint.
        let mut degree = std::collections::HashMap::new();
        for nonce in 0..params.nedges() {
            let u = ctx.hasher().hash(2 * nonce) & params.edge_mask();
            *degree.entry(u).or_insert(0u32) += 1;
        }

        ctx.count_node_deg(0, 0, 0);
        ctx.kill_leaf_edges(0, 0, 0);

        for nonce in 0..params.nedges() {
            let u = ctx.hasher().hash(2 * nonce) & params.edge_mask();
            let expect_alive = u == 0 || degree[&u] >= 2;
            assert_eq!(
                ctx.alive().is_alive(nonce),
                expect_alive,
                "nonce {nonce} endpoint {u}"
            );
        }
    }

    #[test]
    fn partitioned_passes_cover_the_full_node_space() {
        // part_bits = 1: the u-side is trimmed in two passes, odd and even
        // endpoints. Partitioning must not change which edges die: an
        // endpoint's partition is a function of the endpoint, so per-part
        // degrees equal global degrees.
        let params = Params::new(10, 1, 4).unwrap();
        let ctx = SolverContext::new(params, SolverConfig::default()).unwrap();

        let mut degree = std::collections::HashMap::new();
        for nonce in 0..params.nedges() {
            let u = ctx.hasher().hash(2 * nonce) & params.edge_mask();
            *degree.entry(u).or_insert(0u32) += 1;
        }

        for part in 0..2u64 {
            ctx.degree_map().clear();
            ctx.count_node_deg(0, 0, part);
            ctx.kill_leaf_edges(0, 0, part);
        }

        for nonce in 0..params.nedges() {
            let u = ctx.hasher().hash(2 * nonce) & params.edge_mask();
            let expect_alive = u == 0 || degree[&u] >= 2;
            assert_eq!(
                ctx.alive().is_alive(nonce),
                expect_alive,
                "nonce {nonce} endpoint {u}"
            );
        }
    }
}
