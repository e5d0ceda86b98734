//! The per-thread worker routine: trimming rounds, forest construction,
//! cycle search, and solution extraction.
//!
//! Every thread of the fixed pool runs [`worker`] once per attempt. Phases
//! are separated by full barriers; the continue/stop decision at each phase
//! boundary is latched by thread 0 *before* the barrier, so all threads read
//! the same verdict afterwards and no thread can strand the others at a
//! rendezvous. Cycle search has no further barriers, so there the external
//! running flag is polled directly at block granularity.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use smallvec::SmallVec;

use crate::ctx::{SolverContext, StopReason};
use crate::forest::ForestTable;
use crate::sip::NodeHasher;
use crate::{Error, Result};

/// Ancestor-chain buffer; paths through a trimmed forest are mostly short.
type NodePath = SmallVec<[u64; 64]>;

// ============================================================================
// Path walking
// ============================================================================

/// Fills `buf` with the ancestor chain of `start` (inclusive) up to its root
/// and returns the root's index, i.e. the path length in tree edges.
///
/// # Errors
/// Returns [`Error::PathTooLong`] if the walk exceeds `max` nodes, the
/// symptom of a corrupted table; the caller abandons its search.
fn path(forest: &ForestTable<'_>, start: u64, buf: &mut NodePath, max: usize) -> Result<usize> {
    debug_assert!(start != 0);
    buf.clear();
    let mut u = start;
    while u != 0 {
        if buf.len() >= max {
            warn!("parent walk from {start:#x} exceeded {max} nodes");
            return Err(Error::PathTooLong { start, max });
        }
        buf.push(u);
        u = forest.parent(u);
    }
    Ok(buf.len() - 1)
}

// ============================================================================
// Worker routine
// ============================================================================

/// Runs thread `id`'s share of one attempt against the shared context.
///
/// Returns `Ok(())` when the search completes, the attempt is cancelled, or
/// the solution cap is reached. Committed solutions are read from the context
/// afterwards.
///
/// # Errors
/// - [`Error::GraphTooDense`] if trimming left the graph over the load
///   threshold (every worker reports it; retry with a fresh nonce).
/// - [`Error::PathTooLong`] on forest corruption, fatal only to this
///   thread's search.
///
/// # Panics
/// Panics if `id >= nthreads` (the caller owns thread indexing).
pub fn worker<H: NodeHasher>(
    ctx: &SolverContext<H>,
    id: usize,
    running: &AtomicBool,
) -> Result<()> {
    let params = *ctx.params();
    let cfg = *ctx.config();
    assert!(id < cfg.nthreads, "thread id {id} out of range");

    // --- Trimming rounds -------------------------------------------------
    let nparts = 1u64 << params.part_bits();
    for round in 1..=cfg.ntrims {
        for side in 0..2u64 {
            for part in 0..nparts {
                if id == 0 {
                    if running.load(Ordering::Relaxed) {
                        ctx.degree_map().clear();
                    } else {
                        ctx.latch_stop(StopReason::Cancelled);
                    }
                }
                ctx.sync();
                if ctx.stop_reason().is_some() {
                    return Ok(());
                }
                ctx.count_node_deg(id, side, part);
                ctx.sync();
                ctx.kill_leaf_edges(id, side, part);
                ctx.sync();
            }
        }
        if id == 0 {
            debug!("round {round}: {} edges alive", ctx.alive().live_count());
        }
    }

    // --- Load check and forest setup -------------------------------------
    if id == 0 {
        let live = ctx.alive().live_count();
        let load = 100 * live / params.forest_capacity();
        debug!(
            "trimming done: {live} live edges, {load}% of {} slots",
            params.forest_capacity()
        );
        if load >= cfg.max_load_pct {
            ctx.latch_stop(StopReason::TooDense);
        } else if !running.load(Ordering::Relaxed) {
            ctx.latch_stop(StopReason::Cancelled);
        } else {
            ctx.forest().clear();
        }
    }
    ctx.sync();
    match ctx.stop_reason() {
        Some(StopReason::Cancelled) => return Ok(()),
        Some(StopReason::TooDense) => {
            let live = ctx.alive().live_count();
            let capacity = params.forest_capacity();
            return Err(Error::GraphTooDense {
                live,
                capacity,
                load: 100 * live / capacity,
            });
        }
        None => {}
    }

    // --- Cycle search -----------------------------------------------------
    if cfg.single_threaded_search && id != 0 {
        return Ok(());
    }
    let (first, stride) = if cfg.single_threaded_search {
        (0, 64)
    } else {
        (64 * id as u64, 64 * cfg.nthreads as u64)
    };

    let forest = ctx.forest();
    let hasher = ctx.hasher();
    let max_path = params.max_path_len();
    let mut us = NodePath::new();
    let mut vs = NodePath::new();

    let mut base = first;
    while base < params.nedges() {
        if !running.load(Ordering::Relaxed) || ctx.solutions_full() {
            return Ok(());
        }
        let mut window = ctx.alive().block(base);
        while window != 0 {
            let bit = u64::from(window.trailing_zeros());
            window &= window - 1;
            let nonce = base + bit;
            let u0 = hasher.node(&params, nonce, 0);
            let v0 = hasher.node(&params, nonce, 1);
            // Node 0 is the table's empty sentinel; edges touching it stay
            // out of the forest.
            if u0 == 0 || v0 == 0 {
                continue;
            }
            let nu = path(&forest, u0, &mut us, max_path)?;
            let nv = path(&forest, v0, &mut vs, max_path)?;
            if us[nu] == vs[nv] {
                // Shared root: the closing edge completes a cycle. Trim the
                // common tail to the divergence point to measure its length.
                let min = nu.min(nv);
                let (mut du, mut dv) = (nu - min, nv - min);
                while us[du] != vs[dv] {
                    du += 1;
                    dv += 1;
                }
                let len = du + dv + 1;
                debug!("{len}-cycle found at nonce {nonce}");
                if len == params.proof_size() && !ctx.solutions_full() {
                    ctx.record_solution(&us, du, &vs, dv);
                }
                if ctx.solutions_full() {
                    return Ok(());
                }
            } else if nu < nv {
                // Distinct roots: union the trees, reversing the shorter
                // path so future walks stay short.
                for i in (0..nu).rev() {
                    forest.attach(us[i + 1], us[i]);
                }
                forest.attach(u0, v0);
            } else {
                for i in (0..nv).rev() {
                    forest.attach(vs[i + 1], vs[i]);
                }
                forest.attach(v0, u0);
            }
        }
        base += stride;
    }
    Ok(())
}

// ============================================================================
// Pool driver
// ============================================================================

/// Spawns the configured number of worker threads over one attempt and joins
/// them, returning the number of committed solutions.
///
/// This is a convenience for callers without their own thread management; it
/// is equivalent to invoking [`worker`] once per thread externally.
///
/// # Errors
/// Propagates the first worker error ([`Error::GraphTooDense`] or
/// [`Error::PathTooLong`]).
///
/// # Panics
/// Panics if a worker thread panicked.
pub fn run_workers<H: NodeHasher>(ctx: &SolverContext<H>, running: &AtomicBool) -> Result<usize> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..ctx.config().nthreads)
            .map(|id| scope.spawn(move || worker(ctx, id, running)))
            .collect();
        let mut first_err = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(_) => panic!("worker thread panicked"),
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(ctx.num_solutions()),
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
