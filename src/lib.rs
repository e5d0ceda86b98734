//! # Lean Cuckoo Cycle Solver
//!
//! A high-performance Rust library implementing the lean (memory-minimal)
//! solver for Cuckoo Cycle, a memory-hard proof-of-work.
//!
//! This crate provides:
//! - A compact **alive-edge bitset** shrunk cooperatively by a fixed pool of
//!   worker threads striding over disjoint 64-edge blocks.
//! - A saturating **2-bit node-degree map** used to trim leaf edges (edges
//!   whose endpoint has degree one cannot lie on any cycle).
//! - An open-addressed, key-compressed **parent-pointer forest table** built
//!   over the exact memory vacated by the degree map, used to detect cycles
//!   among surviving edges by path collision.
//! - A barrier-synchronized, cancellation-aware **worker routine** that runs
//!   trimming rounds, builds the forest, and extracts proof-length cycles.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lean_cuckoo::prelude::*;
//! use std::sync::atomic::AtomicBool;
//!
//! let params = Params::new(20, 0, 42).unwrap();
//! let cfg = SolverConfig { nthreads: 4, ..Default::default() };
//! let mut ctx = SolverContext::new(params, cfg).unwrap();
//!
//! let mut header = vec![0u8; 80];
//! ctx.set_header_nonce(&mut header, 1234).unwrap();
//!
//! let running = AtomicBool::new(true);
//! match run_workers(&ctx, &running) {
//!     Ok(n) => println!("{n} solution(s)"),
//!     Err(e) => eprintln!("attempt failed: {e}"),
//! }
//! for sol in ctx.solutions() {
//!     println!("cycle nonces: {:?}", sol.nonces);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`params`]: Graph geometry, derived masks, and the degree-map/forest
//!   sizing identity checked at construction.
//! - [`sip`]: Keyed edge-endpoint generation (SipHash-2-4 over BLAKE2b-derived
//!   keys) with batched evaluation.
//! - [`alive`]: The shrinking alive-edge bitset with per-thread live counters.
//! - [`degree`]: The saturating 2-bit degree counters over the scratch arena.
//! - [`forest`]: The compact parent-pointer table over the same arena.
//! - [`ctx`]: The shared solver context owning state, barrier, and solutions.
//! - [`worker`]: The per-thread control loop and cycle search.
//!
//! ## Performance Notes
//!
//! - Endpoint hashes are computed four at a time in straight-line code so the
//!   compiler can vectorize, with a 32-deep ring of hashes in flight so the
//!   degree-counter cache line for each endpoint is pulled ahead of use.
//! - Alive-edge kills need no cross-thread ordering: the block striding
//!   scheme puts every thread's writes in disjoint words.
//! - Degree bumps race benignly across threads; a lost increment can only
//!   keep a trimmable edge alive for another round, never kill a live one.
//! - For maximum performance, compile with:
//!   `RUSTFLAGS="-C target-cpu=native" cargo build --release`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::inline_always)] // Intentional for hot-path code
#![allow(clippy::many_single_char_names)] // u/v/nu/nv follow the algorithm's notation

pub mod alive;
pub mod ctx;
pub mod degree;
pub mod forest;
pub mod params;
pub mod sip;
pub mod worker;

use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by the solver core.
///
/// Only two conditions can occur after setup: a trimming failure that leaves
/// the graph too dense for the forest table (recoverable: retry with a fresh
/// nonce), and a forest-corruption symptom during path traversal (fatal to
/// the reporting thread's search, not to the process).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested graph geometry is unusable.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The header buffer is too short to hold the trailing 32-bit nonce.
    #[error("header too short: {len} bytes, need at least 4")]
    HeaderTooShort {
        /// Length of the rejected header buffer.
        len: usize,
    },

    /// Trimming left too many edges alive relative to forest-table capacity.
    ///
    /// Building the table past this load risks unbounded probe drift, so the
    /// attempt is abandoned. The caller should retry with a different nonce.
    #[error("graph too dense after trimming: {live} live edges at {load}% of {capacity} slots")]
    GraphTooDense {
        /// Edges still alive after all trimming rounds.
        live: u64,
        /// Forest-table capacity in slots.
        capacity: u64,
        /// `100 * live / capacity`.
        load: u64,
    },

    /// A parent-pointer walk exceeded the maximum path length.
    ///
    /// Under correct sequential construction the forest is acyclic and paths
    /// stay well under the cap; exceeding it indicates table corruption
    /// (e.g. a lost race in lock-light mode). The reporting thread stops
    /// searching; others continue.
    #[error("path exceeded {max} nodes while walking from {start:#x}")]
    PathTooLong {
        /// Node the walk started from.
        start: u64,
        /// The configured path-length cap.
        max: usize,
    },
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::ctx::{Solution, SolverConfig, SolverContext};
    pub use crate::params::Params;
    pub use crate::sip::{NodeHasher, SipKeys};
    pub use crate::worker::{run_workers, worker};
    pub use crate::{Error, Result};
}
