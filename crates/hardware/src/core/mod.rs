//! Core timing structures and the microarchitecture simulator.
//!
//! The leaves are in their own modules; `uarch` ties them together:
//! 1. **fifo:** circular FIFO backing the dispatch/retire window.
//! 2. **resources:** per-cycle issue counters for one execution-lane pool.
//! 3. **cache:** set-associative levels and the hierarchy arena.
//! 4. **store_queue:** byte-granular oracle store-to-load forwarding.
//! 5. **prefetch:** reference-prediction-table stride prefetcher.
//! 6. **uarch:** the timestamp propagator and fetch model.

/// Set-associative cache levels and the hierarchy arena.
pub mod cache;
/// Circular FIFO backing the dispatch/retire window.
pub mod fifo;
/// Reference-prediction-table stride prefetcher.
pub mod prefetch;
/// Per-cycle issue counters for one execution-lane pool.
pub mod resources;
/// Byte-granular store queue with oracle disambiguation.
pub mod store_queue;
/// The microarchitecture simulator.
pub mod uarch;
