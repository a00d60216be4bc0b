//! Voice Graph
//!
//! Real-time audio rendering engine: a graph of nodes and buffers rendered
//! by a single real-time thread, with topology changes precomputed on
//! background threads and handed over through non-blocking requests.
//! Inactive voice branches are skipped in O(1) amortized time via a
//! precomputed increment table.

pub mod constants;
pub mod dsp;
pub mod engine;
pub mod graph;
