//! Engine-wide capacity constants.
//!
//! The engine operates on a fixed size class: block size, voice count, and
//! queue capacities are all set at compile time. Nothing here changes while
//! audio is running.

/// Number of samples in one render block. Every buffer in the graph holds
/// exactly this many samples, and `render()` is never called with more.
pub const BLOCK_SIZE: usize = 256;

/// Maximum number of voice groups. Tags are `u32` values below this bound so
/// the scheduler's active set fits in a single `u64` bitmask.
pub const MAX_VOICES: usize = 64;

/// Maximum number of nodes registered in a graph at once.
pub const MAX_NODES: usize = 1024;

/// Maximum number of buffers registered in a graph at once.
pub const MAX_BUFFERS: usize = 2048;

/// Capacity of the topology request slot between the control side and the
/// render thread. One deep: only the newest pending request matters.
pub const REQUEST_SLOT_CAPACITY: usize = 1;

/// Capacity of the asynchronous request queue feeding the pipeline worker.
pub const PIPELINE_QUEUE_CAPACITY: usize = 64;

/// Capacity of the channel returning retired scheduler state to the control
/// side for deallocation.
pub const RECLAIM_QUEUE_CAPACITY: usize = 64;
