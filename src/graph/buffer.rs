//! Fixed-size sample buffers connecting graph nodes.
//!
//! A buffer carries one block of samples from its single producing node to
//! any number of consuming nodes. Buffers are created and destroyed only on
//! control threads; the render thread sees them exclusively through shared
//! handles held in node port tables.

use std::cell::UnsafeCell;
use std::fmt;

use crate::constants::BLOCK_SIZE;

/// Unique identifier for a buffer. Allocated by the graph's identifier
/// counter and never reused for the lifetime of the process.
pub type BufferId = u64;

/// One block of samples with exclusive-write / shared-read access.
///
/// The sample storage uses interior mutability so the producing node can
/// fill it through a shared handle while downstream nodes read it later in
/// the same render call.
///
/// # Safety contract
///
/// At most one node writes a given buffer per render call, and the
/// rendering sequence guarantees the producer runs before every reader.
/// All access to the samples happens on the single render thread; control
/// threads only create, register, and eventually drop handles.
pub struct SampleBuffer {
    id: BufferId,
    samples: UnsafeCell<Box<[f32]>>,
}

// The UnsafeCell is only ever dereferenced on the render thread, which has
// exclusive use of the sample storage per the contract above.
unsafe impl Send for SampleBuffer {}
unsafe impl Sync for SampleBuffer {}

impl SampleBuffer {
    /// Creates a zeroed buffer holding exactly one render block.
    pub fn new(id: BufferId) -> Self {
        Self {
            id,
            samples: UnsafeCell::new(vec![0.0; BLOCK_SIZE].into_boxed_slice()),
        }
    }

    /// The buffer's process-unique identifier.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Number of samples in the buffer. Always [`BLOCK_SIZE`].
    pub fn len(&self) -> usize {
        BLOCK_SIZE
    }

    /// Always false; buffers have a fixed non-zero capacity.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Shared read access to the sample block.
    ///
    /// Valid for consumers once the producing node has run for the current
    /// block.
    pub fn samples(&self) -> &[f32] {
        unsafe { &*self.samples.get() }
    }

    /// Exclusive write access for the producing node.
    ///
    /// Must only be called by the buffer's unique producer, from the render
    /// thread, during its slot in the rendering sequence.
    #[allow(clippy::mut_from_ref)]
    pub fn samples_mut(&self) -> &mut [f32] {
        unsafe { &mut *self.samples.get() }
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("id", &self.id)
            .field("len", &BLOCK_SIZE)
            .finish()
    }
}
