//! Processing nodes and their shared handles.
//!
//! A node is an abstract processing unit with a fixed set of input and
//! output ports, each optionally holding a shared buffer handle. Nodes are
//! registered into the graph once, addressed by identifier from then on, and
//! rendered through a single real-time-safe operation.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::buffer::SampleBuffer;

/// Unique identifier for a node in the graph.
pub type NodeId = u64;

/// Index of a port on a node.
pub type PortIndex = usize;

/// Monotonic identifier source shared by buffers and nodes.
///
/// Owned by the [`Graph`](super::Graph) rather than living in global state;
/// identifiers are unique across both item kinds for the allocator's
/// lifetime.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator starting at identifier 1. Zero is reserved as a
    /// conventional "never assigned" value.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hands out the next identifier. Safe to call from any control thread.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered input and output port tables for one node.
///
/// Arity is fixed at construction; connections only swap the optional buffer
/// handle held at each position.
#[derive(Default)]
pub struct Ports {
    inputs: Vec<Option<Arc<SampleBuffer>>>,
    outputs: Vec<Option<Arc<SampleBuffer>>>,
}

impl Ports {
    /// Creates empty port tables with the given arity.
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs: vec![None; inputs],
            outputs: vec![None; outputs],
        }
    }

    /// Number of input ports.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output ports.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// The buffer currently plugged into an input port, if any.
    pub fn input(&self, port: PortIndex) -> Option<&Arc<SampleBuffer>> {
        self.inputs.get(port).and_then(|slot| slot.as_ref())
    }

    /// The buffer currently plugged into an output port, if any.
    pub fn output(&self, port: PortIndex) -> Option<&Arc<SampleBuffer>> {
        self.outputs.get(port).and_then(|slot| slot.as_ref())
    }

    pub(crate) fn set_input(&mut self, port: PortIndex, buffer: Option<Arc<SampleBuffer>>) {
        if let Some(slot) = self.inputs.get_mut(port) {
            *slot = buffer;
        }
    }

    pub(crate) fn set_output(&mut self, port: PortIndex, buffer: Option<Arc<SampleBuffer>>) {
        if let Some(slot) = self.outputs.get_mut(port) {
            *slot = buffer;
        }
    }
}

/// The processing contract every node implements.
///
/// `render` must read only already-filled upstream buffers, fully fill the
/// node's own outputs, and stay free of allocation, locking, and blocking.
/// A node with zero input ports is a generator.
pub trait RenderNode: Send {
    /// The node's port tables.
    fn ports(&self) -> &Ports;

    /// Mutable access to the port tables, used when edits are applied.
    fn ports_mut(&mut self) -> &mut Ports;

    /// Renders one block of at most [`BLOCK_SIZE`](crate::constants::BLOCK_SIZE)
    /// samples.
    fn render(&mut self, frames: usize);
}

struct NodeCell {
    id: NodeId,
    input_count: usize,
    output_count: usize,
    node: UnsafeCell<Box<dyn RenderNode>>,
}

// The cell is mutated only by the render thread once the handle has been
// handed to the scheduler; control threads restrict themselves to the
// identity and arity fields captured at registration.
unsafe impl Send for NodeCell {}
unsafe impl Sync for NodeCell {}

/// Shared, reference-counted handle to a node.
///
/// The graph registry, rendering sequences, and the reclamation graveyard
/// all hold clones of the same handle. Identity and arity are readable from
/// any thread; the mutating accessors belong to the render thread alone.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeCell>,
}

impl NodeHandle {
    /// Wraps a boxed node, capturing its arity for lock-free inspection.
    pub fn new(id: NodeId, node: Box<dyn RenderNode>) -> Self {
        let input_count = node.ports().input_count();
        let output_count = node.ports().output_count();
        Self {
            inner: Arc::new(NodeCell {
                id,
                input_count,
                output_count,
                node: UnsafeCell::new(node),
            }),
        }
    }

    /// The node's process-unique identifier.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Input arity fixed at construction.
    pub fn input_count(&self) -> usize {
        self.inner.input_count
    }

    /// Output arity fixed at construction.
    pub fn output_count(&self) -> usize {
        self.inner.output_count
    }

    /// Number of live references, used by reclamation diagnostics.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Renders one block. Render thread only.
    pub(crate) fn render(&self, frames: usize) {
        unsafe { (*self.inner.node.get()).render(frames) }
    }

    /// Replaces an input port's buffer handle. Render thread only, except
    /// before the handle has been published to the scheduler.
    pub(crate) fn set_input(&self, port: PortIndex, buffer: Option<Arc<SampleBuffer>>) {
        unsafe { (*self.inner.node.get()).ports_mut().set_input(port, buffer) }
    }

    /// Replaces an output port's buffer handle. Same restrictions as
    /// [`set_input`](Self::set_input).
    pub(crate) fn set_output(&self, port: PortIndex, buffer: Option<Arc<SampleBuffer>>) {
        unsafe { (*self.inner.node.get()).ports_mut().set_output(port, buffer) }
    }

    /// Runs a closure against the node. Callers must guarantee no render
    /// is in flight; intended for setup code and post-mortem inspection.
    pub fn with_node<R>(&self, f: impl FnOnce(&dyn RenderNode) -> R) -> R {
        unsafe { f((*self.inner.node.get()).as_ref()) }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.inner.id)
            .field("inputs", &self.inner.input_count)
            .field("outputs", &self.inner.output_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullNode {
        ports: Ports,
        rendered: usize,
    }

    impl NullNode {
        fn new(inputs: usize, outputs: usize) -> Self {
            Self {
                ports: Ports::new(inputs, outputs),
                rendered: 0,
            }
        }
    }

    impl RenderNode for NullNode {
        fn ports(&self) -> &Ports {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut Ports {
            &mut self.ports
        }

        fn render(&mut self, _frames: usize) {
            self.rendered += 1;
        }
    }

    #[test]
    fn test_id_allocator_is_monotonic() {
        let ids = IdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        let c = ids.allocate();
        assert!(a < b && b < c);
        assert_eq!(a, 1);
    }

    #[test]
    fn test_ports_arity_is_fixed() {
        let ports = Ports::new(2, 1);
        assert_eq!(ports.input_count(), 2);
        assert_eq!(ports.output_count(), 1);
        assert!(ports.input(0).is_none());
        assert!(ports.input(5).is_none()); // out of range reads as unplugged
    }

    #[test]
    fn test_handle_captures_arity() {
        let handle = NodeHandle::new(3, Box::new(NullNode::new(2, 1)));
        assert_eq!(handle.id(), 3);
        assert_eq!(handle.input_count(), 2);
        assert_eq!(handle.output_count(), 1);
    }

    #[test]
    fn test_handle_set_and_read_ports() {
        let handle = NodeHandle::new(1, Box::new(NullNode::new(1, 1)));
        let buf = Arc::new(SampleBuffer::new(9));

        handle.set_input(0, Some(Arc::clone(&buf)));
        handle.with_node(|n| {
            assert_eq!(n.ports().input(0).map(|b| b.id()), Some(9));
        });

        handle.set_input(0, None);
        handle.with_node(|n| assert!(n.ports().input(0).is_none()));
    }

    #[test]
    fn test_handle_render_dispatches() {
        let handle = NodeHandle::new(1, Box::new(NullNode::new(0, 0)));
        handle.render(64);
        handle.render(64);
        // Inspection goes through the cell as well.
        let count = handle.with_node(|n| n.ports().input_count());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NodeHandle>();
    }
}
