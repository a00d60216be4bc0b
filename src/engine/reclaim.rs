//! Deferred reclamation
//!
//! Removed nodes and buffers cannot be freed the moment the shadow forgets
//! them: the render thread may still hold their handles through the live
//! sequence and port tables. Each removal is therefore retired with the
//! epoch of the first request whose sequence no longer references it. Once
//! the render thread publishes that epoch (or any later one) the payload is
//! provably unreachable from the render side and drops here, on a control
//! thread. The render thread itself only ever decrements shared counts,
//! never frees.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::graph::{NodeHandle, SampleBuffer};

/// A payload waiting for the render thread to move past it.
#[derive(Debug)]
pub enum Retired {
    Node(NodeHandle),
    Buffer(Arc<SampleBuffer>),
}

/// Holds retired payloads until their retirement epoch has been consumed.
pub struct Graveyard {
    published: Arc<AtomicU64>,
    pending: Vec<(u64, Retired)>,
}

impl Graveyard {
    /// Creates a graveyard observing the scheduler's published epoch.
    pub fn new(published: Arc<AtomicU64>) -> Self {
        Self {
            published,
            pending: Vec::new(),
        }
    }

    /// Retires a node removed from the graph. `epoch` is the epoch of the
    /// first request built without it.
    pub fn retire_node(&mut self, handle: NodeHandle, epoch: u64) {
        self.pending.push((epoch, Retired::Node(handle)));
    }

    /// Retires a buffer removed from the graph.
    pub fn retire_buffer(&mut self, buffer: Arc<SampleBuffer>, epoch: u64) {
        self.pending.push((epoch, Retired::Buffer(buffer)));
    }

    /// Frees every payload whose retirement epoch the render thread has
    /// consumed. Returns how many were freed.
    pub fn collect(&mut self) -> usize {
        let consumed = self.published.load(Ordering::Acquire);
        let before = self.pending.len();
        self.pending.retain(|(epoch, _)| *epoch > consumed);
        let freed = before - self.pending.len();
        if freed > 0 {
            tracing::debug!(freed, remaining = self.pending.len(), "reclaimed payloads");
        }
        freed
    }

    /// Number of payloads still waiting.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BLOCK_SIZE;
    use crate::graph::node::Ports;
    use crate::graph::RenderNode;

    struct NullNode {
        ports: Ports,
    }

    impl RenderNode for NullNode {
        fn ports(&self) -> &Ports {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut Ports {
            &mut self.ports
        }

        fn render(&mut self, _frames: usize) {}
    }

    fn handle(id: u64) -> NodeHandle {
        NodeHandle::new(
            id,
            Box::new(NullNode {
                ports: Ports::new(0, 0),
            }),
        )
    }

    #[test]
    fn test_collect_waits_for_epoch() {
        let published = Arc::new(AtomicU64::new(0));
        let mut graveyard = Graveyard::new(Arc::clone(&published));

        graveyard.retire_node(handle(1), 5);
        graveyard.retire_buffer(Arc::new(SampleBuffer::new(2)), 6);

        assert_eq!(graveyard.collect(), 0);
        assert_eq!(graveyard.pending(), 2);

        published.store(5, Ordering::Release);
        assert_eq!(graveyard.collect(), 1);
        assert_eq!(graveyard.pending(), 1);

        published.store(9, Ordering::Release);
        assert_eq!(graveyard.collect(), 1);
        assert_eq!(graveyard.pending(), 0);
    }

    #[test]
    fn test_collect_actually_drops_references() {
        let published = Arc::new(AtomicU64::new(0));
        let mut graveyard = Graveyard::new(Arc::clone(&published));

        let buffer = Arc::new(SampleBuffer::new(1));
        assert_eq!(buffer.len(), BLOCK_SIZE);
        graveyard.retire_buffer(Arc::clone(&buffer), 1);
        assert_eq!(Arc::strong_count(&buffer), 2);

        published.store(1, Ordering::Release);
        graveyard.collect();
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
