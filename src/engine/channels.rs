//! Engine Channels
//!
//! Lock-free communication between the control side and the render thread.
//! Three paths: a depth-1 overwrite slot carrying topology requests in, an
//! atomic publishing the epoch of the last-consumed request out, and an
//! rtrb SPSC ring returning retired scheduler state for off-thread
//! deallocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::constants::{RECLAIM_QUEUE_CAPACITY, REQUEST_SLOT_CAPACITY};
use crate::graph::plan::ResolvedEdit;
use crate::graph::voice::VoiceTag;
use crate::graph::NodeHandle;

use super::request::TopologyRequest;

/// Poll interval used while waiting for the render thread to consume a
/// request.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Heap state handed back by the render thread after a swap so its
/// deallocation happens on a control thread.
#[derive(Debug, Default)]
pub struct RetiredState {
    pub(crate) edits: Vec<ResolvedEdit>,
    pub(crate) sequence: Vec<NodeHandle>,
    pub(crate) tags: Vec<Option<VoiceTag>>,
    pub(crate) increments: Vec<usize>,
}

/// Holds all three communication paths.
/// Split into render-side and control-side handles before use.
pub struct EngineChannels {
    inbox: Arc<ArrayQueue<TopologyRequest>>,
    published: Arc<AtomicU64>,
    reclaim_tx: Producer<RetiredState>,
    reclaim_rx: Consumer<RetiredState>,
}

impl EngineChannels {
    /// Create channels with the given reclaim ring capacity.
    pub fn new(reclaim_capacity: usize) -> Self {
        let (reclaim_tx, reclaim_rx) = RingBuffer::new(reclaim_capacity);
        Self {
            inbox: Arc::new(ArrayQueue::new(REQUEST_SLOT_CAPACITY)),
            published: Arc::new(AtomicU64::new(0)),
            reclaim_tx,
            reclaim_rx,
        }
    }

    /// Create channels with the default capacities.
    pub fn with_defaults() -> Self {
        Self::new(RECLAIM_QUEUE_CAPACITY)
    }

    /// Split into the render-side and control-side handles. Consumes self;
    /// the two halves go to their respective threads.
    pub fn split(self) -> (RenderLink, ControlLink) {
        let render = RenderLink {
            inbox: Arc::clone(&self.inbox),
            published: Arc::clone(&self.published),
            reclaim_tx: self.reclaim_tx,
        };
        let control = ControlLink {
            inbox: self.inbox,
            published: self.published,
            reclaim_rx: self.reclaim_rx,
        };
        (render, control)
    }
}

impl Default for EngineChannels {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Render-side handle.
///
/// All methods are real-time safe: non-blocking, no allocation.
pub struct RenderLink {
    inbox: Arc<ArrayQueue<TopologyRequest>>,
    published: Arc<AtomicU64>,
    reclaim_tx: Producer<RetiredState>,
}

impl RenderLink {
    /// Take the pending request, if any. At most one per render call.
    pub fn pop_request(&mut self) -> Option<TopologyRequest> {
        self.inbox.pop()
    }

    /// Publish the epoch of the request just consumed. The Release store
    /// pairs with the control side's Acquire loads, so an observed epoch
    /// proves every earlier swap has happened.
    pub fn publish(&self, epoch: u64) {
        self.published.store(epoch, Ordering::Release);
    }

    /// Hand replaced state back for off-thread deallocation. Returns false
    /// when the ring is full, in which case the caller lets the state drop
    /// inline.
    pub fn retire(&mut self, state: RetiredState) -> bool {
        self.reclaim_tx.push(state).is_ok()
    }
}

/// Control-side handle. Lives behind the engine's control mutex, so there
/// is exactly one submitter.
pub struct ControlLink {
    inbox: Arc<ArrayQueue<TopologyRequest>>,
    published: Arc<AtomicU64>,
    reclaim_rx: Consumer<RetiredState>,
}

impl ControlLink {
    /// Put a request into the slot, superseding any still-pending one.
    ///
    /// A superseded request's shadow edits have already landed, so its
    /// resolved edits are folded into the front of the new request; the
    /// render thread then applies both batches in order and live ports
    /// never diverge from the shadow. Returns the submitted epoch.
    pub fn submit(&mut self, mut request: TopologyRequest) -> u64 {
        if let Some(stale) = self.inbox.pop() {
            tracing::debug!(
                superseded = stale.epoch(),
                epoch = request.epoch(),
                "pending request superseded before adoption"
            );
            let mut edits = stale.edits;
            edits.extend(request.edits);
            request.edits = edits;
        }
        let epoch = request.epoch();
        if self.inbox.force_push(request).is_some() {
            // Single submitter behind the control mutex; the slot was just
            // emptied.
            tracing::warn!(epoch, "request slot displaced a concurrent entry");
        }
        epoch
    }

    /// Epoch of the last request the render thread consumed.
    pub fn consumed_epoch(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// A clone of the published-epoch atomic, for the graveyard.
    pub fn published_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.published)
    }

    /// Sleep-backed bounded poll until the render thread has consumed a
    /// request with at least the given epoch. Returns whether it did
    /// within `max_attempts` polls.
    pub fn wait_consumed(&self, epoch: u64, max_attempts: usize) -> bool {
        for _ in 0..max_attempts {
            if self.consumed_epoch() >= epoch {
                return true;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
        self.consumed_epoch() >= epoch
    }

    /// Drop all retired state waiting in the reclaim ring. Returns how many
    /// entries were freed.
    pub fn drain_retired(&mut self) -> usize {
        let mut freed = 0;
        while self.reclaim_rx.pop().is_ok() {
            freed += 1;
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn request(epoch: u64) -> TopologyRequest {
        let handle = NodeHandle::new(
            epoch,
            Box::new(NullNode {
                ports: Ports::new(0, 0),
            }),
        );
        TopologyRequest {
            edits: Vec::new(),
            sequence: vec![handle],
            tags: vec![None],
            increments: vec![1],
            epoch,
        }
    }

    #[test]
    fn test_submit_and_pop() {
        let (mut render, mut control) = EngineChannels::with_defaults().split();
        assert_eq!(control.submit(request(1)), 1);

        let popped = render.pop_request().unwrap();
        assert_eq!(popped.epoch(), 1);
        assert!(render.pop_request().is_none());
    }

    #[test]
    fn test_newest_request_wins() {
        let (mut render, mut control) = EngineChannels::with_defaults().split();
        control.submit(request(1));
        control.submit(request(2));

        let popped = render.pop_request().unwrap();
        assert_eq!(popped.epoch(), 2);
        assert!(render.pop_request().is_none());
    }

    #[test]
    fn test_superseded_edits_are_folded_in() {
        let (mut render, mut control) = EngineChannels::with_defaults().split();

        let mut first = request(1);
        first.edits.push(ResolvedEdit::SetInput {
            node: first.sequence[0].clone(),
            port: 0,
            buffer: None,
        });
        control.submit(first);
        control.submit(request(2));

        let popped = render.pop_request().unwrap();
        assert_eq!(popped.epoch(), 2);
        assert_eq!(popped.edits.len(), 1);
    }

    #[test]
    fn test_publish_and_wait() {
        let (render, control) = EngineChannels::with_defaults().split();

        assert_eq!(control.consumed_epoch(), 0);
        assert!(!control.wait_consumed(1, 2));

        let waiter = std::thread::spawn(move || {
            let ok = control.wait_consumed(3, 1000);
            (ok, control)
        });
        render.publish(3);
        let (ok, control) = waiter.join().unwrap();
        assert!(ok);
        assert_eq!(control.consumed_epoch(), 3);
    }

    #[test]
    fn test_retire_and_drain() {
        let (mut render, mut control) = EngineChannels::with_defaults().split();
        assert!(render.retire(RetiredState::default()));
        assert!(render.retire(RetiredState::default()));
        assert_eq!(control.drain_retired(), 2);
        assert_eq!(control.drain_retired(), 0);
    }

    #[test]
    fn test_retire_full_ring_reports_failure() {
        let (mut render, _control) = EngineChannels::new(1).split();
        assert!(render.retire(RetiredState::default()));
        assert!(!render.retire(RetiredState::default()));
    }

    #[test]
    fn test_links_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RenderLink>();
        assert_send::<ControlLink>();
    }
}
