//! Request pipeline
//!
//! Background half of the engine: the shared control state (shadow graph,
//! tagger, voice slots, graveyard, submission link) behind one mutex, the
//! request lifecycle (preprocess under the lock, submit, bounded wait for
//! adoption, postprocess), and a single worker thread that runs
//! asynchronously posted requests one at a time so their preprocess phases
//! never overlap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::constants::PIPELINE_QUEUE_CAPACITY;
use crate::graph::plan::EditPlan;
use crate::graph::voice::{VoiceSlots, VoiceTag, VoiceTagger};
use crate::graph::{BufferId, Graph, NodeId};

use super::channels::ControlLink;
use super::reclaim::Graveyard;
use super::request::TopologyRequest;

/// How many 1ms polls a request lifecycle waits for adoption before
/// reporting the request undelivered.
const DELIVERY_WAIT_ATTEMPTS: usize = 500;

/// Worker receive timeout, bounding shutdown latency.
const WORKER_POLL: Duration = Duration::from_millis(50);

/// Everything the background side mutates, guarded by one mutex.
pub struct ControlState {
    pub graph: Graph,
    pub tagger: VoiceTagger,
    pub voices: VoiceSlots,
    pub graveyard: Graveyard,
    link: ControlLink,
}

impl ControlState {
    fn new(link: ControlLink) -> Self {
        Self {
            graph: Graph::new(),
            tagger: VoiceTagger::new(),
            voices: VoiceSlots::new(),
            graveyard: Graveyard::new(link.published_handle()),
            link,
        }
    }

    /// Hands a built request to the scheduler inbox.
    pub fn submit(&mut self, request: TopologyRequest) -> u64 {
        self.link.submit(request)
    }

    /// Frees whatever the render thread has let go of: retired scheduler
    /// vectors and graveyard payloads whose epoch has been consumed.
    pub fn housekeep(&mut self) -> usize {
        self.link.drain_retired() + self.graveyard.collect()
    }
}

/// One unit of background work against the engine.
///
/// `preprocess` runs under the control mutex and either produces a
/// topology request (submitted by the pipeline in the same lock scope) or
/// aborts. `postprocess` always runs afterwards, with `delivered` telling
/// whether the render thread adopted the request within the wait bound.
pub trait EngineRequest: Send {
    fn preprocess(&mut self, control: &mut ControlState, epoch: u64) -> Option<TopologyRequest>;

    fn postprocess(&mut self, _delivered: bool) {}
}

/// Shared engine state: the control mutex plus the lock-free pieces a
/// request lifecycle needs without holding it.
pub struct EngineShared {
    control: Mutex<ControlState>,
    published: Arc<AtomicU64>,
    next_epoch: AtomicU64,
}

impl EngineShared {
    /// Wraps the control side of the engine channels.
    pub fn new(link: ControlLink) -> Self {
        let published = link.published_handle();
        Self {
            control: Mutex::new(ControlState::new(link)),
            published,
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Hands out the next request epoch. Epochs start at 1; 0 means the
    /// render thread has consumed nothing yet.
    pub fn allocate_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs a closure under the control mutex. This is the API for graph
    /// construction and inspection from host code.
    pub fn with_control<R>(&self, f: impl FnOnce(&mut ControlState) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Epoch of the last request the render thread consumed.
    pub fn consumed_epoch(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn wait_consumed(&self, epoch: u64, max_attempts: usize) -> bool {
        for _ in 0..max_attempts {
            if self.consumed_epoch() >= epoch {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.consumed_epoch() >= epoch
    }

    /// Runs one request through its full lifecycle on the calling thread.
    fn execute(&self, request: &mut dyn EngineRequest) -> bool {
        let epoch = self.allocate_epoch();
        let submitted = {
            let mut control = self.lock();
            match request.preprocess(&mut control, epoch) {
                Some(topology) => {
                    control.submit(topology);
                    true
                }
                None => false,
            }
        };
        if !submitted {
            request.postprocess(false);
            return false;
        }

        let delivered = self.wait_consumed(epoch, DELIVERY_WAIT_ATTEMPTS);
        if !delivered {
            tracing::debug!(epoch, "request not adopted within wait bound");
        }
        self.lock().housekeep();
        request.postprocess(delivered);
        delivered
    }
}

/// Accepts requests synchronously or through a bounded queue drained by a
/// single worker thread.
pub struct RequestPipeline {
    shared: Arc<EngineShared>,
    tx: Option<Sender<Box<dyn EngineRequest>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RequestPipeline {
    /// Spawns the worker thread.
    pub fn new(shared: Arc<EngineShared>) -> Self {
        let (tx, rx) = bounded(PIPELINE_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            std::thread::spawn(move || Self::run(shared, rx, running))
        };
        Self {
            shared,
            tx: Some(tx),
            running,
            worker: Some(worker),
        }
    }

    fn run(
        shared: Arc<EngineShared>,
        rx: Receiver<Box<dyn EngineRequest>>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::Relaxed) {
            match rx.recv_timeout(WORKER_POLL) {
                // One request runs to completion, wait included, before the
                // next is dequeued: async preprocess phases never overlap.
                Ok(mut request) => {
                    shared.execute(request.as_mut());
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Anything still queued fails cleanly.
        while let Ok(mut request) = rx.try_recv() {
            request.postprocess(false);
        }
    }

    /// The shared engine state this pipeline feeds.
    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Runs the request's full lifecycle on the calling thread. Concurrent
    /// sync posters get no mutual exclusion beyond the control mutex.
    pub fn post_sync(&self, request: &mut dyn EngineRequest) -> bool {
        self.shared.execute(request)
    }

    /// Queues a request for the worker. Returns the request when the queue
    /// is full or the pipeline has shut down.
    pub fn post_async(
        &self,
        request: Box<dyn EngineRequest>,
    ) -> Result<(), Box<dyn EngineRequest>> {
        let Some(tx) = &self.tx else {
            return Err(request);
        };
        tx.try_send(request).map_err(|err| {
            tracing::debug!("async request rejected");
            match err {
                TrySendError::Full(r) | TrySendError::Disconnected(r) => r,
            }
        })
    }

    /// Stops the worker, failing anything still queued, and joins it.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for RequestPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The plain compound request: apply an edit plan and move the render
/// thread to the resulting sequence, with an optional completion callback.
pub struct GraphUpdate {
    root: NodeId,
    plan: EditPlan,
    on_done: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl GraphUpdate {
    pub fn new(root: NodeId, plan: EditPlan) -> Self {
        Self {
            root,
            plan,
            on_done: None,
        }
    }

    pub fn with_callback(
        root: NodeId,
        plan: EditPlan,
        on_done: impl FnOnce(bool) + Send + 'static,
    ) -> Self {
        Self {
            root,
            plan,
            on_done: Some(Box::new(on_done)),
        }
    }
}

impl EngineRequest for GraphUpdate {
    fn preprocess(&mut self, control: &mut ControlState, epoch: u64) -> Option<TopologyRequest> {
        TopologyRequest::build(
            &mut control.graph,
            self.root,
            &self.plan,
            &control.tagger,
            epoch,
        )
    }

    fn postprocess(&mut self, delivered: bool) {
        if let Some(on_done) = self.on_done.take() {
            on_done(delivered);
        }
    }
}

/// Claims a voice slot, tags the member nodes, and wires the branch in.
/// Aborts in preprocess when every slot is taken; nothing then reaches the
/// render thread.
pub struct AllocateVoice {
    root: NodeId,
    plan: EditPlan,
    members: Vec<NodeId>,
    tag: Option<VoiceTag>,
    on_done: Option<Box<dyn FnOnce(Option<VoiceTag>, bool) + Send>>,
}

impl AllocateVoice {
    pub fn new(root: NodeId, plan: EditPlan, members: Vec<NodeId>) -> Self {
        Self {
            root,
            plan,
            members,
            tag: None,
            on_done: None,
        }
    }

    pub fn on_done(mut self, f: impl FnOnce(Option<VoiceTag>, bool) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    /// The slot claimed by a successful preprocess.
    pub fn tag(&self) -> Option<VoiceTag> {
        self.tag
    }
}

impl EngineRequest for AllocateVoice {
    fn preprocess(&mut self, control: &mut ControlState, epoch: u64) -> Option<TopologyRequest> {
        let Some(tag) = control.voices.acquire() else {
            tracing::debug!("voice allocation failed, all slots in use");
            return None;
        };
        for &node in &self.members {
            control.tagger.assign(tag, node);
        }
        match TopologyRequest::build(
            &mut control.graph,
            self.root,
            &self.plan,
            &control.tagger,
            epoch,
        ) {
            Some(request) => {
                self.tag = Some(tag);
                Some(request)
            }
            None => {
                for &node in &self.members {
                    control.tagger.revoke(node);
                }
                control.voices.release(tag);
                None
            }
        }
    }

    fn postprocess(&mut self, delivered: bool) {
        if let Some(on_done) = self.on_done.take() {
            on_done(self.tag, delivered);
        }
    }
}

/// Tears a voice branch down: detaches it via the plan, unregisters the
/// member nodes and buffers, retires them to the graveyard under this
/// request's epoch, and frees the slot.
pub struct ReleaseVoice {
    root: NodeId,
    plan: EditPlan,
    tag: VoiceTag,
    members: Vec<NodeId>,
    buffers: Vec<BufferId>,
}

impl ReleaseVoice {
    pub fn new(
        root: NodeId,
        plan: EditPlan,
        tag: VoiceTag,
        members: Vec<NodeId>,
        buffers: Vec<BufferId>,
    ) -> Self {
        Self {
            root,
            plan,
            tag,
            members,
            buffers,
        }
    }
}

impl EngineRequest for ReleaseVoice {
    fn preprocess(&mut self, control: &mut ControlState, epoch: u64) -> Option<TopologyRequest> {
        // The request is built first: its sequence must already exclude the
        // branch (the plan detaches it), and the removals below are only
        // safe to reclaim once this epoch has been consumed.
        let request = TopologyRequest::build(
            &mut control.graph,
            self.root,
            &self.plan,
            &control.tagger,
            epoch,
        )?;
        for &node in &self.members {
            control.tagger.revoke(node);
            if let Some(handle) = control.graph.remove_node(node) {
                control.graveyard.retire_node(handle, epoch);
            }
        }
        for &buffer in &self.buffers {
            if let Some(buf) = control.graph.remove_buffer(buffer) {
                control.graveyard.retire_buffer(buf, epoch);
            }
        }
        control.voices.release(self.tag);
        Some(request)
    }
}
