//! The audio graph: buffer/node registries, topology edits, and
//! rendering-sequence synthesis.
//!
//! The graph is the authoritative description of topology, mutated only on
//! control threads. The render thread never touches these maps: everything
//! it needs — rendering sequences, tag lists, resolved port edits — is
//! computed here first and handed over through a topology request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::{MAX_BUFFERS, MAX_NODES};

use super::buffer::{BufferId, SampleBuffer};
use super::node::{IdAllocator, NodeHandle, NodeId, PortIndex, RenderNode};
use super::plan::{EditPlan, InputEdge, OutputEdge, ResolvedEdit};

/// Registry entry for one node: the shared handle plus the shadow port
/// tables tracked by identifier.
struct NodeEntry {
    handle: NodeHandle,
    inputs: Vec<Option<BufferId>>,
    outputs: Vec<Option<BufferId>>,
}

/// Container of buffers and nodes keyed by process-unique identifier.
///
/// Owns the identifier allocator (no global counters) and the reverse index
/// from buffer to producing node. A buffer has at most one producer and any
/// number of consumers.
pub struct Graph {
    ids: IdAllocator,
    buffers: HashMap<BufferId, Arc<SampleBuffer>>,
    nodes: HashMap<NodeId, NodeEntry>,
    producer: HashMap<BufferId, NodeId>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
            buffers: HashMap::new(),
            nodes: HashMap::new(),
            producer: HashMap::new(),
        }
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of registered buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Whether a node with this identifier is registered.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Whether a buffer with this identifier is registered.
    pub fn contains_buffer(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    /// A clone of the shared handle for a node.
    pub fn node_handle(&self, id: NodeId) -> Option<NodeHandle> {
        self.nodes.get(&id).map(|e| e.handle.clone())
    }

    /// A clone of the shared handle for a buffer.
    pub fn buffer_handle(&self, id: BufferId) -> Option<Arc<SampleBuffer>> {
        self.buffers.get(&id).cloned()
    }

    /// The node currently producing a buffer, if any.
    pub fn producer_of(&self, buffer: BufferId) -> Option<NodeId> {
        self.producer.get(&buffer).copied()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Allocates and registers a new block-sized buffer, returning its
    /// identifier, or `None` when the fixed buffer capacity is exhausted.
    pub fn add_buffer(&mut self) -> Option<BufferId> {
        if self.buffers.len() >= MAX_BUFFERS {
            return None;
        }
        let id = self.ids.allocate();
        self.buffers.insert(id, Arc::new(SampleBuffer::new(id)));
        Some(id)
    }

    /// Registers a node, returning its identifier, or `None` when the fixed
    /// node capacity is exhausted.
    pub fn add_node(&mut self, node: Box<dyn RenderNode>) -> Option<NodeId> {
        if self.nodes.len() >= MAX_NODES {
            return None;
        }
        let id = self.ids.allocate();
        let handle = NodeHandle::new(id, node);
        let entry = NodeEntry {
            inputs: vec![None; handle.input_count()],
            outputs: vec![None; handle.output_count()],
            handle,
        };
        self.nodes.insert(id, entry);
        Some(id)
    }

    /// Unregisters a node and returns its handle so the caller can retire it
    /// through the graveyard. Clears every edge touching the node.
    pub fn remove_node(&mut self, id: NodeId) -> Option<NodeHandle> {
        let entry = self.nodes.remove(&id)?;
        self.producer.retain(|_, n| *n != id);
        Some(entry.handle)
    }

    /// Unregisters a buffer and returns the graph's handle for retirement.
    /// Any shadow port still naming the buffer is cleared.
    pub fn remove_buffer(&mut self, id: BufferId) -> Option<Arc<SampleBuffer>> {
        let buf = self.buffers.remove(&id)?;
        self.producer.remove(&id);
        for entry in self.nodes.values_mut() {
            for slot in entry.inputs.iter_mut().chain(entry.outputs.iter_mut()) {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        Some(buf)
    }

    // ========================================================================
    // Topology edits
    // ========================================================================

    /// Plugs a buffer into a node's input port. Fails only when an endpoint
    /// is missing or the port index is out of range. Not callable from the
    /// render thread.
    pub fn connect_input(&mut self, buffer: BufferId, node: NodeId, port: PortIndex) -> bool {
        let mut edits = Vec::new();
        self.plug_input(InputEdge { buffer, node, port }, &mut edits)
    }

    /// Plugs a node's output port into a buffer, taking over production if
    /// another node currently fills it.
    pub fn connect_output(&mut self, node: NodeId, port: PortIndex, buffer: BufferId) -> bool {
        let mut edits = Vec::new();
        self.plug_output(OutputEdge { node, port, buffer }, &mut edits)
    }

    /// Unplugs a buffer from a node's input port. Success depends only on
    /// membership and port range; a port that never held the buffer is left
    /// untouched.
    pub fn disconnect_input(&mut self, buffer: BufferId, node: NodeId, port: PortIndex) -> bool {
        let mut edits = Vec::new();
        self.unplug_input(InputEdge { buffer, node, port }, &mut edits)
    }

    /// Unplugs a node's output port from a buffer.
    pub fn disconnect_output(&mut self, node: NodeId, port: PortIndex, buffer: BufferId) -> bool {
        let mut edits = Vec::new();
        self.unplug_output(OutputEdge { node, port, buffer }, &mut edits)
    }

    /// Applies a plan: input unplugs, output unplugs, input plugs, output
    /// plugs. Every instruction is attempted; the result is the AND of all
    /// individual results, so a partially-invalid plan still makes maximal
    /// progress.
    pub fn apply_plan(&mut self, plan: &EditPlan) -> bool {
        self.apply_plan_collect(plan).0
    }

    /// Like [`apply_plan`](Self::apply_plan), additionally collecting the
    /// resolved port edits in application order for the render thread.
    pub fn apply_plan_collect(&mut self, plan: &EditPlan) -> (bool, Vec<ResolvedEdit>) {
        let mut edits = Vec::new();
        let mut all_ok = true;

        for e in &plan.unplug_inputs {
            all_ok &= self.unplug_input(*e, &mut edits);
        }
        for e in &plan.unplug_outputs {
            all_ok &= self.unplug_output(*e, &mut edits);
        }
        for e in &plan.plug_inputs {
            all_ok &= self.plug_input(*e, &mut edits);
        }
        for e in &plan.plug_outputs {
            all_ok &= self.plug_output(*e, &mut edits);
        }

        if !all_ok {
            tracing::debug!(instructions = plan.len(), "plan applied with failures");
        }
        (all_ok, edits)
    }

    fn plug_input(&mut self, e: InputEdge, edits: &mut Vec<ResolvedEdit>) -> bool {
        let Some(buffer) = self.buffers.get(&e.buffer).cloned() else {
            return false;
        };
        let Some(entry) = self.nodes.get_mut(&e.node) else {
            return false;
        };
        if e.port >= entry.inputs.len() {
            return false;
        }
        entry.inputs[e.port] = Some(e.buffer);
        edits.push(ResolvedEdit::SetInput {
            node: entry.handle.clone(),
            port: e.port,
            buffer: Some(buffer),
        });
        true
    }

    fn unplug_input(&mut self, e: InputEdge, edits: &mut Vec<ResolvedEdit>) -> bool {
        if !self.buffers.contains_key(&e.buffer) {
            return false;
        }
        let Some(entry) = self.nodes.get_mut(&e.node) else {
            return false;
        };
        if e.port >= entry.inputs.len() {
            return false;
        }
        if entry.inputs[e.port] == Some(e.buffer) {
            entry.inputs[e.port] = None;
            edits.push(ResolvedEdit::SetInput {
                node: entry.handle.clone(),
                port: e.port,
                buffer: None,
            });
        }
        true
    }

    fn plug_output(&mut self, e: OutputEdge, edits: &mut Vec<ResolvedEdit>) -> bool {
        if !self.buffers.contains_key(&e.buffer)
            || !self
                .nodes
                .get(&e.node)
                .is_some_and(|entry| e.port < entry.outputs.len())
        {
            return false;
        }

        // A buffer has one producer: if another port currently fills it,
        // that edge is cleared as part of this plug.
        if let Some(prev) = self.producer.get(&e.buffer).copied() {
            if prev != e.node {
                if let Some(prev_entry) = self.nodes.get_mut(&prev) {
                    if let Some(prev_port) =
                        prev_entry.outputs.iter().position(|b| *b == Some(e.buffer))
                    {
                        prev_entry.outputs[prev_port] = None;
                        edits.push(ResolvedEdit::SetOutput {
                            node: prev_entry.handle.clone(),
                            port: prev_port,
                            buffer: None,
                        });
                    }
                }
            }
        }

        let Some(buffer) = self.buffers.get(&e.buffer).cloned() else {
            return false;
        };
        let Some(entry) = self.nodes.get_mut(&e.node) else {
            return false;
        };

        // Same-node case: the buffer may move between this node's ports.
        if let Some(old_port) = entry.outputs.iter().position(|b| *b == Some(e.buffer)) {
            if old_port != e.port {
                entry.outputs[old_port] = None;
                edits.push(ResolvedEdit::SetOutput {
                    node: entry.handle.clone(),
                    port: old_port,
                    buffer: None,
                });
            }
        }

        // The port may have been filling a different buffer before.
        if let Some(old_buf) = entry.outputs[e.port] {
            if old_buf != e.buffer {
                self.producer.remove(&old_buf);
            }
        }

        entry.outputs[e.port] = Some(e.buffer);
        self.producer.insert(e.buffer, e.node);
        edits.push(ResolvedEdit::SetOutput {
            node: entry.handle.clone(),
            port: e.port,
            buffer: Some(buffer),
        });
        true
    }

    fn unplug_output(&mut self, e: OutputEdge, edits: &mut Vec<ResolvedEdit>) -> bool {
        if !self.buffers.contains_key(&e.buffer) {
            return false;
        }
        let Some(entry) = self.nodes.get_mut(&e.node) else {
            return false;
        };
        if e.port >= entry.outputs.len() {
            return false;
        }
        if entry.outputs[e.port] == Some(e.buffer) {
            entry.outputs[e.port] = None;
            self.producer.remove(&e.buffer);
            edits.push(ResolvedEdit::SetOutput {
                node: entry.handle.clone(),
                port: e.port,
                buffer: None,
            });
        }
        true
    }

    // ========================================================================
    // Rendering-sequence synthesis
    // ========================================================================

    /// The rendering sequence for the graph as it stands, rooted at the
    /// final sink node.
    pub fn sequence(&self, root: NodeId) -> Vec<NodeId> {
        self.sequence_with_plan(root, &EditPlan::default())
    }

    /// The rendering sequence that *would* result were the plan applied,
    /// computed without mutating the graph.
    ///
    /// Depth-first from the root: per input port, a plan plug of an
    /// existing buffer overrides the current edge (last queued instruction
    /// wins); a plan unplug of the current edge removes that branch.
    /// Producer resolution follows the same plug-wins / unplug-removes
    /// logic in the buffer-to-producer direction. Nodes append post-order,
    /// after everything that feeds them, each at most once.
    pub fn sequence_with_plan(&self, root: NodeId, plan: &EditPlan) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut in_progress = Vec::new();
        self.visit(root, plan, &mut order, &mut in_progress);
        order
    }

    fn visit(
        &self,
        id: NodeId,
        plan: &EditPlan,
        order: &mut Vec<NodeId>,
        in_progress: &mut Vec<NodeId>,
    ) {
        if order.contains(&id) || in_progress.contains(&id) {
            return;
        }
        let Some(entry) = self.nodes.get(&id) else {
            return;
        };
        in_progress.push(id);
        for port in 0..entry.inputs.len() {
            if let Some(buffer) = self.effective_input(entry, id, port, plan) {
                if let Some(producer) = self.effective_producer(buffer, plan) {
                    self.visit(producer, plan, order, in_progress);
                }
            }
        }
        in_progress.pop();
        order.push(id);
    }

    /// The buffer that would feed an input port once the plan applied.
    fn effective_input(
        &self,
        entry: &NodeEntry,
        node: NodeId,
        port: PortIndex,
        plan: &EditPlan,
    ) -> Option<BufferId> {
        if let Some(plugged) = plan.winning_input_plug(node, port) {
            if self.buffers.contains_key(&plugged) {
                return Some(plugged);
            }
        }
        let current = entry.inputs[port]?;
        if plan.unplugs_input(current, node, port) {
            None
        } else {
            Some(current)
        }
    }

    /// The node that would produce a buffer once the plan applied.
    fn effective_producer(&self, buffer: BufferId, plan: &EditPlan) -> Option<NodeId> {
        if let Some((node, _)) = plan.winning_output_plug(buffer) {
            if self.nodes.contains_key(&node) {
                return Some(node);
            }
        }
        let current = self.producer.get(&buffer).copied()?;
        let entry = self.nodes.get(&current)?;
        let port = entry.outputs.iter().position(|b| *b == Some(buffer))?;
        if plan.unplugs_output(current, port, buffer) {
            None
        } else {
            Some(current)
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
