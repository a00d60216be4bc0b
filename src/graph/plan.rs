//! Declarative topology edit plans.
//!
//! A plan is an ordered batch of connect/disconnect instructions addressed
//! purely by identifier, so it can be built against items that do not exist
//! yet or are already gone. Unplug lists always execute before plug lists,
//! which lets one plan replace the edge at a port atomically from the
//! renderer's point of view.

use std::sync::Arc;

use super::buffer::{BufferId, SampleBuffer};
use super::node::{NodeHandle, NodeId, PortIndex};

/// One buffer-to-node-input edge, addressed by identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEdge {
    /// The buffer feeding the port.
    pub buffer: BufferId,
    /// The consuming node.
    pub node: NodeId,
    /// Input port index on the consuming node.
    pub port: PortIndex,
}

/// One node-output-to-buffer edge, addressed by identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputEdge {
    /// The producing node.
    pub node: NodeId,
    /// Output port index on the producing node.
    pub port: PortIndex,
    /// The buffer the port fills.
    pub buffer: BufferId,
}

/// An ordered batch of topology edits.
///
/// Application order is fixed: input unplugs, output unplugs, input plugs,
/// output plugs. Within each list, instructions run in push order; when two
/// plugs target the same port the later one wins.
#[derive(Clone, Debug, Default)]
pub struct EditPlan {
    pub(crate) unplug_inputs: Vec<InputEdge>,
    pub(crate) unplug_outputs: Vec<OutputEdge>,
    pub(crate) plug_inputs: Vec<InputEdge>,
    pub(crate) plug_outputs: Vec<OutputEdge>,
}

impl EditPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues removal of a buffer from a node's input port.
    pub fn unplug_input(&mut self, buffer: BufferId, node: NodeId, port: PortIndex) -> &mut Self {
        self.unplug_inputs.push(InputEdge { buffer, node, port });
        self
    }

    /// Queues removal of a buffer from a node's output port.
    pub fn unplug_output(&mut self, node: NodeId, port: PortIndex, buffer: BufferId) -> &mut Self {
        self.unplug_outputs.push(OutputEdge { node, port, buffer });
        self
    }

    /// Queues connection of a buffer to a node's input port.
    pub fn plug_input(&mut self, buffer: BufferId, node: NodeId, port: PortIndex) -> &mut Self {
        self.plug_inputs.push(InputEdge { buffer, node, port });
        self
    }

    /// Queues connection of a node's output port to a buffer.
    pub fn plug_output(&mut self, node: NodeId, port: PortIndex, buffer: BufferId) -> &mut Self {
        self.plug_outputs.push(OutputEdge { node, port, buffer });
        self
    }

    /// True when the plan carries no instructions.
    pub fn is_empty(&self) -> bool {
        self.unplug_inputs.is_empty()
            && self.unplug_outputs.is_empty()
            && self.plug_inputs.is_empty()
            && self.plug_outputs.is_empty()
    }

    /// Total number of instructions across all four lists.
    pub fn len(&self) -> usize {
        self.unplug_inputs.len()
            + self.unplug_outputs.len()
            + self.plug_inputs.len()
            + self.plug_outputs.len()
    }

    /// The plug instruction that would win for a given input port, scanning
    /// in reverse so the last queued instruction takes effect.
    pub(crate) fn winning_input_plug(&self, node: NodeId, port: PortIndex) -> Option<BufferId> {
        self.plug_inputs
            .iter()
            .rev()
            .find(|e| e.node == node && e.port == port)
            .map(|e| e.buffer)
    }

    /// The plug instruction that would win as producer of a given buffer.
    pub(crate) fn winning_output_plug(&self, buffer: BufferId) -> Option<(NodeId, PortIndex)> {
        self.plug_outputs
            .iter()
            .rev()
            .find(|e| e.buffer == buffer)
            .map(|e| (e.node, e.port))
    }

    /// Whether the plan unplugs the given existing input edge.
    pub(crate) fn unplugs_input(&self, buffer: BufferId, node: NodeId, port: PortIndex) -> bool {
        self.unplug_inputs
            .iter()
            .any(|e| e.buffer == buffer && e.node == node && e.port == port)
    }

    /// Whether the plan unplugs the given existing output edge.
    pub(crate) fn unplugs_output(&self, node: NodeId, port: PortIndex, buffer: BufferId) -> bool {
        self.unplug_outputs
            .iter()
            .any(|e| e.node == node && e.port == port && e.buffer == buffer)
    }
}

/// One plan instruction with its identifiers resolved to live handles.
///
/// Produced on a control thread by [`Graph::apply_plan_collect`] so the
/// render thread can adopt a topology change without ever touching the
/// registry maps. Applying an edit swaps a port's buffer handle and
/// nothing else.
///
/// [`Graph::apply_plan_collect`]: super::Graph::apply_plan_collect
#[derive(Clone, Debug)]
pub enum ResolvedEdit {
    /// Replace the buffer held at a node's input port.
    SetInput {
        node: NodeHandle,
        port: PortIndex,
        buffer: Option<Arc<SampleBuffer>>,
    },
    /// Replace the buffer held at a node's output port.
    SetOutput {
        node: NodeHandle,
        port: PortIndex,
        buffer: Option<Arc<SampleBuffer>>,
    },
}

impl ResolvedEdit {
    /// Applies the edit to the live port table. Render thread only.
    pub(crate) fn apply(&self) {
        match self {
            ResolvedEdit::SetInput { node, port, buffer } => {
                node.set_input(*port, buffer.clone());
            }
            ResolvedEdit::SetOutput { node, port, buffer } => {
                node.set_output(*port, buffer.clone());
            }
        }
    }
}
