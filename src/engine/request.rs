//! Topology requests
//!
//! A request packages everything the render thread needs to adopt a new
//! topology: the resolved port edits, the new rendering sequence as live
//! handles, the parallel voice-tag list, and a scratch increment vector it
//! can recompute in place. Requests are built entirely on background
//! threads so adoption is move-and-swap, never allocate-and-traverse.

use crate::graph::plan::{EditPlan, ResolvedEdit};
use crate::graph::voice::{VoiceTag, VoiceTagger};
use crate::graph::{Graph, NodeHandle, NodeId};

/// One precomputed topology change, consumed whole by the scheduler.
#[derive(Debug)]
pub struct TopologyRequest {
    /// Port edits to apply to the live node handles, in order.
    pub(crate) edits: Vec<ResolvedEdit>,
    /// The new rendering sequence.
    pub(crate) sequence: Vec<NodeHandle>,
    /// Voice tag per sequence position.
    pub(crate) tags: Vec<Option<VoiceTag>>,
    /// Scratch increments, all 1s; the scheduler recomputes them in place.
    pub(crate) increments: Vec<usize>,
    /// Epoch published by the render thread once the request is consumed.
    pub(crate) epoch: u64,
}

impl TopologyRequest {
    /// The epoch this request carries.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Length of the rendering sequence.
    pub fn sequence_len(&self) -> usize {
        self.sequence.len()
    }

    /// A request is adoptable only when its three parallel lists are
    /// non-empty and of equal length. The scheduler ignores anything else
    /// whole, leaving its epoch unpublished.
    pub fn is_valid(&self) -> bool {
        !self.sequence.is_empty()
            && self.sequence.len() == self.tags.len()
            && self.sequence.len() == self.increments.len()
    }

    /// Builds a request against the shadow graph: computes the sequence the
    /// plan would produce, derives tags, then applies the plan collecting
    /// the resolved edits.
    ///
    /// Returns `None` without touching the shadow when the resulting
    /// sequence would be empty (root missing or fully detached). A plan
    /// with failing instructions still yields a request; the failures are
    /// logged and the valid instructions land.
    pub fn build(
        graph: &mut Graph,
        root: NodeId,
        plan: &EditPlan,
        tagger: &VoiceTagger,
        epoch: u64,
    ) -> Option<Self> {
        let ids = graph.sequence_with_plan(root, plan);
        if ids.is_empty() {
            tracing::debug!(root, epoch, "request yields empty sequence, dropped");
            return None;
        }

        let tags = tagger.derive(&ids);
        let mut sequence = Vec::with_capacity(ids.len());
        for id in &ids {
            sequence.push(graph.node_handle(*id)?);
        }

        let (ok, edits) = graph.apply_plan_collect(plan);
        if !ok {
            tracing::debug!(epoch, "plan contained failing instructions");
        }

        let increments = vec![1; ids.len()];
        Some(Self {
            edits,
            sequence,
            tags,
            increments,
            epoch,
        })
    }
}
