//! Voice tagging and the fixed voice-slot pool.
//!
//! A voice tag marks a node as belonging to an on/off-gated group. Nodes
//! without a tag always render; tagged nodes render only while their group
//! is active, which is what lets the scheduler skip whole inactive branches
//! in one jump.

use std::collections::HashMap;

use crate::constants::MAX_VOICES;

use super::node::NodeId;

/// A voice group number, always below [`MAX_VOICES`].
pub type VoiceTag = u32;

/// Maps node identifiers to optional voice tags.
///
/// Mutated only on control threads; the render thread consumes the tag list
/// derived for a specific rendering sequence, never this map.
#[derive(Debug, Default)]
pub struct VoiceTagger {
    tags: HashMap<NodeId, VoiceTag>,
}

impl VoiceTagger {
    /// Creates an empty tagger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags a node with a voice group. Returns false for tags outside the
    /// engine's fixed voice range.
    pub fn assign(&mut self, tag: VoiceTag, node: NodeId) -> bool {
        if tag as usize >= MAX_VOICES {
            return false;
        }
        self.tags.insert(node, tag);
        true
    }

    /// Removes a node's tag. Untagged nodes always render.
    pub fn revoke(&mut self, node: NodeId) {
        self.tags.remove(&node);
    }

    /// The tag currently assigned to a node, if any.
    pub fn tag_of(&self, node: NodeId) -> Option<VoiceTag> {
        self.tags.get(&node).copied()
    }

    /// Produces the tag list parallel to a rendering sequence. O(len).
    pub fn derive(&self, sequence: &[NodeId]) -> Vec<Option<VoiceTag>> {
        sequence.iter().map(|id| self.tag_of(*id)).collect()
    }

    /// Number of tagged nodes.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when no node carries a tag.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Fixed pool of voice slots.
///
/// `acquire` returning `None` is the engine's capacity-exhaustion signal: a
/// request that cannot get a slot fails in its preprocess phase and never
/// reaches the render thread.
#[derive(Debug)]
pub struct VoiceSlots {
    in_use: [bool; MAX_VOICES],
}

impl VoiceSlots {
    /// Creates a pool with every slot free.
    pub fn new() -> Self {
        Self {
            in_use: [false; MAX_VOICES],
        }
    }

    /// Claims the lowest free slot, or `None` when all voices are taken.
    pub fn acquire(&mut self) -> Option<VoiceTag> {
        let free = self.in_use.iter().position(|used| !used)?;
        self.in_use[free] = true;
        Some(free as VoiceTag)
    }

    /// Returns a slot to the pool. Releasing a free or out-of-range slot is
    /// a no-op.
    pub fn release(&mut self, tag: VoiceTag) {
        if let Some(slot) = self.in_use.get_mut(tag as usize) {
            *slot = false;
        }
    }

    /// Number of slots currently claimed.
    pub fn in_use(&self) -> usize {
        self.in_use.iter().filter(|&&used| used).count()
    }

    /// Number of slots still free.
    pub fn available(&self) -> usize {
        MAX_VOICES - self.in_use()
    }
}

impl Default for VoiceSlots {
    fn default() -> Self {
        Self::new()
    }
}
