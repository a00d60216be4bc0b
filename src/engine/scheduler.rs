//! Scheduler
//!
//! The render-thread half of the engine: adopts precomputed topology
//! requests, keeps the skip-increment table, and walks the rendering
//! sequence once per block. Nothing in the render path allocates, locks,
//! blocks, or touches the graph registries.

use crate::constants::{BLOCK_SIZE, MAX_VOICES};
use crate::graph::voice::VoiceTag;
use crate::graph::NodeHandle;

use super::channels::{RenderLink, RetiredState};

/// Owns the live rendering state. One instance, driven from the render
/// callback.
pub struct Scheduler {
    link: RenderLink,
    sequence: Vec<NodeHandle>,
    tags: Vec<Option<VoiceTag>>,
    /// `increments[i]` is the jump from position `i` to the next position
    /// that must render, valid while `dirty` is false.
    increments: Vec<usize>,
    /// First position that must render; `>= sequence.len()` when nothing is
    /// active.
    start: usize,
    /// Bit `t` set means voice `t` is audible. All voices start inactive.
    active_mask: u64,
    dirty: bool,
    recomputes: u64,
}

impl Scheduler {
    /// Creates a scheduler with an empty sequence, wired to the render side
    /// of the engine channels.
    pub fn new(link: RenderLink) -> Self {
        Self {
            link,
            sequence: Vec::new(),
            tags: Vec::new(),
            increments: Vec::new(),
            start: 0,
            active_mask: 0,
            dirty: false,
            recomputes: 0,
        }
    }

    /// Renders one block: adopt at most one pending request, recompute the
    /// increment table if anything changed, then walk the active entries in
    /// order, each at most once.
    pub fn render(&mut self, frames: usize) {
        debug_assert!(frames <= BLOCK_SIZE);
        self.adopt_pending();
        if self.dirty {
            self.recompute_increments();
        }

        let mut i = self.start;
        while i < self.sequence.len() {
            self.sequence[i].render(frames);
            i += self.increments[i];
        }
    }

    /// Flips a voice's audibility. Render thread only. The increment table
    /// is recomputed lazily on the next render, so flipping several voices
    /// between blocks costs a single recompute.
    pub fn set_voice_active(&mut self, tag: VoiceTag, active: bool) {
        if (tag as usize) >= MAX_VOICES {
            return;
        }
        let bit = 1u64 << tag;
        if active {
            self.active_mask |= bit;
        } else {
            self.active_mask &= !bit;
        }
        self.dirty = true;
    }

    /// Length of the live rendering sequence.
    pub fn sequence_len(&self) -> usize {
        self.sequence.len()
    }

    /// How many times the increment table has been recomputed.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    fn adopt_pending(&mut self) {
        let Some(request) = self.link.pop_request() else {
            return;
        };
        // A malformed request is ignored whole; its epoch stays
        // unpublished so later epochs resolve any waiters.
        if !request.is_valid() {
            return;
        }

        for edit in &request.edits {
            edit.apply();
        }

        let epoch = request.epoch;
        let retired = RetiredState {
            edits: request.edits,
            sequence: std::mem::replace(&mut self.sequence, request.sequence),
            tags: std::mem::replace(&mut self.tags, request.tags),
            increments: std::mem::replace(&mut self.increments, request.increments),
        };
        // Full ring: the state drops here, off the ideal path but correct.
        let _ = self.link.retire(retired);

        self.link.publish(epoch);
        self.dirty = true;
    }

    /// Whether the entry at a sequence position must render.
    fn is_active(&self, i: usize) -> bool {
        match self.tags[i] {
            None => true,
            Some(tag) => self.active_mask & (1u64 << tag) != 0,
        }
    }

    /// Backward pass over the sequence. The last position gets 1; position
    /// `i` jumps straight over any inactive run starting at `i + 1`. The
    /// start offset is the first active position.
    fn recompute_increments(&mut self) {
        self.dirty = false;
        self.recomputes += 1;

        let len = self.sequence.len();
        if len == 0 {
            self.start = 0;
            return;
        }
        assert_eq!(self.tags.len(), len);
        assert_eq!(self.increments.len(), len);

        self.increments[len - 1] = 1;
        for i in (0..len - 1).rev() {
            self.increments[i] = if self.is_active(i + 1) {
                1
            } else {
                self.increments[i + 1] + 1
            };
        }
        self.start = if self.is_active(0) {
            0
        } else {
            self.increments[0]
        };
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::engine::channels::{ControlLink, EngineChannels};
    use crate::engine::request::TopologyRequest;
    use crate::graph::node::Ports;
    use crate::graph::RenderNode;

    struct CountingNode {
        ports: Ports,
        count: Arc<AtomicUsize>,
    }

    impl RenderNode for CountingNode {
        fn ports(&self) -> &Ports {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut Ports {
            &mut self.ports
        }

        fn render(&mut self, _frames: usize) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counting_handle(id: u64) -> (NodeHandle, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = NodeHandle::new(
            id,
            Box::new(CountingNode {
                ports: Ports::new(0, 0),
                count: Arc::clone(&count),
            }),
        );
        (handle, count)
    }

    /// A scheduler plus per-position render counters for a sequence with
    /// the given voice tags.
    fn scheduler_with(
        tags: Vec<Option<VoiceTag>>,
    ) -> (Scheduler, ControlLink, Vec<Arc<AtomicUsize>>) {
        let (render_link, mut control) = EngineChannels::with_defaults().split();
        let mut scheduler = Scheduler::new(render_link);

        let mut sequence = Vec::new();
        let mut counters = Vec::new();
        for i in 0..tags.len() {
            let (handle, count) = counting_handle(i as u64);
            sequence.push(handle);
            counters.push(count);
        }
        let len = tags.len();
        control.submit(TopologyRequest {
            edits: Vec::new(),
            sequence,
            tags,
            increments: vec![1; len],
            epoch: 1,
        });
        scheduler.render(BLOCK_SIZE); // adopt
        (scheduler, control, counters)
    }

    fn counts(counters: &[Arc<AtomicUsize>]) -> Vec<usize> {
        counters.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    #[test]
    fn test_adoption_publishes_epoch_and_renders() {
        let (mut scheduler, control, counters) = scheduler_with(vec![None, None]);
        assert_eq!(control.consumed_epoch(), 1);
        assert_eq!(scheduler.sequence_len(), 2);
        // The adopting render already walked the sequence once.
        assert_eq!(counts(&counters), vec![1, 1]);

        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![2, 2]);
    }

    #[test]
    fn test_invalid_request_ignored_whole() {
        let (render_link, mut control) = EngineChannels::with_defaults().split();
        let mut scheduler = Scheduler::new(render_link);

        let (handle, count) = counting_handle(1);
        control.submit(TopologyRequest {
            edits: Vec::new(),
            sequence: vec![handle],
            tags: Vec::new(), // lengths disagree
            increments: vec![1],
            epoch: 7,
        });
        scheduler.render(BLOCK_SIZE);

        assert_eq!(scheduler.sequence_len(), 0);
        assert_eq!(control.consumed_epoch(), 0);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_untagged_nodes_always_render() {
        let (mut scheduler, _control, counters) = scheduler_with(vec![None, Some(0), None]);
        // Voice 0 starts inactive, so the tagged position never renders.
        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![2, 0, 2]);
    }

    #[test]
    fn test_voice_activation_restores_branch() {
        let (mut scheduler, _control, counters) = scheduler_with(vec![Some(3), None]);
        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![0, 2]);

        scheduler.set_voice_active(3, true);
        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![1, 3]);

        scheduler.set_voice_active(3, false);
        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![1, 4]);
    }

    #[test]
    fn test_skip_walk_arbitrary_masks() {
        // Positions: [v0, none, v1, v1, none, v2]
        let tags = vec![Some(0), None, Some(1), Some(1), None, Some(2)];
        let (mut scheduler, _control, counters) = scheduler_with(tags);

        scheduler.set_voice_active(1, true);
        scheduler.render(BLOCK_SIZE);
        // The adoption render only visited the untagged positions.
        assert_eq!(counts(&counters), vec![0, 2, 1, 1, 2, 0]);

        scheduler.set_voice_active(0, true);
        scheduler.set_voice_active(1, false);
        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![1, 3, 1, 1, 3, 0]);
    }

    #[test]
    fn test_all_inactive_renders_nothing() {
        let (mut scheduler, _control, counters) = scheduler_with(vec![Some(0), Some(1)]);
        scheduler.render(BLOCK_SIZE);
        scheduler.render(BLOCK_SIZE);
        // Only the adopting render happened before tags took effect, and
        // even that one skipped both inactive voices.
        assert_eq!(counts(&counters), vec![0, 0]);
    }

    #[test]
    fn test_coincident_changes_cost_one_recompute() {
        let (mut scheduler, mut control, _counters) =
            scheduler_with(vec![Some(0), Some(1), Some(2)]);
        let after_adopt = scheduler.recompute_count();

        // Several flips plus a new request before the next block.
        scheduler.set_voice_active(0, true);
        scheduler.set_voice_active(1, true);
        let (handle, _count) = counting_handle(9);
        control.submit(TopologyRequest {
            edits: Vec::new(),
            sequence: vec![handle],
            tags: vec![None],
            increments: vec![1],
            epoch: 2,
        });
        scheduler.render(BLOCK_SIZE);
        assert_eq!(scheduler.recompute_count(), after_adopt + 1);

        // A quiet block recomputes nothing.
        scheduler.render(BLOCK_SIZE);
        assert_eq!(scheduler.recompute_count(), after_adopt + 1);
    }

    #[test]
    fn test_adoption_retires_old_state() {
        let (mut scheduler, mut control, _counters) = scheduler_with(vec![None]);
        let (handle, _count) = counting_handle(2);
        control.submit(TopologyRequest {
            edits: Vec::new(),
            sequence: vec![handle],
            tags: vec![None],
            increments: vec![1],
            epoch: 2,
        });
        scheduler.render(BLOCK_SIZE);

        // Old vectors from both the initial adoption and this one.
        assert_eq!(control.drain_retired(), 2);
        assert_eq!(control.consumed_epoch(), 2);
    }

    #[test]
    fn test_out_of_range_tag_is_ignored() {
        let (mut scheduler, _control, counters) = scheduler_with(vec![None]);
        scheduler.set_voice_active(MAX_VOICES as VoiceTag, true);
        scheduler.render(BLOCK_SIZE);
        assert_eq!(counts(&counters), vec![2]);
    }
}
