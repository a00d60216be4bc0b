//! Parameter generator node
//!
//! A zero-input, one-output node producing sample-accurate parameter ramps
//! for click-free control changes. Change requests arrive through a depth-1
//! overwrite mailbox, so only the newest request since the last render call
//! matters, and a settled parameter costs nothing per block.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::graph::node::Ports;
use crate::graph::{RenderNode, SampleBuffer};

/// Floor applied to multiplicative ramp endpoints so the logarithm stays
/// defined.
const CURVE_FLOOR: f32 = 1e-6;

/// How a transient moves from the current value to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamCurve {
    /// Arithmetic ramp: `next = prev + step`.
    Additive,
    /// Geometric ramp: `next = prev * step`. Endpoints are floored to a
    /// small positive epsilon.
    Multiplicative,
}

/// Declared range, default, and curve of one parameter.
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub curve: ParamCurve,
}

impl ParamSpec {
    /// A unipolar additive parameter over `[0, 1]`.
    pub fn unipolar(default: f32) -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            default,
            curve: ParamCurve::Additive,
        }
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// One requested change: where to go and how many samples to take.
#[derive(Clone, Copy, Debug)]
pub struct ParamChange {
    pub target: f32,
    /// Ramp length in samples; 0 means jump at the next sample.
    pub duration: u64,
}

/// Smoothing state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SmoothState {
    /// Output already written; do nothing per block.
    Steady,
    /// Ramping toward the target.
    Transient,
    /// Fill one whole block with the current value, then go steady.
    TransientToSteady,
}

/// Background-side handle for requesting parameter changes.
///
/// Cheap to clone; all clones feed the same depth-1 mailbox, newest
/// request wins.
#[derive(Clone)]
pub struct ParamHandle {
    mailbox: Arc<ArrayQueue<ParamChange>>,
}

impl ParamHandle {
    /// Requests a ramp to `target` over `duration` samples. Overwrites any
    /// change still pending in the mailbox. Never blocks.
    pub fn request(&self, target: f32, duration: u64) {
        let _ = self.mailbox.force_push(ParamChange { target, duration });
    }
}

/// The parameter generator node.
///
/// Starts in the block-filling state so the first render call writes the
/// default value across the whole output buffer.
pub struct ParamNode {
    ports: Ports,
    spec: ParamSpec,
    current: f32,
    target: f32,
    step: f32,
    /// Samples left in the running transient.
    remaining: u64,
    state: SmoothState,
    mailbox: Arc<ArrayQueue<ParamChange>>,
}

impl ParamNode {
    pub fn new(spec: ParamSpec) -> Self {
        let default = spec.clamp(spec.default);
        Self {
            ports: Ports::new(0, 1),
            spec,
            current: default,
            target: default,
            step: 0.0,
            remaining: 0,
            state: SmoothState::TransientToSteady,
            mailbox: Arc::new(ArrayQueue::new(1)),
        }
    }

    /// A handle feeding this node's mailbox.
    pub fn handle(&self) -> ParamHandle {
        ParamHandle {
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// The value the node last settled on or ramped to.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Jumps to a value with no ramp and no mailbox round trip. Render
    /// thread only.
    pub fn set_immediate(&mut self, value: f32) {
        let value = self.spec.clamp(value);
        self.current = value;
        self.target = value;
        self.remaining = 0;
        self.state = SmoothState::TransientToSteady;
    }

    fn begin(&mut self, change: ParamChange) {
        let target = self.spec.clamp(change.target);
        if change.duration == 0 {
            self.current = target;
            self.target = target;
            self.remaining = 0;
            self.state = SmoothState::TransientToSteady;
            return;
        }

        self.target = target;
        self.remaining = change.duration;
        let duration = change.duration as f32;
        self.step = match self.spec.curve {
            ParamCurve::Additive => (target - self.current) / duration,
            ParamCurve::Multiplicative => {
                let start = self.current.max(CURVE_FLOOR);
                let end = target.max(CURVE_FLOOR);
                self.current = start;
                ((end.ln() - start.ln()) / duration).exp()
            }
        };
        self.state = SmoothState::Transient;
    }

    fn advance(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                // The final sample carries the exact target, not the
                // accumulated approximation.
                self.current = self.target;
            } else {
                self.current = match self.spec.curve {
                    ParamCurve::Additive => self.current + self.step,
                    ParamCurve::Multiplicative => self.current * self.step,
                };
            }
        }
        self.current
    }
}

impl RenderNode for ParamNode {
    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    fn render(&mut self, frames: usize) {
        if let Some(change) = self.mailbox.pop() {
            self.begin(change);
        }

        match self.state {
            SmoothState::Steady => {}
            SmoothState::TransientToSteady => {
                if let Some(out) = self.ports.output(0) {
                    out.samples_mut()[..frames].fill(self.current);
                }
                self.state = SmoothState::Steady;
            }
            SmoothState::Transient => {
                let out: Option<Arc<SampleBuffer>> = self.ports.output(0).cloned();
                match out {
                    Some(buffer) => {
                        let samples = &mut buffer.samples_mut()[..frames];
                        for sample in samples.iter_mut() {
                            *sample = self.advance();
                        }
                    }
                    None => {
                        // Unconnected output: the ramp still advances so a
                        // later connection sees the right value.
                        for _ in 0..frames {
                            self.advance();
                        }
                    }
                }
                if self.remaining == 0 {
                    self.state = SmoothState::TransientToSteady;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BLOCK_SIZE;

    fn connected(spec: ParamSpec) -> (ParamNode, Arc<SampleBuffer>) {
        let mut node = ParamNode::new(spec);
        let buffer = Arc::new(SampleBuffer::new(1));
        node.ports_mut().set_output(0, Some(Arc::clone(&buffer)));
        (node, buffer)
    }

    #[test]
    fn test_first_render_fills_default() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.5));
        node.render(BLOCK_SIZE);
        assert!(buffer.samples().iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_steady_writes_nothing() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.5));
        node.render(BLOCK_SIZE);
        buffer.samples_mut().fill(9.0);
        // Settled: the block must stay untouched.
        node.render(BLOCK_SIZE);
        assert!(buffer.samples().iter().all(|&s| s == 9.0));
    }

    #[test]
    fn test_additive_ramp_hits_target_exactly() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.0));
        let handle = node.handle();
        node.render(BLOCK_SIZE); // settle at default

        let duration = 100u64;
        handle.request(1.0, duration);
        node.render(BLOCK_SIZE);

        let samples = buffer.samples();
        // Strictly rising over the ramp.
        assert!(samples[0] > 0.0);
        assert!(samples[50] > samples[10]);
        // Exactly the target from sample D-1 on (equality, not tolerance).
        assert_eq!(samples[duration as usize - 1], 1.0);
        assert!(samples[duration as usize..].iter().all(|&s| s == 1.0));
        assert_eq!(node.current(), 1.0);
    }

    #[test]
    fn test_additive_ramp_spans_blocks() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.0));
        let handle = node.handle();
        node.render(BLOCK_SIZE);

        let duration = (BLOCK_SIZE * 2) as u64;
        handle.request(1.0, duration);
        node.render(BLOCK_SIZE);
        let mid = buffer.samples()[BLOCK_SIZE - 1];
        assert!(mid > 0.4 && mid < 0.6);

        node.render(BLOCK_SIZE);
        assert_eq!(buffer.samples()[BLOCK_SIZE - 1], 1.0);
    }

    #[test]
    fn test_multiplicative_ramp_converges() {
        let spec = ParamSpec {
            min: 0.0,
            max: 20000.0,
            default: 100.0,
            curve: ParamCurve::Multiplicative,
        };
        let (mut node, buffer) = connected(spec);
        let handle = node.handle();
        node.render(BLOCK_SIZE);

        handle.request(1000.0, 64);
        node.render(BLOCK_SIZE);

        let samples = buffer.samples();
        // Geometric: equal ratios between successive samples.
        let r1 = samples[1] / samples[0];
        let r2 = samples[2] / samples[1];
        assert!((r1 - r2).abs() < 1e-3);
        assert_eq!(samples[63], 1000.0);
        assert!((node.current() - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn test_duration_zero_jumps_next_sample() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.0));
        let handle = node.handle();
        node.render(BLOCK_SIZE);

        handle.request(0.75, 0);
        node.render(BLOCK_SIZE);
        // The very first sample of the block carries the target.
        assert_eq!(buffer.samples()[0], 0.75);
        assert!(buffer.samples().iter().all(|&s| s == 0.75));
    }

    #[test]
    fn test_target_is_clamped() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.0));
        let handle = node.handle();
        node.render(BLOCK_SIZE);

        handle.request(3.0, 0);
        node.render(BLOCK_SIZE);
        assert_eq!(buffer.samples()[0], 1.0);
    }

    #[test]
    fn test_mailbox_keeps_newest_request() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.0));
        let handle = node.handle();
        node.render(BLOCK_SIZE);

        handle.request(0.2, 0);
        handle.request(0.9, 0);
        node.render(BLOCK_SIZE);
        assert_eq!(buffer.samples()[0], 0.9);
    }

    #[test]
    fn test_unconnected_output_still_advances() {
        let mut node = ParamNode::new(ParamSpec::unipolar(0.0));
        let handle = node.handle();
        node.render(BLOCK_SIZE);

        handle.request(1.0, 64);
        node.render(BLOCK_SIZE);
        assert_eq!(node.current(), 1.0);
    }

    #[test]
    fn test_set_immediate() {
        let (mut node, buffer) = connected(ParamSpec::unipolar(0.0));
        node.render(BLOCK_SIZE);

        node.set_immediate(0.3);
        node.render(BLOCK_SIZE);
        assert!(buffer.samples().iter().all(|&s| s == 0.3));
    }
}
