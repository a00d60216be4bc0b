//! Graph module
//!
//! Control-side description of the audio topology: buffers, nodes, edit
//! plans, and voice tagging. Everything here mutates shadow registries on
//! control threads; the render thread only ever sees the artifacts derived
//! from them (rendering sequences, resolved edits, tag lists) delivered
//! through topology requests built by the engine layer.

pub mod audio_graph;
pub mod buffer;
pub mod node;
pub mod plan;
pub mod voice;

pub use audio_graph::Graph;
pub use buffer::{BufferId, SampleBuffer};
pub use node::{NodeHandle, NodeId, PortIndex, Ports, RenderNode};
pub use plan::{EditPlan, InputEdge, OutputEdge, ResolvedEdit};
pub use voice::{VoiceSlots, VoiceTag, VoiceTagger};
