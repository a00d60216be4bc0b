//! Engine module
//!
//! Runtime half of the crate: cross-thread channels, the render-thread
//! scheduler with skip scheduling, topology requests, deferred reclamation,
//! and the background request pipeline.

pub mod channels;
pub mod pipeline;
pub mod reclaim;
pub mod request;
pub mod scheduler;

pub use channels::{ControlLink, EngineChannels, RenderLink, RetiredState};
pub use pipeline::{
    AllocateVoice, ControlState, EngineRequest, EngineShared, GraphUpdate, ReleaseVoice,
    RequestPipeline,
};
pub use reclaim::{Graveyard, Retired};
pub use request::TopologyRequest;
pub use scheduler::Scheduler;
