//! Named groups of post processes attached to cameras as a unit
//!
//! A [`PostProcessRenderEffect`] creates its post processes on demand, once
//! or per camera. A [`PostProcessRenderPipeline`] orders effects and tracks
//! the cameras it is attached to; the scene's
//! [`PostProcessRenderPipelineManager`] refreshes pipelines every frame.

pub mod effect;
pub mod manager;
pub mod pipeline;

pub use effect::{PostProcessFactory, PostProcessRenderEffect};
pub use manager::PostProcessRenderPipelineManager;
pub use pipeline::PostProcessRenderPipeline;

use crate::engine::Engine;
use crate::postprocesses::post_process::PostProcessArena;
use crate::scene::NodeArena;

/// Scene state pipeline operations work on
pub struct RenderPipelineContext<'a> {
    pub engine: &'a mut Engine,
    pub nodes: &'a mut NodeArena,
    pub post_processes: &'a mut PostProcessArena,
}
