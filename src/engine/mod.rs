//! Engine core: the render backend abstraction and the resource owner

pub mod backend;
pub mod constants;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod headless;
pub mod scene_component_constants;
pub mod wgpu_backend;

pub use backend::{
    DrawCall, DrawGeometry, DrawState, EngineCaps, GpuMeshHandle, GpuProgramHandle,
    GpuTextureHandle, MeshVertex, PassDesc, RenderBackend, SamplerDesc, TextureDimension,
    VertexInput,
};
pub use engine::{Engine, EngineOptions, RenderPassOptions, RenderTargetOptions};
pub use headless::{BackendCommand, CommandLog, HeadlessBackend};
pub use wgpu_backend::WgpuBackend;
