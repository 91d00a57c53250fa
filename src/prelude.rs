//! Commonly used types
//!
//! ```no_run
//! use babylon::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     App::new(AppConfig::default().with_title("viewer"))?.run(|_engine| {
//!         let mut scene = Scene::new();
//!         scene.add_camera(
//!             "camera",
//!             Camera::new_arc_rotate(0.5, 1.0, 10.0, Vector3::new(0.0, 0.0, 0.0)),
//!         );
//!         Ok(scene)
//!     })
//! }
//! ```

pub use crate::app::{App, AppConfig};
pub use crate::cameras::{ArcRotateCamera, Camera, CameraInputEvent, CameraMode};
pub use crate::engine::constants::{AlphaMode, SamplingMode, TextureFormat, TextureType};
pub use crate::engine::{Engine, EngineOptions, HeadlessBackend, RenderBackend, WgpuBackend};
pub use crate::error::{EngineError, Result};
pub use crate::layers::{HighlightLayer, HighlightLayerOptions};
pub use crate::lights::Light;
pub use crate::loaders::{import_mesh, ImportedMeshes};
pub use crate::materials::{
    ImageProcessingConfiguration, Material, MaterialId, NodeMaterial, PbrMaterial,
};
pub use crate::maths::{Color3, Color4};
pub use crate::meshes::{Mesh, VertexData};
pub use crate::misc::{EventState, Observable};
pub use crate::postprocesses::{
    BlurPostProcess, ChromaticAberrationPostProcess, ColorCorrectionPostProcess,
    DepthOfFieldBlurPostProcess, ImageProcessingPostProcess, PassPostProcess, PostProcess,
    PostProcessId, PostProcessOptions, RefractionPostProcess, SubSurfaceScatteringPostProcess,
};
pub use crate::scene::{NodeId, Scene};
pub use crate::textures::{CubeTexture, MirrorTexture, RenderTargetTexture, Texture, TextureId};

pub use cgmath::{Matrix4, Vector3};
