//! Babylon Native
//!
//! A scene graph, material and post-process engine rendered through wgpu,
//! with a headless backend for running frames without a GPU.

pub mod app;
pub mod cameras;
pub mod engine;
pub mod error;
pub mod layers;
pub mod lights;
pub mod loaders;
pub mod materials;
pub mod maths;
pub mod meshes;
pub mod misc;
pub mod postprocesses;
pub mod prelude;
pub mod prepass;
pub mod scene;
pub mod shaders;
pub mod textures;

pub use app::{App, AppConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use scene::Scene;
