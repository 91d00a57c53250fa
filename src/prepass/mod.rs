//! Pre-pass rendering: extra material outputs consumed by post processes

pub mod renderer;
pub mod sub_surface_configuration;

pub use renderer::{PrePassEffectConfiguration, PrePassRenderer, PrePassTextureType};
pub use sub_surface_configuration::{SubSurfaceConfiguration, MAX_DIFFUSION_PROFILES};
