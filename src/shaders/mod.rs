//! WGSL shader sources, preprocessing and uniform layout generation

pub mod layout;
pub mod processor;
pub mod store;

pub use layout::{generate_bindings, SamplerDecl, UniformDecl, UniformLayout, UniformType};
pub use processor::{process, DefineMap, ProcessedShader, ProcessingOptions};
pub use store::{ShaderStage, ShaderStore};
