//! Physically based rendering material

pub mod brdf_configuration;
pub mod defines;
pub mod material;

pub use brdf_configuration::PbrBrdfConfiguration;
pub use defines::PbrMaterialDefines;
pub use material::PbrMaterial;
