//! Scene lights

pub mod light;

pub use light::{Light, LightFalloff, LightSnapshot};
