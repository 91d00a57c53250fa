//! Math types not covered by cgmath
//!
//! Vectors and matrices come from cgmath; this module adds angles, colors,
//! planes and the power-of-two helpers used when sizing textures.

pub mod angle;
pub mod color;
pub mod plane;
pub mod scalar;
pub mod spherical;

pub use angle::Angle;
pub use color::{Color3, Color4};
pub use plane::{reflection_matrix, Plane};
pub use scalar::*;
pub use spherical::{SphericalHarmonics, SphericalPolynomial};

use serde::{Deserialize, Serialize};

/// Width and height pair, used for texture and viewport sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

/// Normalised viewport in render-target space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Converts to pixels for a render target of the given size
    pub fn to_global(&self, render_width: u32, render_height: u32) -> [f32; 4] {
        [
            self.x * render_width as f32,
            self.y * render_height as f32,
            self.width * render_width as f32,
            self.height * render_height as f32,
        ]
    }
}
