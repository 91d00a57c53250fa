//! RGB and RGBA colors with gamma conversions

use serde::{Deserialize, Serialize};

pub const TO_GAMMA_SPACE: f32 = 1.0 / 2.2;
pub const TO_LINEAR_SPACE: f32 = 2.2;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color3 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color3 {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn black() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub const fn white() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub fn scale(&self, factor: f32) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor)
    }

    pub fn to_linear_space(&self) -> Self {
        Self::new(
            self.r.powf(TO_LINEAR_SPACE),
            self.g.powf(TO_LINEAR_SPACE),
            self.b.powf(TO_LINEAR_SPACE),
        )
    }

    pub fn to_gamma_space(&self) -> Self {
        Self::new(
            self.r.powf(TO_GAMMA_SPACE),
            self.g.powf(TO_GAMMA_SPACE),
            self.b.powf(TO_GAMMA_SPACE),
        )
    }

    pub fn to_color4(&self, alpha: f32) -> Color4 {
        Color4::new(self.r, self.g, self.b, alpha)
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[f32; 3]> for Color3 {
    fn from(c: [f32; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color4 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4 {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn transparent() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub fn scale(&self, factor: f32) -> Self {
        Self::new(
            self.r * factor,
            self.g * factor,
            self.b * factor,
            self.a * factor,
        )
    }

    pub fn to_linear_space(&self) -> Self {
        let rgb = self.rgb().to_linear_space();
        rgb.to_color4(self.a)
    }

    pub fn to_gamma_space(&self) -> Self {
        let rgb = self.rgb().to_gamma_space();
        rgb.to_color4(self.a)
    }

    pub fn rgb(&self) -> Color3 {
        Color3::new(self.r, self.g, self.b)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<[f32; 4]> for Color4 {
    fn from(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gamma_round_trip() {
        let color = Color3::new(0.2, 0.5, 0.9);
        let back = color.to_linear_space().to_gamma_space();
        assert!((back.r - color.r).abs() < 1e-5);
        assert!((back.g - color.g).abs() < 1e-5);
        assert!((back.b - color.b).abs() < 1e-5);
    }

    #[test]
    fn test_color4_keeps_alpha() {
        let color = Color4::new(0.5, 0.5, 0.5, 0.25).to_linear_space();
        assert_eq!(color.a, 0.25);
    }
}
