//! Angle representation stored in radians

use std::f32::consts::PI;
use std::fmt;

use cgmath::Vector2;

/// An angle kept in radians, normalised so negative inputs wrap into `[0, 2π)`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Angle {
    radians: f32,
}

impl Angle {
    pub fn new(radians: f32) -> Self {
        let radians = if radians < 0.0 {
            radians + 2.0 * PI
        } else {
            radians
        };
        Self { radians }
    }

    pub fn from_radians(radians: f32) -> Self {
        Self::new(radians)
    }

    pub fn from_degrees(degrees: f32) -> Self {
        Self::new(degrees * PI / 180.0)
    }

    /// Gradient angle of the line joining `a` (origin) to `b`
    pub fn between_two_points(a: Vector2<f32>, b: Vector2<f32>) -> Self {
        let delta = b - a;
        Self::new(delta.y.atan2(delta.x))
    }

    pub fn degrees(&self) -> f32 {
        self.radians * 180.0 / PI
    }

    pub fn radians(&self) -> f32 {
        self.radians
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

impl From<cgmath::Rad<f32>> for Angle {
    fn from(rad: cgmath::Rad<f32>) -> Self {
        Self::new(rad.0)
    }
}

impl From<Angle> for cgmath::Rad<f32> {
    fn from(angle: Angle) -> Self {
        cgmath::Rad(angle.radians)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_radians_wrap() {
        let angle = Angle::from_radians(-PI / 2.0);
        assert!((angle.radians() - 3.0 * PI / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_degrees_round_trip() {
        let angle = Angle::from_degrees(90.0);
        assert!((angle.radians() - PI / 2.0).abs() < 1e-6);
        assert!((angle.degrees() - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_between_two_points() {
        let angle = Angle::between_two_points(Vector2::new(1.0, 1.0), Vector2::new(1.0, 3.0));
        assert!((angle.degrees() - 90.0).abs() < 1e-4);

        let behind = Angle::between_two_points(Vector2::new(0.0, 0.0), Vector2::new(0.0, -1.0));
        assert!((behind.degrees() - 270.0).abs() < 1e-3);
    }
}
