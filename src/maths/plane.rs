//! Planes and the reflection matrices built from them

use cgmath::{InnerSpace, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Plane in `normal . p + d = 0` form
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: [f32; 3],
    pub d: f32,
}

impl Plane {
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            normal: [a, b, c],
            d,
        }
    }

    pub fn from_position_and_normal(origin: Vector3<f32>, normal: Vector3<f32>) -> Self {
        let n = normal.normalize();
        Self::new(n.x, n.y, n.z, -n.dot(origin))
    }

    pub fn normal(&self) -> Vector3<f32> {
        Vector3::from(self.normal)
    }

    pub fn normalize(&mut self) -> &mut Self {
        let norm = self.normal().magnitude();
        if norm != 0.0 {
            let magnitude = 1.0 / norm;
            self.normal = (self.normal() * magnitude).into();
            self.d *= magnitude;
        }
        self
    }

    pub fn normalized(&self) -> Self {
        let mut plane = *self;
        plane.normalize();
        plane
    }

    pub fn signed_distance_to(&self, point: Vector3<f32>) -> f32 {
        self.normal().dot(point) + self.d
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.normal[0], self.normal[1], self.normal[2], self.d]
    }
}

/// Builds the matrix reflecting points across `plane`
pub fn reflection_matrix(plane: &Plane) -> Matrix4<f32> {
    let p = plane.normalized();
    let [x, y, z] = p.normal;
    let (tx, ty, tz) = (-2.0 * x, -2.0 * y, -2.0 * z);

    #[rustfmt::skip]
    let m = Matrix4::new(
        tx * x + 1.0, ty * x,       tz * x,       0.0,
        tx * y,       ty * y + 1.0, tz * y,       0.0,
        tx * z,       ty * z,       tz * z + 1.0, 0.0,
        tx * p.d,     ty * p.d,     tz * p.d,     1.0,
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Point3, Transform};

    #[test]
    fn test_normalize_scales_distance() {
        let plane = Plane::new(0.0, 2.0, 0.0, 4.0).normalized();
        assert_eq!(plane.normal, [0.0, 1.0, 0.0]);
        assert_eq!(plane.d, 2.0);
    }

    #[test]
    fn test_reflection_across_ground() {
        let plane = Plane::new(0.0, 1.0, 0.0, 0.0);
        let reflected = reflection_matrix(&plane).transform_point(Point3::new(1.0, 3.0, -2.0));
        assert!((reflected.x - 1.0).abs() < 1e-6);
        assert!((reflected.y + 3.0).abs() < 1e-6);
        assert!((reflected.z + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_reflection_across_offset_plane() {
        // y = 1 plane
        let plane = Plane::new(0.0, 1.0, 0.0, -1.0);
        let reflected = reflection_matrix(&plane).transform_point(Point3::new(0.0, 3.0, 0.0));
        assert!((reflected.y + 1.0).abs() < 1e-6);
    }
}
