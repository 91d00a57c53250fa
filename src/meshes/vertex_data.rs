//! Vertex streams of a mesh and builders for common shapes
//!
//! All shapes are Y-up, centered at the origin and wound counter-clockwise
//! when seen from outside.

use std::f32::consts::PI;

use cgmath::{InnerSpace, Vector3};

use crate::engine::backend::MeshVertex;

/// Positions, normals, uvs and optional colors sharing one index list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub colors: Option<Vec<[f32; 4]>>,
    pub indices: Vec<u32>,
}

impl VertexData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty() && self.normals.len() == self.positions.len()
    }

    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty() && self.uvs.len() == self.positions.len()
    }

    pub fn has_colors(&self) -> bool {
        self.colors
            .as_ref()
            .is_some_and(|colors| colors.len() == self.positions.len())
    }

    /// Whether any vertex color is not fully opaque
    pub fn has_vertex_alpha(&self) -> bool {
        self.colors
            .as_ref()
            .is_some_and(|colors| colors.iter().any(|c| c[3] < 1.0))
    }

    /// Smooth normals averaged from the faces around each vertex
    pub fn compute_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
        let mut normals = vec![Vector3::new(0.0f32, 0.0, 0.0); positions.len()];
        for triangle in indices.chunks_exact(3) {
            let [i0, i1, i2] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            let (Some(v0), Some(v1), Some(v2)) =
                (positions.get(i0), positions.get(i1), positions.get(i2))
            else {
                continue;
            };
            let v0 = Vector3::from(*v0);
            let face_normal = (Vector3::from(*v1) - v0).cross(Vector3::from(*v2) - v0);
            for index in [i0, i1, i2] {
                normals[index] += face_normal;
            }
        }
        normals
            .into_iter()
            .map(|normal| {
                if normal.magnitude2() > 0.0 {
                    normal.normalize().into()
                } else {
                    [0.0, 1.0, 0.0]
                }
            })
            .collect()
    }

    /// Axis-aligned bounds of the positions, `None` when empty
    pub fn extents(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        let first = Vector3::from(*self.positions.first()?);
        Some(self.positions.iter().fold((first, first), |(min, max), p| {
            (
                Vector3::new(min.x.min(p[0]), min.y.min(p[1]), min.z.min(p[2])),
                Vector3::new(max.x.max(p[0]), max.y.max(p[1]), max.z.max(p[2])),
            )
        }))
    }

    /// Interleaves the streams into GPU vertices, filling missing ones
    pub fn to_mesh_vertices(&self) -> Vec<MeshVertex> {
        let colors = self.colors.as_deref().unwrap_or_default();
        self.positions
            .iter()
            .enumerate()
            .map(|(i, position)| MeshVertex {
                position: *position,
                normal: self.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
                uv: self.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
                color: colors.get(i).copied().unwrap_or([1.0, 1.0, 1.0, 1.0]),
            })
            .collect()
    }

    /// Box of the given width, height and depth
    pub fn create_box(width: f32, height: f32, depth: f32) -> Self {
        let (x, y, z) = (width * 0.5, height * 0.5, depth * 0.5);
        let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
            ([0.0, 0.0, 1.0], [[-x, -y, z], [x, -y, z], [x, y, z], [-x, y, z]]),
            ([0.0, 0.0, -1.0], [[x, -y, -z], [-x, -y, -z], [-x, y, -z], [x, y, -z]]),
            ([-1.0, 0.0, 0.0], [[-x, -y, -z], [-x, -y, z], [-x, y, z], [-x, y, -z]]),
            ([1.0, 0.0, 0.0], [[x, -y, z], [x, -y, -z], [x, y, -z], [x, y, z]]),
            ([0.0, 1.0, 0.0], [[-x, y, z], [x, y, z], [x, y, -z], [-x, y, -z]]),
            ([0.0, -1.0, 0.0], [[-x, -y, -z], [x, -y, -z], [x, -y, z], [-x, -y, z]]),
        ];
        let mut data = Self::new();
        for (normal, corners) in faces {
            let base = data.positions.len() as u32;
            data.positions.extend_from_slice(&corners);
            data.normals.extend_from_slice(&[normal; 4]);
            data.uvs
                .extend_from_slice(&[[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
            data.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        data
    }

    /// UV sphere; `segments` controls both rings and slices
    pub fn create_sphere(segments: u32, diameter: f32) -> Self {
        let rings = segments.max(1) + 2;
        let slices = rings * 2;
        let radius = diameter * 0.5;
        let mut data = Self::new();

        for ring in 0..=rings {
            let theta = ring as f32 * PI / rings as f32;
            let (sin_theta, cos_theta) = theta.sin_cos();
            for slice in 0..=slices {
                let phi = slice as f32 * 2.0 * PI / slices as f32;
                let (sin_phi, cos_phi) = phi.sin_cos();
                let normal = [sin_theta * cos_phi, cos_theta, sin_theta * sin_phi];
                data.positions
                    .push([normal[0] * radius, normal[1] * radius, normal[2] * radius]);
                data.normals.push(normal);
                data.uvs
                    .push([slice as f32 / slices as f32, ring as f32 / rings as f32]);
            }
        }

        for ring in 0..rings {
            for slice in 0..slices {
                let first = ring * (slices + 1) + slice;
                let second = first + slices + 1;
                data.indices
                    .extend_from_slice(&[first, first + 1, second, second, first + 1, second + 1]);
            }
        }
        data
    }

    /// Flat grid in the XZ plane facing +Y
    pub fn create_ground(width: f32, height: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let mut data = Self::new();
        for row in 0..=subdivisions {
            let v = row as f32 / subdivisions as f32;
            for column in 0..=subdivisions {
                let u = column as f32 / subdivisions as f32;
                data.positions
                    .push([(u - 0.5) * width, 0.0, (v - 0.5) * height]);
                data.normals.push([0.0, 1.0, 0.0]);
                data.uvs.push([u, 1.0 - v]);
            }
        }
        for row in 0..subdivisions {
            for column in 0..subdivisions {
                let i = row * (subdivisions + 1) + column;
                let next_row = i + subdivisions + 1;
                data.indices
                    .extend_from_slice(&[i, next_row, i + 1, next_row, next_row + 1, i + 1]);
            }
        }
        data
    }

    /// Square in the XY plane facing +Z
    pub fn create_plane(size: f32) -> Self {
        let half = size * 0.5;
        Self {
            positions: vec![
                [-half, -half, 0.0],
                [half, -half, 0.0],
                [half, half, 0.0],
                [-half, half, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
            colors: None,
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    /// Capped cylinder (or cone) along Y
    pub fn create_cylinder(
        height: f32,
        diameter_top: f32,
        diameter_bottom: f32,
        tessellation: u32,
    ) -> Self {
        let tessellation = tessellation.max(3);
        let half_height = height * 0.5;
        let (radius_top, radius_bottom) = (diameter_top * 0.5, diameter_bottom * 0.5);
        let slope = if height > 0.0 {
            (radius_bottom - radius_top) / height
        } else {
            0.0
        };
        let mut data = Self::new();

        for i in 0..=tessellation {
            let u = i as f32 / tessellation as f32;
            let (sin_a, cos_a) = (u * 2.0 * PI).sin_cos();
            let normal: [f32; 3] = Vector3::new(cos_a, slope, sin_a).normalize().into();
            data.positions
                .push([radius_bottom * cos_a, -half_height, radius_bottom * sin_a]);
            data.positions
                .push([radius_top * cos_a, half_height, radius_top * sin_a]);
            data.normals.extend_from_slice(&[normal, normal]);
            data.uvs.extend_from_slice(&[[u, 1.0], [u, 0.0]]);
        }
        for i in 0..tessellation {
            let bottom = i * 2;
            let top = bottom + 1;
            let (bottom_next, top_next) = (bottom + 2, top + 2);
            data.indices
                .extend_from_slice(&[bottom, top, bottom_next, top, top_next, bottom_next]);
        }

        for (y, radius, normal_y) in [(-half_height, radius_bottom, -1.0), (half_height, radius_top, 1.0)] {
            if radius <= 0.0 {
                continue;
            }
            let center = data.positions.len() as u32;
            data.positions.push([0.0, y, 0.0]);
            data.normals.push([0.0, normal_y, 0.0]);
            data.uvs.push([0.5, 0.5]);
            for i in 0..=tessellation {
                let (sin_a, cos_a) = (i as f32 / tessellation as f32 * 2.0 * PI).sin_cos();
                data.positions.push([radius * cos_a, y, radius * sin_a]);
                data.normals.push([0.0, normal_y, 0.0]);
                data.uvs.push([0.5 + cos_a * 0.5, 0.5 + sin_a * 0.5]);
            }
            for i in 0..tessellation {
                let current = center + 1 + i;
                let next = current + 1;
                if normal_y < 0.0 {
                    data.indices.extend_from_slice(&[center, current, next]);
                } else {
                    data.indices.extend_from_slice(&[center, next, current]);
                }
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward(data: &VertexData) {
        for triangle in data.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]]
                .map(|i| Vector3::from(data.positions[i as usize]));
            let face = (b - a).cross(c - a);
            if face.magnitude2() < 1e-12 {
                continue;
            }
            let normal = Vector3::from(data.normals[triangle[0] as usize]);
            assert!(face.dot(normal) > 0.0, "triangle {:?} is wound inwards", triangle);
        }
    }

    #[test]
    fn test_box() {
        let data = VertexData::create_box(2.0, 2.0, 2.0);
        assert_eq!(data.vertex_count(), 24);
        assert_eq!(data.triangle_count(), 12);
        let (min, max) = data.extents().unwrap();
        assert_eq!(min, Vector3::new(-1.0, -1.0, -1.0));
        assert_eq!(max, Vector3::new(1.0, 1.0, 1.0));
        assert_outward(&data);
    }

    #[test]
    fn test_sphere() {
        let data = VertexData::create_sphere(4, 2.0);
        assert_eq!(data.vertex_count(), data.normals.len());
        assert_eq!(data.vertex_count(), data.uvs.len());
        assert_eq!(data.vertex_count(), (6 + 1) * (12 + 1));
        assert_outward(&data);
    }

    #[test]
    fn test_ground() {
        let data = VertexData::create_ground(4.0, 2.0, 2);
        assert_eq!(data.vertex_count(), 9);
        assert_eq!(data.indices.len(), 24);
        assert_outward(&data);
    }

    #[test]
    fn test_cylinder_and_cone() {
        assert_outward(&VertexData::create_cylinder(2.0, 1.0, 1.0, 8));
        let cone = VertexData::create_cylinder(2.0, 0.0, 1.0, 8);
        assert_outward(&cone);
        assert!(cone.positions.iter().all(|p| p[1] < 1.5));
    }

    #[test]
    fn test_computed_normals_match_winding() {
        let mut data = VertexData::create_plane(1.0);
        let normals = VertexData::compute_normals(&data.positions, &data.indices);
        assert!(normals.iter().all(|n| (n[2] - 1.0).abs() < 1e-6));
        data.normals.clear();
        assert!(!data.has_normals());
        assert_eq!(data.to_mesh_vertices()[0].normal, [0.0, 1.0, 0.0]);
    }
}
