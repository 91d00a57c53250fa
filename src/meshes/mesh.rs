//! Renderable geometry attached to a scene node

use cgmath::{InnerSpace, Matrix4, Transform, Vector3};
use log::debug;

use crate::engine::backend::{DrawGeometry, DrawState, GpuMeshHandle};
use crate::engine::Engine;
use crate::error::Result;
use crate::materials::{DrawWrapper, Material, MaterialContext, MaterialId, MeshDrawInfo};
use crate::meshes::vertex_data::VertexData;
use crate::misc::Observable;
use crate::scene::NodeId;

/// Payload of the per-draw mesh observables
///
/// Observers may switch stencil writes or tweak the draw state before the
/// mesh is submitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDrawEvent {
    pub mesh: NodeId,
    pub stencil_buffer: bool,
    pub state: DrawState,
}

/// World-space axis-aligned bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingInfo {
    pub minimum: Vector3<f32>,
    pub maximum: Vector3<f32>,
}

impl BoundingInfo {
    pub fn center(&self) -> Vector3<f32> {
        (self.minimum + self.maximum) * 0.5
    }

    pub fn extend_size(&self) -> Vector3<f32> {
        (self.maximum - self.minimum) * 0.5
    }

    pub fn radius(&self) -> f32 {
        self.extend_size().magnitude()
    }
}

pub struct Mesh {
    vertex_data: VertexData,
    pub material: Option<MaterialId>,
    /// Multiplies the material alpha; below 1 the mesh is alpha blended
    pub visibility: f32,
    pub is_visible: bool,
    pub layer_mask: u32,
    pub on_before_bind: Observable<MeshDrawEvent>,
    pub on_after_render: Observable<MeshDrawEvent>,
    pub(crate) draw_wrapper: DrawWrapper,
    gpu: Option<GpuMeshHandle>,
    gpu_dirty: bool,
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("vertices", &self.vertex_data.vertex_count())
            .field("material", &self.material)
            .field("visibility", &self.visibility)
            .field("is_visible", &self.is_visible)
            .finish()
    }
}

impl Mesh {
    pub fn new(vertex_data: VertexData) -> Self {
        let mut mesh = Self {
            vertex_data: VertexData::default(),
            material: None,
            visibility: 1.0,
            is_visible: true,
            layer_mask: 0x0FFF_FFFF,
            on_before_bind: Observable::new(),
            on_after_render: Observable::new(),
            draw_wrapper: DrawWrapper::default(),
            gpu: None,
            gpu_dirty: true,
        };
        mesh.set_vertex_data(vertex_data);
        mesh
    }

    pub fn vertex_data(&self) -> &VertexData {
        &self.vertex_data
    }

    /// Replaces the geometry; normals are generated when missing
    pub fn set_vertex_data(&mut self, mut vertex_data: VertexData) {
        if !vertex_data.has_normals() && !vertex_data.indices.is_empty() {
            vertex_data.normals =
                VertexData::compute_normals(&vertex_data.positions, &vertex_data.indices);
        }
        self.vertex_data = vertex_data;
        self.gpu_dirty = true;
    }

    pub fn total_vertices(&self) -> usize {
        self.vertex_data.vertex_count()
    }

    pub fn total_indices(&self) -> usize {
        self.vertex_data.indices.len()
    }

    /// Bounds of the geometry transformed by `world`
    pub fn bounding_info(&self, world: &Matrix4<f32>) -> Option<BoundingInfo> {
        let (min, max) = self.vertex_data.extents()?;
        let corners = (0..8).map(|i| {
            let corner = Vector3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            );
            world.transform_vector(corner) + world.w.truncate()
        });
        let mut bounds: Option<BoundingInfo> = None;
        for corner in corners {
            bounds = Some(match bounds {
                None => BoundingInfo {
                    minimum: corner,
                    maximum: corner,
                },
                Some(b) => BoundingInfo {
                    minimum: Vector3::new(
                        b.minimum.x.min(corner.x),
                        b.minimum.y.min(corner.y),
                        b.minimum.z.min(corner.z),
                    ),
                    maximum: Vector3::new(
                        b.maximum.x.max(corner.x),
                        b.maximum.y.max(corner.y),
                        b.maximum.z.max(corner.z),
                    ),
                },
            });
        }
        bounds
    }

    pub fn gpu_mesh(&self) -> Option<GpuMeshHandle> {
        self.gpu
    }

    /// Uploads the geometry when it changed; `None` for empty meshes
    pub fn ensure_buffers(&mut self, engine: &mut Engine) -> Result<Option<GpuMeshHandle>> {
        if !self.gpu_dirty {
            return Ok(self.gpu);
        }
        self.release_buffers(engine);
        self.gpu_dirty = false;
        if self.vertex_data.indices.is_empty() {
            return Ok(None);
        }
        let vertices = self.vertex_data.to_mesh_vertices();
        let handle = engine.create_mesh_buffers(&vertices, &self.vertex_data.indices)?;
        debug!(
            "Uploaded mesh buffers ({} vertices, {} indices)",
            vertices.len(),
            self.vertex_data.indices.len()
        );
        self.gpu = Some(handle);
        Ok(self.gpu)
    }

    pub fn release_buffers(&mut self, engine: &mut Engine) {
        if let Some(handle) = self.gpu.take() {
            engine.release_mesh_buffers(handle);
        }
        self.gpu_dirty = true;
    }

    pub fn draw_info(&self, id: NodeId, world: Matrix4<f32>) -> MeshDrawInfo {
        let scale = [world.x, world.y, world.z].map(|axis| axis.truncate().magnitude2());
        let non_uniform_scaling = (scale[0] - scale[1]).abs() > 1e-6
            || (scale[1] - scale[2]).abs() > 1e-6;
        MeshDrawInfo {
            id,
            world,
            visibility: self.visibility,
            has_normals: self.vertex_data.has_normals(),
            has_uvs: self.vertex_data.has_uvs(),
            has_vertex_colors: self.vertex_data.has_colors(),
            has_vertex_alpha: self.vertex_data.has_vertex_alpha(),
            non_uniform_scaling,
        }
    }

    /// Prepares and draws the mesh with `material`
    ///
    /// Returns false when the material effect is still compiling, in which
    /// case nothing is drawn this frame. `invert_culling` culls front faces
    /// instead, for mirrored views.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        engine: &mut Engine,
        id: NodeId,
        world: Matrix4<f32>,
        material_id: MaterialId,
        material: &mut dyn Material,
        ctx: &MaterialContext<'_>,
        invert_culling: bool,
    ) -> Result<bool> {
        let Some(geometry) = self.ensure_buffers(engine)? else {
            return Ok(false);
        };
        let info = self.draw_info(id, world);
        self.draw_wrapper.bind_material(engine, Some(material_id));
        if !material.is_ready_for_mesh(engine, ctx, &info, &mut self.draw_wrapper)? {
            return Ok(false);
        }
        let Some(effect) = material.bind_for_mesh(engine, ctx, &info, &self.draw_wrapper) else {
            return Ok(false);
        };

        let blending = material.needs_alpha_blending_for_mesh(&info);
        let (alpha_mode, depth_write) = material.base().state(blending);
        let state = DrawState {
            alpha_mode,
            depth_write,
            cull_back_faces: material.base().back_face_culling.then_some(!invert_culling),
            ..Default::default()
        };
        self.draw(engine, id, effect, geometry, state)?;
        Ok(true)
    }

    /// Submits one draw, letting the observables adjust stencil and state
    pub(crate) fn draw(
        &mut self,
        engine: &mut Engine,
        id: NodeId,
        effect: crate::materials::EffectKey,
        geometry: GpuMeshHandle,
        state: DrawState,
    ) -> Result<()> {
        let mut event = MeshDrawEvent {
            mesh: id,
            stencil_buffer: engine.stencil_buffer(),
            state,
        };
        self.on_before_bind.notify(&mut event);
        engine.set_stencil_buffer(event.stencil_buffer);
        engine.draw_effect(effect, DrawGeometry::Mesh(geometry), event.state)?;
        self.on_after_render.notify(&mut event);
        engine.set_stencil_buffer(event.stencil_buffer);
        Ok(())
    }

    pub fn dispose(&mut self, engine: &mut Engine) {
        self.release_buffers(engine);
        self.draw_wrapper.reset(engine);
        self.on_before_bind.clear();
        self.on_after_render.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};

    fn id() -> NodeId {
        slotmap::SlotMap::<NodeId, ()>::with_key().insert(())
    }

    #[test]
    fn test_buffers_upload_once() {
        let backend = HeadlessBackend::new(64, 64);
        let log = backend.log();
        let mut engine = Engine::new(Box::new(backend), EngineOptions::default());
        let mut mesh = Mesh::new(VertexData::create_box(1.0, 1.0, 1.0));
        let first = mesh.ensure_buffers(&mut engine).unwrap();
        let second = mesh.ensure_buffers(&mut engine).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);

        mesh.set_vertex_data(VertexData::create_plane(1.0));
        let third = mesh.ensure_buffers(&mut engine).unwrap();
        assert_ne!(first, third);
        let releases = log
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::engine::BackendCommand::ReleaseMesh(_)))
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_missing_normals_are_generated() {
        let mut data = VertexData::create_ground(1.0, 1.0, 1);
        data.normals.clear();
        let mesh = Mesh::new(data);
        assert!(mesh.vertex_data().has_normals());
        assert!(mesh.vertex_data().normals.iter().all(|n| n[1] > 0.99));
    }

    #[test]
    fn test_draw_info_detects_non_uniform_scaling() {
        let mesh = Mesh::new(VertexData::create_box(1.0, 1.0, 1.0));
        let uniform = mesh.draw_info(id(), Matrix4::from_scale(2.0));
        assert!(!uniform.non_uniform_scaling);
        let stretched = mesh.draw_info(id(), Matrix4::from_nonuniform_scale(1.0, 3.0, 1.0));
        assert!(stretched.non_uniform_scaling);
    }

    #[test]
    fn test_bounding_info_in_world_space() {
        let mesh = Mesh::new(VertexData::create_box(2.0, 2.0, 2.0));
        let world = Matrix4::from_translation(Vector3::new(5.0, 0.0, 0.0));
        let bounds = mesh.bounding_info(&world).unwrap();
        assert_eq!(bounds.center(), Vector3::new(5.0, 0.0, 0.0));
        assert_eq!(bounds.minimum, Vector3::new(4.0, -1.0, -1.0));
    }
}
