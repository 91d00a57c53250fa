//! Outlines selected meshes with a blurred glow
//!
//! Each frame the highlighted meshes are drawn flat-coloured into a
//! reduced-size texture, blurred twice and merged over the camera output
//! where the stencil was left clear.

use cgmath::Vector2;
use log::debug;

use crate::cameras::CameraSnapshot;
use crate::engine::backend::{DrawGeometry, DrawState, VertexInput};
use crate::engine::constants::AlphaMode;
use crate::engine::{Engine, RenderTargetOptions};
use crate::error::Result;
use crate::materials::effect::EffectCreationOptions;
use crate::materials::EffectKey;
use crate::maths::{Color3, Color4, Size};
use crate::meshes::Mesh;
use crate::misc::ObserverHandle;
use crate::postprocesses::blur::BlurPostProcess;
use crate::postprocesses::post_process::{
    PostProcessArena, PostProcessContext, PostProcessId, ScenePostProcess,
};
use crate::postprocesses::PostProcessManager;
use crate::scene::{NodeArena, NodeId};
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};
use crate::textures::internal_texture::TextureKey;

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightLayerOptions {
    /// Size of the glow map relative to the render size
    pub main_texture_ratio: f32,
    /// Kernel of the horizontal blur, in texels
    pub blur_horizontal_size: f32,
    /// Kernel of the vertical blur, in texels
    pub blur_vertical_size: f32,
    /// Only render for this camera; every camera when `None`
    pub camera: Option<NodeId>,
    /// Keeps a hard edge instead of a soft falloff
    pub is_stroke: bool,
    pub alpha_blending_mode: AlphaMode,
}

impl Default for HighlightLayerOptions {
    fn default() -> Self {
        Self {
            main_texture_ratio: 0.5,
            blur_horizontal_size: 16.0,
            blur_vertical_size: 16.0,
            camera: None,
            is_stroke: false,
            alpha_blending_mode: AlphaMode::Combine,
        }
    }
}

/// Observers registered on a mesh kept out of the glow
#[derive(Debug, Clone, Copy)]
struct ExcludedMesh {
    mesh: NodeId,
    before_bind: ObserverHandle,
    after_render: ObserverHandle,
}

pub struct HighlightLayer {
    pub name: String,
    pub is_enabled: bool,
    options: HighlightLayerOptions,
    meshes: Vec<(NodeId, Color3)>,
    excluded: Vec<ExcludedMesh>,
    blurs: PostProcessArena,
    blur_chain: Vec<PostProcessId>,
    blur_texture: Option<TextureKey>,
    glow_effect: Option<EffectKey>,
    merge_effect: Option<EffectKey>,
    saved_stencil: Option<bool>,
}

impl std::fmt::Debug for HighlightLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightLayer")
            .field("name", &self.name)
            .field("is_enabled", &self.is_enabled)
            .field("meshes", &self.meshes.len())
            .field("excluded", &self.excluded.len())
            .finish()
    }
}

impl HighlightLayer {
    pub fn new(name: &str, options: HighlightLayerOptions) -> Self {
        Self {
            name: name.to_string(),
            is_enabled: true,
            options,
            meshes: Vec::new(),
            excluded: Vec::new(),
            blurs: PostProcessArena::with_key(),
            blur_chain: Vec::new(),
            blur_texture: None,
            glow_effect: None,
            merge_effect: None,
            saved_stencil: None,
        }
    }

    pub fn get_class_name(&self) -> &'static str {
        "HighlightLayer"
    }

    pub fn options(&self) -> &HighlightLayerOptions {
        &self.options
    }

    /// Highlights `mesh` with `color`, replacing any previous colour
    pub fn add_mesh(&mut self, mesh: NodeId, color: Color3) {
        match self.meshes.iter_mut().find(|(id, _)| *id == mesh) {
            Some(entry) => entry.1 = color,
            None => self.meshes.push((mesh, color)),
        }
    }

    pub fn remove_mesh(&mut self, mesh: NodeId) -> bool {
        let before = self.meshes.len();
        self.meshes.retain(|(id, _)| *id != mesh);
        before != self.meshes.len()
    }

    pub fn has_mesh(&self, mesh: NodeId) -> bool {
        self.meshes.iter().any(|(id, _)| *id == mesh)
    }

    pub fn mesh_color(&self, mesh: NodeId) -> Option<Color3> {
        self.meshes
            .iter()
            .find(|(id, _)| *id == mesh)
            .map(|(_, color)| *color)
    }

    pub fn is_excluded(&self, mesh: NodeId) -> bool {
        self.excluded.iter().any(|entry| entry.mesh == mesh)
    }

    /// Lets the glow cover `mesh`: the mesh stops writing the stencil while
    /// it draws, and restores it afterwards
    pub fn add_excluded_mesh(&mut self, id: NodeId, mesh: &mut Mesh) {
        if self.is_excluded(id) {
            return;
        }
        let before_bind = mesh.on_before_bind.add(|event, _| {
            event.stencil_buffer = false;
        });
        let after_render = mesh.on_after_render.add(|event, _| {
            event.stencil_buffer = true;
        });
        self.excluded.push(ExcludedMesh {
            mesh: id,
            before_bind,
            after_render,
        });
    }

    pub fn remove_excluded_mesh(&mut self, id: NodeId, mesh: &mut Mesh) -> bool {
        let Some(position) = self.excluded.iter().position(|entry| entry.mesh == id) else {
            return false;
        };
        let entry = self.excluded.remove(position);
        mesh.on_before_bind.remove(entry.before_bind);
        mesh.on_after_render.remove(entry.after_render);
        true
    }

    /// Drops every reference to a mesh that is being disposed
    pub fn forget_mesh(&mut self, id: NodeId) {
        self.remove_mesh(id);
        self.excluded.retain(|entry| entry.mesh != id);
    }

    pub fn should_render(&self, camera: Option<NodeId>) -> bool {
        self.is_enabled
            && !self.meshes.is_empty()
            && (self.options.camera.is_none() || self.options.camera == camera)
    }

    /// The glow map the highlighted meshes are drawn into
    pub fn main_texture(&self) -> Option<TextureKey> {
        self.blur_chain
            .first()
            .and_then(|id| self.blurs.get(*id))
            .and_then(|pp| pp.base().input_texture())
    }

    /// The blurred glow merged over the camera output
    pub fn blur_texture(&self) -> Option<TextureKey> {
        self.blur_texture
    }

    fn ensure_blurs(&mut self, engine: &mut Engine) {
        if !self.blur_chain.is_empty() {
            return;
        }
        // The vertical pass is sized from the blur target, already reduced
        let passes = [
            (
                "HighlightLayerBlurH",
                Vector2::new(1.0, 0.0),
                self.options.blur_horizontal_size,
                self.options.main_texture_ratio,
            ),
            (
                "HighlightLayerBlurV",
                Vector2::new(0.0, 1.0),
                self.options.blur_vertical_size,
                1.0,
            ),
        ];
        for (name, direction, kernel, ratio) in passes {
            let config = BlurPostProcess::config(name).with_ratio(ratio);
            let mut blur = BlurPostProcess::new(engine, name, direction, kernel, config);
            blur.base_mut().clear_color = Some(Color4::transparent());
            let id = self.blurs.insert(Box::new(blur));
            self.blur_chain.push(id);
        }
    }

    fn glow_effect(&mut self, engine: &mut Engine) -> EffectKey {
        *self.glow_effect.get_or_insert_with(|| {
            engine.create_effect(
                EffectCreationOptions::new("glowMapGeneration", "glowMapGeneration")
                    .with_uniforms(vec![
                        UniformDecl::new("world", UniformType::Mat4),
                        UniformDecl::new("viewProjection", UniformType::Mat4),
                        UniformDecl::new("glowColor", UniformType::Vec4),
                    ])
                    .with_vertex_input(VertexInput::Mesh, &["position", "normal", "uv", "color"]),
            )
        })
    }

    fn merge_effect(&mut self, engine: &mut Engine) -> EffectKey {
        let defines = if self.options.is_stroke {
            "#define STROKE\n"
        } else {
            ""
        };
        *self.merge_effect.get_or_insert_with(|| {
            engine.create_effect(
                EffectCreationOptions::new("postprocess", "glowMapMerge")
                    .with_uniforms(vec![UniformDecl::new("offset", UniformType::Float)])
                    .with_samplers(vec![SamplerDecl::new("textureSampler")])
                    .with_defines(defines),
            )
        })
    }

    fn ensure_blur_texture(&mut self, engine: &mut Engine, size: Size) -> Result<TextureKey> {
        if let Some(key) = self.blur_texture {
            let same = engine
                .internal_texture(key)
                .is_some_and(|texture| texture.width == size.width && texture.height == size.height);
            if same {
                return Ok(key);
            }
            engine.release_internal_texture(key);
            self.blur_texture = None;
        }
        let options = RenderTargetOptions {
            generate_depth_buffer: false,
            ..Default::default()
        };
        let key = engine.create_render_target_texture(size, &options)?;
        debug!(
            "Highlight layer '{}' blur target sized {}x{}",
            self.name, size.width, size.height
        );
        self.blur_texture = Some(key);
        Ok(key)
    }

    /// Draws the glow map for `camera` and blurs it
    ///
    /// Turns stencil writes on for the camera pass that follows so that
    /// [`merge`](Self::merge) leaves the meshes themselves uncovered.
    pub fn render_main_texture(
        &mut self,
        engine: &mut Engine,
        nodes: &mut NodeArena,
        camera: &CameraSnapshot,
    ) -> Result<()> {
        self.ensure_blurs(engine);
        let ctx = PostProcessContext {
            camera: Some(camera),
            scene_clear_color: Color4::transparent(),
            ..Default::default()
        };
        let mut manager = PostProcessManager::new();
        let chain = self.blur_chain.clone();
        if !manager.prepare_frame(engine, &mut self.blurs, &chain, None, &ctx)? {
            return Ok(());
        }

        let glow = self.glow_effect(engine);
        if engine.is_effect_ready(glow) {
            let view_projection = camera.view_projection();
            for (id, color) in &self.meshes {
                let Some(node) = nodes.get_mut(*id).filter(|node| node.enabled) else {
                    continue;
                };
                let world = node.get_world_matrix();
                let Some(mesh) = node.mesh_mut().filter(|mesh| mesh.is_visible) else {
                    continue;
                };
                if mesh.layer_mask & camera.layer_mask == 0 {
                    continue;
                }
                let Some(geometry) = mesh.ensure_buffers(engine)? else {
                    continue;
                };
                if let Some(effect) = engine.get_effect_mut(glow) {
                    effect
                        .set_matrix("world", &world)
                        .set_matrix("viewProjection", &view_projection)
                        .set_float4("glowColor", color.r, color.g, color.b, 1.0);
                }
                mesh.draw(engine, *id, glow, geometry, DrawState::default())?;
            }
        }

        let size = self
            .blur_chain
            .first()
            .and_then(|id| self.blurs.get(*id))
            .map(|pp| Size::new(pp.base().width, pp.base().height))
            .unwrap_or_else(|| Size::square(1));
        let target = self.ensure_blur_texture(engine, size)?;
        manager.direct_render(engine, &mut self.blurs, &chain, Some(target), true, &ctx)?;
        engine.end_render_pass()?;

        self.saved_stencil.get_or_insert(engine.stencil_buffer());
        engine.set_stencil_buffer(true);
        Ok(())
    }

    /// Blends the blurred glow into the pass that is currently open
    pub fn merge(&mut self, engine: &mut Engine) -> Result<()> {
        let Some(texture) = self.blur_texture else {
            return Ok(());
        };
        let key = self.merge_effect(engine);
        if engine.is_effect_ready(key) {
            if let Some(effect) = engine.get_effect_mut(key) {
                effect
                    .set_texture("textureSampler", Some(texture))
                    .set_float("offset", 1.0);
            }
            let state = DrawState {
                stencil_test: true,
                ..DrawState::fullscreen(self.options.alpha_blending_mode)
            };
            engine.draw_effect(key, DrawGeometry::FullscreenTriangle, state)?;
        }
        if let Some(stencil) = self.saved_stencil.take() {
            engine.set_stencil_buffer(stencil);
        }
        Ok(())
    }

    /// Releases the GPU resources and unhooks the excluded meshes
    pub fn dispose(&mut self, engine: &mut Engine, nodes: &mut NodeArena) {
        for entry in self.excluded.drain(..) {
            if let Some(mesh) = nodes.get_mut(entry.mesh).and_then(|node| node.mesh_mut()) {
                mesh.on_before_bind.remove(entry.before_bind);
                mesh.on_after_render.remove(entry.after_render);
            }
        }
        self.meshes.clear();
        for id in self.blur_chain.drain(..) {
            if let Some(mut blur) = self.blurs.remove(id) {
                blur.dispose(engine);
            }
        }
        if let Some(texture) = self.blur_texture.take() {
            engine.release_internal_texture(texture);
        }
        for effect in [self.glow_effect.take(), self.merge_effect.take()]
            .into_iter()
            .flatten()
        {
            engine.release_effect(effect);
        }
        if let Some(stencil) = self.saved_stencil.take() {
            engine.set_stencil_buffer(stencil);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};
    use crate::meshes::mesh::MeshDrawEvent;
    use crate::meshes::VertexData;
    use crate::scene::{Node, NodeKind};

    fn setup() -> (Engine, crate::engine::CommandLog, NodeArena, NodeId) {
        let backend = HeadlessBackend::new(64, 64);
        let log = backend.log();
        let engine = Engine::new(Box::new(backend), EngineOptions::default());
        let mut nodes = NodeArena::with_key();
        let mesh = Mesh::new(VertexData::create_box(1.0, 1.0, 1.0));
        let id = nodes.insert(Node::new("box", NodeKind::Mesh(Box::new(mesh)), 1));
        (engine, log, nodes, id)
    }

    fn event(id: NodeId) -> MeshDrawEvent {
        MeshDrawEvent {
            mesh: id,
            stencil_buffer: true,
            state: DrawState::default(),
        }
    }

    #[test]
    fn test_excluded_mesh_toggles_stencil() {
        let (_, _, mut nodes, id) = setup();
        let mut layer = HighlightLayer::new("hl", HighlightLayerOptions::default());
        let mesh = nodes[id].mesh_mut().unwrap();
        layer.add_excluded_mesh(id, mesh);
        layer.add_excluded_mesh(id, mesh);
        assert_eq!(mesh.on_before_bind.len(), 1);

        let mut payload = event(id);
        mesh.on_before_bind.notify(&mut payload);
        assert!(!payload.stencil_buffer);
        mesh.on_after_render.notify(&mut payload);
        assert!(payload.stencil_buffer);

        assert!(layer.remove_excluded_mesh(id, mesh));
        assert!(!layer.remove_excluded_mesh(id, mesh));
        assert!(mesh.on_before_bind.is_empty());
        assert!(mesh.on_after_render.is_empty());
    }

    #[test]
    fn test_should_render_filters_camera() {
        let (_, _, _, id) = setup();
        let camera = slotmap::SlotMap::<NodeId, ()>::with_key().insert(());
        let options = HighlightLayerOptions {
            camera: Some(camera),
            ..Default::default()
        };
        let mut layer = HighlightLayer::new("hl", options);
        assert!(!layer.should_render(Some(camera)));
        layer.add_mesh(id, Color3::new(0.0, 1.0, 0.0));
        assert!(layer.has_mesh(id));
        assert!(layer.should_render(Some(camera)));
        assert!(!layer.should_render(None));
        layer.forget_mesh(id);
        assert!(!layer.has_mesh(id));
    }

    #[test]
    fn test_render_and_merge_draw_glow() {
        let (mut engine, log, mut nodes, id) = setup();
        let snapshot = CameraSnapshot::default();
        let mut layer = HighlightLayer::new("hl", HighlightLayerOptions::default());
        layer.add_mesh(id, Color3::new(1.0, 0.0, 0.0));

        engine.begin_frame();
        layer.render_main_texture(&mut engine, &mut nodes, &snapshot).unwrap();
        assert!(engine.stencil_buffer());
        assert!(layer.main_texture().is_some());
        let glow_size = engine
            .internal_texture(layer.blur_texture().unwrap())
            .map(|texture| texture.width)
            .unwrap();
        assert_eq!(glow_size, 32);

        engine
            .begin_render_pass(&crate::engine::RenderPassOptions::backbuffer("camera"))
            .unwrap();
        layer.merge(&mut engine).unwrap();
        engine.end_frame().unwrap();
        assert!(!engine.stencil_buffer());

        let draws = log.draws();
        // glow, two blurs, merge
        assert_eq!(draws.len(), 4);
        assert!(draws.last().unwrap().state.stencil_test);

        layer.dispose(&mut engine, &mut nodes);
        assert!(layer.blur_texture().is_none());
        assert!(layer.main_texture().is_none());
    }
}
