//! The scene: owner of nodes and resources, and the per-frame renderer

use std::time::Instant;

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, SquareMatrix};
use log::{debug, info, warn};

use crate::cameras::{Camera, CameraInputEvent, CameraSnapshot};
use crate::engine::scene_component_constants as components;
use crate::engine::{Engine, RenderPassOptions};
use crate::error::{EngineError, Result};
use crate::layers::HighlightLayer;
use crate::lights::{Light, LightSnapshot};
use crate::materials::{
    ImageProcessingConfiguration, Material, MaterialArena, MaterialContext, MaterialId,
    PbrMaterial,
};
use crate::maths::{Color3, Color4, Plane, Size};
use crate::meshes::Mesh;
use crate::misc::Observable;
use crate::postprocesses::render_pipeline::{PostProcessRenderPipelineManager, RenderPipelineContext};
use crate::postprocesses::{
    PostProcessArena, PostProcessContext, PostProcessId, PostProcessManager, ScenePostProcess,
};
use crate::prepass::PrePassRenderer;
use crate::scene::animation::Animatable;
use crate::scene::behavior::Behavior;
use crate::scene::node::{BehaviorSlot, Node, NodeArena, NodeKind};
use crate::scene::stage::{Stage, StageAction};
use crate::scene::NodeId;
use crate::textures::{RenderTargetView, SceneTexture, TextureArena, TextureId};

/// Frames per second used when an animated node has no animations
const DEFAULT_FRAME_RATE: f32 = 60.0;

/// Playback of a node's animations
#[derive(Debug, Clone)]
struct NodeAnimatable {
    target: NodeId,
    animatable: Animatable,
}

/// The hook points of a frame
#[derive(Debug, Default)]
struct SceneStages {
    gather_render_targets: Stage,
    camera_draw_render_target: Stage,
    before_camera_draw: Stage,
    after_camera_draw: Stage,
}

/// A mesh that will be drawn this frame, with what sorting needs
#[derive(Debug, Clone, Copy)]
struct ActiveMesh {
    id: NodeId,
    material: MaterialId,
    transparent: bool,
    layer_mask: u32,
}

/// Where a batch of meshes is drawn and with which view
struct DrawPass<'a> {
    camera: &'a CameraSnapshot,
    clip_plane: Option<Plane>,
    render_list: Option<&'a [NodeId]>,
    render_size: Size,
    invert_culling: bool,
}

pub struct Scene {
    nodes: NodeArena,
    pub materials: MaterialArena,
    pub textures: TextureArena,
    pub post_processes: PostProcessArena,
    pub post_process_manager: PostProcessManager,
    pub post_process_render_pipeline_manager: PostProcessRenderPipelineManager,
    pre_pass_renderer: Option<PrePassRenderer>,
    highlight_layers: Vec<HighlightLayer>,
    pub active_camera: Option<NodeId>,
    /// Cameras rendered in order; when empty only `active_camera` renders
    pub active_cameras: Vec<NodeId>,
    pub image_processing_configuration: ImageProcessingConfiguration,
    pub clear_color: Color4,
    pub auto_clear: bool,
    pub ambient_color: Color3,
    pub environment_texture: Option<TextureId>,
    pub clip_plane: Option<Plane>,
    /// Render target textures rendered before the cameras
    pub custom_render_targets: Vec<TextureId>,
    pub animations_enabled: bool,
    pub on_before_render: Observable<u64>,
    pub on_after_render: Observable<u64>,
    default_material: Option<MaterialId>,
    animatables: Vec<NodeAnimatable>,
    stages: SceneStages,
    active_meshes: Vec<ActiveMesh>,
    frame_lights: Vec<LightSnapshot>,
    pre_pass_active: bool,
    render_id: u64,
    next_unique_id: u64,
    is_loading: bool,
    last_frame: Option<Instant>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("nodes", &self.nodes.len())
            .field("materials", &self.materials.len())
            .field("textures", &self.textures.len())
            .field("post_processes", &self.post_processes.len())
            .field("active_camera", &self.active_camera)
            .field("render_id", &self.render_id)
            .finish()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut stages = SceneStages::default();
        stages.gather_render_targets.register_step(
            components::STEP_GATHERRENDERTARGETS_POSTPROCESSRENDERPIPELINEMANAGER,
            components::NAME_POSTPROCESSRENDERPIPELINEMANAGER,
            StageAction::RenderPipelines,
        );
        Self {
            nodes: NodeArena::with_key(),
            materials: MaterialArena::with_key(),
            textures: TextureArena::with_key(),
            post_processes: PostProcessArena::with_key(),
            post_process_manager: PostProcessManager::new(),
            post_process_render_pipeline_manager: PostProcessRenderPipelineManager::new(),
            pre_pass_renderer: None,
            highlight_layers: Vec::new(),
            active_camera: None,
            active_cameras: Vec::new(),
            image_processing_configuration: ImageProcessingConfiguration::new(),
            clear_color: Color4::new(0.2, 0.2, 0.3, 1.0),
            auto_clear: true,
            ambient_color: Color3::black(),
            environment_texture: None,
            clip_plane: None,
            custom_render_targets: Vec::new(),
            animations_enabled: true,
            on_before_render: Observable::new(),
            on_after_render: Observable::new(),
            default_material: None,
            animatables: Vec::new(),
            stages,
            active_meshes: Vec::new(),
            frame_lights: Vec::new(),
            pre_pass_active: false,
            render_id: 0,
            next_unique_id: 1,
            is_loading: false,
            last_frame: None,
        }
    }

    pub fn get_unique_id(&mut self) -> u64 {
        let id = self.next_unique_id;
        self.next_unique_id += 1;
        id
    }

    pub fn render_id(&self) -> u64 {
        self.render_id
    }

    // ---- Nodes ------------------------------------------------------------

    pub fn add_node(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let unique_id = self.get_unique_id();
        let is_camera = matches!(kind, NodeKind::Camera(_));
        let id = self.nodes.insert(Node::new(name, kind, unique_id));
        if is_camera && self.active_camera.is_none() {
            self.active_camera = Some(id);
        }
        id
    }

    pub fn add_transform_node(&mut self, name: &str) -> NodeId {
        self.add_node(name, NodeKind::TransformNode)
    }

    pub fn add_mesh(&mut self, name: &str, mesh: Mesh) -> NodeId {
        self.add_node(name, NodeKind::Mesh(Box::new(mesh)))
    }

    /// The first camera added becomes the active camera
    pub fn add_camera(&mut self, name: &str, camera: Camera) -> NodeId {
        self.add_node(name, NodeKind::Camera(Box::new(camera)))
    }

    pub fn add_light(&mut self, name: &str, light: Light) -> NodeId {
        self.add_node(name, NodeKind::Light(Box::new(light)))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    pub fn mesh(&self, id: NodeId) -> Option<&Mesh> {
        self.nodes.get(id).and_then(Node::mesh)
    }

    pub fn mesh_mut(&mut self, id: NodeId) -> Option<&mut Mesh> {
        self.nodes.get_mut(id).and_then(Node::mesh_mut)
    }

    pub fn camera(&self, id: NodeId) -> Option<&Camera> {
        self.nodes.get(id).and_then(Node::camera)
    }

    pub fn camera_mut(&mut self, id: NodeId) -> Option<&mut Camera> {
        self.nodes.get_mut(id).and_then(Node::camera_mut)
    }

    pub fn light(&self, id: NodeId) -> Option<&Light> {
        self.nodes.get(id).and_then(Node::light)
    }

    pub fn light_mut(&mut self, id: NodeId) -> Option<&mut Light> {
        self.nodes.get_mut(id).and_then(Node::light_mut)
    }

    pub fn meshes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.mesh().is_some())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn lights(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.light().is_some())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn cameras(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.camera().is_some())
            .map(|(id, _)| id)
            .collect()
    }

    // ---- Graph ------------------------------------------------------------

    /// Moves `child` under `parent` (or to the root)
    ///
    /// Returns false when a node is missing or the move would make a node
    /// its own ancestor.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) -> bool {
        let Some(current) = self.nodes.get(child).map(Node::parent) else {
            return false;
        };
        if current == parent {
            return true;
        }
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent)
                || parent == child
                || self.is_descendant_of(parent, child)
            {
                warn!("Refusing to parent a node under itself or a missing node");
                return false;
            }
        }
        if let Some(previous) = current.and_then(|id| self.nodes.get_mut(id)) {
            previous.children.retain(|id| *id != child);
        }
        if let Some(next) = parent.and_then(|id| self.nodes.get_mut(id)) {
            next.children.push(child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = parent;
        }
        true
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(Node::parent)
    }

    /// With `check_ancestors`, a node is only enabled when its parents are
    pub fn is_enabled(&self, id: NodeId, check_ancestors: bool) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        if !check_ancestors || !node.enabled {
            return node.enabled;
        }
        node.parent
            .map_or(true, |parent| self.is_enabled(parent, true))
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_enabled(enabled);
        }
    }

    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    /// Depth-first descendants, each node before its own children
    pub fn get_descendants(
        &self,
        id: NodeId,
        direct_descendants_only: bool,
        predicate: Option<&dyn Fn(&Node) -> bool>,
    ) -> Vec<NodeId> {
        let mut results = Vec::new();
        self.collect_descendants(id, direct_descendants_only, predicate, &mut results);
        results
    }

    fn collect_descendants(
        &self,
        id: NodeId,
        direct_descendants_only: bool,
        predicate: Option<&dyn Fn(&Node) -> bool>,
        results: &mut Vec<NodeId>,
    ) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        for child_id in &node.children {
            let Some(child) = self.nodes.get(*child_id) else {
                continue;
            };
            if predicate.map_or(true, |predicate| predicate(child)) {
                results.push(*child_id);
            }
            if !direct_descendants_only {
                self.collect_descendants(*child_id, false, predicate, results);
            }
        }
    }

    pub fn get_child_meshes(&self, id: NodeId, direct_descendants_only: bool) -> Vec<NodeId> {
        self.get_descendants(id, direct_descendants_only, Some(&|node| node.mesh().is_some()))
    }

    pub fn get_child_transform_nodes(&self, id: NodeId, direct_descendants_only: bool) -> Vec<NodeId> {
        self.get_descendants(
            id,
            direct_descendants_only,
            Some(&|node| matches!(node.kind, NodeKind::TransformNode)),
        )
    }

    pub fn get_children(&self, id: NodeId) -> Vec<NodeId> {
        self.get_descendants(id, true, None)
    }

    // ---- Synchronization and world matrices -------------------------------

    pub fn has_new_parent(&mut self, id: NodeId, update: bool) -> bool {
        self.nodes
            .get_mut(id)
            .is_some_and(|node| node.has_new_parent(update))
    }

    /// Whether the parent kept the world matrix this node was computed from
    pub fn is_synchronized_with_parent(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return true;
        };
        let Some(parent) = node.parent.and_then(|p| self.nodes.get(p).map(|n| (p, n))) else {
            return true;
        };
        if node.parent_update_id != parent.1.child_update_id {
            return false;
        }
        self.is_synchronized_inner(parent.0)
    }

    fn is_synchronized_inner(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return true;
        };
        let has_new_parent = node.cache.is_none() || node.cached_parent() != node.parent;
        !has_new_parent && self.is_synchronized_with_parent(id) && node.is_locally_synchronized()
    }

    /// Whether the world matrix is still valid; `update_cache` stores the
    /// current local transform
    pub fn is_synchronized(&mut self, id: NodeId, update_cache: bool) -> bool {
        let synchronized = self.is_synchronized_inner(id);
        if update_cache {
            self.update_cache(id, true);
        }
        synchronized
    }

    pub fn update_cache(&mut self, id: NodeId, force: bool) {
        if !force && self.is_synchronized_inner(id) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.store_cache();
        }
    }

    /// Parent world times local TRS, computed at most once per render id
    pub fn compute_world_matrix(&mut self, id: NodeId, force: bool) -> Matrix4<f32> {
        let render_id = self.render_id;
        let Some((parent, checked)) = self
            .nodes
            .get(id)
            .map(|node| (node.parent, node.current_render_id))
        else {
            return Matrix4::identity();
        };
        if !force && checked == Some(render_id) {
            return self.nodes[id].world_matrix;
        }
        let parent_world = parent.map(|parent| self.compute_world_matrix(parent, force));
        let parent_update_id = parent
            .and_then(|parent| self.nodes.get(parent))
            .map_or(0, |parent| parent.child_update_id);
        let synchronized = !force && self.is_synchronized_inner(id);

        let node = &mut self.nodes[id];
        node.current_render_id = Some(render_id);
        if synchronized {
            return node.world_matrix;
        }
        let local = node.local_matrix();
        node.world_matrix = match parent_world {
            Some(parent_world) => parent_world * local,
            None => local,
        };
        node.store_cache();
        node.parent_update_id = parent_update_id;
        node.child_update_id += 1;
        node.world_matrix
    }

    pub fn get_world_matrix(&self, id: NodeId) -> Matrix4<f32> {
        self.nodes
            .get(id)
            .map_or_else(Matrix4::identity, Node::get_world_matrix)
    }

    fn node_world(&self, id: NodeId) -> Option<Matrix4<f32>> {
        let node = self.nodes.get(id)?;
        if node.parent.is_none() && node.world_matrix == Matrix4::identity() {
            return None;
        }
        Some(node.world_matrix)
    }

    // ---- Behaviors and loading --------------------------------------------

    /// Adds a behavior unless one with the same name is attached
    ///
    /// The behavior attaches right away, or when loading finishes.
    pub fn add_behavior(&mut self, id: NodeId, mut behavior: Box<dyn Behavior>) -> bool {
        let is_loading = self.is_loading;
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        if node.get_behavior_by_name(behavior.name()).is_some() {
            return false;
        }
        behavior.init();
        if !is_loading {
            behavior.attach(id);
        }
        node.behaviors.push(BehaviorSlot {
            behavior,
            attached: !is_loading,
        });
        true
    }

    /// Detaches and returns the behavior
    pub fn remove_behavior(&mut self, id: NodeId, name: &str) -> Option<Box<dyn Behavior>> {
        let node = self.nodes.get_mut(id)?;
        let index = node
            .behaviors
            .iter()
            .position(|slot| slot.behavior.name() == name)?;
        let mut slot = node.behaviors.remove(index);
        slot.behavior.detach();
        Some(slot.behavior)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Leaving the loading state attaches the behaviors added meanwhile
    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
        if loading {
            return;
        }
        for (id, node) in self.nodes.iter_mut() {
            for slot in node.behaviors.iter_mut().filter(|slot| !slot.attached) {
                slot.behavior.attach(id);
                slot.attached = true;
            }
        }
    }

    // ---- Animations -------------------------------------------------------

    /// Plays the node's animations between two frames
    pub fn begin_animation_frames(
        &mut self,
        id: NodeId,
        from: f32,
        to: f32,
        loop_animation: bool,
        speed_ratio: f32,
    ) -> Option<&Animatable> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        self.animatables.retain(|running| running.target != id);
        self.animatables.push(NodeAnimatable {
            target: id,
            animatable: Animatable::new(from, to, loop_animation, speed_ratio),
        });
        self.animatables.last().map(|running| &running.animatable)
    }

    /// Plays a named range; `None` when the node has no such range
    pub fn begin_animation(
        &mut self,
        id: NodeId,
        range: &str,
        loop_animation: bool,
        speed_ratio: f32,
    ) -> Option<&Animatable> {
        let (from, to) = self
            .nodes
            .get(id)?
            .get_animation_range(range)
            .map(|range| (range.from, range.to))?;
        self.begin_animation_frames(id, from, to, loop_animation, speed_ratio)
    }

    pub fn get_animatable(&self, id: NodeId) -> Option<&Animatable> {
        self.animatables
            .iter()
            .find(|running| running.target == id)
            .map(|running| &running.animatable)
    }

    pub fn stop_animation(&mut self, id: NodeId) {
        self.animatables.retain(|running| running.target != id);
    }

    /// Advances every running animation and writes the animated values
    pub fn animate(&mut self, delta_ms: f32) {
        if !self.animations_enabled {
            return;
        }
        for running in &mut self.animatables {
            let Some(node) = self.nodes.get_mut(running.target) else {
                continue;
            };
            let frame_rate = node
                .animations
                .first()
                .map_or(DEFAULT_FRAME_RATE, |animation| animation.frame_per_second);
            let frame = running.animatable.advance(delta_ms, frame_rate);
            let values: Vec<(String, f32)> = node
                .animations
                .iter()
                .filter_map(|animation| {
                    animation
                        .evaluate(frame)
                        .map(|value| (animation.target_property.clone(), value))
                })
                .collect();
            for (property, value) in values {
                if !node.set_animated_property(&property, value) {
                    warn!(
                        "Animation property '{}' is not animatable on '{}'",
                        property, node.name
                    );
                }
            }
        }
        self.animatables.retain(|running| !running.animatable.is_done());
    }

    // ---- Resources --------------------------------------------------------

    pub fn add_material(&mut self, material: Box<dyn Material>) -> MaterialId {
        self.materials.insert(material)
    }

    pub fn material(&self, id: MaterialId) -> Option<&dyn Material> {
        self.materials.get(id).map(|material| material.as_ref())
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut dyn Material> {
        self.materials.get_mut(id).map(|material| material.as_mut())
    }

    pub fn add_texture(&mut self, texture: Box<dyn SceneTexture>) -> TextureId {
        self.textures.insert(texture)
    }

    pub fn texture(&self, id: TextureId) -> Option<&dyn SceneTexture> {
        self.textures.get(id).map(|texture| texture.as_ref())
    }

    /// Adds a render target texture and renders it before the cameras
    pub fn add_custom_render_target(&mut self, texture: Box<dyn SceneTexture>) -> TextureId {
        let id = self.textures.insert(texture);
        self.custom_render_targets.push(id);
        id
    }

    /// Stores a post process and attaches it to `camera`
    ///
    /// Post processes that read pre-pass outputs turn the pre-pass on.
    pub fn add_post_process(
        &mut self,
        mut post_process: Box<dyn ScenePostProcess>,
        camera: Option<NodeId>,
    ) -> PostProcessId {
        if post_process.base().pre_pass_effect_configuration().is_some() {
            let renderer = self.enable_pre_pass_renderer();
            post_process.base().set_pre_pass_renderer(renderer);
        }
        post_process.base_mut().set_camera(camera);
        let id = self.post_processes.insert(post_process);
        if let Some(camera) = camera.and_then(|camera| self.camera_mut(camera)) {
            camera.attach_post_process(id, None);
        }
        id
    }

    /// Detaches the post process from every camera and disposes it
    pub fn dispose_post_process(&mut self, engine: &mut Engine, id: PostProcessId) {
        for node in self.nodes.values_mut() {
            if let Some(camera) = node.camera_mut() {
                camera.detach_post_process(id);
            }
        }
        for texture in self.textures.values_mut() {
            if let Some(target) = texture.as_render_target_mut() {
                target.remove_post_process(id);
            }
        }
        if let Some(mut post_process) = self.post_processes.remove(id) {
            if let Some(configuration) = post_process.base().pre_pass_effect_configuration() {
                let name = configuration.name.clone();
                if let Some(renderer) = self.pre_pass_renderer.as_mut() {
                    renderer.remove_effect_configuration(&name);
                }
            }
            post_process.dispose(engine);
        }
    }

    /// Material drawn on meshes that have none
    pub fn default_material(&mut self) -> MaterialId {
        match self.default_material.filter(|id| self.materials.contains_key(*id)) {
            Some(id) => id,
            None => {
                let id = self
                    .materials
                    .insert(Box::new(PbrMaterial::new("default material")));
                self.default_material = Some(id);
                id
            }
        }
    }

    pub fn pre_pass_renderer(&self) -> Option<&PrePassRenderer> {
        self.pre_pass_renderer.as_ref()
    }

    pub fn pre_pass_renderer_mut(&mut self) -> Option<&mut PrePassRenderer> {
        self.pre_pass_renderer.as_mut()
    }

    pub fn enable_pre_pass_renderer(&mut self) -> &mut PrePassRenderer {
        if !self.stages.before_camera_draw.has_component(components::NAME_PREPASSRENDERER) {
            self.stages.before_camera_draw.register_step(
                components::STEP_BEFORECAMERADRAW_PREPASS,
                components::NAME_PREPASSRENDERER,
                StageAction::PrePass,
            );
        }
        self.pre_pass_renderer.get_or_insert_with(|| {
            info!("Pre-pass renderer created");
            PrePassRenderer::new()
        })
    }

    pub fn disable_pre_pass_renderer(&mut self, engine: &mut Engine) {
        if let Some(mut renderer) = self.pre_pass_renderer.take() {
            renderer.dispose(engine);
        }
        self.stages
            .before_camera_draw
            .remove_component(components::NAME_PREPASSRENDERER);
    }

    // ---- Highlight layers -------------------------------------------------

    pub fn add_highlight_layer(&mut self, layer: HighlightLayer) -> usize {
        if !self
            .stages
            .camera_draw_render_target
            .has_component(components::NAME_EFFECTLAYER)
        {
            self.stages.camera_draw_render_target.register_step(
                components::STEP_CAMERADRAWRENDERTARGET_EFFECTLAYER,
                components::NAME_EFFECTLAYER,
                StageAction::EffectLayerRenderTargets,
            );
            self.stages.after_camera_draw.register_step(
                components::STEP_AFTERCAMERADRAW_EFFECTLAYER_DRAW,
                components::NAME_EFFECTLAYER,
                StageAction::EffectLayerDraw,
            );
        }
        self.highlight_layers.push(layer);
        self.highlight_layers.len() - 1
    }

    pub fn highlight_layers(&self) -> &[HighlightLayer] {
        &self.highlight_layers
    }

    pub fn highlight_layer_mut(&mut self, index: usize) -> Option<&mut HighlightLayer> {
        self.highlight_layers.get_mut(index)
    }

    /// Keeps `mesh` out of the glow of a highlight layer
    pub fn exclude_mesh_from_highlight_layer(&mut self, layer: usize, mesh: NodeId) -> bool {
        let (Some(layer), Some(target)) = (
            self.highlight_layers.get_mut(layer),
            self.nodes.get_mut(mesh).and_then(Node::mesh_mut),
        ) else {
            return false;
        };
        layer.add_excluded_mesh(mesh, target);
        true
    }

    pub fn include_mesh_in_highlight_layer(&mut self, layer: usize, mesh: NodeId) -> bool {
        let (Some(layer), Some(target)) = (
            self.highlight_layers.get_mut(layer),
            self.nodes.get_mut(mesh).and_then(Node::mesh_mut),
        ) else {
            return false;
        };
        layer.remove_excluded_mesh(mesh, target)
    }

    pub fn dispose_highlight_layer(&mut self, engine: &mut Engine, index: usize) {
        if index >= self.highlight_layers.len() {
            return;
        }
        let mut layer = self.highlight_layers.remove(index);
        layer.dispose(engine, &mut self.nodes);
        if self.highlight_layers.is_empty() {
            self.stages
                .camera_draw_render_target
                .remove_component(components::NAME_EFFECTLAYER);
            self.stages
                .after_camera_draw
                .remove_component(components::NAME_EFFECTLAYER);
        }
    }

    // ---- Render pipelines -------------------------------------------------

    /// The pipeline manager with the context its operations need
    pub fn render_pipelines<'a>(
        &'a mut self,
        engine: &'a mut Engine,
    ) -> (&'a mut PostProcessRenderPipelineManager, RenderPipelineContext<'a>) {
        (
            &mut self.post_process_render_pipeline_manager,
            RenderPipelineContext {
                engine,
                nodes: &mut self.nodes,
                post_processes: &mut self.post_processes,
            },
        )
    }

    /// Registers a callback into one of the frame stages
    pub fn register_after_camera_draw(
        &mut self,
        index: u32,
        component: &'static str,
        action: crate::scene::stage::CustomStageAction,
    ) {
        self.stages
            .after_camera_draw
            .register_step(index, component, StageAction::Custom(action));
    }

    pub fn register_before_camera_draw(
        &mut self,
        index: u32,
        component: &'static str,
        action: crate::scene::stage::CustomStageAction,
    ) {
        self.stages
            .before_camera_draw
            .register_step(index, component, StageAction::Custom(action));
    }

    // ---- Inputs -----------------------------------------------------------

    /// Forwards a window event to the active camera's inputs
    pub fn handle_camera_input(&mut self, event: &CameraInputEvent) -> bool {
        let Some(camera) = self.active_camera else {
            return false;
        };
        self.camera_mut(camera)
            .is_some_and(|camera| camera.handle_input(event))
    }

    // ---- Rendering --------------------------------------------------------

    /// Renders one frame using the wall clock for animations
    pub fn render(&mut self, engine: &mut Engine) -> Result<()> {
        let now = Instant::now();
        let delta_ms = self
            .last_frame
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32() * 1000.0);
        self.last_frame = Some(now);
        self.render_with_delta(engine, delta_ms)
    }

    /// Renders one frame, advancing animations by `delta_ms`
    pub fn render_with_delta(&mut self, engine: &mut Engine, delta_ms: f32) -> Result<()> {
        self.render_id += 1;
        engine.begin_frame();
        let mut render_id = self.render_id;
        self.on_before_render.notify(&mut render_id);

        self.animate(delta_ms);
        self.compute_world_matrices();
        self.update_cameras();
        self.run_gather_render_targets(engine);
        self.evaluate_active_meshes(engine)?;
        self.render_custom_render_targets(engine)?;

        let cameras: Vec<NodeId> = if self.active_cameras.is_empty() {
            self.active_camera.into_iter().collect()
        } else {
            self.active_cameras.clone()
        };
        if cameras.is_empty() {
            warn!("No camera defined, clearing the backbuffer only");
            engine.begin_render_pass(
                &RenderPassOptions::backbuffer("clear")
                    .with_clear_color(self.auto_clear.then_some(self.clear_color)),
            )?;
        }
        for camera in cameras {
            self.render_for_camera(engine, camera)?;
        }
        engine.end_frame()?;

        let mut render_id = self.render_id;
        self.on_after_render.notify(&mut render_id);
        Ok(())
    }

    fn compute_world_matrices(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in ids {
            self.compute_world_matrix(id, false);
        }
    }

    fn update_cameras(&mut self) {
        let ids = self.cameras();
        for id in ids {
            let world = self.node_world(id);
            if let Some(camera) = self.camera_mut(id) {
                camera.check_inputs();
                camera.update(world);
            }
        }
    }

    fn run_gather_render_targets(&mut self, engine: &mut Engine) {
        for entry in self.stages.gather_render_targets.entries_mut() {
            match &mut entry.action {
                StageAction::RenderPipelines => {
                    let mut ctx = RenderPipelineContext {
                        engine: &mut *engine,
                        nodes: &mut self.nodes,
                        post_processes: &mut self.post_processes,
                    };
                    self.post_process_render_pipeline_manager.update(&mut ctx);
                }
                other => debug!("Ignoring {:?} while gathering render targets", other),
            }
        }
    }

    /// Picks the meshes drawn this frame and resolves the lights
    fn evaluate_active_meshes(&mut self, engine: &mut Engine) -> Result<()> {
        self.frame_lights.clear();
        let light_ids: Vec<NodeId> = self
            .lights()
            .into_iter()
            .filter(|id| self.is_enabled(*id, true))
            .collect();
        for (index, id) in light_ids.into_iter().enumerate() {
            let world = self.node_world(id);
            if let Some(light) = self.light_mut(id) {
                light.set_index(Some(index));
                let snapshot = light.snapshot(id, world);
                self.frame_lights.push(snapshot);
            }
        }

        self.active_meshes.clear();
        for id in self.meshes() {
            if !self.is_enabled(id, true) {
                continue;
            }
            let Some(assigned) = self
                .mesh(id)
                .filter(|mesh| mesh.is_visible && mesh.visibility > 0.0)
                .map(|mesh| mesh.material)
            else {
                continue;
            };
            let material = match assigned.filter(|m| self.materials.contains_key(*m)) {
                Some(material) => material,
                None => self.default_material(),
            };
            let Some((node, mesh)) = self.nodes.get(id).and_then(|n| n.mesh().map(|m| (n, m))) else {
                continue;
            };
            let info = mesh.draw_info(id, node.world_matrix);
            let transparent = self
                .materials
                .get(material)
                .is_some_and(|m| m.needs_alpha_blending_for_mesh(&info));
            self.active_meshes.push(ActiveMesh {
                id,
                material,
                transparent,
                layer_mask: mesh.layer_mask,
            });
        }

        for index in 0..self.active_meshes.len() {
            let id = self.active_meshes[index].id;
            if let Some(mesh) = self.mesh_mut(id) {
                mesh.ensure_buffers(engine)?;
            }
        }
        Ok(())
    }

    fn render_custom_render_targets(&mut self, engine: &mut Engine) -> Result<()> {
        for id in self.custom_render_targets.clone() {
            self.render_target(engine, id)?;
        }
        Ok(())
    }

    /// Renders the meshes of a render target texture, then its post
    /// processes, into the texture
    fn render_target(&mut self, engine: &mut Engine, id: TextureId) -> Result<()> {
        let scene_camera = self.active_camera;
        let Some(texture) = self.textures.get_mut(id) else {
            return Ok(());
        };
        texture.prepare(engine, &mut self.post_processes)?;
        let Some(target) = texture.as_render_target_mut() else {
            return Ok(());
        };
        let Some(key) = target.base.texture.filter(|_| target.should_render()) else {
            return Ok(());
        };
        let size = target.size();
        let camera_id = target.active_camera.or(scene_camera);
        let chain = target.post_processes().to_vec();
        let clear = target.clear_color.unwrap_or(self.clear_color);
        let render_list = target.render_list.clone();
        let label = target.base.name.clone();

        let aspect = size.width as f32 / size.height.max(1) as f32;
        let mut snapshot = camera_id
            .and_then(|camera_id| {
                self.nodes
                    .get_mut(camera_id)
                    .and_then(Node::camera_mut)
                    .map(|camera| camera.snapshot(Some(camera_id), aspect))
            })
            .unwrap_or_default();
        let mut view = RenderTargetView {
            view: snapshot.view,
            projection: snapshot.projection,
            eye: snapshot.position,
            clip_plane: self.clip_plane,
            invert_culling: false,
        };
        if let Some(texture) = self.textures.get_mut(id) {
            texture.before_render(&mut view);
        }
        snapshot.view = view.view;
        snapshot.projection = view.projection;
        snapshot.position = view.eye;

        let ctx = PostProcessContext {
            camera: Some(&snapshot),
            scene_clear_color: clear,
            image_processing: Some(&self.image_processing_configuration),
            pre_pass: None,
        };
        let has_chain = self.post_process_manager.prepare_frame(
            engine,
            &mut self.post_processes,
            &chain,
            Some(key),
            &ctx,
        )?;
        if !has_chain {
            engine.begin_render_pass(&RenderPassOptions::texture(&label, key).with_clear_color(Some(clear)))?;
        }
        self.draw_meshes(
            engine,
            &DrawPass {
                camera: &snapshot,
                clip_plane: view.clip_plane,
                render_list: render_list.as_deref(),
                render_size: size,
                invert_culling: view.invert_culling,
            },
        )?;
        let ctx = PostProcessContext {
            camera: Some(&snapshot),
            scene_clear_color: clear,
            image_processing: Some(&self.image_processing_configuration),
            pre_pass: None,
        };
        self.post_process_manager.finalize_frame(
            engine,
            &mut self.post_processes,
            false,
            Some(key),
            0,
            &chain,
            true,
            &ctx,
        )?;
        engine.end_render_pass()?;

        if let Some(texture) = self.textures.get_mut(id) {
            texture.after_render(&mut view);
        }
        Ok(())
    }

    fn render_for_camera(&mut self, engine: &mut Engine, camera_id: NodeId) -> Result<()> {
        let aspect = engine.aspect_ratio();
        let Some(camera) = self.camera_mut(camera_id) else {
            return Err(EngineError::UnknownHandle { kind: "camera" });
        };
        let snapshot = camera.snapshot(Some(camera_id), aspect);
        let chain = camera.post_processes().to_vec();

        self.run_camera_stage(engine, StagePoint::CameraDrawRenderTarget, &snapshot)?;
        self.pre_pass_active = self.setup_pre_pass(engine, &chain)?;

        let ctx = PostProcessContext {
            camera: Some(&snapshot),
            scene_clear_color: self.clear_color,
            image_processing: Some(&self.image_processing_configuration),
            pre_pass: self.pre_pass_renderer.as_ref(),
        };
        let has_chain =
            self.post_process_manager
                .prepare_frame(engine, &mut self.post_processes, &chain, None, &ctx)?;
        if !has_chain {
            self.pre_pass_active = false;
            engine.begin_render_pass(
                &RenderPassOptions::backbuffer("camera")
                    .with_clear_color(self.auto_clear.then_some(self.clear_color))
                    .with_viewport(Some(snapshot.viewport)),
            )?;
        }
        self.run_camera_stage(engine, StagePoint::BeforeCameraDraw, &snapshot)?;

        let render_size = Size::new(engine.render_width(false), engine.render_height(false));
        self.draw_meshes(
            engine,
            &DrawPass {
                camera: &snapshot,
                clip_plane: self.clip_plane,
                render_list: None,
                render_size,
                invert_culling: false,
            },
        )?;

        self.run_camera_stage(engine, StagePoint::AfterCameraDraw, &snapshot)?;

        let ctx = PostProcessContext {
            camera: Some(&snapshot),
            scene_clear_color: self.clear_color,
            image_processing: Some(&self.image_processing_configuration),
            pre_pass: self.pre_pass_renderer.as_ref(),
        };
        let result = self.post_process_manager.finalize_frame(
            engine,
            &mut self.post_processes,
            false,
            None,
            0,
            &chain,
            false,
            &ctx,
        );
        self.pre_pass_active = false;
        result
    }

    fn stage_mut(&mut self, point: StagePoint) -> &mut Stage {
        match point {
            StagePoint::CameraDrawRenderTarget => &mut self.stages.camera_draw_render_target,
            StagePoint::BeforeCameraDraw => &mut self.stages.before_camera_draw,
            StagePoint::AfterCameraDraw => &mut self.stages.after_camera_draw,
        }
    }

    fn run_camera_stage(
        &mut self,
        engine: &mut Engine,
        point: StagePoint,
        camera: &CameraSnapshot,
    ) -> Result<()> {
        let mut stage = std::mem::take(self.stage_mut(point));
        let result = self.run_stage_entries(engine, &mut stage, camera);
        *self.stage_mut(point) = stage;
        result
    }

    fn run_stage_entries(
        &mut self,
        engine: &mut Engine,
        stage: &mut Stage,
        camera: &CameraSnapshot,
    ) -> Result<()> {
        for entry in stage.entries_mut() {
            match &mut entry.action {
                StageAction::PrePass => {
                    if let Some(renderer) = self.pre_pass_renderer.as_ref().filter(|_| self.pre_pass_active) {
                        renderer.begin_pass(engine, self.clear_color)?;
                    }
                }
                StageAction::EffectLayerRenderTargets => {
                    for layer in &mut self.highlight_layers {
                        if layer.should_render(camera.id) {
                            layer.render_main_texture(engine, &mut self.nodes, camera)?;
                        }
                    }
                }
                StageAction::EffectLayerDraw => {
                    for layer in &mut self.highlight_layers {
                        if layer.should_render(camera.id) {
                            layer.merge(engine)?;
                        }
                    }
                }
                StageAction::RenderPipelines => {}
                StageAction::Custom(action) => action(engine, camera)?,
            }
        }
        Ok(())
    }

    /// Sizes the pre-pass attachments and makes the color attachment the
    /// input of the camera's first post process
    fn setup_pre_pass(&mut self, engine: &mut Engine, chain: &[PostProcessId]) -> Result<bool> {
        let Some(renderer) = self.pre_pass_renderer.as_mut().filter(|r| r.enabled()) else {
            return Ok(false);
        };
        let Some(first) = chain
            .iter()
            .copied()
            .find(|id| self.post_processes.contains_key(*id))
        else {
            return Ok(false);
        };
        let size = Size::new(engine.render_width(true), engine.render_height(true));
        renderer.setup(engine, size)?;
        let color = renderer.textures().first().copied();
        if let Some(post_process) = self.post_processes.get_mut(first) {
            post_process.base_mut().set_input_texture(color);
        }
        Ok(true)
    }

    fn draw_meshes(&mut self, engine: &mut Engine, pass: &DrawPass<'_>) -> Result<()> {
        let eye = pass.camera.position;
        let distance = |nodes: &NodeArena, id: NodeId| {
            let world = nodes.get(id).map_or_else(Matrix4::identity, Node::get_world_matrix);
            (Point3::from_vec(world.w.truncate()) - eye).magnitude2()
        };
        let mut opaque = Vec::new();
        let mut transparent = Vec::new();
        for active in &self.active_meshes {
            if active.layer_mask & pass.camera.layer_mask == 0 {
                continue;
            }
            if pass.render_list.is_some_and(|list| !list.contains(&active.id)) {
                continue;
            }
            if active.transparent {
                transparent.push(*active);
            } else {
                opaque.push(*active);
            }
        }
        transparent.sort_by(|a, b| {
            distance(&self.nodes, b.id).total_cmp(&distance(&self.nodes, a.id))
        });

        for active in opaque.into_iter().chain(transparent) {
            let lights: Vec<LightSnapshot> = self
                .frame_lights
                .iter()
                .filter(|snapshot| {
                    self.nodes
                        .get(snapshot.id)
                        .and_then(Node::light)
                        .is_some_and(|light| light.can_affect_mesh(active.id))
                })
                .copied()
                .collect();
            let ctx = MaterialContext {
                camera: pass.camera,
                lights: &lights,
                image_processing: &self.image_processing_configuration,
                pre_pass: self.pre_pass_renderer.as_ref().filter(|_| self.pre_pass_active),
                textures: &self.textures,
                ambient_color: self.ambient_color,
                environment_texture: self.environment_texture,
                clip_plane: pass.clip_plane,
                render_size: pass.render_size,
                render_id: self.render_id,
            };
            let Some(material) = self.materials.get_mut(active.material) else {
                continue;
            };
            let Some(node) = self.nodes.get_mut(active.id) else {
                continue;
            };
            let world = node.world_matrix;
            let ready = match node.mesh_mut() {
                Some(mesh) => mesh.render(
                    engine,
                    active.id,
                    world,
                    active.material,
                    material.as_mut(),
                    &ctx,
                    pass.invert_culling,
                )?,
                None => continue,
            };
            node.set_ready(active.id, ready);
        }
        Ok(())
    }

    // ---- Disposal ---------------------------------------------------------

    /// Disposes a node; children are disposed too unless `do_not_recurse`,
    /// in which case they move to the root
    pub fn dispose_node(&mut self, engine: &mut Engine, id: NodeId, do_not_recurse: bool) {
        let Some(children) = self.nodes.get(id).map(|node| node.children.clone()) else {
            return;
        };
        for child in children {
            if do_not_recurse {
                self.set_parent(child, None);
            } else {
                self.dispose_node(engine, child, false);
            }
        }
        self.set_parent(id, None);

        let Some(mut node) = self.nodes.remove(id) else {
            return;
        };
        let mut payload = id;
        node.on_dispose.notify(&mut payload);
        node.on_dispose.clear();
        node.on_ready.clear();
        for slot in &mut node.behaviors {
            if slot.attached {
                slot.behavior.detach();
            }
        }
        node.behaviors.clear();

        match &mut node.kind {
            NodeKind::Mesh(mesh) => {
                for layer in &mut self.highlight_layers {
                    layer.forget_mesh(id);
                }
                mesh.dispose(engine);
                for target in self.textures.values_mut().filter_map(|t| t.as_render_target_mut()) {
                    if let Some(list) = target.render_list.as_mut() {
                        list.retain(|mesh| *mesh != id);
                    }
                }
            }
            NodeKind::Camera(_) => {
                if self.active_camera == Some(id) {
                    self.active_camera = None;
                }
                self.active_cameras.retain(|camera| *camera != id);
            }
            NodeKind::Light(_) | NodeKind::TransformNode => {}
        }
        for light in self.nodes.values_mut().filter_map(Node::light_mut) {
            light.included_only_meshes.retain(|mesh| *mesh != id);
            light.excluded_meshes.retain(|mesh| *mesh != id);
        }
        self.animatables.retain(|running| running.target != id);
        self.active_meshes.retain(|active| active.id != id);
        debug!("Disposed node '{}'", node.name);
    }

    /// Releases every resource the scene owns
    pub fn dispose(&mut self, engine: &mut Engine) {
        {
            let mut ctx = RenderPipelineContext {
                engine: &mut *engine,
                nodes: &mut self.nodes,
                post_processes: &mut self.post_processes,
            };
            self.post_process_render_pipeline_manager.dispose(&mut ctx);
        }
        while !self.highlight_layers.is_empty() {
            self.dispose_highlight_layer(engine, 0);
        }
        let roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id)
            .collect();
        for id in roots {
            self.dispose_node(engine, id, false);
        }
        for (_, mut post_process) in self.post_processes.drain() {
            post_process.dispose(engine);
        }
        for (_, mut material) in self.materials.drain() {
            material.dispose(engine);
        }
        for (_, mut texture) in self.textures.drain() {
            texture.dispose(engine);
        }
        if let Some(mut renderer) = self.pre_pass_renderer.take() {
            renderer.dispose(engine);
        }
        self.custom_render_targets.clear();
        self.default_material = None;
        self.on_before_render.clear();
        self.on_after_render.clear();
        info!("Scene disposed");
    }
}

#[derive(Debug, Clone, Copy)]
enum StagePoint {
    CameraDrawRenderTarget,
    BeforeCameraDraw,
    AfterCameraDraw,
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    use cgmath::{Vector3, Vector4};

    use super::*;
    use crate::engine::{CommandLog, EngineOptions, HeadlessBackend};
    use crate::meshes::VertexData;

    fn engine() -> (Engine, CommandLog) {
        let backend = HeadlessBackend::new(64, 48);
        let log = backend.log();
        (Engine::new(Box::new(backend), EngineOptions::default()), log)
    }

    struct Recorder {
        name: String,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl Behavior for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self) {
            self.events.borrow_mut().push("init".into());
        }

        fn attach(&mut self, _target: NodeId) {
            self.events.borrow_mut().push("attach".into());
        }

        fn detach(&mut self) {
            self.events.borrow_mut().push("detach".into());
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_world_matrix_follows_parent() {
        let mut scene = Scene::new();
        let parent = scene.add_transform_node("parent");
        let child = scene.add_transform_node("child");
        scene.node_mut(parent).unwrap().position = Vector3::new(1.0, 0.0, 0.0);
        scene.node_mut(child).unwrap().position = Vector3::new(0.0, 2.0, 0.0);
        assert!(scene.set_parent(child, Some(parent)));

        let world = scene.compute_world_matrix(child, false);
        assert_eq!(world * Vector4::new(0.0, 0.0, 0.0, 1.0), Vector4::new(1.0, 2.0, 0.0, 1.0));

        scene.node_mut(parent).unwrap().position = Vector3::new(3.0, 0.0, 0.0);
        assert!(!scene.is_synchronized(parent, false));
        let world = scene.compute_world_matrix(child, true);
        assert_eq!(world.w, Vector4::new(3.0, 2.0, 0.0, 1.0));
    }

    #[test]
    fn test_forced_world_matrix_recomputes_ancestors() {
        let mut scene = Scene::new();
        let root = scene.add_transform_node("root");
        let middle = scene.add_transform_node("middle");
        let leaf = scene.add_transform_node("leaf");
        assert!(scene.set_parent(middle, Some(root)));
        assert!(scene.set_parent(leaf, Some(middle)));
        scene.compute_world_matrix(leaf, false);

        scene.node_mut(root).unwrap().position = Vector3::new(0.0, 0.0, 5.0);
        scene.node_mut(middle).unwrap().position = Vector3::new(1.0, 0.0, 0.0);
        let world = scene.compute_world_matrix(leaf, true);
        assert_eq!(world.w, Vector4::new(1.0, 0.0, 5.0, 1.0));
        assert_eq!(scene.get_world_matrix(middle).w, Vector4::new(1.0, 0.0, 5.0, 1.0));
    }

    #[test]
    fn test_set_parent_refuses_cycles() {
        let mut scene = Scene::new();
        let a = scene.add_transform_node("a");
        let b = scene.add_transform_node("b");
        assert!(scene.set_parent(b, Some(a)));
        assert!(!scene.set_parent(a, Some(b)));
        assert!(!scene.set_parent(a, Some(a)));
        assert_eq!(scene.parent(a), None);
        assert!(scene.is_descendant_of(b, a));
    }

    #[test]
    fn test_enabled_checks_ancestors() {
        let mut scene = Scene::new();
        let root = scene.add_transform_node("root");
        let leaf = scene.add_transform_node("leaf");
        scene.set_parent(leaf, Some(root));
        scene.set_enabled(root, false);
        assert!(scene.is_enabled(leaf, false));
        assert!(!scene.is_enabled(leaf, true));
    }

    #[test]
    fn test_descendants_with_predicate() {
        let mut scene = Scene::new();
        let root = scene.add_transform_node("root");
        let pivot = scene.add_transform_node("pivot");
        let mesh = scene.add_mesh("box", Mesh::new(VertexData::create_box(1.0, 1.0, 1.0)));
        scene.set_parent(pivot, Some(root));
        scene.set_parent(mesh, Some(pivot));

        assert_eq!(scene.get_descendants(root, false, None), vec![pivot, mesh]);
        assert_eq!(scene.get_children(root), vec![pivot]);
        assert_eq!(scene.get_child_meshes(root, false), vec![mesh]);
        assert!(scene.get_child_meshes(root, true).is_empty());
        assert_eq!(scene.get_child_transform_nodes(root, false), vec![pivot]);
    }

    #[test]
    fn test_behaviors_wait_for_loading() {
        let mut scene = Scene::new();
        let node = scene.add_transform_node("node");
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = |name: &str| {
            Box::new(Recorder {
                name: name.to_string(),
                events: events.clone(),
            })
        };

        scene.set_loading(true);
        assert!(scene.add_behavior(node, recorder("spin")));
        assert!(!scene.add_behavior(node, recorder("spin")));
        assert_eq!(*events.borrow(), vec!["init"]);

        scene.set_loading(false);
        assert_eq!(*events.borrow(), vec!["init", "attach"]);

        assert!(scene.remove_behavior(node, "spin").is_some());
        assert_eq!(events.borrow().last().map(String::as_str), Some("detach"));
        assert_eq!(scene.node(node).unwrap().behavior_count(), 0);
    }

    #[test]
    fn test_dispose_node_recursion() {
        let (mut engine, _) = engine();
        let mut scene = Scene::new();
        let root = scene.add_transform_node("root");
        let kept = scene.add_transform_node("kept");
        scene.set_parent(kept, Some(root));
        scene.dispose_node(&mut engine, root, true);
        assert!(scene.node(root).is_none());
        assert_eq!(scene.parent(kept), None);

        let root = scene.add_transform_node("root");
        let gone = scene.add_transform_node("gone");
        scene.set_parent(gone, Some(root));
        let disposed = Rc::new(RefCell::new(0));
        let counter = disposed.clone();
        scene
            .node_mut(gone)
            .unwrap()
            .on_dispose
            .add(move |_, _| *counter.borrow_mut() += 1);
        scene.dispose_node(&mut engine, root, false);
        assert!(scene.node(gone).is_none());
        assert_eq!(*disposed.borrow(), 1);
    }

    #[test]
    fn test_disposing_active_camera_clears_it() {
        let (mut engine, _) = engine();
        let mut scene = Scene::new();
        let camera = scene.add_camera(
            "camera",
            Camera::new_target(Vector3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 0.0)),
        );
        assert_eq!(scene.active_camera, Some(camera));
        scene.dispose_node(&mut engine, camera, false);
        assert_eq!(scene.active_camera, None);
    }

    #[test]
    fn test_animation_range_drives_property() {
        let mut scene = Scene::new();
        let node = scene.add_transform_node("slider");
        let mut animation = crate::scene::Animation::new("slide", "position.x", 10.0);
        animation.set_keys(vec![
            crate::scene::AnimationKey::new(0.0, 0.0),
            crate::scene::AnimationKey::new(10.0, 5.0),
        ]);
        let target = scene.node_mut(node).unwrap();
        target.animations.push(animation);
        target.create_animation_range("all", 0.0, 10.0);

        assert!(scene.begin_animation(node, "missing", false, 1.0).is_none());
        assert!(scene.begin_animation(node, "all", false, 1.0).is_some());
        scene.animate(500.0);
        assert_eq!(scene.node(node).unwrap().position.x, 2.5);
        scene.animate(1000.0);
        assert_eq!(scene.node(node).unwrap().position.x, 5.0);
        assert!(scene.get_animatable(node).is_none());
    }

    #[test]
    fn test_render_draws_visible_meshes() {
        let (mut engine, log) = engine();
        let mut scene = Scene::new();
        scene.add_camera(
            "camera",
            Camera::new_target(Vector3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 0.0)),
        );
        scene.add_light("sun", Light::new_hemispheric(Vector3::new(0.0, 1.0, 0.0)));
        let visible = scene.add_mesh("box", Mesh::new(VertexData::create_box(1.0, 1.0, 1.0)));
        let hidden = scene.add_mesh("hidden", Mesh::new(VertexData::create_sphere(8, 1.0)));
        scene.mesh_mut(hidden).unwrap().is_visible = false;

        scene.render_with_delta(&mut engine, 16.0).unwrap();
        assert_eq!(log.draws().len(), 1);
        assert_eq!(log.presents(), 1);
        assert!(scene.node(visible).unwrap().is_ready());
        assert_eq!(scene.render_id(), 1);
    }

    #[test]
    fn test_render_without_camera_clears() {
        let (mut engine, log) = engine();
        let mut scene = Scene::new();
        scene.render_with_delta(&mut engine, 0.0).unwrap();
        assert_eq!(log.passes().len(), 1);
        assert!(log.draws().is_empty());
    }
}
