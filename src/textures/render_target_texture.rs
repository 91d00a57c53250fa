//! Textures the scene renders into

use std::any::Any;

use cgmath::{Matrix4, Point3, SquareMatrix};
use log::debug;

use crate::engine::{Engine, RenderTargetOptions};
use crate::error::Result;
use crate::maths::{Color4, Plane, Size};
use crate::misc::Observable;
use crate::postprocesses::PostProcessId;
use crate::scene::NodeId;
use crate::textures::base_texture::{BaseTexture, SceneTexture};

/// Render once, then keep the result
pub const REFRESHRATE_RENDER_ONCE: u32 = 0;
pub const REFRESHRATE_RENDER_ONEVERYFRAME: u32 = 1;
pub const REFRESHRATE_RENDER_ONEVERYTWOFRAMES: u32 = 2;

/// Camera state used while rendering into a target, adjustable by observers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTargetView {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub eye: Point3<f32>,
    pub clip_plane: Option<Plane>,
    /// Flip face culling, as needed when the view is mirrored
    pub invert_culling: bool,
}

impl Default for RenderTargetView {
    fn default() -> Self {
        Self {
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            eye: Point3::new(0.0, 0.0, 0.0),
            clip_plane: None,
            invert_culling: false,
        }
    }
}

impl RenderTargetView {
    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection * self.view
    }
}

#[derive(Debug)]
pub struct RenderTargetTexture {
    pub base: BaseTexture,
    size: Size,
    options: RenderTargetOptions,
    /// Meshes to render; `None` renders every active mesh
    pub render_list: Option<Vec<NodeId>>,
    /// Camera to render with instead of the scene's active camera
    pub active_camera: Option<NodeId>,
    pub clear_color: Option<Color4>,
    pub ignore_camera_viewport: bool,
    pub refresh_rate: u32,
    current_refresh_id: i32,
    post_processes: Vec<PostProcessId>,
    pub on_before_render: Observable<RenderTargetView>,
    pub on_after_render: Observable<RenderTargetView>,
}

impl RenderTargetTexture {
    pub fn new(
        engine: &mut Engine,
        name: &str,
        size: Size,
        options: RenderTargetOptions,
    ) -> Result<Self> {
        let mut base = BaseTexture::new(name);
        base.is_render_target = true;
        base.wrap_u = crate::engine::constants::AddressMode::Clamp;
        base.wrap_v = crate::engine::constants::AddressMode::Clamp;
        base.texture = Some(engine.create_render_target_texture(size, &options)?);
        Ok(Self {
            base,
            size,
            options,
            render_list: Some(Vec::new()),
            active_camera: None,
            clear_color: None,
            ignore_camera_viewport: false,
            refresh_rate: REFRESHRATE_RENDER_ONEVERYFRAME,
            current_refresh_id: -1,
            post_processes: Vec::new(),
            on_before_render: Observable::new(),
            on_after_render: Observable::new(),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn render_target_options(&self) -> &RenderTargetOptions {
        &self.options
    }

    /// Reallocates the target at a new size
    pub fn resize(&mut self, engine: &mut Engine, size: Size) -> Result<()> {
        if size == self.size {
            return Ok(());
        }
        let texture = engine.create_render_target_texture(size, &self.options)?;
        self.base.set_internal_texture(engine, Some(texture));
        self.size = size;
        debug!(
            "Resized render target '{}' to {}x{}",
            self.base.name, size.width, size.height
        );
        Ok(())
    }

    pub fn samples(&self) -> u32 {
        self.options.samples
    }

    /// Sets the MSAA sample count, clamped to what the device supports
    pub fn set_samples(&mut self, engine: &mut Engine, samples: u32) -> Result<()> {
        if let Some(key) = self.base.texture {
            self.options.samples = engine.update_render_target_samples(key, samples)?;
        }
        Ok(())
    }

    pub fn post_processes(&self) -> &[PostProcessId] {
        &self.post_processes
    }

    pub fn add_post_process(&mut self, post_process: PostProcessId) {
        if !self.post_processes.contains(&post_process) {
            self.post_processes.push(post_process);
        }
    }

    pub fn remove_post_process(&mut self, post_process: PostProcessId) -> bool {
        let before = self.post_processes.len();
        self.post_processes.retain(|id| *id != post_process);
        before != self.post_processes.len()
    }

    /// Detaches every post process, returning them so the owner can dispose
    pub fn clear_post_processes(&mut self) -> Vec<PostProcessId> {
        std::mem::take(&mut self.post_processes)
    }

    pub fn reset_refresh_counter(&mut self) {
        self.current_refresh_id = -1;
    }

    /// Whether the target is due for rendering this frame
    pub fn should_render(&mut self) -> bool {
        if self.current_refresh_id == -1 {
            self.current_refresh_id = 1;
            return true;
        }
        if self.refresh_rate as i32 == self.current_refresh_id {
            self.current_refresh_id = 1;
            return true;
        }
        self.current_refresh_id += 1;
        false
    }

    pub fn includes_mesh(&self, mesh: NodeId) -> bool {
        self.render_list
            .as_ref()
            .map_or(true, |list| list.contains(&mesh))
    }
}

impl SceneTexture for RenderTargetTexture {
    fn base(&self) -> &BaseTexture {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseTexture {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "RenderTargetTexture"
    }

    fn as_render_target(&self) -> Option<&RenderTargetTexture> {
        Some(self)
    }

    fn as_render_target_mut(&mut self) -> Option<&mut RenderTargetTexture> {
        Some(self)
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common();
        value["renderTargetSize"] = serde_json::json!([self.size.width, self.size.height]);
        value["refreshRate"] = self.refresh_rate.into();
        value["samples"] = self.options.samples.into();
        value
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default())
    }

    #[test]
    fn test_refresh_rate() {
        let mut engine = engine();
        let mut target = RenderTargetTexture::new(
            &mut engine,
            "rt",
            Size::square(16),
            RenderTargetOptions::default(),
        )
        .unwrap();
        target.refresh_rate = REFRESHRATE_RENDER_ONEVERYTWOFRAMES;
        let pattern: Vec<bool> = (0..5).map(|_| target.should_render()).collect();
        assert_eq!(pattern, vec![true, false, true, false, true]);

        target.refresh_rate = REFRESHRATE_RENDER_ONCE;
        target.reset_refresh_counter();
        assert!(target.should_render());
        assert!(!target.should_render());
        assert!(!target.should_render());
    }

    #[test]
    fn test_resize_releases_previous_texture() {
        let mut engine = engine();
        let mut target = RenderTargetTexture::new(
            &mut engine,
            "rt",
            Size::square(16),
            RenderTargetOptions::default(),
        )
        .unwrap();
        let first = target.base.internal_texture().unwrap();
        target.resize(&mut engine, Size::new(32, 8)).unwrap();
        assert!(engine.internal_texture(first).is_none());
        assert_eq!(target.base.size(&engine), Size::new(32, 8));
        assert_eq!(engine.internal_texture_count(), 1);
    }

    #[test]
    fn test_samples_are_clamped() {
        let mut engine = engine();
        let mut target = RenderTargetTexture::new(
            &mut engine,
            "rt",
            Size::square(16),
            RenderTargetOptions::default(),
        )
        .unwrap();
        target.set_samples(&mut engine, 64).unwrap();
        assert_eq!(target.samples(), engine.caps().max_samples);
    }
}
