//! Render target showing the scene reflected across a plane

use std::any::Any;

use cgmath::{Matrix4, SquareMatrix, Transform, Vector2};
use log::debug;

use crate::engine::constants::TextureType;
use crate::engine::{Engine, RenderTargetOptions};
use crate::error::Result;
use crate::maths::{almost_equal, reflection_matrix, Plane, Size};
use crate::postprocesses::{BlurPostProcess, PostProcessArena, PostProcessId, ScenePostProcess};
use crate::textures::base_texture::{BaseTexture, SceneTexture};
use crate::textures::render_target_texture::{RenderTargetTexture, RenderTargetView};

#[derive(Debug)]
pub struct MirrorTexture {
    pub target: RenderTargetTexture,
    /// Plane the scene is mirrored across; also used as clip plane
    pub mirror_plane: Plane,
    blur_ratio: f32,
    blur_kernel_x: f32,
    blur_kernel_y: f32,
    adaptive_blur_kernel: f32,
    blur_x: Option<PostProcessId>,
    blur_y: Option<PostProcessId>,
    blur_dirty: bool,
    mirror_matrix: Matrix4<f32>,
    saved_view: Option<RenderTargetView>,
}

impl MirrorTexture {
    pub fn new(engine: &mut Engine, name: &str, size: Size, options: RenderTargetOptions) -> Result<Self> {
        let gamma_space = options.texture_type == TextureType::UnsignedInt;
        let mut target = RenderTargetTexture::new(engine, name, size, options)?;
        target.ignore_camera_viewport = true;
        target.base.gamma_space = gamma_space;
        Ok(Self {
            target,
            mirror_plane: Plane::new(0.0, 1.0, 0.0, 1.0),
            blur_ratio: 1.0,
            blur_kernel_x: 0.0,
            blur_kernel_y: 0.0,
            adaptive_blur_kernel: 0.0,
            blur_x: None,
            blur_y: None,
            blur_dirty: false,
            mirror_matrix: Matrix4::identity(),
            saved_view: None,
        })
    }

    pub fn blur_ratio(&self) -> f32 {
        self.blur_ratio
    }

    /// Size of the blur textures relative to the mirror
    pub fn set_blur_ratio(&mut self, ratio: f32) {
        if almost_equal(self.blur_ratio, ratio) {
            return;
        }
        self.blur_ratio = ratio;
        self.blur_dirty = true;
    }

    pub fn blur_kernel_x(&self) -> f32 {
        self.blur_kernel_x
    }

    pub fn set_blur_kernel_x(&mut self, kernel: f32) {
        if almost_equal(self.blur_kernel_x, kernel) {
            return;
        }
        self.blur_kernel_x = kernel;
        self.blur_dirty = true;
    }

    pub fn blur_kernel_y(&self) -> f32 {
        self.blur_kernel_y
    }

    pub fn set_blur_kernel_y(&mut self, kernel: f32) {
        if almost_equal(self.blur_kernel_y, kernel) {
            return;
        }
        self.blur_kernel_y = kernel;
        self.blur_dirty = true;
    }

    /// Same kernel on both axes
    pub fn set_blur_kernel(&mut self, kernel: f32) {
        self.set_blur_kernel_x(kernel);
        self.set_blur_kernel_y(kernel);
    }

    pub fn adaptive_blur_kernel(&self) -> f32 {
        self.adaptive_blur_kernel
    }

    /// Kernel expressed in screen pixels, scaled to the mirror resolution
    pub fn set_adaptive_blur_kernel(&mut self, engine: &Engine, kernel: f32) {
        self.adaptive_blur_kernel = kernel;
        let size = self.target.size();
        let dw = size.width as f32 / engine.render_width(false).max(1) as f32;
        let dh = size.height as f32 / engine.render_height(false).max(1) as f32;
        self.set_blur_kernel_x(kernel * dw);
        self.set_blur_kernel_y(kernel * dh);
    }

    pub fn blur_post_processes(&self) -> (Option<PostProcessId>, Option<PostProcessId>) {
        (self.blur_x, self.blur_y)
    }

    fn clear_blurs(&mut self, engine: &mut Engine, post_processes: &mut PostProcessArena) {
        for id in self.target.clear_post_processes() {
            if let Some(mut post_process) = post_processes.remove(id) {
                post_process.dispose(engine);
            }
        }
        self.blur_x = None;
        self.blur_y = None;
    }

    fn prepare_blurs(&mut self, engine: &mut Engine, post_processes: &mut PostProcessArena) {
        self.clear_blurs(engine, post_processes);
        if self.blur_kernel_x == 0.0 || self.blur_kernel_y == 0.0 {
            return;
        }
        let texture_type = if engine.caps().texture_float_render {
            TextureType::Float
        } else {
            TextureType::HalfFloat
        };
        let config = |name: &str| {
            BlurPostProcess::config(name)
                .with_ratio(self.blur_ratio)
                .with_texture_type(texture_type)
        };

        let mut blur_x = BlurPostProcess::new(
            engine,
            "horizontal blur",
            Vector2::new(1.0, 0.0),
            self.blur_kernel_x,
            config("horizontal blur"),
        );
        blur_x.base_mut().auto_clear = false;
        if self.blur_ratio == 1.0 && self.target.samples() < 2 && self.target.base.texture.is_some() {
            blur_x.base_mut().set_input_texture(self.target.base.texture);
        } else {
            blur_x.base_mut().always_force_pot = true;
        }

        let mut blur_y = BlurPostProcess::new(
            engine,
            "vertical blur",
            Vector2::new(0.0, 1.0),
            self.blur_kernel_y,
            config("vertical blur"),
        );
        blur_y.base_mut().auto_clear = false;
        blur_y.base_mut().always_force_pot = self.blur_ratio != 1.0;

        let blur_x = post_processes.insert(Box::new(blur_x));
        let blur_y = post_processes.insert(Box::new(blur_y));
        self.target.add_post_process(blur_x);
        self.target.add_post_process(blur_y);
        self.blur_x = Some(blur_x);
        self.blur_y = Some(blur_y);
        debug!(
            "Mirror '{}' blurs rebuilt ({} x {})",
            self.target.base.name, self.blur_kernel_x, self.blur_kernel_y
        );
    }

    /// New mirror with the same size, plane and render list
    pub fn clone_texture(&self, engine: &mut Engine) -> Result<Self> {
        let mut clone = Self::new(
            engine,
            &self.target.base.name,
            self.target.size(),
            self.target.render_target_options().clone(),
        )?;
        self.target.base.copy_settings_to(&mut clone.target.base);
        clone.mirror_plane = self.mirror_plane;
        clone.target.render_list = self.target.render_list.clone();
        clone.blur_ratio = self.blur_ratio;
        clone.blur_kernel_x = self.blur_kernel_x;
        clone.blur_kernel_y = self.blur_kernel_y;
        clone.blur_dirty = clone.blur_kernel_x != 0.0 && clone.blur_kernel_y != 0.0;
        Ok(clone)
    }
}

impl SceneTexture for MirrorTexture {
    fn base(&self) -> &BaseTexture {
        &self.target.base
    }

    fn base_mut(&mut self) -> &mut BaseTexture {
        &mut self.target.base
    }

    fn class_name(&self) -> &'static str {
        "MirrorTexture"
    }

    fn as_render_target(&self) -> Option<&RenderTargetTexture> {
        Some(&self.target)
    }

    fn as_render_target_mut(&mut self) -> Option<&mut RenderTargetTexture> {
        Some(&mut self.target)
    }

    fn prepare(&mut self, engine: &mut Engine, post_processes: &mut PostProcessArena) -> Result<()> {
        if self.blur_dirty {
            self.prepare_blurs(engine, post_processes);
            self.blur_dirty = false;
        }
        Ok(())
    }

    fn before_render(&mut self, view: &mut RenderTargetView) {
        self.saved_view = Some(*view);
        self.mirror_matrix = reflection_matrix(&self.mirror_plane);
        view.view = view.view * self.mirror_matrix;
        view.eye = self.mirror_matrix.transform_point(view.eye);
        view.clip_plane = Some(self.mirror_plane);
        view.invert_culling = true;
        self.target.on_before_render.notify(view);
    }

    fn after_render(&mut self, view: &mut RenderTargetView) {
        self.target.on_after_render.notify(view);
        if let Some(saved) = self.saved_view.take() {
            *view = saved;
        }
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.target.serialize();
        value["customType"] = "BABYLON.MirrorTexture".into();
        value["mirrorPlane"] = serde_json::json!(self.mirror_plane.to_array());
        value["blurRatio"] = self.blur_ratio.into();
        value["blurKernelX"] = self.blur_kernel_x.into();
        value["blurKernelY"] = self.blur_kernel_y.into();
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
    use cgmath::Point3;
    use crate::engine::{EngineOptions, HeadlessBackend};

    fn mirror(engine: &mut Engine) -> MirrorTexture {
        MirrorTexture::new(engine, "mirror", Size::square(64), RenderTargetOptions::default()).unwrap()
    }

    #[test]
    fn test_blurs_need_both_kernels() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let mut arena = PostProcessArena::with_key();
        let mut texture = mirror(&mut engine);

        texture.set_blur_kernel_x(16.0);
        texture.prepare(&mut engine, &mut arena).unwrap();
        assert!(arena.is_empty());

        texture.set_blur_kernel_y(16.0);
        texture.prepare(&mut engine, &mut arena).unwrap();
        assert_eq!(arena.len(), 2);
        let (Some(x), Some(y)) = texture.blur_post_processes() else {
            panic!("blurs were not created");
        };
        assert_eq!(texture.target.post_processes(), &[x, y]);
        assert!(!arena[x].base().always_force_pot);
        assert!(!arena[y].base().always_force_pot);
        assert!(!arena[x].base().auto_clear);

        // Nearly identical values keep the existing blurs
        texture.set_blur_kernel_x(16.0 + 16.0 * f32::EPSILON);
        texture.prepare(&mut engine, &mut arena).unwrap();
        assert_eq!(texture.blur_post_processes(), (Some(x), Some(y)));

        texture.set_blur_ratio(0.5);
        texture.prepare(&mut engine, &mut arena).unwrap();
        assert_eq!(arena.len(), 2);
        let (Some(x), Some(y)) = texture.blur_post_processes() else {
            panic!("blurs were not rebuilt");
        };
        assert!(arena[x].base().always_force_pot);
        assert!(arena[y].base().always_force_pot);

        texture.set_blur_kernel(0.0);
        texture.prepare(&mut engine, &mut arena).unwrap();
        assert!(arena.is_empty());
        assert!(texture.target.post_processes().is_empty());
    }

    #[test]
    fn test_view_is_mirrored_then_restored() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let mut texture = mirror(&mut engine);
        texture.mirror_plane = Plane::new(0.0, 1.0, 0.0, 0.0);
        let original = RenderTargetView {
            eye: Point3::new(0.0, 3.0, -5.0),
            ..Default::default()
        };
        let mut view = original;
        texture.before_render(&mut view);
        assert_eq!(view.eye, Point3::new(0.0, -3.0, -5.0));
        assert!(view.invert_culling);
        assert_eq!(view.clip_plane, Some(texture.mirror_plane));

        texture.after_render(&mut view);
        assert_eq!(view, original);
    }

    #[test]
    fn test_clone_keeps_plane_and_render_list() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let mut texture = mirror(&mut engine);
        texture.mirror_plane = Plane::new(0.0, 0.0, 1.0, 2.0);
        texture.target.render_list = None;
        let clone = texture.clone_texture(&mut engine).unwrap();
        assert_eq!(clone.mirror_plane, texture.mirror_plane);
        assert_eq!(clone.target.render_list, None);
        assert_ne!(clone.base().internal_texture(), texture.base().internal_texture());
    }
}
