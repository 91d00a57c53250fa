//! State shared by every scene texture and the trait scene textures implement

use std::any::Any;

use cgmath::{Matrix4, SquareMatrix};

use crate::engine::constants::{AddressMode, CoordinatesMode, DelayLoadState, SamplingMode};
use crate::engine::Engine;
use crate::error::Result;
use crate::maths::Size;
use crate::postprocesses::PostProcessArena;
use crate::scene::animation::Animation;
use crate::textures::internal_texture::TextureKey;
use crate::textures::render_target_texture::{RenderTargetTexture, RenderTargetView};

/// Common texture settings: addressing, filtering hints and the GPU texture
#[derive(Debug, Clone)]
pub struct BaseTexture {
    pub name: String,
    pub has_alpha: bool,
    pub get_alpha_from_rgb: bool,
    pub level: f32,
    pub coordinates_index: u32,
    pub coordinates_mode: CoordinatesMode,
    pub wrap_u: AddressMode,
    pub wrap_v: AddressMode,
    pub wrap_r: AddressMode,
    pub anisotropic_filtering_level: u32,
    pub gamma_space: bool,
    pub invert_z: bool,
    pub is_cube: bool,
    pub is_3d: bool,
    pub is_render_target: bool,
    pub delay_load_state: DelayLoadState,
    pub lod_generation_offset: f32,
    pub lod_generation_scale: f32,
    pub animations: Vec<Animation>,
    pub(crate) texture: Option<TextureKey>,
}

impl Default for BaseTexture {
    fn default() -> Self {
        Self {
            name: String::new(),
            has_alpha: false,
            get_alpha_from_rgb: false,
            level: 1.0,
            coordinates_index: 0,
            coordinates_mode: CoordinatesMode::Explicit,
            wrap_u: AddressMode::Wrap,
            wrap_v: AddressMode::Wrap,
            wrap_r: AddressMode::Wrap,
            anisotropic_filtering_level: 4,
            gamma_space: true,
            invert_z: false,
            is_cube: false,
            is_3d: false,
            is_render_target: false,
            delay_load_state: DelayLoadState::None,
            lod_generation_offset: 0.0,
            lod_generation_scale: 0.0,
            animations: Vec::new(),
            texture: None,
        }
    }
}

impl BaseTexture {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn internal_texture(&self) -> Option<TextureKey> {
        self.texture
    }

    /// Replaces the internal texture, releasing the previous one
    pub fn set_internal_texture(&mut self, engine: &mut Engine, texture: Option<TextureKey>) {
        if self.texture == texture {
            return;
        }
        if let Some(previous) = self.texture.take() {
            engine.release_internal_texture(previous);
        }
        self.texture = texture;
    }

    pub fn is_ready(&self, engine: &Engine) -> bool {
        if self.delay_load_state == DelayLoadState::NotLoaded {
            return true;
        }
        self.texture
            .and_then(|key| engine.internal_texture(key))
            .is_some_and(|texture| texture.is_ready)
    }

    pub fn size(&self, engine: &Engine) -> Size {
        self.texture
            .and_then(|key| engine.internal_texture(key))
            .map_or_else(Size::default, |texture| {
                Size::new(texture.width, texture.height)
            })
    }

    pub fn base_size(&self, engine: &Engine) -> Size {
        self.texture
            .and_then(|key| engine.internal_texture(key))
            .map_or_else(Size::default, |texture| {
                Size::new(texture.base_width, texture.base_height)
            })
    }

    pub fn sampling_mode(&self, engine: &Engine) -> SamplingMode {
        self.texture
            .and_then(|key| engine.internal_texture(key))
            .map_or(SamplingMode::Trilinear, |texture| texture.sampling_mode)
    }

    pub fn update_sampling_mode(&self, engine: &mut Engine, mode: SamplingMode) -> Result<()> {
        match self.texture {
            Some(key) => engine.update_texture_sampling_mode(mode, key),
            None => Ok(()),
        }
    }

    /// Pushes the wrap modes and anisotropy to the GPU sampler
    pub fn sync_sampler(&self, engine: &mut Engine) -> Result<()> {
        match self.texture {
            Some(key) => engine.update_texture_wrapping(
                key,
                self.wrap_u,
                self.wrap_v,
                self.wrap_r,
                self.anisotropic_filtering_level,
            ),
            None => Ok(()),
        }
    }

    pub fn is_rgbd(&self, engine: &Engine) -> bool {
        self.texture
            .and_then(|key| engine.internal_texture(key))
            .is_some_and(|texture| texture.is_rgbd())
    }

    /// Copies the settings shared by every texture kind onto a clone
    pub fn copy_settings_to(&self, target: &mut BaseTexture) {
        target.has_alpha = self.has_alpha;
        target.get_alpha_from_rgb = self.get_alpha_from_rgb;
        target.level = self.level;
        target.coordinates_index = self.coordinates_index;
        target.coordinates_mode = self.coordinates_mode;
        target.wrap_u = self.wrap_u;
        target.wrap_v = self.wrap_v;
        target.wrap_r = self.wrap_r;
        target.anisotropic_filtering_level = self.anisotropic_filtering_level;
        target.gamma_space = self.gamma_space;
        target.invert_z = self.invert_z;
        target.lod_generation_offset = self.lod_generation_offset;
        target.lod_generation_scale = self.lod_generation_scale;
        target.animations = self.animations.clone();
    }

    pub fn serialize_common(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "hasAlpha": self.has_alpha,
            "getAlphaFromRGB": self.get_alpha_from_rgb,
            "level": self.level,
            "coordinatesIndex": self.coordinates_index,
            "coordinatesMode": self.coordinates_mode.as_u32(),
            "wrapU": self.wrap_u.as_u32(),
            "wrapV": self.wrap_v.as_u32(),
            "wrapR": self.wrap_r.as_u32(),
            "anisotropicFilteringLevel": self.anisotropic_filtering_level,
            "gammaSpace": self.gamma_space,
            "isCube": self.is_cube,
            "is3D": self.is_3d,
            "isRenderTarget": self.is_render_target,
            "animations": self.animations,
        })
    }

    /// Reads the shared settings written by [`BaseTexture::serialize_common`]
    pub fn parse_common(&mut self, value: &serde_json::Value) {
        let f = |key: &str| value.get(key).and_then(serde_json::Value::as_f64);
        let b = |key: &str| value.get(key).and_then(serde_json::Value::as_bool);
        let u = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as u32)
        };
        if let Some(name) = value.get("name").and_then(serde_json::Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(v) = b("hasAlpha") {
            self.has_alpha = v;
        }
        if let Some(v) = b("getAlphaFromRGB") {
            self.get_alpha_from_rgb = v;
        }
        if let Some(v) = f("level") {
            self.level = v as f32;
        }
        if let Some(v) = u("coordinatesIndex") {
            self.coordinates_index = v;
        }
        if let Some(v) = u("coordinatesMode").and_then(CoordinatesMode::from_u32) {
            self.coordinates_mode = v;
        }
        if let Some(v) = u("wrapU").and_then(AddressMode::from_u32) {
            self.wrap_u = v;
        }
        if let Some(v) = u("wrapV").and_then(AddressMode::from_u32) {
            self.wrap_v = v;
        }
        if let Some(v) = u("wrapR").and_then(AddressMode::from_u32) {
            self.wrap_r = v;
        }
        if let Some(v) = u("anisotropicFilteringLevel") {
            self.anisotropic_filtering_level = v;
        }
        if let Some(v) = b("gammaSpace") {
            self.gamma_space = v;
        }
        if let Some(animations) = value
            .get("animations")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
        {
            self.animations = animations;
        }
    }

    /// Releases the internal texture
    pub fn dispose(&mut self, engine: &mut Engine) {
        if let Some(texture) = self.texture.take() {
            engine.release_internal_texture(texture);
        }
    }
}

/// Behaviour every texture stored in a scene provides
pub trait SceneTexture: Any {
    fn base(&self) -> &BaseTexture;

    fn base_mut(&mut self) -> &mut BaseTexture;

    fn class_name(&self) -> &'static str;

    /// Matrix applied to explicit texture coordinates
    fn texture_matrix(&self) -> Matrix4<f32> {
        Matrix4::identity()
    }

    /// Matrix applied to reflection vectors for cube and mirror lookups
    fn reflection_texture_matrix(&self) -> Matrix4<f32> {
        Matrix4::identity()
    }

    fn is_ready(&self, engine: &Engine) -> bool {
        self.base().is_ready(engine)
    }

    /// Loads a texture whose load was postponed
    fn delay_load(&mut self, _engine: &mut Engine) -> Result<()> {
        Ok(())
    }

    /// Render target view, for textures the scene renders into
    fn as_render_target(&self) -> Option<&RenderTargetTexture> {
        None
    }

    fn as_render_target_mut(&mut self) -> Option<&mut RenderTargetTexture> {
        None
    }

    /// Called before the scene renders into this texture
    ///
    /// Post processes owned by the texture are (re)created here.
    fn prepare(
        &mut self,
        _engine: &mut Engine,
        _post_processes: &mut PostProcessArena,
    ) -> Result<()> {
        Ok(())
    }

    fn before_render(&mut self, view: &mut RenderTargetView) {
        if let Some(target) = self.as_render_target_mut() {
            target.on_before_render.notify(view);
        }
    }

    fn after_render(&mut self, view: &mut RenderTargetView) {
        if let Some(target) = self.as_render_target_mut() {
            target.on_after_render.notify(view);
        }
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base().serialize_common();
        value["customType"] = serde_json::Value::from(self.class_name());
        value
    }

    fn dispose(&mut self, engine: &mut Engine) {
        self.base_mut().dispose(engine);
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_settings_roundtrip() {
        let mut texture = BaseTexture::new("albedo");
        texture.level = 0.5;
        texture.wrap_u = AddressMode::Mirror;
        texture.coordinates_mode = CoordinatesMode::Cubic;
        texture.gamma_space = false;
        let value = texture.serialize_common();

        let mut parsed = BaseTexture::default();
        parsed.parse_common(&value);
        assert_eq!(parsed.name, "albedo");
        assert_eq!(parsed.level, 0.5);
        assert_eq!(parsed.wrap_u, AddressMode::Mirror);
        assert_eq!(parsed.coordinates_mode, CoordinatesMode::Cubic);
        assert!(!parsed.gamma_space);
    }
}
