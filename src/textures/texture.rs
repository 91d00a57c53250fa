//! 2D textures loaded from image files or raw texels

use std::any::Any;

use cgmath::{Matrix4, Rad, SquareMatrix, Vector3};
use log::warn;

use crate::engine::constants::{SamplingMode, TextureFormat, TextureType};
use crate::engine::Engine;
use crate::error::Result;
use crate::textures::base_texture::{BaseTexture, SceneTexture};

/// A 2D texture with an optional uv transform
#[derive(Debug, Clone)]
pub struct Texture {
    pub base: BaseTexture,
    pub url: String,
    pub no_mipmap: bool,
    pub invert_y: bool,
    pub u_offset: f32,
    pub v_offset: f32,
    pub u_scale: f32,
    pub v_scale: f32,
    pub u_ang: f32,
    pub v_ang: f32,
    pub w_ang: f32,
    initial_sampling_mode: SamplingMode,
}

impl Texture {
    fn empty(url: &str, no_mipmap: bool, invert_y: bool, sampling_mode: SamplingMode) -> Self {
        Self {
            base: BaseTexture::new(url),
            url: url.to_string(),
            no_mipmap,
            invert_y,
            u_offset: 0.0,
            v_offset: 0.0,
            u_scale: 1.0,
            v_scale: 1.0,
            u_ang: 0.0,
            v_ang: 0.0,
            w_ang: 0.0,
            initial_sampling_mode: sampling_mode,
        }
    }

    /// Loads (or reuses) the image at `url`
    pub fn new(
        engine: &mut Engine,
        url: &str,
        no_mipmap: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
    ) -> Result<Self> {
        let mut texture = Self::empty(url, no_mipmap, invert_y, sampling_mode);
        texture.base.texture =
            Some(engine.create_texture(url, no_mipmap, invert_y, sampling_mode)?);
        Ok(texture)
    }

    /// Decodes an in-memory encoded image
    pub fn from_buffer(
        engine: &mut Engine,
        name: &str,
        bytes: &[u8],
        no_mipmap: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
    ) -> Result<Self> {
        let mut texture = Self::empty(name, no_mipmap, invert_y, sampling_mode);
        texture.url = String::new();
        texture.base.texture = Some(engine.create_texture_from_buffer(
            name,
            bytes,
            no_mipmap,
            invert_y,
            sampling_mode,
        )?);
        Ok(texture)
    }

    /// Wraps raw RGBA8 texels
    pub fn from_raw_rgba(
        engine: &mut Engine,
        name: &str,
        data: &[u8],
        width: u32,
        height: u32,
        sampling_mode: SamplingMode,
    ) -> Result<Self> {
        let mut texture = Self::empty(name, true, false, sampling_mode);
        texture.url = String::new();
        texture.base.texture = Some(engine.create_raw_texture(
            Some(data),
            width,
            height,
            TextureFormat::Rgba,
            false,
            false,
            sampling_mode,
            TextureType::UnsignedInt,
        )?);
        Ok(texture)
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.initial_sampling_mode
    }

    /// Creates an independent texture sharing the same GPU texture
    pub fn clone_texture(&self, engine: &mut Engine) -> Result<Self> {
        if self.url.is_empty() {
            if let Some(internal) = self.base.texture.and_then(|key| engine.internal_texture_mut(key)) {
                internal.increment_references();
            }
            return Ok(self.clone());
        }
        let mut texture = Texture::new(
            engine,
            &self.url,
            self.no_mipmap,
            self.invert_y,
            self.initial_sampling_mode,
        )?;
        self.base.copy_settings_to(&mut texture.base);
        texture.u_offset = self.u_offset;
        texture.v_offset = self.v_offset;
        texture.u_scale = self.u_scale;
        texture.v_scale = self.v_scale;
        texture.u_ang = self.u_ang;
        texture.v_ang = self.v_ang;
        texture.w_ang = self.w_ang;
        Ok(texture)
    }

    /// Rebuilds a texture from its serialized form
    pub fn parse(value: &serde_json::Value, engine: &mut Engine, root_url: &str) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let url = value
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(name);
        let sampling_mode = value
            .get("samplingMode")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| SamplingMode::from_u32(v as u32))
            .unwrap_or_default();
        let invert_y = value
            .get("invertY")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let mut texture = Texture::new(
            engine,
            &format!("{}{}", root_url, url),
            false,
            invert_y,
            sampling_mode,
        )?;
        texture.base.parse_common(value);
        let f = |key: &str, default: f32| {
            value
                .get(key)
                .and_then(serde_json::Value::as_f64)
                .map_or(default, |v| v as f32)
        };
        texture.u_offset = f("uOffset", 0.0);
        texture.v_offset = f("vOffset", 0.0);
        texture.u_scale = f("uScale", 1.0);
        texture.v_scale = f("vScale", 1.0);
        texture.u_ang = f("uAng", 0.0);
        texture.v_ang = f("vAng", 0.0);
        texture.w_ang = f("wAng", 0.0);
        if texture.base.texture.is_none() {
            warn!("Texture '{}' could not be parsed", name);
        }
        Ok(texture)
    }
}

impl SceneTexture for Texture {
    fn base(&self) -> &BaseTexture {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseTexture {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "Texture"
    }

    /// Rotation about the uv centre, then scale and offset
    fn texture_matrix(&self) -> Matrix4<f32> {
        let center = Vector3::new(0.5, 0.5, 0.0);
        let rotation = Matrix4::from_angle_z(Rad(self.w_ang))
            * Matrix4::from_angle_y(Rad(self.v_ang))
            * Matrix4::from_angle_x(Rad(self.u_ang));
        if self.u_ang == 0.0 && self.v_ang == 0.0 && self.w_ang == 0.0
            && self.u_scale == 1.0
            && self.v_scale == 1.0
            && self.u_offset == 0.0
            && self.v_offset == 0.0
        {
            return Matrix4::identity();
        }
        Matrix4::from_translation(Vector3::new(self.u_offset, self.v_offset, 0.0))
            * Matrix4::from_translation(center)
            * Matrix4::from_nonuniform_scale(self.u_scale, self.v_scale, 1.0)
            * rotation
            * Matrix4::from_translation(-center)
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common();
        value["url"] = self.url.clone().into();
        value["invertY"] = self.invert_y.into();
        value["samplingMode"] = self.initial_sampling_mode.as_u32().into();
        value["uOffset"] = self.u_offset.into();
        value["vOffset"] = self.v_offset.into();
        value["uScale"] = self.u_scale.into();
        value["vScale"] = self.v_scale.into();
        value["uAng"] = self.u_ang.into();
        value["vAng"] = self.v_ang.into();
        value["wAng"] = self.w_ang.into();
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
    use cgmath::Vector4;

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(8, 8)), EngineOptions::default())
    }

    #[test]
    fn test_identity_matrix_by_default() {
        let mut engine = engine();
        let texture =
            Texture::from_raw_rgba(&mut engine, "white", &[255; 16], 2, 2, SamplingMode::Nearest)
                .unwrap();
        assert_eq!(texture.texture_matrix(), Matrix4::identity());
        assert!(texture.is_ready(&engine));
    }

    #[test]
    fn test_offset_and_scale() {
        let mut engine = engine();
        let mut texture =
            Texture::from_raw_rgba(&mut engine, "white", &[255; 16], 2, 2, SamplingMode::Nearest)
                .unwrap();
        texture.u_scale = 2.0;
        texture.u_offset = 0.25;
        let uv = texture.texture_matrix() * Vector4::new(0.5, 0.5, 0.0, 1.0);
        assert!((uv.x - 0.75).abs() < 1e-6);
        let uv = texture.texture_matrix() * Vector4::new(1.0, 0.5, 0.0, 1.0);
        assert!((uv.x - 1.75).abs() < 1e-6);
    }

    #[test]
    fn test_clone_shares_raw_texture() {
        let mut engine = engine();
        let texture =
            Texture::from_raw_rgba(&mut engine, "white", &[255; 16], 2, 2, SamplingMode::Nearest)
                .unwrap();
        let mut copy = texture.clone_texture(&mut engine).unwrap();
        let key = texture.base.internal_texture().unwrap();
        assert_eq!(engine.internal_texture(key).unwrap().references(), 2);
        copy.dispose(&mut engine);
        assert!(engine.internal_texture(key).is_some());
    }
}
