//! Cube textures from six images or from a prefiltered `.env` container

use std::any::Any;

use cgmath::{Matrix4, Rad, Vector3};
use log::debug;

use crate::engine::constants::{CoordinatesMode, DelayLoadState, TextureFormat};
use crate::engine::Engine;
use crate::error::Result;
use crate::misc::file_tools;
use crate::textures::base_texture::{BaseTexture, SceneTexture};

pub const DEFAULT_EXTENSIONS: [&str; 6] = [
    "_px.jpg", "_py.jpg", "_pz.jpg", "_nx.jpg", "_ny.jpg", "_nz.jpg",
];

/// Creation options of a [`CubeTexture`]
#[derive(Debug, Clone, PartialEq)]
pub struct CubeTextureOptions {
    pub extensions: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub no_mipmap: bool,
    pub format: Option<TextureFormat>,
    pub prefiltered: bool,
    pub delay_load: bool,
    pub lod_scale: f32,
    pub lod_offset: f32,
}

impl Default for CubeTextureOptions {
    fn default() -> Self {
        Self {
            extensions: None,
            files: None,
            no_mipmap: false,
            format: None,
            prefiltered: false,
            delay_load: false,
            lod_scale: 0.8,
            lod_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CubeTexture {
    pub base: BaseTexture,
    pub url: String,
    pub extensions: Vec<String>,
    pub files: Vec<String>,
    pub no_mipmap: bool,
    pub format: Option<TextureFormat>,
    pub prefiltered: bool,
    /// Rotation of the environment around the Y axis, in radians
    pub rotation_y: f32,
    pub bounding_box_position: Vector3<f32>,
    pub bounding_box_size: Option<Vector3<f32>>,
    lod_scale: f32,
    lod_offset: f32,
}

impl CubeTexture {
    /// Builds a cube texture from `root_url`
    ///
    /// Without explicit files the six faces are `root_url` plus each
    /// extension. A `.env` url (or `prefiltered`) loads a prefiltered
    /// container instead.
    pub fn new(engine: &mut Engine, root_url: &str, options: CubeTextureOptions) -> Result<Self> {
        let extension = file_tools::extension_of(root_url);
        let is_env = extension == ".env";
        let extensions: Vec<String> = options.extensions.clone().unwrap_or_else(|| {
            DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
        });
        let files = match options.files.clone() {
            Some(files) => files,
            None if is_env || options.prefiltered => Vec::new(),
            None => extensions
                .iter()
                .map(|ext| format!("{}{}", root_url, ext))
                .collect(),
        };

        let mut base = BaseTexture::new(root_url);
        base.is_cube = true;
        base.coordinates_mode = CoordinatesMode::Cubic;
        let prefiltered = options.prefiltered || is_env;
        if prefiltered {
            base.gamma_space = false;
            base.anisotropic_filtering_level = 1;
        }
        let mut texture = Self {
            base,
            url: root_url.to_string(),
            extensions,
            files,
            no_mipmap: options.no_mipmap,
            format: options.format,
            prefiltered,
            rotation_y: 0.0,
            bounding_box_position: Vector3::new(0.0, 0.0, 0.0),
            bounding_box_size: None,
            lod_scale: options.lod_scale,
            lod_offset: options.lod_offset,
        };
        if options.delay_load {
            texture.base.delay_load_state = DelayLoadState::NotLoaded;
        } else {
            texture.load(engine)?;
        }
        Ok(texture)
    }

    /// Builds a cube texture from six explicit face files
    pub fn create_from_images(engine: &mut Engine, files: &[String], no_mipmap: bool) -> Result<Self> {
        let root_url = files.first().cloned().unwrap_or_default();
        Self::new(
            engine,
            &root_url,
            CubeTextureOptions {
                files: Some(files.to_vec()),
                no_mipmap,
                ..Default::default()
            },
        )
    }

    /// Builds a cube texture from a prefiltered `.env` file
    pub fn create_from_prefiltered_data(engine: &mut Engine, url: &str) -> Result<Self> {
        Self::new(
            engine,
            url,
            CubeTextureOptions {
                prefiltered: true,
                ..Default::default()
            },
        )
    }

    fn load(&mut self, engine: &mut Engine) -> Result<()> {
        let key = if self.prefiltered {
            engine.create_prefiltered_cube_texture(&self.url, self.lod_scale, self.lod_offset)?
        } else {
            engine.create_cube_texture(&self.url, &self.files, self.no_mipmap, self.format)?
        };
        if let Some(internal) = engine.internal_texture(key) {
            self.base.lod_generation_scale = internal.lod_generation_scale();
            self.base.lod_generation_offset = internal.lod_generation_offset();
        }
        self.base.set_internal_texture(engine, Some(key));
        debug!("Loaded cube texture '{}'", self.url);
        Ok(())
    }

    pub fn clone_texture(&self, engine: &mut Engine) -> Result<Self> {
        let mut texture = Self::new(
            engine,
            &self.url,
            CubeTextureOptions {
                extensions: Some(self.extensions.clone()),
                files: (!self.files.is_empty()).then(|| self.files.clone()),
                no_mipmap: self.no_mipmap,
                format: self.format,
                prefiltered: self.prefiltered,
                delay_load: self.base.delay_load_state == DelayLoadState::NotLoaded,
                lod_scale: self.lod_scale,
                lod_offset: self.lod_offset,
            },
        )?;
        self.base.copy_settings_to(&mut texture.base);
        texture.rotation_y = self.rotation_y;
        texture.bounding_box_position = self.bounding_box_position;
        texture.bounding_box_size = self.bounding_box_size;
        Ok(texture)
    }

    pub fn parse(value: &serde_json::Value, engine: &mut Engine, root_url: &str) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let extensions = value
            .get("extensions")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok());
        let files = value
            .get("files")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .map(|files| files.iter().map(|f| format!("{}{}", root_url, f)).collect());
        let prefiltered = value
            .get("prefiltered")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let mut texture = Self::new(
            engine,
            &format!("{}{}", root_url, name),
            CubeTextureOptions {
                extensions,
                files,
                prefiltered,
                ..Default::default()
            },
        )?;
        texture.base.parse_common(value);
        texture.base.is_cube = true;
        if let Some(rotation_y) = value.get("rotationY").and_then(serde_json::Value::as_f64) {
            texture.rotation_y = rotation_y as f32;
        }
        Ok(texture)
    }
}

impl SceneTexture for CubeTexture {
    fn base(&self) -> &BaseTexture {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseTexture {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "CubeTexture"
    }

    fn reflection_texture_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_angle_y(Rad(self.rotation_y))
    }

    /// Loads only when loading was deferred and has not happened yet
    fn delay_load(&mut self, engine: &mut Engine) -> Result<()> {
        if self.base.delay_load_state != DelayLoadState::NotLoaded {
            return Ok(());
        }
        self.base.delay_load_state = DelayLoadState::Loaded;
        self.load(engine)
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common();
        value["customType"] = "BABYLON.CubeTexture".into();
        value["url"] = self.url.clone().into();
        value["extensions"] = self.extensions.clone().into();
        value["files"] = self.files.clone().into();
        value["prefiltered"] = self.prefiltered.into();
        value["rotationY"] = self.rotation_y.into();
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
        Engine::new(Box::new(HeadlessBackend::new(8, 8)), EngineOptions::default())
    }

    #[test]
    fn test_default_face_files() {
        let mut engine = engine();
        let texture = CubeTexture::new(
            &mut engine,
            "textures/sky",
            CubeTextureOptions {
                delay_load: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(texture.files.len(), 6);
        assert_eq!(texture.files[0], "textures/sky_px.jpg");
        assert_eq!(texture.files[5], "textures/sky_nz.jpg");
        assert_eq!(texture.base.coordinates_mode, CoordinatesMode::Cubic);
        assert_eq!(texture.base.delay_load_state, DelayLoadState::NotLoaded);
        assert!(texture.is_ready(&engine));
    }

    #[test]
    fn test_delay_load_only_from_not_loaded() {
        let mut engine = engine();
        let mut texture = CubeTexture::new(
            &mut engine,
            "textures/sky",
            CubeTextureOptions {
                delay_load: true,
                ..Default::default()
            },
        )
        .unwrap();
        texture.base.delay_load_state = DelayLoadState::Loaded;
        assert!(texture.delay_load(&mut engine).is_ok());
        assert!(texture.base.internal_texture().is_none());

        texture.base.delay_load_state = DelayLoadState::NotLoaded;
        // The face files do not exist, so loading now fails
        assert!(texture.delay_load(&mut engine).is_err());
    }

    #[test]
    fn test_env_url_is_linear() {
        let mut engine = engine();
        let texture = CubeTexture::new(
            &mut engine,
            "studio.env",
            CubeTextureOptions {
                delay_load: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(texture.prefiltered);
        assert!(!texture.base.gamma_space);
        assert!(texture.files.is_empty());
    }

    #[test]
    fn test_serialize_keeps_rotation() {
        let mut engine = engine();
        let mut texture = CubeTexture::new(
            &mut engine,
            "textures/sky",
            CubeTextureOptions {
                delay_load: true,
                ..Default::default()
            },
        )
        .unwrap();
        texture.rotation_y = 0.5;
        let value = texture.serialize();
        assert_eq!(value["rotationY"].as_f64(), Some(0.5));
        assert_eq!(value["extensions"].as_array().map(Vec::len), Some(6));
    }
}
