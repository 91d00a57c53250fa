//! Bends the image through a refraction map and tints it

use std::any::Any;

use crate::engine::constants::SamplingMode;
use crate::engine::Engine;
use crate::error::Result;
use crate::materials::effect::Effect;
use crate::maths::Color3;
use crate::postprocesses::post_process::{
    config_from_json, PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess,
};
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};
use crate::textures::internal_texture::TextureKey;

#[derive(Debug)]
pub struct RefractionPostProcess {
    base: PostProcess,
    pub color: Color3,
    /// Strength of the offset applied to the source lookup
    pub depth: f32,
    /// How much of the refracted color is added back
    pub color_level: f32,
    refraction_texture_url: String,
    refraction_texture: Option<TextureKey>,
    owns_refraction_texture: bool,
}

impl RefractionPostProcess {
    pub fn new(
        engine: &mut Engine,
        name: &str,
        refraction_texture_url: &str,
        color: Color3,
        depth: f32,
        color_level: f32,
    ) -> Result<Self> {
        Self::with_config(
            engine,
            PostProcessConfig::new(name, "refraction"),
            refraction_texture_url,
            color,
            depth,
            color_level,
        )
    }

    pub fn with_config(
        engine: &mut Engine,
        mut config: PostProcessConfig,
        refraction_texture_url: &str,
        color: Color3,
        depth: f32,
        color_level: f32,
    ) -> Result<Self> {
        config.fragment_url = "refraction".to_string();
        config.uniforms = vec![
            UniformDecl::new("baseColor", UniformType::Vec3),
            UniformDecl::new("depth", UniformType::Float),
            UniformDecl::new("colorLevel", UniformType::Float),
        ];
        config.samplers = vec![SamplerDecl::new("refractionSampler")];
        let texture = engine.create_texture(refraction_texture_url, false, true, SamplingMode::Trilinear)?;
        Ok(Self {
            base: PostProcess::new(engine, config),
            color,
            depth,
            color_level,
            refraction_texture_url: refraction_texture_url.to_string(),
            refraction_texture: Some(texture),
            owns_refraction_texture: true,
        })
    }

    pub fn refraction_texture(&self) -> Option<TextureKey> {
        self.refraction_texture
    }

    pub fn refraction_texture_url(&self) -> &str {
        &self.refraction_texture_url
    }

    /// Uses a texture owned by the caller; a previously loaded texture is released
    pub fn set_refraction_texture(&mut self, engine: &mut Engine, texture: Option<TextureKey>) {
        self.release_owned_texture(engine);
        self.refraction_texture = texture;
        self.owns_refraction_texture = false;
    }

    fn release_owned_texture(&mut self, engine: &mut Engine) {
        if self.owns_refraction_texture {
            if let Some(texture) = self.refraction_texture.take() {
                engine.release_internal_texture(texture);
            }
        }
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Result<Self> {
        let f = |key: &str, default: f32| {
            value
                .get(key)
                .and_then(serde_json::Value::as_f64)
                .map_or(default, |v| v as f32)
        };
        let color = value
            .get("color")
            .and_then(|v| serde_json::from_value::<[f32; 3]>(v.clone()).ok())
            .map_or(Color3::white(), |[r, g, b]| Color3::new(r, g, b));
        let url = value
            .get("refractionTextureUrl")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let mut post_process = Self::with_config(
            engine,
            config_from_json(value, "refraction"),
            url,
            color,
            f("depth", 0.0),
            f("colorLevel", 0.0),
        )?;
        post_process.base.parse_common(value);
        Ok(post_process)
    }
}

impl ScenePostProcess for RefractionPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "RefractionPostProcess"
    }

    fn bind(&mut self, effect: &mut Effect, _ctx: &PostProcessContext<'_>) {
        effect
            .set_color3("baseColor", &self.color)
            .set_float("depth", self.depth)
            .set_float("colorLevel", self.color_level)
            .set_texture("refractionSampler", self.refraction_texture);
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common(self.class_name());
        value["color"] = serde_json::json!([self.color.r, self.color.g, self.color.b]);
        value["depth"] = self.depth.into();
        value["colorLevel"] = self.color_level.into();
        value["refractionTextureUrl"] = self.refraction_texture_url.clone().into();
        value
    }

    fn dispose(&mut self, engine: &mut Engine) {
        self.release_owned_texture(engine);
        self.base.dispose(engine);
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
    use crate::engine::constants::{TextureFormat, TextureType};
    use crate::engine::{EngineOptions, HeadlessBackend};

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default())
    }

    fn refraction_map(file: &str) -> String {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), file));
        image::RgbaImage::from_pixel(4, 4, image::Rgba([128, 0, 0, 255]))
            .save(&path)
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_owned_texture_released_when_replaced() {
        let mut engine = engine();
        let url = refraction_map("refraction-owned.png");
        let mut post_process =
            RefractionPostProcess::new(&mut engine, "refraction", &url, Color3::white(), 0.2, 1.0).unwrap();
        let loaded = post_process.refraction_texture().unwrap();
        assert!(engine.internal_texture(loaded).is_some());

        let manual = engine
            .create_raw_texture(
                None,
                4,
                4,
                TextureFormat::Rgba,
                false,
                false,
                SamplingMode::Bilinear,
                TextureType::UnsignedInt,
            )
            .unwrap();
        post_process.set_refraction_texture(&mut engine, Some(manual));
        assert!(engine.internal_texture(loaded).is_none());

        post_process.dispose(&mut engine);
        assert!(engine.internal_texture(manual).is_some());
    }

    #[test]
    fn test_bind_and_serialize() {
        let mut engine = engine();
        let url = refraction_map("refraction-bind.png");
        let mut post_process =
            RefractionPostProcess::new(&mut engine, "refraction", &url, Color3::new(1.0, 0.5, 0.0), 0.3, 0.8)
                .unwrap();
        let ctx = PostProcessContext::default();
        post_process.base_mut().activate(&mut engine, &ctx, None, false).unwrap();
        let key = post_process.apply(&mut engine, &ctx).unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(effect.texture("refractionSampler"), post_process.refraction_texture());

        let parsed = RefractionPostProcess::parse(&mut engine, &post_process.serialize()).unwrap();
        assert_eq!(parsed.color, Color3::new(1.0, 0.5, 0.0));
        assert_eq!(parsed.depth, 0.3);
        assert_eq!(parsed.refraction_texture_url(), url);
    }
}
