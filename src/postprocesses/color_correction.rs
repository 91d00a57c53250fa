//! Remaps colors through a lookup table laid out as 16 horizontal slices

use std::any::Any;

use crate::engine::constants::{AddressMode, SamplingMode};
use crate::engine::Engine;
use crate::error::Result;
use crate::materials::effect::Effect;
use crate::postprocesses::post_process::{
    config_from_json, PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess,
};
use crate::shaders::SamplerDecl;
use crate::textures::internal_texture::TextureKey;

#[derive(Debug)]
pub struct ColorCorrectionPostProcess {
    base: PostProcess,
    color_table_url: String,
    color_table: Option<TextureKey>,
}

impl ColorCorrectionPostProcess {
    pub fn new(engine: &mut Engine, name: &str, color_table_url: &str) -> Result<Self> {
        Self::with_config(
            engine,
            PostProcessConfig::new(name, "colorCorrection"),
            color_table_url,
        )
    }

    pub fn with_config(
        engine: &mut Engine,
        mut config: PostProcessConfig,
        color_table_url: &str,
    ) -> Result<Self> {
        config.fragment_url = "colorCorrection".to_string();
        config.samplers = vec![SamplerDecl::new("colorTable")];
        let color_table = engine.create_texture(color_table_url, true, false, SamplingMode::Trilinear)?;
        engine.update_texture_wrapping(
            color_table,
            AddressMode::Clamp,
            AddressMode::Clamp,
            AddressMode::Clamp,
            1,
        )?;
        Ok(Self {
            base: PostProcess::new(engine, config),
            color_table_url: color_table_url.to_string(),
            color_table: Some(color_table),
        })
    }

    pub fn color_table_url(&self) -> &str {
        &self.color_table_url
    }

    pub fn color_table(&self) -> Option<TextureKey> {
        self.color_table
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Result<Self> {
        let url = value
            .get("colorTableUrl")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let mut post_process =
            Self::with_config(engine, config_from_json(value, "colorCorrection"), url)?;
        post_process.base.parse_common(value);
        Ok(post_process)
    }
}

impl ScenePostProcess for ColorCorrectionPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "ColorCorrectionPostProcess"
    }

    fn bind(&mut self, effect: &mut Effect, _ctx: &PostProcessContext<'_>) {
        effect.set_texture("colorTable", self.color_table);
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common(self.class_name());
        value["colorTableUrl"] = self.color_table_url.clone().into();
        value
    }

    fn dispose(&mut self, engine: &mut Engine) {
        if let Some(texture) = self.color_table.take() {
            engine.release_internal_texture(texture);
        }
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
    use crate::engine::{EngineOptions, HeadlessBackend};

    #[test]
    fn test_color_table_sampling() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let path = std::env::temp_dir().join(format!("{}-lut.png", std::process::id()));
        image::RgbaImage::from_pixel(256, 16, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();
        let url = path.to_string_lossy().into_owned();

        let mut post_process = ColorCorrectionPostProcess::new(&mut engine, "lut", &url).unwrap();
        let table = post_process.color_table().unwrap();
        let texture = engine.internal_texture(table).unwrap();
        assert_eq!(texture.sampling_mode, SamplingMode::Trilinear);
        assert!(!texture.generate_mipmaps);
        assert_eq!(texture.cached_wrap_u, Some(AddressMode::Clamp));
        assert_eq!(texture.cached_anisotropic_filtering_level, Some(1));

        let serialized = post_process.serialize();
        assert_eq!(serialized["colorTableUrl"], url.as_str());
        post_process.dispose(&mut engine);
        assert!(engine.internal_texture(table).is_none());
    }
}
