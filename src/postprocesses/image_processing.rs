//! Applies the image processing configuration as a fullscreen pass
//!
//! Without a configuration of its own the post process follows the scene's
//! configuration, which then has to be flagged `apply_by_post_process`.

use std::any::Any;

use crate::engine::constants::{ToneMappingType, VignetteBlendMode};
use crate::engine::Engine;
use crate::error::Result;
use crate::materials::effect::EffectKey;
use crate::materials::image_processing::{
    ColorCurves, ColorGradingLut, ImageProcessingConfiguration, ImageProcessingConfigurationDefines,
};
use crate::postprocesses::post_process::{
    config_from_json, PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess,
};
use crate::shaders::{SamplerDecl, UniformDecl};

/// Defines the effect was last built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BuiltDefines {
    image_processing: ImageProcessingConfigurationDefines,
    from_linear_space: bool,
}

macro_rules! forward_setting {
    ($getter:ident, $setter:ident: $ty:ty) => {
        pub fn $getter(&self) -> $ty {
            self.configuration_or_default().$getter()
        }

        pub fn $setter(&mut self, value: $ty) {
            self.configuration_mut().$setter(value);
        }
    };
}

#[derive(Debug)]
pub struct ImageProcessingPostProcess {
    base: PostProcess,
    configuration: Option<ImageProcessingConfiguration>,
    fallback: ImageProcessingConfiguration,
    from_linear_space: bool,
    built: Option<BuiltDefines>,
}

impl ImageProcessingPostProcess {
    /// Follows the scene's configuration
    pub fn new(engine: &mut Engine, name: &str) -> Self {
        Self::with_config(engine, PostProcessConfig::new(name, "imageProcessing"), None)
    }

    /// Uses `configuration` instead of the scene's
    pub fn with_configuration(
        engine: &mut Engine,
        name: &str,
        configuration: ImageProcessingConfiguration,
    ) -> Self {
        Self::with_config(
            engine,
            PostProcessConfig::new(name, "imageProcessing"),
            Some(configuration),
        )
    }

    pub fn with_config(
        engine: &mut Engine,
        mut config: PostProcessConfig,
        configuration: Option<ImageProcessingConfiguration>,
    ) -> Self {
        config.fragment_url = "imageProcessing".to_string();
        config.block_compilation = true;
        let mut fallback = ImageProcessingConfiguration::new();
        fallback.set_apply_by_post_process(true);
        let mut post_process = Self {
            base: PostProcess::new(engine, config),
            configuration,
            fallback,
            from_linear_space: true,
            built: None,
        };
        post_process.update_parameters(engine, None);
        post_process
    }

    /// The configuration owned by this post process, if any
    pub fn configuration(&self) -> Option<&ImageProcessingConfiguration> {
        self.configuration.as_ref()
    }

    /// Owned configuration, created on first use as a post process one
    pub fn configuration_mut(&mut self) -> &mut ImageProcessingConfiguration {
        let fallback = &self.fallback;
        self.configuration.get_or_insert_with(|| fallback.clone())
    }

    /// Goes back to following the scene's configuration
    pub fn use_scene_configuration(&mut self) {
        self.configuration = None;
        self.built = None;
    }

    fn configuration_or_default(&self) -> &ImageProcessingConfiguration {
        self.configuration.as_ref().unwrap_or(&self.fallback)
    }

    fn active_configuration<'a>(
        &'a self,
        ctx: &PostProcessContext<'a>,
    ) -> &'a ImageProcessingConfiguration {
        self.configuration
            .as_ref()
            .or(ctx.image_processing)
            .unwrap_or(&self.fallback)
    }

    pub fn from_linear_space(&self) -> bool {
        self.from_linear_space
    }

    /// Whether the input is linear; gamma input is linearised first
    pub fn set_from_linear_space(&mut self, engine: &mut Engine, value: bool) {
        if self.from_linear_space == value {
            return;
        }
        self.from_linear_space = value;
        self.built = None;
        self.update_parameters(engine, None);
    }

    forward_setting!(exposure, set_exposure: f32);
    forward_setting!(contrast, set_contrast: f32);
    forward_setting!(tone_mapping_enabled, set_tone_mapping_enabled: bool);
    forward_setting!(tone_mapping_type, set_tone_mapping_type: ToneMappingType);
    forward_setting!(color_curves_enabled, set_color_curves_enabled: bool);
    forward_setting!(color_grading_enabled, set_color_grading_enabled: bool);
    forward_setting!(vignette_enabled, set_vignette_enabled: bool);
    forward_setting!(vignette_blend_mode, set_vignette_blend_mode: VignetteBlendMode);

    pub fn color_curves(&self) -> Option<ColorCurves> {
        self.configuration_or_default().color_curves().copied()
    }

    pub fn set_color_curves(&mut self, curves: Option<ColorCurves>) {
        self.configuration_mut().set_color_curves(curves);
    }

    pub fn color_grading_texture(&self) -> Option<ColorGradingLut> {
        self.configuration_or_default().color_grading_texture().copied()
    }

    pub fn set_color_grading_texture(&mut self, lut: Option<ColorGradingLut>) {
        self.configuration_mut().set_color_grading_texture(lut);
    }

    pub fn is_enabled(&self) -> bool {
        self.configuration_or_default().is_enabled()
    }

    pub fn set_is_enabled(&mut self, value: bool) {
        self.configuration_mut().set_is_enabled(value);
    }

    fn defines_for(&self, configuration: &ImageProcessingConfiguration) -> BuiltDefines {
        let mut image_processing = ImageProcessingConfigurationDefines::default();
        configuration.prepare_defines(&mut image_processing, true);
        BuiltDefines {
            image_processing,
            from_linear_space: self.from_linear_space,
        }
    }

    /// Rebuilds the effect when the defines changed since the last build
    pub fn update_parameters(&mut self, engine: &mut Engine, scene: Option<&ImageProcessingConfiguration>) {
        let configuration = self
            .configuration
            .as_ref()
            .or(scene)
            .unwrap_or(&self.fallback);
        let defines = self.defines_for(configuration);
        if self.built == Some(defines) {
            return;
        }

        let mut source = defines.image_processing.to_string();
        if defines.from_linear_space {
            source += "#define FROMLINEARSPACE\n";
        }
        let mut uniforms: Vec<UniformDecl> = Vec::new();
        let mut samplers: Vec<SamplerDecl> = Vec::new();
        ImageProcessingConfiguration::prepare_uniforms(&mut uniforms);
        ImageProcessingConfiguration::prepare_samplers(&mut samplers, &defines.image_processing);
        self.base.update_effect(
            engine,
            Some(&source),
            Some(&uniforms),
            Some(&samplers),
            None,
            None,
            None,
        );
        self.built = Some(defines);
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Result<Self> {
        let configuration = value
            .get("imageProcessingConfiguration")
            .map(ImageProcessingConfiguration::parse)
            .transpose()?;
        let mut post_process =
            Self::with_config(engine, config_from_json(value, "imageProcessing"), configuration);
        if let Some(from_linear_space) = value.get("fromLinearSpace").and_then(serde_json::Value::as_bool) {
            post_process.set_from_linear_space(engine, from_linear_space);
        }
        post_process.base.parse_common(value);
        Ok(post_process)
    }
}

impl ScenePostProcess for ImageProcessingPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "ImageProcessingPostProcess"
    }

    fn prepare(&mut self, engine: &mut Engine, ctx: &PostProcessContext<'_>) -> Result<()> {
        self.update_parameters(engine, ctx.image_processing);
        Ok(())
    }

    fn apply(&mut self, engine: &mut Engine, ctx: &PostProcessContext<'_>) -> Option<EffectKey> {
        let aspect_ratio = self.base.aspect_ratio(engine);
        let (width, height) = (engine.render_width(false), engine.render_height(false));
        let key = self.base.apply(engine)?;
        let configuration = self.active_configuration(ctx);
        if let Some(effect) = engine.get_effect_mut(key) {
            configuration.bind(effect, width, height, Some(aspect_ratio));
        }
        Some(key)
    }

    fn is_ready(&self, engine: &Engine) -> bool {
        self.built.is_some() && self.base.is_ready(engine)
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common(self.class_name());
        value["fromLinearSpace"] = self.from_linear_space.into();
        if let Some(configuration) = &self.configuration {
            value["imageProcessingConfiguration"] = configuration.serialize();
        }
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
    use crate::materials::effect::UniformValue;

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(64, 32)), EngineOptions::default())
    }

    #[test]
    fn test_defines_follow_scene_configuration() {
        let mut engine = engine();
        let mut post_process = ImageProcessingPostProcess::new(&mut engine, "ip");
        assert!(post_process.base().defines().contains("FROMLINEARSPACE"));
        assert!(!post_process.base().defines().contains("#define IMAGEPROCESSING\n"));

        let mut scene_configuration = ImageProcessingConfiguration::new();
        scene_configuration.set_apply_by_post_process(true);
        scene_configuration.set_contrast(2.0);
        let ctx = PostProcessContext {
            image_processing: Some(&scene_configuration),
            ..Default::default()
        };
        post_process.prepare(&mut engine, &ctx).unwrap();
        assert!(post_process.base().defines().contains("#define CONTRAST"));

        post_process.set_from_linear_space(&mut engine, false);
        assert!(!post_process.base().defines().contains("FROMLINEARSPACE"));
    }

    #[test]
    fn test_owned_configuration_is_bound() {
        let mut engine = engine();
        let mut post_process = ImageProcessingPostProcess::new(&mut engine, "ip");
        post_process.set_exposure(2.0);
        assert_eq!(post_process.exposure(), 2.0);
        let ctx = PostProcessContext::default();
        post_process.prepare(&mut engine, &ctx).unwrap();
        assert!(post_process.base().defines().contains("#define EXPOSURE"));

        post_process.base_mut().activate(&mut engine, &ctx, None, false).unwrap();
        let key = post_process.apply(&mut engine, &ctx).unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(effect.value("exposureLinear"), Some(UniformValue::Float(2.0)));
    }

    #[test]
    fn test_serialize_keeps_owned_configuration() {
        let mut engine = engine();
        let mut post_process = ImageProcessingPostProcess::new(&mut engine, "ip");
        post_process.set_tone_mapping_enabled(true);
        let parsed = ImageProcessingPostProcess::parse(&mut engine, &post_process.serialize()).unwrap();
        assert!(parsed.tone_mapping_enabled());
        assert!(parsed.from_linear_space());
    }
}
