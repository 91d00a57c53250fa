//! Kernel blur weighted by a circle of confusion, one pass per direction

use std::any::Any;

use cgmath::Vector2;

use crate::engine::constants::SamplingMode;
use crate::engine::Engine;
use crate::error::Result;
use crate::materials::effect::Effect;
use crate::postprocesses::blur::BlurPostProcess;
use crate::postprocesses::post_process::{PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess};
use crate::shaders::SamplerDecl;
use crate::textures::internal_texture::TextureKey;

#[derive(Debug)]
pub struct DepthOfFieldBlurPostProcess {
    blur: BlurPostProcess,
    /// Output of the circle of confusion pass
    pub circle_of_confusion: Option<TextureKey>,
    /// Blurs this texture instead of the previous post process' output
    pub image_to_blur: Option<TextureKey>,
}

impl DepthOfFieldBlurPostProcess {
    pub fn new(
        engine: &mut Engine,
        name: &str,
        direction: Vector2<f32>,
        kernel: f32,
        circle_of_confusion: Option<TextureKey>,
        image_to_blur: Option<TextureKey>,
    ) -> Self {
        Self::with_config(
            engine,
            PostProcessConfig::new(name, "kernelBlur").with_sampling_mode(SamplingMode::Bilinear),
            direction,
            kernel,
            circle_of_confusion,
            image_to_blur,
        )
    }

    pub fn with_config(
        engine: &mut Engine,
        config: PostProcessConfig,
        direction: Vector2<f32>,
        kernel: f32,
        circle_of_confusion: Option<TextureKey>,
        image_to_blur: Option<TextureKey>,
    ) -> Self {
        let name = config.name.clone();
        let blur = BlurPostProcess::with_static_defines(
            engine,
            &name,
            direction,
            kernel,
            config,
            "#define DOF 1\n",
            vec![SamplerDecl::new("circleOfConfusionSampler")],
        );
        Self {
            blur,
            circle_of_confusion,
            image_to_blur,
        }
    }

    pub fn blur(&self) -> &BlurPostProcess {
        &self.blur
    }

    pub fn blur_mut(&mut self) -> &mut BlurPostProcess {
        &mut self.blur
    }
}

impl ScenePostProcess for DepthOfFieldBlurPostProcess {
    fn base(&self) -> &PostProcess {
        self.blur.base()
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        self.blur.base_mut()
    }

    fn class_name(&self) -> &'static str {
        "DepthOfFieldBlurPostProcess"
    }

    fn prepare(&mut self, engine: &mut Engine, ctx: &PostProcessContext<'_>) -> Result<()> {
        self.blur.prepare(engine, ctx)
    }

    fn bind(&mut self, effect: &mut Effect, _ctx: &PostProcessContext<'_>) {
        self.blur.bind_delta(effect);
        if let Some(image) = self.image_to_blur {
            effect.set_texture("textureSampler", Some(image));
        }
        effect.set_texture("circleOfConfusionSampler", self.circle_of_confusion);
    }

    fn serialize(&self) -> serde_json::Value {
        self.blur.serialize_blur(self.class_name())
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

    #[test]
    fn test_dof_defines_and_inputs() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let coc = engine
            .create_raw_texture(
                None,
                64,
                64,
                TextureFormat::R,
                false,
                false,
                SamplingMode::Bilinear,
                TextureType::UnsignedInt,
            )
            .unwrap();
        let mut post_process = DepthOfFieldBlurPostProcess::new(
            &mut engine,
            "dof-h",
            Vector2::new(1.0, 0.0),
            15.0,
            Some(coc),
            None,
        );
        let defines = post_process.base().defines();
        assert!(defines.contains("#define DOF 1"));
        assert!(defines.contains("CENTER_WEIGHT"));
        assert_eq!(post_process.blur().effective_kernel(), 13);

        let ctx = PostProcessContext::default();
        post_process.base_mut().activate(&mut engine, &ctx, None, false).unwrap();
        let key = post_process.apply(&mut engine, &ctx).unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(effect.texture("circleOfConfusionSampler"), Some(coc));
        assert_eq!(post_process.serialize()["customType"], "BABYLON.DepthOfFieldBlurPostProcess");
    }
}
