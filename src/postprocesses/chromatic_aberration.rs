//! Splits the color channels apart, strongest towards the screen edges

use std::any::Any;

use cgmath::Vector2;

use crate::engine::Engine;
use crate::materials::effect::Effect;
use crate::postprocesses::post_process::{
    config_from_json, PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess,
};
use crate::shaders::{UniformDecl, UniformType};

#[derive(Debug)]
pub struct ChromaticAberrationPostProcess {
    base: PostProcess,
    /// Pixels the red and blue channels move at full strength
    pub aberration_amount: f32,
    /// Exponent of the distance to the centre; 0 is uniform
    pub radial_intensity: f32,
    /// Direction of the shift; zero means away from `center_position`
    pub direction: Vector2<f32>,
    pub center_position: Vector2<f32>,
    pub screen_width: f32,
    pub screen_height: f32,
}

impl ChromaticAberrationPostProcess {
    pub fn new(engine: &mut Engine, name: &str, screen_width: f32, screen_height: f32) -> Self {
        Self::with_config(
            engine,
            PostProcessConfig::new(name, "chromaticAberration"),
            screen_width,
            screen_height,
        )
    }

    pub fn with_config(
        engine: &mut Engine,
        mut config: PostProcessConfig,
        screen_width: f32,
        screen_height: f32,
    ) -> Self {
        config.fragment_url = "chromaticAberration".to_string();
        config.uniforms = vec![
            UniformDecl::new("chromatic_aberration", UniformType::Float),
            UniformDecl::new("screen_width", UniformType::Float),
            UniformDecl::new("screen_height", UniformType::Float),
            UniformDecl::new("direction", UniformType::Vec2),
            UniformDecl::new("radialIntensity", UniformType::Float),
            UniformDecl::new("centerPosition", UniformType::Vec2),
        ];
        Self {
            base: PostProcess::new(engine, config),
            aberration_amount: 30.0,
            radial_intensity: 0.0,
            direction: Vector2::new(0.707, 0.707),
            center_position: Vector2::new(0.5, 0.5),
            screen_width,
            screen_height,
        }
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Self {
        let f = |key: &str, default: f32| {
            value
                .get(key)
                .and_then(serde_json::Value::as_f64)
                .map_or(default, |v| v as f32)
        };
        let v2 = |key: &str, default: Vector2<f32>| {
            value
                .get(key)
                .and_then(|v| serde_json::from_value::<[f32; 2]>(v.clone()).ok())
                .map_or(default, |[x, y]| Vector2::new(x, y))
        };
        let mut post_process = Self::with_config(
            engine,
            config_from_json(value, "chromaticAberration"),
            f("screenWidth", 0.0),
            f("screenHeight", 0.0),
        );
        post_process.aberration_amount = f("aberrationAmount", 30.0);
        post_process.radial_intensity = f("radialIntensity", 0.0);
        post_process.direction = v2("direction", post_process.direction);
        post_process.center_position = v2("centerPosition", post_process.center_position);
        post_process.base.parse_common(value);
        post_process
    }
}

impl ScenePostProcess for ChromaticAberrationPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "ChromaticAberrationPostProcess"
    }

    fn bind(&mut self, effect: &mut Effect, _ctx: &PostProcessContext<'_>) {
        effect
            .set_float("chromatic_aberration", self.aberration_amount)
            .set_float("screen_width", self.screen_width)
            .set_float("screen_height", self.screen_height)
            .set_float("radialIntensity", self.radial_intensity)
            .set_vector2("direction", self.direction)
            .set_vector2("centerPosition", self.center_position);
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = self.base.serialize_common(self.class_name());
        value["aberrationAmount"] = self.aberration_amount.into();
        value["radialIntensity"] = self.radial_intensity.into();
        value["direction"] = serde_json::json!([self.direction.x, self.direction.y]);
        value["centerPosition"] = serde_json::json!([self.center_position.x, self.center_position.y]);
        value["screenWidth"] = self.screen_width.into();
        value["screenHeight"] = self.screen_height.into();
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

    #[test]
    fn test_defaults_are_bound() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let mut post_process = ChromaticAberrationPostProcess::new(&mut engine, "aberration", 64.0, 32.0);
        post_process
            .base_mut()
            .activate(&mut engine, &PostProcessContext::default(), None, false)
            .unwrap();
        let key = post_process
            .apply(&mut engine, &PostProcessContext::default())
            .unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(effect.value("chromatic_aberration"), Some(UniformValue::Float(30.0)));
        assert_eq!(effect.value("screen_height"), Some(UniformValue::Float(32.0)));
        assert_eq!(effect.value("direction"), Some(UniformValue::Vec2([0.707, 0.707])));
        assert_eq!(effect.value("centerPosition"), Some(UniformValue::Vec2([0.5, 0.5])));
    }

    #[test]
    fn test_parse_restores_settings() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default());
        let mut original = ChromaticAberrationPostProcess::new(&mut engine, "aberration", 64.0, 32.0);
        original.radial_intensity = 2.0;
        original.direction = Vector2::new(0.0, 0.0);
        let parsed = ChromaticAberrationPostProcess::parse(&mut engine, &original.serialize());
        assert_eq!(parsed.radial_intensity, 2.0);
        assert_eq!(parsed.direction, Vector2::new(0.0, 0.0));
        assert_eq!(parsed.screen_width, 64.0);
    }
}
