//! Copies its input unchanged

use std::any::Any;

use crate::engine::Engine;
use crate::postprocesses::post_process::{
    config_from_json, PostProcess, PostProcessConfig, PostProcessOptions, ScenePostProcess,
};
use crate::scene::NodeId;

#[derive(Debug)]
pub struct PassPostProcess {
    base: PostProcess,
}

impl PassPostProcess {
    pub fn new(engine: &mut Engine, name: &str, options: PostProcessOptions, camera: Option<NodeId>) -> Self {
        Self::with_config(
            engine,
            PostProcessConfig::new(name, "pass")
                .with_options(options)
                .with_camera(camera),
        )
    }

    /// Builds from a full config; the fragment shader is always `pass`
    pub fn with_config(engine: &mut Engine, mut config: PostProcessConfig) -> Self {
        config.fragment_url = "pass".to_string();
        Self {
            base: PostProcess::new(engine, config),
        }
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Self {
        let mut post_process = Self::with_config(engine, config_from_json(value, "pass"));
        post_process.base.parse_common(value);
        post_process
    }
}

impl ScenePostProcess for PassPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "PassPostProcess"
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
    fn test_parse_keeps_common_settings() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(32, 32)), EngineOptions::default());
        let mut original = PassPostProcess::new(&mut engine, "copy", PostProcessOptions::Ratio(0.5), None);
        original.base_mut().auto_clear = false;
        let parsed = PassPostProcess::parse(&mut engine, &original.serialize());
        assert_eq!(parsed.base().name, "copy");
        assert_eq!(parsed.base().options(), PostProcessOptions::Ratio(0.5));
        assert!(!parsed.base().auto_clear);
        assert_eq!(parsed.base().get_effect_name(), "pass");
    }
}
