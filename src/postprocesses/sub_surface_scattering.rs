//! Screen-space sub-surface scattering over the pre-pass irradiance
//!
//! Needs the scene pre-pass with irradiance, depth and albedo outputs;
//! adding it to a scene enables the pre-pass renderer.

use std::any::Any;

use log::error;

use crate::engine::Engine;
use crate::materials::effect::EffectKey;
use crate::postprocesses::post_process::{PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess};
use crate::prepass::sub_surface_configuration::MAX_DIFFUSION_PROFILES;
use crate::prepass::{PrePassEffectConfiguration, PrePassTextureType};
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};

/// Name of the pre-pass configuration registered by this post process
pub const SUB_SURFACE_CONFIGURATION_NAME: &str = "subSurfaceScattering";

#[derive(Debug)]
pub struct SubSurfaceScatteringPostProcess {
    base: PostProcess,
}

impl SubSurfaceScatteringPostProcess {
    pub fn new(engine: &mut Engine, name: &str) -> Self {
        Self::with_config(engine, PostProcessConfig::new(name, "subSurfaceScattering"))
    }

    pub fn with_config(engine: &mut Engine, mut config: PostProcessConfig) -> Self {
        config.fragment_url = "subSurfaceScattering".to_string();
        let mut uniforms = vec![
            UniformDecl::new("texelSize", UniformType::Vec2),
            UniformDecl::new("viewportSize", UniformType::Vec2),
            UniformDecl::new("metersPerUnit", UniformType::Float),
        ];
        for i in 0..MAX_DIFFUSION_PROFILES {
            uniforms.push(UniformDecl::new(&format!("diffusionS{}", i), UniformType::Vec3));
            uniforms.push(UniformDecl::new(&format!("filterRadii{}", i), UniformType::Float));
        }
        config.uniforms = uniforms;
        config.samplers = vec![
            SamplerDecl::new("irradianceSampler"),
            SamplerDecl::new("depthSampler"),
            SamplerDecl::new("albedoSampler"),
        ];
        let mut base = PostProcess::new(engine, config);
        base.pre_pass_effect_configuration = Some(PrePassEffectConfiguration::new(
            SUB_SURFACE_CONFIGURATION_NAME,
            &[
                PrePassTextureType::Irradiance,
                PrePassTextureType::DepthNormal,
                PrePassTextureType::Albedo,
            ],
        ));
        Self { base }
    }
}

impl ScenePostProcess for SubSurfaceScatteringPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "SubSurfaceScatteringPostProcess"
    }

    fn apply(&mut self, engine: &mut Engine, ctx: &PostProcessContext<'_>) -> Option<EffectKey> {
        let Some(pre_pass) = ctx.pre_pass.filter(|renderer| renderer.enabled()) else {
            error!("PrePass needs to be enabled for subsurface scattering.");
            return None;
        };
        let half_fov = (ctx.camera.map_or(0.8, |camera| camera.fov) * 0.5).tan();
        let aspect_ratio = engine.aspect_ratio();
        let texel_size = self.base.texel_size();
        let key = self.base.apply(engine)?;
        let effect = engine.get_effect_mut(key)?;

        let configuration = &pre_pass.sub_surface_configuration;
        effect
            .set_float("metersPerUnit", configuration.meters_per_unit)
            .set_float2("texelSize", texel_size.x, texel_size.y)
            .set_float2("viewportSize", half_fov * aspect_ratio, half_fov)
            .set_texture("irradianceSampler", pre_pass.texture(PrePassTextureType::Irradiance))
            .set_texture("depthSampler", pre_pass.texture(PrePassTextureType::DepthNormal))
            .set_texture("albedoSampler", pre_pass.texture(PrePassTextureType::Albedo));
        let profiles = configuration
            .diffusion_s()
            .iter()
            .zip(configuration.filter_radii());
        for (i, ([r, g, b], radius)) in profiles.enumerate() {
            effect
                .set_float3(&format!("diffusionS{}", i), *r, *g, *b)
                .set_float(&format!("filterRadii{}", i), *radius);
        }
        Some(key)
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
    use crate::maths::{Color3, Size};
    use crate::prepass::PrePassRenderer;

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default())
    }

    #[test]
    fn test_registers_pre_pass_outputs() {
        let mut engine = engine();
        let post_process = SubSurfaceScatteringPostProcess::new(&mut engine, "sss");
        let mut renderer = PrePassRenderer::new();
        assert!(post_process.base().set_pre_pass_renderer(&mut renderer));
        assert!(renderer.enabled());
        assert_eq!(renderer.get_index(PrePassTextureType::Irradiance), 1);
        assert_eq!(renderer.get_index(PrePassTextureType::DepthNormal), 2);
        assert_eq!(renderer.get_index(PrePassTextureType::Albedo), 3);
    }

    #[test]
    fn test_binds_diffusion_profiles() {
        let mut engine = engine();
        let mut post_process = SubSurfaceScatteringPostProcess::new(&mut engine, "sss");
        let mut renderer = PrePassRenderer::new();
        post_process.base().set_pre_pass_renderer(&mut renderer);
        renderer
            .sub_surface_configuration
            .add_diffusion_profile(Color3::new(0.5, 0.2, 0.1));
        renderer.setup(&mut engine, Size::new(64, 64)).unwrap();

        let ctx = PostProcessContext {
            pre_pass: Some(&renderer),
            ..Default::default()
        };
        post_process.base_mut().activate(&mut engine, &ctx, None, false).unwrap();
        let key = post_process.apply(&mut engine, &ctx).unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(effect.value("diffusionS1"), Some(UniformValue::Vec3([0.5, 0.2, 0.1])));
        assert_eq!(
            effect.texture("albedoSampler"),
            renderer.texture(PrePassTextureType::Albedo)
        );
    }

    #[test]
    fn test_without_pre_pass_nothing_is_applied() {
        let mut engine = engine();
        let mut post_process = SubSurfaceScatteringPostProcess::new(&mut engine, "sss");
        let ctx = PostProcessContext::default();
        post_process.base_mut().activate(&mut engine, &ctx, None, false).unwrap();
        assert!(post_process.apply(&mut engine, &ctx).is_none());
    }
}
