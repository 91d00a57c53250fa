//! Separable gaussian blur along one direction
//!
//! The kernel is snapped to a size whose taps pair up for linear sampling.
//! Offsets and weights are baked into the shader as defines: the first taps
//! are computed in the vertex stage (`varyingCount`), the rest in the
//! fragment stage (`depCount`).

use std::any::Any;
use std::collections::HashMap;

use cgmath::Vector2;
use log::debug;

use crate::engine::constants::SamplingMode;
use crate::engine::Engine;
use crate::materials::effect::Effect;
use crate::postprocesses::post_process::{
    config_from_json, PostProcess, PostProcessConfig, PostProcessContext, ScenePostProcess,
};
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};

/// Varying slots of the blur vertex stage, the sample center included
const MAX_VARYING_VECTORS: usize = 9;

/// One tap of the blur: an offset in texels and its weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct KernelTap {
    pub offset: f32,
    pub weight: f32,
}

/// Closest kernel size whose half-width is even, so taps pair up
pub(crate) fn nearest_best_kernel(ideal_kernel: f32) -> u32 {
    let v = ideal_kernel.round() as i64;
    [v, v - 1, v + 1, v - 2, v + 2]
        .into_iter()
        .find(|k| k % 2 != 0 && (k / 2) % 2 == 0 && *k > 0)
        .map_or(v.max(3), |k| k.max(3)) as u32
}

fn gaussian_weight(x: f32) -> f32 {
    let sigma = 1.0 / 3.0;
    let denominator = (2.0 * std::f32::consts::PI).sqrt() * sigma;
    let exponent = -((x * x) / (2.0 * sigma * sigma));
    (1.0 / denominator) * exponent.exp()
}

/// Float literal with at most 8 decimals and no trailing zeros
pub(crate) fn shader_float(x: f32) -> String {
    format!("{:.8}", x).trim_end_matches('0').to_string()
}

/// Normalized gaussian taps, merged pairwise to use linear filtering
pub(crate) fn kernel_taps(kernel: u32) -> Vec<KernelTap> {
    let n = kernel.max(2) as usize;
    let center = (n - 1) as f32 / 2.0;
    let mut offsets = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);
    for i in 0..n {
        let u = i as f32 / (n - 1) as f32;
        offsets.push(i as f32 - center);
        weights.push(gaussian_weight(u * 2.0 - 1.0));
    }
    let total: f32 = weights.iter().sum();
    for weight in &mut weights {
        *weight /= total;
    }

    let last = center.floor() as usize;
    let mut taps = Vec::new();
    let mut i = 0;
    while i as f32 <= center {
        let j = (i + 1).min(last);
        if i == j {
            taps.push(KernelTap {
                offset: offsets[i],
                weight: weights[i],
            });
        } else {
            let shared_cell = j as f32 == center;
            let weight = weights[i] + weights[j] * if shared_cell { 0.5 } else { 1.0 };
            let offset = offsets[i] + 1.0 / (1.0 + weights[i] / weights[j]);
            if offset == 0.0 {
                taps.push(KernelTap {
                    offset: offsets[i],
                    weight: weights[i],
                });
                taps.push(KernelTap {
                    offset: offsets[i + 1],
                    weight: weights[i + 1],
                });
            } else {
                taps.push(KernelTap { offset, weight });
                taps.push(KernelTap {
                    offset: -offset,
                    weight,
                });
            }
        }
        i += 2;
    }
    taps
}

#[derive(Debug)]
pub struct BlurPostProcess {
    base: PostProcess,
    /// Blur axis, in texels
    pub direction: Vector2<f32>,
    ideal_kernel: f32,
    kernel: u32,
    packed_float: bool,
    static_defines: String,
    varying_count: usize,
    dep_count: usize,
}

impl BlurPostProcess {
    /// `config` supplies sizing, camera, sampling and texture type; the
    /// shaders are always the kernel blur ones
    pub fn new(
        engine: &mut Engine,
        name: &str,
        direction: Vector2<f32>,
        kernel: f32,
        config: PostProcessConfig,
    ) -> Self {
        Self::with_static_defines(engine, name, direction, kernel, config, "", Vec::new())
    }

    /// Default blur config: bilinear, ratio 1
    pub fn config(name: &str) -> PostProcessConfig {
        PostProcessConfig::new(name, "kernelBlur").with_sampling_mode(SamplingMode::Bilinear)
    }

    pub(crate) fn with_static_defines(
        engine: &mut Engine,
        name: &str,
        direction: Vector2<f32>,
        kernel: f32,
        mut config: PostProcessConfig,
        static_defines: &str,
        extra_samplers: Vec<SamplerDecl>,
    ) -> Self {
        let block_compilation = config.block_compilation;
        config.name = name.to_string();
        config.fragment_url = "kernelBlur".to_string();
        config.vertex_url = "kernelBlur".to_string();
        config.uniforms = vec![UniformDecl::new("delta", UniformType::Vec2)];
        config.samplers = extra_samplers;
        config.index_parameters =
            HashMap::from([("varyingCount".to_string(), 0), ("depCount".to_string(), 0)]);
        config.block_compilation = true;
        let mut blur = Self {
            base: PostProcess::new(engine, config),
            direction,
            ideal_kernel: 0.0,
            kernel: 3,
            packed_float: false,
            static_defines: static_defines.to_string(),
            varying_count: 0,
            dep_count: 0,
        };
        blur.ideal_kernel = kernel.max(1.0);
        blur.kernel = nearest_best_kernel(blur.ideal_kernel);
        if !block_compilation {
            blur.update_parameters(engine);
        }
        blur
    }

    /// Requested kernel size
    pub fn kernel(&self) -> f32 {
        self.ideal_kernel
    }

    /// Kernel size actually used
    pub fn effective_kernel(&self) -> u32 {
        self.kernel
    }

    pub fn set_kernel(&mut self, engine: &mut Engine, kernel: f32) {
        if self.ideal_kernel == kernel {
            return;
        }
        self.ideal_kernel = kernel.max(1.0);
        self.kernel = nearest_best_kernel(self.ideal_kernel);
        self.update_parameters(engine);
    }

    pub fn packed_float(&self) -> bool {
        self.packed_float
    }

    /// Packs the blurred value into RGBA8 (for depth-like inputs)
    pub fn set_packed_float(&mut self, engine: &mut Engine, packed_float: bool) {
        if self.packed_float == packed_float {
            return;
        }
        self.packed_float = packed_float;
        self.update_parameters(engine);
    }

    /// Taps evaluated in the vertex and fragment stages of the last build
    pub fn sample_counts(&self) -> (usize, usize) {
        (self.varying_count, self.dep_count)
    }

    /// Regenerates the kernel defines and rebuilds the effect
    pub fn update_parameters(&mut self, engine: &mut Engine) {
        let taps = kernel_taps(self.kernel);
        let max_varying_rows = MAX_VARYING_VECTORS - usize::from(self.packed_float);
        let free_varying_vec2 = max_varying_rows.saturating_sub(1);
        let mut varying_count = taps.len().min(free_varying_vec2);

        let mut defines = self.static_defines.clone();
        if self.static_defines.contains("DOF") && varying_count > 0 {
            defines += &format!(
                "#define CENTER_WEIGHT {}\n",
                shader_float(taps[varying_count - 1].weight)
            );
            varying_count -= 1;
        }
        for (i, tap) in taps.iter().take(varying_count).enumerate() {
            defines += &format!("#define KERNEL_OFFSET{} {}\n", i, shader_float(tap.offset));
            defines += &format!("#define KERNEL_WEIGHT{} {}\n", i, shader_float(tap.weight));
        }
        let mut dep_count = 0;
        for tap in taps.iter().skip(free_varying_vec2) {
            defines += &format!(
                "#define KERNEL_DEP_OFFSET{} {}\n",
                dep_count,
                shader_float(tap.offset)
            );
            defines += &format!(
                "#define KERNEL_DEP_WEIGHT{} {}\n",
                dep_count,
                shader_float(tap.weight)
            );
            dep_count += 1;
        }
        if self.packed_float {
            defines += "#define PACKEDFLOAT 1\n";
        }

        self.varying_count = varying_count;
        self.dep_count = dep_count;
        debug!(
            "Blur '{}' kernel {} -> {} vertex taps, {} fragment taps",
            self.base.name, self.kernel, varying_count, dep_count
        );
        let index_parameters = HashMap::from([
            ("varyingCount".to_string(), varying_count as i64),
            ("depCount".to_string(), dep_count as i64),
        ]);
        self.base.update_effect(
            engine,
            Some(&defines),
            None,
            None,
            Some(index_parameters),
            None,
            None,
        );
    }

    pub(crate) fn bind_delta(&self, effect: &mut Effect) {
        effect.set_float2(
            "delta",
            (1.0 / self.base.width.max(1) as f32) * self.direction.x,
            (1.0 / self.base.height.max(1) as f32) * self.direction.y,
        );
    }

    pub(crate) fn serialize_blur(&self, class_name: &str) -> serde_json::Value {
        let mut value = self.base.serialize_common(class_name);
        value["direction"] = serde_json::json!([self.direction.x, self.direction.y]);
        value["kernel"] = self.ideal_kernel.into();
        value["packedFloat"] = self.packed_float.into();
        value
    }

    pub(crate) fn direction_from_json(value: &serde_json::Value) -> Vector2<f32> {
        let component = |index: usize| {
            value
                .get("direction")
                .and_then(|d| d.get(index))
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0) as f32
        };
        Vector2::new(component(0), component(1))
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Self {
        let kernel = value
            .get("kernel")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(1.0) as f32;
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut config = config_from_json(value, "kernelBlur");
        config.block_compilation = true;
        let mut blur = Self::new(engine, &name, Self::direction_from_json(value), kernel, config);
        blur.packed_float = value
            .get("packedFloat")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        blur.base.parse_common(value);
        blur.update_parameters(engine);
        blur
    }
}

impl ScenePostProcess for BlurPostProcess {
    fn base(&self) -> &PostProcess {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "BlurPostProcess"
    }

    fn bind(&mut self, effect: &mut Effect, _ctx: &PostProcessContext<'_>) {
        self.bind_delta(effect);
    }

    fn serialize(&self) -> serde_json::Value {
        self.serialize_blur(self.class_name())
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
        Engine::new(Box::new(HeadlessBackend::new(64, 64)), EngineOptions::default())
    }

    #[test]
    fn test_nearest_best_kernel() {
        assert_eq!(nearest_best_kernel(1.0), 3);
        assert_eq!(nearest_best_kernel(6.0), 5);
        assert_eq!(nearest_best_kernel(10.0), 9);
        assert_eq!(nearest_best_kernel(13.2), 13);
        assert_eq!(nearest_best_kernel(41.0), 41);
    }

    #[test]
    fn test_taps_are_symmetric_and_normalized() {
        let taps = kernel_taps(5);
        assert_eq!(taps.len(), 3);
        assert_eq!(taps[0].offset, -taps[1].offset);
        let total: f32 = taps.iter().map(|t| t.weight).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(taps[2].offset, 0.0);
    }

    #[test]
    fn test_shader_float_trims_zeros() {
        assert_eq!(shader_float(0.5), "0.5");
        assert_eq!(shader_float(1.0), "1.");
        assert_eq!(shader_float(-0.25), "-0.25");
    }

    #[test]
    fn test_large_kernels_spill_to_fragment_taps() {
        let mut engine = engine();
        let mut blur = BlurPostProcess::new(
            &mut engine,
            "blur",
            Vector2::new(1.0, 0.0),
            5.0,
            BlurPostProcess::config("blur"),
        );
        assert_eq!(blur.sample_counts(), (3, 0));
        assert!(blur.base().defines().contains("#define KERNEL_OFFSET0 "));

        blur.set_kernel(&mut engine, 41.0);
        assert_eq!(blur.effective_kernel(), 41);
        assert_eq!(blur.sample_counts(), (8, 13));
        assert!(blur.base().defines().contains("KERNEL_DEP_WEIGHT12"));

        blur.set_packed_float(&mut engine, true);
        assert_eq!(blur.sample_counts(), (7, 14));
        assert!(blur.base().defines().contains("PACKEDFLOAT"));
    }

    #[test]
    fn test_serialize_roundtrip_keeps_kernel() {
        let mut engine = engine();
        let blur = BlurPostProcess::new(
            &mut engine,
            "vertical",
            Vector2::new(0.0, 1.0),
            12.0,
            BlurPostProcess::config("vertical"),
        );
        let parsed = BlurPostProcess::parse(&mut engine, &blur.serialize());
        assert_eq!(parsed.direction, Vector2::new(0.0, 1.0));
        assert_eq!(parsed.kernel(), 12.0);
        assert_eq!(parsed.effective_kernel(), blur.effective_kernel());
    }
}
