//! Exposure, tone mapping, vignette, contrast and color grading settings
//!
//! One [`ImageProcessingConfiguration`] is shared by the scene's materials.
//! It is applied either at the end of every material shader or, when
//! `apply_by_post_process` is set, once by an image processing post process.

use cgmath::Vector4;
use serde::{Deserialize, Serialize};

use crate::engine::constants::{ToneMappingType, VignetteBlendMode};
use crate::materials::effect::Effect;
use crate::maths::{clamp, Color4};
use crate::misc::Observable;
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};
use crate::engine::backend::TextureDimension;
use crate::textures::internal_texture::TextureKey;

/// Hue, density, saturation and exposure of one tonal range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorGradingRange {
    pub hue: f32,
    pub density: f32,
    pub saturation: f32,
    pub exposure: f32,
}

impl Default for ColorGradingRange {
    fn default() -> Self {
        Self {
            hue: 30.0,
            density: 0.0,
            saturation: 0.0,
            exposure: 0.0,
        }
    }
}

impl ColorGradingRange {
    /// Density and exposure sliders respond quadratically
    fn slider_nonlinear(value: f32) -> f32 {
        let value = value / 100.0;
        let mut x = value.abs().powi(2);
        if value < 0.0 {
            x = -x;
        }
        x * 100.0
    }

    /// Multiplier color of this range; alpha carries the saturation
    pub fn grading_data(&self) -> Vector4<f32> {
        let mut hue = clamp(self.hue, 0.0, 360.0);
        let mut density = clamp(self.density, -100.0, 100.0);
        let saturation = clamp(self.saturation, -100.0, 100.0);
        let exposure = clamp(self.exposure, -100.0, 100.0);

        density = Self::slider_nonlinear(density) * 0.5;
        let exposure = Self::slider_nonlinear(exposure);
        if density < 0.0 {
            density = -density;
            hue = (hue + 180.0) % 360.0;
        }
        let (r, g, b) = hsb_to_rgb(hue, density, 50.0 + 0.25 * exposure);
        Vector4::new(r * 2.0, g * 2.0, b * 2.0, 1.0 + 0.01 * saturation)
    }
}

fn hsb_to_rgb(hue: f32, saturation: f32, brightness: f32) -> (f32, f32, f32) {
    let h = clamp(hue, 0.0, 360.0);
    let s = clamp(saturation / 100.0, 0.0, 1.0);
    let v = clamp(brightness / 100.0, 0.0, 1.0);
    if s == 0.0 {
        return (v, v, v);
    }
    let h = h / 60.0;
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as i32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Photoshop-like color curves split into shadows, midtones and highlights
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorCurves {
    pub global: ColorGradingRange,
    pub highlights: ColorGradingRange,
    pub midtones: ColorGradingRange,
    pub shadows: ColorGradingRange,
}

impl ColorCurves {
    /// Positive, neutral and negative curve uniforms
    pub fn curves(&self) -> [Vector4<f32>; 3] {
        let global = self.global.grading_data();
        let mul = |a: Vector4<f32>, b: Vector4<f32>| {
            Vector4::new(a.x * b.x, a.y * b.y, a.z * b.z, a.w * b.w)
        };
        let highlights = mul(self.highlights.grading_data(), global);
        let midtones = mul(self.midtones.grading_data(), global);
        let shadows = mul(self.shadows.grading_data(), global);
        [highlights - midtones, midtones, midtones - shadows]
    }

    pub fn bind(&self, effect: &mut Effect) {
        let [positive, neutral, negative] = self.curves();
        effect
            .set_vector4("vCameraColorCurvePositive", positive)
            .set_vector4("vCameraColorCurveNeutral", neutral)
            .set_vector4("vCameraColorCurveNegative", negative);
    }
}

/// Color grading lookup table bound as `txColorTransform`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorGradingLut {
    pub texture: TextureKey,
    /// Stored as a 3D texture rather than a 2D strip
    pub is_3d: bool,
    /// Edge length of the lookup cube
    pub size: u32,
    pub level: f32,
}

/// Image processing defines, appended to material and post process defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageProcessingConfigurationDefines {
    pub imageprocessing: bool,
    pub vignette: bool,
    pub vignetteblendmodemultiply: bool,
    pub vignetteblendmodeopaque: bool,
    pub tonemapping: bool,
    pub tonemapping_aces: bool,
    pub contrast: bool,
    pub colorcurves: bool,
    pub colorgrading: bool,
    pub colorgrading3d: bool,
    pub sampler3dgreendepth: bool,
    pub sampler3dbgrmap: bool,
    pub imageprocessingpostprocess: bool,
    pub exposure: bool,
}

impl ImageProcessingConfigurationDefines {
    fn entries(&self) -> [(&'static str, bool); 14] {
        [
            ("IMAGEPROCESSING", self.imageprocessing),
            ("VIGNETTE", self.vignette),
            ("VIGNETTEBLENDMODEMULTIPLY", self.vignetteblendmodemultiply),
            ("VIGNETTEBLENDMODEOPAQUE", self.vignetteblendmodeopaque),
            ("TONEMAPPING", self.tonemapping),
            ("TONEMAPPING_ACES", self.tonemapping_aces),
            ("CONTRAST", self.contrast),
            ("COLORCURVES", self.colorcurves),
            ("COLORGRADING", self.colorgrading),
            ("COLORGRADING3D", self.colorgrading3d),
            ("SAMPLER3DGREENDEPTH", self.sampler3dgreendepth),
            ("SAMPLER3DBGRMAP", self.sampler3dbgrmap),
            ("IMAGEPROCESSINGPOSTPROCESS", self.imageprocessingpostprocess),
            ("EXPOSURE", self.exposure),
        ]
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.entries()
            .iter()
            .any(|(define, value)| *define == name && *value)
    }
}

impl std::fmt::Display for ImageProcessingConfigurationDefines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, value) in self.entries() {
            if value {
                writeln!(f, "#define {}", name)?;
            }
        }
        Ok(())
    }
}

/// Serialized form of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedConfiguration {
    color_curves: ColorCurves,
    color_curves_enabled: bool,
    color_grading_enabled: bool,
    color_grading_with_green_depth: bool,
    color_grading_bgr: bool,
    exposure: f32,
    tone_mapping_enabled: bool,
    tone_mapping_type: u32,
    contrast: f32,
    vignette_stretch: f32,
    vignette_centre_x: f32,
    vignette_centre_y: f32,
    vignette_weight: f32,
    vignette_color: [f32; 4],
    vignette_camera_fov: f32,
    vignette_blend_mode: u32,
    vignette_enabled: bool,
    apply_by_post_process: bool,
    is_enabled: bool,
}

macro_rules! notifying_setter {
    ($(#[$meta:meta])* $setter:ident, $field:ident: $ty:ty) => {
        $(#[$meta])*
        pub fn $setter(&mut self, value: $ty) {
            if self.$field == value {
                return;
            }
            self.$field = value;
            self.update_parameters();
        }
    };
}

/// Image processing settings of a scene, material or post process
#[derive(Debug)]
pub struct ImageProcessingConfiguration {
    color_curves: Option<ColorCurves>,
    color_curves_enabled: bool,
    color_grading_texture: Option<ColorGradingLut>,
    color_grading_enabled: bool,
    color_grading_with_green_depth: bool,
    color_grading_bgr: bool,
    exposure: f32,
    tone_mapping_enabled: bool,
    tone_mapping_type: ToneMappingType,
    contrast: f32,
    pub vignette_stretch: f32,
    pub vignette_centre_x: f32,
    pub vignette_centre_y: f32,
    pub vignette_weight: f32,
    pub vignette_color: Color4,
    pub vignette_camera_fov: f32,
    vignette_blend_mode: VignetteBlendMode,
    vignette_enabled: bool,
    apply_by_post_process: bool,
    is_enabled: bool,
    update_id: u64,
    /// Fires after any setter changed a value that affects defines
    pub on_update_parameters: Observable<ImageProcessingConfiguration>,
}

impl Default for ImageProcessingConfiguration {
    fn default() -> Self {
        Self {
            color_curves: Some(ColorCurves::default()),
            color_curves_enabled: false,
            color_grading_texture: None,
            color_grading_enabled: false,
            color_grading_with_green_depth: true,
            color_grading_bgr: true,
            exposure: 1.0,
            tone_mapping_enabled: false,
            tone_mapping_type: ToneMappingType::Standard,
            contrast: 1.0,
            vignette_stretch: 0.0,
            vignette_centre_x: 0.0,
            vignette_centre_y: 0.0,
            vignette_weight: 1.5,
            vignette_color: Color4::new(0.0, 0.0, 0.0, 0.0),
            vignette_camera_fov: 0.5,
            vignette_blend_mode: VignetteBlendMode::Multiply,
            vignette_enabled: false,
            apply_by_post_process: false,
            is_enabled: true,
            update_id: 0,
            on_update_parameters: Observable::new(),
        }
    }
}

impl Clone for ImageProcessingConfiguration {
    /// Copies every setting; observers are not cloned
    fn clone(&self) -> Self {
        Self {
            color_curves: self.color_curves,
            color_curves_enabled: self.color_curves_enabled,
            color_grading_texture: self.color_grading_texture,
            color_grading_enabled: self.color_grading_enabled,
            color_grading_with_green_depth: self.color_grading_with_green_depth,
            color_grading_bgr: self.color_grading_bgr,
            exposure: self.exposure,
            tone_mapping_enabled: self.tone_mapping_enabled,
            tone_mapping_type: self.tone_mapping_type,
            contrast: self.contrast,
            vignette_stretch: self.vignette_stretch,
            vignette_centre_x: self.vignette_centre_x,
            vignette_centre_y: self.vignette_centre_y,
            vignette_weight: self.vignette_weight,
            vignette_color: self.vignette_color,
            vignette_camera_fov: self.vignette_camera_fov,
            vignette_blend_mode: self.vignette_blend_mode,
            vignette_enabled: self.vignette_enabled,
            apply_by_post_process: self.apply_by_post_process,
            is_enabled: self.is_enabled,
            update_id: self.update_id,
            on_update_parameters: Observable::new(),
        }
    }
}

impl ImageProcessingConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_name(&self) -> &'static str {
        "ImageProcessingConfiguration"
    }

    /// Incremented by every change; consumers compare it to rebuild defines
    pub fn update_id(&self) -> u64 {
        self.update_id
    }

    fn update_parameters(&mut self) {
        self.update_id += 1;
        let mut observable = std::mem::take(&mut self.on_update_parameters);
        observable.notify(self);
        self.on_update_parameters = observable;
    }

    pub fn color_curves(&self) -> Option<&ColorCurves> {
        self.color_curves.as_ref()
    }

    notifying_setter!(set_color_curves, color_curves: Option<ColorCurves>);

    pub fn color_curves_enabled(&self) -> bool {
        self.color_curves_enabled
    }

    notifying_setter!(set_color_curves_enabled, color_curves_enabled: bool);

    pub fn color_grading_texture(&self) -> Option<&ColorGradingLut> {
        self.color_grading_texture.as_ref()
    }

    notifying_setter!(set_color_grading_texture, color_grading_texture: Option<ColorGradingLut>);

    pub fn color_grading_enabled(&self) -> bool {
        self.color_grading_enabled
    }

    notifying_setter!(set_color_grading_enabled, color_grading_enabled: bool);

    pub fn color_grading_with_green_depth(&self) -> bool {
        self.color_grading_with_green_depth
    }

    notifying_setter!(
        set_color_grading_with_green_depth,
        color_grading_with_green_depth: bool
    );

    pub fn color_grading_bgr(&self) -> bool {
        self.color_grading_bgr
    }

    notifying_setter!(set_color_grading_bgr, color_grading_bgr: bool);

    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    notifying_setter!(set_exposure, exposure: f32);

    pub fn tone_mapping_enabled(&self) -> bool {
        self.tone_mapping_enabled
    }

    notifying_setter!(set_tone_mapping_enabled, tone_mapping_enabled: bool);

    pub fn tone_mapping_type(&self) -> ToneMappingType {
        self.tone_mapping_type
    }

    notifying_setter!(set_tone_mapping_type, tone_mapping_type: ToneMappingType);

    pub fn contrast(&self) -> f32 {
        self.contrast
    }

    notifying_setter!(set_contrast, contrast: f32);

    pub fn vignette_blend_mode(&self) -> VignetteBlendMode {
        self.vignette_blend_mode
    }

    notifying_setter!(set_vignette_blend_mode, vignette_blend_mode: VignetteBlendMode);

    pub fn vignette_enabled(&self) -> bool {
        self.vignette_enabled
    }

    notifying_setter!(set_vignette_enabled, vignette_enabled: bool);

    pub fn apply_by_post_process(&self) -> bool {
        self.apply_by_post_process
    }

    notifying_setter!(
        /// Moves image processing out of materials into a post process
        set_apply_by_post_process,
        apply_by_post_process: bool
    );

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    notifying_setter!(set_is_enabled, is_enabled: bool);

    pub fn prepare_uniforms(uniforms: &mut Vec<UniformDecl>) {
        for (name, ty) in [
            ("exposureLinear", UniformType::Float),
            ("contrast", UniformType::Float),
            ("vInverseScreenSize", UniformType::Vec2),
            ("vignetteSettings1", UniformType::Vec4),
            ("vignetteSettings2", UniformType::Vec4),
            ("vCameraColorCurveNegative", UniformType::Vec4),
            ("vCameraColorCurveNeutral", UniformType::Vec4),
            ("vCameraColorCurvePositive", UniformType::Vec4),
            ("colorTransformSettings", UniformType::Vec4),
        ] {
            if !uniforms.iter().any(|u| u.name == name) {
                uniforms.push(UniformDecl::new(name, ty));
            }
        }
    }

    /// Adds `txColorTransform` when color grading is active
    pub fn prepare_samplers(samplers: &mut Vec<SamplerDecl>, defines: &ImageProcessingConfigurationDefines) {
        if defines.colorgrading && !samplers.iter().any(|s| s.name == "txColorTransform") {
            let dimension = if defines.colorgrading3d {
                TextureDimension::D3
            } else {
                TextureDimension::D2
            };
            samplers.push(SamplerDecl::with_dimension("txColorTransform", dimension));
        }
    }

    /// Fills the defines for a material (or for the post process applying it)
    pub fn prepare_defines(&self, defines: &mut ImageProcessingConfigurationDefines, for_post_process: bool) {
        if for_post_process != self.apply_by_post_process || !self.is_enabled {
            *defines = ImageProcessingConfigurationDefines::default();
            return;
        }
        defines.vignette = self.vignette_enabled;
        defines.vignetteblendmodemultiply = self.vignette_blend_mode == VignetteBlendMode::Multiply;
        defines.vignetteblendmodeopaque = !defines.vignetteblendmodemultiply;
        defines.tonemapping = self.tone_mapping_enabled;
        defines.tonemapping_aces = self.tone_mapping_type == ToneMappingType::Aces;
        defines.contrast = self.contrast != 1.0;
        defines.exposure = self.exposure != 1.0;
        defines.colorcurves = self.color_curves_enabled && self.color_curves.is_some();
        defines.colorgrading = self.color_grading_enabled && self.color_grading_texture.is_some();
        defines.colorgrading3d = defines.colorgrading
            && self.color_grading_texture.is_some_and(|lut| lut.is_3d);
        defines.sampler3dgreendepth = self.color_grading_with_green_depth;
        defines.sampler3dbgrmap = self.color_grading_bgr;
        defines.imageprocessingpostprocess = self.apply_by_post_process;
        defines.imageprocessing = defines.vignette
            || defines.tonemapping
            || defines.contrast
            || defines.exposure
            || defines.colorcurves
            || defines.colorgrading;
    }

    /// Writes the image processing uniforms; the aspect ratio defaults to
    /// the render height over width
    pub fn bind(
        &self,
        effect: &mut Effect,
        render_width: u32,
        render_height: u32,
        override_aspect_ratio: Option<f32>,
    ) {
        if self.color_curves_enabled {
            if let Some(curves) = &self.color_curves {
                curves.bind(effect);
            }
        }

        if self.vignette_enabled {
            let width = render_width.max(1) as f32;
            let height = render_height.max(1) as f32;
            effect.set_float2("vInverseScreenSize", 1.0 / width, 1.0 / height);

            let aspect_ratio = override_aspect_ratio.unwrap_or(height / width);
            let mut scale_y = (self.vignette_camera_fov * 0.5).tan();
            let mut scale_x = scale_y * aspect_ratio;
            let geometric_mean = (scale_x * scale_y).sqrt();
            scale_x += (geometric_mean - scale_x) * self.vignette_stretch;
            scale_y += (geometric_mean - scale_y) * self.vignette_stretch;
            effect.set_float4(
                "vignetteSettings1",
                scale_x,
                scale_y,
                -scale_x * self.vignette_centre_x,
                -scale_y * self.vignette_centre_y,
            );
            let power = -2.0 * self.vignette_weight;
            effect.set_float4(
                "vignetteSettings2",
                self.vignette_color.r,
                self.vignette_color.g,
                self.vignette_color.b,
                power,
            );
        }

        effect.set_float("exposureLinear", self.exposure);
        effect.set_float("contrast", self.contrast);

        if let Some(lut) = &self.color_grading_texture {
            effect.set_texture("txColorTransform", Some(lut.texture));
            let size = lut.size.max(1) as f32;
            effect.set_float4(
                "colorTransformSettings",
                (size - 1.0) / size,
                0.5 / size,
                size,
                lut.level,
            );
        }
    }

    pub fn serialize(&self) -> serde_json::Value {
        let serialized = SerializedConfiguration {
            color_curves: self.color_curves.unwrap_or_default(),
            color_curves_enabled: self.color_curves_enabled,
            color_grading_enabled: self.color_grading_enabled,
            color_grading_with_green_depth: self.color_grading_with_green_depth,
            color_grading_bgr: self.color_grading_bgr,
            exposure: self.exposure,
            tone_mapping_enabled: self.tone_mapping_enabled,
            tone_mapping_type: self.tone_mapping_type.as_u32(),
            contrast: self.contrast,
            vignette_stretch: self.vignette_stretch,
            vignette_centre_x: self.vignette_centre_x,
            vignette_centre_y: self.vignette_centre_y,
            vignette_weight: self.vignette_weight,
            vignette_color: self.vignette_color.to_array(),
            vignette_camera_fov: self.vignette_camera_fov,
            vignette_blend_mode: self.vignette_blend_mode.as_u32(),
            vignette_enabled: self.vignette_enabled,
            apply_by_post_process: self.apply_by_post_process,
            is_enabled: self.is_enabled,
        };
        serde_json::to_value(serialized).unwrap_or(serde_json::Value::Null)
    }

    pub fn parse(value: &serde_json::Value) -> crate::error::Result<Self> {
        let parsed: SerializedConfiguration = serde_json::from_value(value.clone())?;
        let [r, g, b, a] = parsed.vignette_color;
        Ok(Self {
            color_curves: Some(parsed.color_curves),
            color_curves_enabled: parsed.color_curves_enabled,
            color_grading_enabled: parsed.color_grading_enabled,
            color_grading_with_green_depth: parsed.color_grading_with_green_depth,
            color_grading_bgr: parsed.color_grading_bgr,
            exposure: parsed.exposure,
            tone_mapping_enabled: parsed.tone_mapping_enabled,
            tone_mapping_type: ToneMappingType::from_u32(parsed.tone_mapping_type).unwrap_or_default(),
            contrast: parsed.contrast,
            vignette_stretch: parsed.vignette_stretch,
            vignette_centre_x: parsed.vignette_centre_x,
            vignette_centre_y: parsed.vignette_centre_y,
            vignette_weight: parsed.vignette_weight,
            vignette_color: Color4::new(r, g, b, a),
            vignette_camera_fov: parsed.vignette_camera_fov,
            vignette_blend_mode: VignetteBlendMode::from_u32(parsed.vignette_blend_mode).unwrap_or_default(),
            vignette_enabled: parsed.vignette_enabled,
            apply_by_post_process: parsed.apply_by_post_process,
            is_enabled: parsed.is_enabled,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::effect::EffectCreationOptions;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_defines_follow_settings() {
        let mut configuration = ImageProcessingConfiguration::new();
        let mut defines = ImageProcessingConfigurationDefines::default();
        configuration.prepare_defines(&mut defines, false);
        assert!(!defines.imageprocessing);
        assert!(defines.vignetteblendmodemultiply);

        configuration.set_contrast(1.5);
        configuration.set_tone_mapping_enabled(true);
        configuration.set_tone_mapping_type(ToneMappingType::Aces);
        configuration.prepare_defines(&mut defines, false);
        assert!(defines.imageprocessing);
        assert!(defines.contrast && defines.tonemapping && defines.tonemapping_aces);
        assert!(defines.to_string().contains("#define TONEMAPPING_ACES\n"));

        // Applied by a post process: materials get nothing
        configuration.set_apply_by_post_process(true);
        configuration.prepare_defines(&mut defines, false);
        assert_eq!(defines, ImageProcessingConfigurationDefines::default());
        configuration.prepare_defines(&mut defines, true);
        assert!(defines.imageprocessingpostprocess);
    }

    #[test]
    fn test_setters_notify_only_on_change() {
        let mut configuration = ImageProcessingConfiguration::new();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        configuration
            .on_update_parameters
            .add(move |_, _| counter.set(counter.get() + 1));
        configuration.set_exposure(1.0);
        assert_eq!(count.get(), 0);
        configuration.set_exposure(2.0);
        configuration.set_exposure(2.0);
        assert_eq!(count.get(), 1);
        assert_eq!(configuration.update_id(), 1);
    }

    #[test]
    fn test_neutral_curves() {
        let [positive, neutral, negative] = ColorCurves::default().curves();
        assert!((neutral - Vector4::new(1.0, 1.0, 1.0, 1.0)).x.abs() < 1e-6);
        assert!(positive.x.abs() < 1e-6 && negative.z.abs() < 1e-6);
    }

    #[test]
    fn test_bind_writes_vignette_and_exposure() {
        let mut uniforms = Vec::new();
        ImageProcessingConfiguration::prepare_uniforms(&mut uniforms);
        let mut effect = Effect::new(
            &EffectCreationOptions::new("postprocess", "imageProcessing").with_uniforms(uniforms),
        );
        let mut configuration = ImageProcessingConfiguration::new();
        configuration.set_vignette_enabled(true);
        configuration.set_exposure(2.0);
        configuration.bind(&mut effect, 200, 100, None);
        assert_eq!(
            effect.value("exposureLinear"),
            Some(crate::materials::effect::UniformValue::Float(2.0))
        );
        assert_eq!(
            effect.value("vInverseScreenSize"),
            Some(crate::materials::effect::UniformValue::Vec2([0.005, 0.01]))
        );
        assert!(effect.value("vignetteSettings1").is_some());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut configuration = ImageProcessingConfiguration::new();
        configuration.set_vignette_blend_mode(VignetteBlendMode::Opaque);
        configuration.vignette_weight = 3.0;
        let parsed = ImageProcessingConfiguration::parse(&configuration.serialize()).unwrap();
        assert_eq!(parsed.vignette_blend_mode(), VignetteBlendMode::Opaque);
        assert_eq!(parsed.vignette_weight, 3.0);
    }
}
