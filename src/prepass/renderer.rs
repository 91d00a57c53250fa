//! Multiple render target layout shared by materials writing extra outputs
//!
//! Materials rendered while the pre-pass is enabled write their color to the
//! first attachment and the data requested by effect configurations (for
//! example irradiance for sub-surface scattering) to the following ones.

use log::{debug, info};

use crate::engine::constants::{SamplingMode, TextureType};
use crate::engine::{Engine, RenderPassOptions, RenderTargetOptions};
use crate::error::Result;
use crate::materials::defines::MaterialDefines;
use crate::materials::effect::Effect;
use crate::maths::{Color4, Size};
use crate::postprocesses::PostProcessId;
use crate::prepass::sub_surface_configuration::SubSurfaceConfiguration;
use crate::textures::internal_texture::TextureKey;

/// Kinds of data a pre-pass attachment can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrePassTextureType {
    Irradiance = 0,
    Position = 1,
    Velocity = 2,
    Reflectivity = 3,
    Color = 4,
    DepthNormal = 5,
    Albedo = 6,
}

impl PrePassTextureType {
    pub const ALL: [PrePassTextureType; 7] = [
        Self::Irradiance,
        Self::Position,
        Self::Velocity,
        Self::Reflectivity,
        Self::Color,
        Self::DepthNormal,
        Self::Albedo,
    ];

    /// Material define enabling the output; color has none
    pub fn define(self) -> Option<&'static str> {
        match self {
            Self::Irradiance => Some("PREPASS_IRRADIANCE"),
            Self::Position => Some("PREPASS_POSITION"),
            Self::Velocity => Some("PREPASS_VELOCITY"),
            Self::Reflectivity => Some("PREPASS_REFLECTIVITY"),
            Self::DepthNormal => Some("PREPASS_DEPTHNORMAL"),
            Self::Albedo => Some("PREPASS_ALBEDO"),
            Self::Color => None,
        }
    }

    pub fn index_define(self) -> Option<&'static str> {
        match self {
            Self::Irradiance => Some("PREPASS_IRRADIANCE_INDEX"),
            Self::Position => Some("PREPASS_POSITION_INDEX"),
            Self::Velocity => Some("PREPASS_VELOCITY_INDEX"),
            Self::Reflectivity => Some("PREPASS_REFLECTIVITY_INDEX"),
            Self::DepthNormal => Some("PREPASS_DEPTHNORMAL_INDEX"),
            Self::Albedo => Some("PREPASS_ALBEDO_INDEX"),
            Self::Color => None,
        }
    }
}

/// What one effect (usually a post process) needs from the pre-pass
#[derive(Debug, Clone, PartialEq)]
pub struct PrePassEffectConfiguration {
    pub name: String,
    pub enabled: bool,
    pub texture_types: Vec<PrePassTextureType>,
    /// Post process consuming the attachments
    pub post_process: Option<PostProcessId>,
}

impl PrePassEffectConfiguration {
    pub fn new(name: &str, texture_types: &[PrePassTextureType]) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            texture_types: texture_types.to_vec(),
            post_process: None,
        }
    }
}

/// Owns the pre-pass attachments and their layout
#[derive(Debug)]
pub struct PrePassRenderer {
    enabled: bool,
    effect_configurations: Vec<PrePassEffectConfiguration>,
    layout: Vec<PrePassTextureType>,
    texture_indices: [i32; 7],
    textures: Vec<TextureKey>,
    size: Size,
    pub samples: u32,
    pub sub_surface_configuration: SubSurfaceConfiguration,
}

impl Default for PrePassRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PrePassRenderer {
    pub fn new() -> Self {
        Self {
            enabled: false,
            effect_configurations: Vec::new(),
            layout: vec![PrePassTextureType::Color],
            texture_indices: [-1, -1, -1, -1, 0, -1, -1],
            textures: Vec::new(),
            size: Size::default(),
            samples: 1,
            sub_surface_configuration: SubSurfaceConfiguration::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn effect_configurations(&self) -> &[PrePassEffectConfiguration] {
        &self.effect_configurations
    }

    /// Registers a configuration; one with the same name is kept instead
    pub fn add_effect_configuration(&mut self, configuration: PrePassEffectConfiguration) -> usize {
        if let Some(index) = self
            .effect_configurations
            .iter()
            .position(|existing| existing.name == configuration.name)
        {
            return index;
        }
        debug!("Pre-pass configuration '{}' added", configuration.name);
        self.effect_configurations.push(configuration);
        self.update();
        self.effect_configurations.len() - 1
    }

    pub fn remove_effect_configuration(&mut self, name: &str) -> bool {
        let before = self.effect_configurations.len();
        self.effect_configurations.retain(|c| c.name != name);
        let removed = before != self.effect_configurations.len();
        if removed {
            self.update();
        }
        removed
    }

    pub fn set_configuration_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(configuration) = self
            .effect_configurations
            .iter_mut()
            .find(|c| c.name == name)
        {
            configuration.enabled = enabled;
        }
        self.update();
    }

    /// Recomputes the attachment layout from the enabled configurations
    ///
    /// Color is always attachment 0; requested types follow in order of
    /// first request.
    pub fn update(&mut self) {
        let mut layout = vec![PrePassTextureType::Color];
        for configuration in self.effect_configurations.iter().filter(|c| c.enabled) {
            for texture_type in &configuration.texture_types {
                if !layout.contains(texture_type) {
                    layout.push(*texture_type);
                }
            }
        }
        let enabled = layout.len() > 1;
        if enabled != self.enabled {
            info!(
                "Pre-pass {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.enabled = enabled;
        self.texture_indices = [-1; 7];
        for (index, texture_type) in layout.iter().enumerate() {
            self.texture_indices[*texture_type as usize] = index as i32;
        }
        if layout != self.layout {
            self.layout = layout;
            // Attachments are recreated by the next `setup`
            self.size = Size::default();
        }
    }

    /// Attachment index of a texture type, -1 when not rendered
    pub fn get_index(&self, texture_type: PrePassTextureType) -> i32 {
        self.texture_indices[texture_type as usize]
    }

    pub fn mrt_count(&self) -> usize {
        self.layout.len()
    }

    pub fn layout(&self) -> &[PrePassTextureType] {
        &self.layout
    }

    /// Texture holding one kind of data, once `setup` created the targets
    pub fn texture(&self, texture_type: PrePassTextureType) -> Option<TextureKey> {
        let index = self.get_index(texture_type);
        if index < 0 {
            return None;
        }
        self.textures.get(index as usize).copied()
    }

    pub fn textures(&self) -> &[TextureKey] {
        &self.textures
    }

    /// Creates (or resizes) the attachments for the current layout
    pub fn setup(&mut self, engine: &mut Engine, size: Size) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if size == self.size && self.textures.len() == self.layout.len() {
            return Ok(());
        }
        self.dispose_textures(engine);
        let data_type = if engine.caps().texture_half_float_render {
            TextureType::HalfFloat
        } else {
            TextureType::UnsignedInt
        };
        let types: Vec<TextureType> = self
            .layout
            .iter()
            .map(|texture_type| match texture_type {
                PrePassTextureType::Color | PrePassTextureType::Albedo => TextureType::UnsignedInt,
                _ => data_type,
            })
            .collect();
        let options = RenderTargetOptions {
            generate_mipmaps: false,
            sampling_mode: SamplingMode::Nearest,
            generate_depth_buffer: true,
            generate_stencil_buffer: engine.options().stencil,
            samples: self.samples,
            ..Default::default()
        };
        self.textures = engine.create_multiple_render_target(size, &types, &options)?;
        self.size = size;
        debug!(
            "Pre-pass targets {:?} created at {}x{}",
            self.layout, size.width, size.height
        );
        Ok(())
    }

    /// Opens the pass writing every attachment
    pub fn begin_pass(&self, engine: &mut Engine, clear_color: Color4) -> Result<()> {
        let mut pass = RenderPassOptions::backbuffer("pre-pass").with_clear_color(Some(clear_color));
        pass.targets = self.textures.clone();
        engine.begin_render_pass(&pass)
    }

    /// Attachments an effect writes: all of them when it was built with the
    /// pre-pass outputs, only the color target otherwise
    pub fn bind_attachments_for_effect<'a>(&'a self, effect: &Effect) -> &'a [TextureKey] {
        let writes_pre_pass = effect.defines.lines().any(|line| line.trim() == "#define PREPASS");
        if writes_pre_pass || self.textures.is_empty() {
            &self.textures
        } else {
            &self.textures[..1]
        }
    }

    /// Sets PREPASS, SCENE_MRT_COUNT and the per-type defines
    pub fn prepare_defines(&self, defines: &mut MaterialDefines) {
        defines.set_bool("PREPASS", self.enabled);
        defines.set_int(
            "SCENE_MRT_COUNT",
            if self.enabled { self.mrt_count() as i32 } else { 0 },
        );
        for texture_type in PrePassTextureType::ALL {
            let (Some(define), Some(index_define)) = (texture_type.define(), texture_type.index_define())
            else {
                continue;
            };
            let index = if self.enabled { self.get_index(texture_type) } else { -1 };
            defines.set_bool(define, index >= 0);
            defines.set_int(index_define, index);
        }
    }

    pub fn dispose_textures(&mut self, engine: &mut Engine) {
        for texture in self.textures.drain(..) {
            engine.release_internal_texture(texture);
        }
        self.size = Size::default();
    }

    pub fn dispose(&mut self, engine: &mut Engine) {
        self.dispose_textures(engine);
        self.effect_configurations.clear();
        self.update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};

    fn sss_configuration() -> PrePassEffectConfiguration {
        PrePassEffectConfiguration::new(
            "subSurface",
            &[
                PrePassTextureType::Irradiance,
                PrePassTextureType::DepthNormal,
                PrePassTextureType::Albedo,
            ],
        )
    }

    #[test]
    fn test_layout_starts_with_color() {
        let mut renderer = PrePassRenderer::new();
        assert!(!renderer.enabled());
        renderer.add_effect_configuration(sss_configuration());
        renderer.add_effect_configuration(PrePassEffectConfiguration::new(
            "positions",
            &[PrePassTextureType::Position, PrePassTextureType::Albedo],
        ));
        assert!(renderer.enabled());
        assert_eq!(renderer.get_index(PrePassTextureType::Color), 0);
        assert_eq!(renderer.get_index(PrePassTextureType::Irradiance), 1);
        assert_eq!(renderer.get_index(PrePassTextureType::Albedo), 3);
        assert_eq!(renderer.get_index(PrePassTextureType::Position), 4);
        assert_eq!(renderer.get_index(PrePassTextureType::Velocity), -1);
        assert_eq!(renderer.mrt_count(), 5);
    }

    #[test]
    fn test_configurations_are_unique_by_name() {
        let mut renderer = PrePassRenderer::new();
        assert_eq!(renderer.add_effect_configuration(sss_configuration()), 0);
        assert_eq!(renderer.add_effect_configuration(sss_configuration()), 0);
        assert_eq!(renderer.effect_configurations().len(), 1);
        renderer.set_configuration_enabled("subSurface", false);
        assert!(!renderer.enabled());
        assert_eq!(renderer.mrt_count(), 1);
    }

    #[test]
    fn test_prepare_defines() {
        let mut renderer = PrePassRenderer::new();
        renderer.add_effect_configuration(sss_configuration());
        let mut defines = MaterialDefines::new();
        renderer.prepare_defines(&mut defines);
        assert!(defines["PREPASS"]);
        assert!(defines["PREPASS_IRRADIANCE"]);
        assert!(!defines["PREPASS_VELOCITY"]);
        assert_eq!(defines.int("SCENE_MRT_COUNT"), 4);
        assert_eq!(defines.int("PREPASS_DEPTHNORMAL_INDEX"), 2);
        assert_eq!(defines.int("PREPASS_POSITION_INDEX"), -1);
    }

    #[test]
    fn test_setup_creates_one_target_per_attachment() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(64, 32)), EngineOptions::default());
        let mut renderer = PrePassRenderer::new();
        renderer.add_effect_configuration(sss_configuration());
        renderer.setup(&mut engine, Size::new(64, 32)).unwrap();
        assert_eq!(renderer.textures().len(), 4);
        assert!(renderer.texture(PrePassTextureType::Albedo).is_some());
        assert!(renderer.texture(PrePassTextureType::Velocity).is_none());
        renderer.dispose(&mut engine);
        assert_eq!(engine.internal_texture_count(), 0);
    }
}
