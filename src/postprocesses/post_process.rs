//! Fullscreen effects rendered from one texture into the next

use std::any::Any;
use std::collections::HashMap;

use cgmath::Vector2;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::cameras::CameraSnapshot;
use crate::engine::backend::{DrawGeometry, DrawState};
use crate::engine::constants::{AlphaMode, SamplingMode, ScaleMode, TextureFormat, TextureType};
use crate::engine::{Engine, RenderPassOptions, RenderTargetOptions};
use crate::error::Result;
use crate::materials::effect::{Effect, EffectCreationOptions, EffectKey};
use crate::materials::image_processing::ImageProcessingConfiguration;
use crate::maths::{self, Color4, Size, Viewport};
use crate::misc::{EventState, Observable, ObserverHandle};
use crate::prepass::{PrePassEffectConfiguration, PrePassRenderer};
use crate::scene::animation::Animation;
use crate::scene::NodeId;
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};
use crate::textures::internal_texture::TextureKey;

slotmap::new_key_type! {
    /// Key of a post process inside the scene
    pub struct PostProcessId;
}

/// Arena of every post process of a scene
pub type PostProcessArena = SlotMap<PostProcessId, Box<dyn ScenePostProcess>>;

/// How a post process sizes its output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostProcessOptions {
    /// Fraction of the source (or render) size
    Ratio(f32),
    Size { width: u32, height: u32 },
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self::Ratio(1.0)
    }
}

/// Scene state visible to post processes while a camera renders
#[derive(Clone, Copy, Default)]
pub struct PostProcessContext<'a> {
    pub camera: Option<&'a CameraSnapshot>,
    pub scene_clear_color: Color4,
    pub image_processing: Option<&'a ImageProcessingConfiguration>,
    pub pre_pass: Option<&'a PrePassRenderer>,
}

impl PostProcessContext<'_> {
    pub fn viewport(&self) -> Viewport {
        self.camera.map_or_else(Viewport::default, |camera| camera.viewport)
    }
}

/// Creation parameters of a [`PostProcess`]
#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessConfig {
    pub name: String,
    pub fragment_url: String,
    pub vertex_url: String,
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub options: PostProcessOptions,
    pub camera: Option<NodeId>,
    pub sampling_mode: SamplingMode,
    pub reusable: bool,
    pub defines: String,
    pub texture_type: TextureType,
    pub texture_format: TextureFormat,
    pub index_parameters: HashMap<String, i64>,
    /// Defer effect creation until the owner calls `update_effect`
    pub block_compilation: bool,
}

impl PostProcessConfig {
    pub fn new(name: &str, fragment_url: &str) -> Self {
        Self {
            name: name.to_string(),
            fragment_url: fragment_url.to_string(),
            vertex_url: "postprocess".to_string(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            options: PostProcessOptions::default(),
            camera: None,
            sampling_mode: SamplingMode::Nearest,
            reusable: false,
            defines: String::new(),
            texture_type: TextureType::UnsignedInt,
            texture_format: TextureFormat::Rgba,
            index_parameters: HashMap::new(),
            block_compilation: false,
        }
    }

    pub fn with_uniforms(mut self, uniforms: Vec<UniformDecl>) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_samplers(mut self, samplers: Vec<SamplerDecl>) -> Self {
        self.samplers = samplers;
        self
    }

    pub fn with_options(mut self, options: PostProcessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_ratio(self, ratio: f32) -> Self {
        self.with_options(PostProcessOptions::Ratio(ratio))
    }

    pub fn with_camera(mut self, camera: Option<NodeId>) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_sampling_mode(mut self, sampling_mode: SamplingMode) -> Self {
        self.sampling_mode = sampling_mode;
        self
    }

    pub fn with_reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    pub fn with_defines(mut self, defines: &str) -> Self {
        self.defines = defines.to_string();
        self
    }

    pub fn with_texture_type(mut self, texture_type: TextureType) -> Self {
        self.texture_type = texture_type;
        self
    }

    pub fn with_vertex_url(mut self, vertex_url: &str) -> Self {
        self.vertex_url = vertex_url.to_string();
        self
    }

    pub fn with_index_parameters(mut self, index_parameters: HashMap<String, i64>) -> Self {
        self.index_parameters = index_parameters;
        self
    }

    pub fn with_block_compilation(mut self, block_compilation: bool) -> Self {
        self.block_compilation = block_compilation;
        self
    }
}

/// Observer slots replaced by the `set_on_*` helpers
#[derive(Debug, Default)]
struct ReplaceableObservers {
    activate: Option<ObserverHandle>,
    size_changed: Option<ObserverHandle>,
    apply: Option<ObserverHandle>,
    before_render: Option<ObserverHandle>,
    after_render: Option<ObserverHandle>,
}

static NEXT_UNIQUE_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// A fullscreen pass reading the previous output through `textureSampler`
#[derive(Debug)]
pub struct PostProcess {
    pub name: String,
    pub unique_id: u64,
    pub width: u32,
    pub height: u32,
    pub render_target_sampling_mode: SamplingMode,
    pub clear_color: Option<Color4>,
    pub auto_clear: bool,
    pub alpha_mode: AlphaMode,
    pub alpha_constants: Option<Color4>,
    pub animations: Vec<Animation>,
    /// Render at the required size inside a larger power-of-two texture
    pub enable_pixel_perfect_mode: bool,
    pub force_fullscreen_viewport: bool,
    pub scale_mode: ScaleMode,
    pub always_force_pot: bool,
    pub adapt_scale_to_current_viewport: bool,
    /// Notified with a copy of the frame's camera, `None` when the pass runs
    /// without one
    pub on_activate: Observable<Option<CameraSnapshot>>,
    pub on_size_changed: Observable<PostProcess>,
    pub on_apply: Observable<Effect>,
    pub on_before_render: Observable<Effect>,
    pub on_after_render: Observable<Effect>,
    pub(crate) textures: Vec<TextureKey>,
    pub(crate) current_render_texture_ind: usize,
    pub(crate) pre_pass_effect_configuration: Option<PrePassEffectConfiguration>,
    /// Resolved input of the post process this one shares its output with
    pub(crate) shared_output: Option<TextureKey>,
    samples: u32,
    camera: Option<NodeId>,
    options: PostProcessOptions,
    reusable: bool,
    texture_type: TextureType,
    texture_format: TextureFormat,
    effect: Option<EffectKey>,
    parameters: Vec<UniformDecl>,
    samplers: Vec<SamplerDecl>,
    fragment_url: String,
    vertex_url: String,
    defines: String,
    index_parameters: HashMap<String, i64>,
    scale_ratio: Vector2<f32>,
    share_output_with: Option<PostProcessId>,
    texel_size: Vector2<f32>,
    forced_output_texture: Option<TextureKey>,
    output_texture: Option<TextureKey>,
    last_activated: Option<TextureKey>,
    texture_dirty: bool,
    observers: ReplaceableObservers,
}

fn with_builtin_inputs(
    uniforms: &[UniformDecl],
    samplers: &[SamplerDecl],
) -> (Vec<UniformDecl>, Vec<SamplerDecl>) {
    let mut uniforms = uniforms.to_vec();
    if !uniforms.iter().any(|u| u.name == "scale") {
        uniforms.push(UniformDecl::new("scale", UniformType::Vec2));
    }
    let mut samplers = samplers.to_vec();
    if !samplers.iter().any(|s| s.name == "textureSampler") {
        samplers.insert(0, SamplerDecl::new("textureSampler"));
    }
    (uniforms, samplers)
}

impl PostProcess {
    pub fn new(engine: &mut Engine, config: PostProcessConfig) -> Self {
        let (parameters, samplers) = with_builtin_inputs(&config.uniforms, &config.samplers);
        let mut post_process = Self {
            name: config.name,
            unique_id: NEXT_UNIQUE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            width: 0,
            height: 0,
            render_target_sampling_mode: config.sampling_mode,
            clear_color: None,
            auto_clear: true,
            alpha_mode: AlphaMode::Disable,
            alpha_constants: None,
            animations: Vec::new(),
            enable_pixel_perfect_mode: false,
            force_fullscreen_viewport: true,
            scale_mode: ScaleMode::Floor,
            always_force_pot: false,
            adapt_scale_to_current_viewport: false,
            on_activate: Observable::new(),
            on_size_changed: Observable::new(),
            on_apply: Observable::new(),
            on_before_render: Observable::new(),
            on_after_render: Observable::new(),
            textures: Vec::new(),
            current_render_texture_ind: 0,
            pre_pass_effect_configuration: None,
            shared_output: None,
            samples: 1,
            camera: config.camera,
            options: config.options,
            reusable: config.reusable,
            texture_type: config.texture_type,
            texture_format: config.texture_format,
            effect: None,
            parameters,
            samplers,
            fragment_url: config.fragment_url,
            vertex_url: config.vertex_url,
            defines: config.defines,
            index_parameters: config.index_parameters,
            scale_ratio: Vector2::new(1.0, 1.0),
            share_output_with: None,
            texel_size: Vector2::new(0.0, 0.0),
            forced_output_texture: None,
            output_texture: None,
            last_activated: None,
            texture_dirty: false,
            observers: ReplaceableObservers::default(),
        };
        if !config.block_compilation {
            let defines = post_process.defines.clone();
            post_process.update_effect(engine, Some(&defines), None, None, None, None, None);
        }
        post_process
    }

    pub fn get_effect_name(&self) -> &str {
        &self.fragment_url
    }

    pub fn vertex_url(&self) -> &str {
        &self.vertex_url
    }

    pub fn defines(&self) -> &str {
        &self.defines
    }

    pub fn options(&self) -> PostProcessOptions {
        self.options
    }

    pub fn texture_type(&self) -> TextureType {
        self.texture_type
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.texture_format
    }

    pub fn get_camera(&self) -> Option<NodeId> {
        self.camera
    }

    pub(crate) fn set_camera(&mut self, camera: Option<NodeId>) {
        self.camera = camera;
    }

    pub fn get_effect(&self) -> Option<EffectKey> {
        self.effect
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// MSAA sample count of the output textures, applied on next activation
    pub fn set_samples(&mut self, samples: u32) {
        self.samples = samples.max(1);
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn texel_size(&self) -> Vector2<f32> {
        self.texel_size
    }

    /// Texture this post process reads from
    pub fn input_texture(&self) -> Option<TextureKey> {
        self.textures.get(self.current_render_texture_ind).copied()
    }

    /// Makes the previous stage render into `texture` instead of an own target
    pub fn set_input_texture(&mut self, texture: Option<TextureKey>) {
        self.forced_output_texture = texture;
    }

    pub fn restore_default_input_texture(&mut self) {
        if self.forced_output_texture.take().is_some() {
            self.mark_texture_dirty();
        }
    }

    /// Texture the last apply rendered into
    pub fn output_texture(&self) -> Option<TextureKey> {
        self.output_texture
    }

    pub fn set_output_texture(&mut self, texture: Option<TextureKey>) {
        self.output_texture = texture;
    }

    /// Renders into the input of `post_process` instead of own textures
    pub fn share_output_with(&mut self, engine: &mut Engine, post_process: PostProcessId) -> &mut Self {
        self.dispose_textures(engine);
        self.share_output_with = Some(post_process);
        self
    }

    pub fn shared_output_with(&self) -> Option<PostProcessId> {
        self.share_output_with
    }

    pub fn use_own_output(&mut self) {
        self.share_output_with = None;
        self.shared_output = None;
    }

    pub fn aspect_ratio(&self, engine: &Engine) -> f32 {
        let forced = self
            .shared_output
            .or(self.forced_output_texture)
            .and_then(|key| engine.internal_texture(key));
        match forced {
            Some(texture) => texture.width as f32 / texture.height.max(1) as f32,
            None => self.width as f32 / self.height.max(1) as f32,
        }
    }

    pub fn mark_texture_dirty(&mut self) {
        self.texture_dirty = true;
    }

    pub fn is_ready(&self, engine: &Engine) -> bool {
        self.effect.is_some_and(|key| engine.is_effect_ready(key))
    }

    pub fn is_supported(&self, engine: &Engine) -> bool {
        self.effect
            .and_then(|key| engine.get_effect(key))
            .is_some_and(|effect| effect.compilation_error().is_none())
    }

    /// Recreates the effect; `None` arguments keep the current values,
    /// except `defines` which falls back to no defines
    #[allow(clippy::too_many_arguments)]
    pub fn update_effect(
        &mut self,
        engine: &mut Engine,
        defines: Option<&str>,
        uniforms: Option<&[UniformDecl]>,
        samplers: Option<&[SamplerDecl]>,
        index_parameters: Option<HashMap<String, i64>>,
        vertex_url: Option<&str>,
        fragment_url: Option<&str>,
    ) {
        let (uniforms, samplers) = with_builtin_inputs(
            uniforms.unwrap_or(&self.parameters),
            samplers.unwrap_or(&self.samplers),
        );
        self.defines = defines.unwrap_or_default().to_string();
        if let Some(index_parameters) = index_parameters {
            self.index_parameters = index_parameters;
        }
        let options = EffectCreationOptions::new(
            vertex_url.unwrap_or(&self.vertex_url),
            fragment_url.unwrap_or(&self.fragment_url),
        )
        .with_uniforms(uniforms)
        .with_samplers(samplers)
        .with_defines(&self.defines)
        .with_index_parameters(self.index_parameters.clone());
        let effect = engine.create_effect(options);
        if let Some(previous) = self.effect.replace(effect) {
            engine.release_effect(previous);
        }
        if let Some(error) = engine.get_effect(effect).and_then(Effect::compilation_error) {
            warn!("Post process '{}' effect failed: {}", self.name, error);
        }
    }

    /// Sizes the output textures and opens the pass the previous stage
    /// renders into; returns that pass' target
    pub fn activate(
        &mut self,
        engine: &mut Engine,
        ctx: &PostProcessContext<'_>,
        source_texture: Option<TextureKey>,
        force_depth_stencil: bool,
    ) -> Result<Option<TextureKey>> {
        let max_size = engine.caps().max_texture_size;
        let source_size = source_texture
            .and_then(|key| engine.internal_texture(key))
            .map(|texture| Size::new(texture.width, texture.height))
            .unwrap_or_else(|| Size::new(engine.render_width(true), engine.render_height(true)));
        let (required, explicit) = match self.options {
            PostProcessOptions::Ratio(ratio) => (
                Size::new(
                    (source_size.width as f32 * ratio) as u32,
                    (source_size.height as f32 * ratio) as u32,
                ),
                false,
            ),
            PostProcessOptions::Size { width, height } => (Size::new(width, height), true),
        };
        let mut desired = required;
        let needs_mipmaps = self.render_target_sampling_mode == SamplingMode::Trilinear;

        if self.shared_output.is_none() && self.forced_output_texture.is_none() {
            if self.adapt_scale_to_current_viewport {
                let viewport = ctx.viewport();
                desired.width = (desired.width as f32 * viewport.width) as u32;
                desired.height = (desired.height as f32 * viewport.height) as u32;
            }
            if (!self.enable_pixel_perfect_mode || self.always_force_pot)
                && (!engine.caps().non_power_of_two_textures || self.always_force_pot)
                && !explicit
            {
                desired.width = maths::get_exponent_of_two(desired.width, max_size, self.scale_mode);
                desired.height =
                    maths::get_exponent_of_two(desired.height, max_size, self.scale_mode);
            }
            desired.width = desired.width.clamp(1, max_size);
            desired.height = desired.height.clamp(1, max_size);

            if self.width != desired.width
                || self.height != desired.height
                || self.texture_dirty
                || self.textures.is_empty()
            {
                self.dispose_textures(engine);
                self.texture_dirty = false;
                self.width = desired.width;
                self.height = desired.height;
                let with_depth = force_depth_stencil;
                let options = RenderTargetOptions {
                    generate_mipmaps: needs_mipmaps,
                    texture_type: self.texture_type,
                    format: self.texture_format,
                    sampling_mode: self.render_target_sampling_mode,
                    generate_depth_buffer: with_depth,
                    generate_stencil_buffer: with_depth && engine.options().stencil,
                    samples: self.samples,
                };
                self.textures
                    .push(engine.create_render_target_texture(desired, &options)?);
                if self.reusable {
                    self.textures
                        .push(engine.create_render_target_texture(desired, &options)?);
                }
                self.current_render_texture_ind = 0;
                self.texel_size = Vector2::new(1.0 / self.width as f32, 1.0 / self.height as f32);
                debug!(
                    "Post process '{}' resized to {}x{}",
                    self.name, self.width, self.height
                );
                let mut observable = std::mem::take(&mut self.on_size_changed);
                observable.notify(self);
                self.on_size_changed = observable;
            }

            for texture in self.textures.clone() {
                let samples = engine.internal_texture(texture).map(|t| t.samples);
                if samples.is_some_and(|samples| samples != self.samples) {
                    engine.update_render_target_samples(texture, self.samples)?;
                }
            }
        }

        let target = if let Some(shared) = self.shared_output {
            shared
        } else if let Some(forced) = self.forced_output_texture {
            if let Some(texture) = engine.internal_texture(forced) {
                self.width = texture.width;
                self.height = texture.height;
            }
            forced
        } else {
            match self.input_texture() {
                Some(texture) => texture,
                None => return Ok(None),
            }
        };

        let viewport = if self.enable_pixel_perfect_mode {
            self.scale_ratio = Vector2::new(
                required.width as f32 / desired.width.max(1) as f32,
                required.height as f32 / desired.height.max(1) as f32,
            );
            Some(Viewport::new(0.0, 0.0, self.scale_ratio.x, self.scale_ratio.y))
        } else {
            self.scale_ratio = Vector2::new(1.0, 1.0);
            (!self.force_fullscreen_viewport).then(|| ctx.viewport())
        };

        let clear = (self.auto_clear && self.alpha_mode == AlphaMode::Disable)
            .then(|| self.clear_color.unwrap_or(ctx.scene_clear_color));
        let has_depth = engine
            .internal_texture(target)
            .is_some_and(|texture| texture.generate_depth_buffer());
        let mut pass = RenderPassOptions::texture(&self.name, target)
            .with_clear_color(clear)
            .with_viewport(viewport);
        pass.depth_stencil = has_depth;
        pass.clear_depth = clear.is_some();
        engine.begin_render_pass(&pass)?;

        let mut camera = ctx.camera.copied();
        self.on_activate.notify(&mut camera);

        self.last_activated = Some(target);
        if self.reusable {
            self.current_render_texture_ind = (self.current_render_texture_ind + 1) % 2;
        }
        Ok(Some(target))
    }

    /// Binds the input texture and scale; returns the effect to draw with
    pub fn apply(&mut self, engine: &mut Engine) -> Option<EffectKey> {
        let key = self.effect.filter(|key| engine.is_effect_ready(*key))?;
        let source = self
            .shared_output
            .or(self.forced_output_texture)
            .or(self.last_activated)
            .or_else(|| self.input_texture());
        let effect = engine.get_effect_mut(key)?;
        effect.set_texture("textureSampler", source);
        effect.set_vector2("scale", self.scale_ratio);
        self.on_apply.notify(effect);
        Some(key)
    }

    /// Issues the fullscreen draw for an applied effect
    pub fn render(&mut self, engine: &mut Engine, effect: EffectKey) -> Result<()> {
        if let Some(effect) = engine.get_effect_mut(effect) {
            self.on_before_render.notify(effect);
        }
        let mut state = DrawState::fullscreen(self.alpha_mode);
        if let Some(constants) = self.alpha_constants {
            state.alpha_constants = constants;
        }
        engine.draw_effect(effect, DrawGeometry::FullscreenTriangle, state)?;
        if let Some(effect) = engine.get_effect_mut(effect) {
            self.on_after_render.notify(effect);
        }
        Ok(())
    }

    pub fn dispose_textures(&mut self, engine: &mut Engine) {
        for texture in self.textures.drain(..) {
            engine.release_internal_texture(texture);
        }
    }

    /// Registers this post process' pre-pass needs; false when it has none
    pub fn set_pre_pass_renderer(&self, renderer: &mut PrePassRenderer) -> bool {
        match &self.pre_pass_effect_configuration {
            Some(configuration) => {
                renderer.add_effect_configuration(configuration.clone());
                true
            }
            None => false,
        }
    }

    pub fn pre_pass_effect_configuration(&self) -> Option<&PrePassEffectConfiguration> {
        self.pre_pass_effect_configuration.as_ref()
    }

    pub fn dispose(&mut self, engine: &mut Engine) {
        self.dispose_textures(engine);
        if let Some(effect) = self.effect.take() {
            engine.release_effect(effect);
        }
        self.on_activate.clear();
        self.on_size_changed.clear();
        self.on_apply.clear();
        self.on_before_render.clear();
        self.on_after_render.clear();
        debug!("Disposed post process '{}'", self.name);
    }

    pub fn set_on_activate<F>(&mut self, mut callback: F)
    where
        F: FnMut(Option<&CameraSnapshot>, &mut EventState) + 'static,
    {
        if let Some(handle) = self.observers.activate.take() {
            self.on_activate.remove(handle);
        }
        self.observers.activate = Some(
            self.on_activate
                .add(move |camera, state| callback(camera.as_ref(), state)),
        );
    }

    pub fn set_on_size_changed<F>(&mut self, callback: F)
    where
        F: FnMut(&mut PostProcess, &mut EventState) + 'static,
    {
        if let Some(handle) = self.observers.size_changed.take() {
            self.on_size_changed.remove(handle);
        }
        self.observers.size_changed = Some(self.on_size_changed.add(callback));
    }

    pub fn set_on_apply<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Effect, &mut EventState) + 'static,
    {
        if let Some(handle) = self.observers.apply.take() {
            self.on_apply.remove(handle);
        }
        self.observers.apply = Some(self.on_apply.add(callback));
    }

    pub fn set_on_before_render<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Effect, &mut EventState) + 'static,
    {
        if let Some(handle) = self.observers.before_render.take() {
            self.on_before_render.remove(handle);
        }
        self.observers.before_render = Some(self.on_before_render.add(callback));
    }

    pub fn set_on_after_render<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Effect, &mut EventState) + 'static,
    {
        if let Some(handle) = self.observers.after_render.take() {
            self.on_after_render.remove(handle);
        }
        self.observers.after_render = Some(self.on_after_render.add(callback));
    }

    /// Settings shared by every post process kind
    pub fn serialize_common(&self, class_name: &str) -> serde_json::Value {
        serde_json::json!({
            "customType": format!("BABYLON.{}", class_name),
            "name": self.name,
            "uniqueId": self.unique_id,
            "options": self.options,
            "renderTargetSamplingMode": self.render_target_sampling_mode.as_u32(),
            "textureType": self.texture_type.as_u32(),
            "reusable": self.reusable,
            "fragmentUrl": self.fragment_url,
            "vertexUrl": self.vertex_url,
            "defines": self.defines,
            "autoClear": self.auto_clear,
            "alphaMode": self.alpha_mode.as_u32(),
            "enablePixelPerfectMode": self.enable_pixel_perfect_mode,
            "scaleMode": self.scale_mode.as_u32(),
            "alwaysForcePOT": self.always_force_pot,
            "samples": self.samples,
            "animations": self.animations,
        })
    }

    /// Restores the settings written by [`PostProcess::serialize_common`]
    pub fn parse_common(&mut self, value: &serde_json::Value) {
        let b = |key: &str| value.get(key).and_then(serde_json::Value::as_bool);
        let u = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as u32)
        };
        if let Some(v) = b("autoClear") {
            self.auto_clear = v;
        }
        if let Some(v) = u("alphaMode").and_then(AlphaMode::from_u32) {
            self.alpha_mode = v;
        }
        if let Some(v) = b("enablePixelPerfectMode") {
            self.enable_pixel_perfect_mode = v;
        }
        if let Some(v) = u("scaleMode").and_then(ScaleMode::from_u32) {
            self.scale_mode = v;
        }
        if let Some(v) = b("alwaysForcePOT") {
            self.always_force_pot = v;
        }
        if let Some(v) = u("samples") {
            self.set_samples(v);
        }
        if let Some(animations) = value
            .get("animations")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
        {
            self.animations = animations;
        }
    }
}

/// Common reading of the creation parameters stored by `serialize_common`
pub(crate) fn config_from_json(value: &serde_json::Value, fragment_url: &str) -> PostProcessConfig {
    let s = |key: &str| value.get(key).and_then(serde_json::Value::as_str);
    let mut config = PostProcessConfig::new(s("name").unwrap_or_default(), fragment_url);
    if let Some(options) = value
        .get("options")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
    {
        config.options = options;
    }
    if let Some(mode) = value
        .get("renderTargetSamplingMode")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| SamplingMode::from_u32(v as u32))
    {
        config.sampling_mode = mode;
    }
    if let Some(texture_type) = value
        .get("textureType")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| TextureType::from_u32(v as u32))
    {
        config.texture_type = texture_type;
    }
    config.reusable = value
        .get("reusable")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    config
}

/// Behaviour of every post process stored in a scene
///
/// Concrete post processes wrap a [`PostProcess`] and bind their own
/// uniforms in [`ScenePostProcess::bind`].
pub trait ScenePostProcess: Any {
    fn base(&self) -> &PostProcess;

    fn base_mut(&mut self) -> &mut PostProcess;

    fn class_name(&self) -> &'static str;

    /// Refreshes state derived from the scene before the chain activates
    fn prepare(&mut self, _engine: &mut Engine, _ctx: &PostProcessContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Writes the post process' own uniforms and textures
    fn bind(&mut self, _effect: &mut Effect, _ctx: &PostProcessContext<'_>) {}

    fn apply(&mut self, engine: &mut Engine, ctx: &PostProcessContext<'_>) -> Option<EffectKey> {
        let key = self.base_mut().apply(engine)?;
        if let Some(effect) = engine.get_effect_mut(key) {
            self.bind(effect, ctx);
        }
        Some(key)
    }

    fn is_ready(&self, engine: &Engine) -> bool {
        self.base().is_ready(engine)
    }

    fn serialize(&self) -> serde_json::Value {
        self.base().serialize_common(self.class_name())
    }

    fn dispose(&mut self, engine: &mut Engine) {
        self.base_mut().dispose(engine);
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl ScenePostProcess for PostProcess {
    fn base(&self) -> &PostProcess {
        self
    }

    fn base_mut(&mut self) -> &mut PostProcess {
        self
    }

    fn class_name(&self) -> &'static str {
        "PostProcess"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl std::fmt::Display for PostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Name: {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCaps, EngineOptions, HeadlessBackend};

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(200, 100)), EngineOptions::default())
    }

    fn pass(engine: &mut Engine) -> PostProcess {
        PostProcess::new(engine, PostProcessConfig::new("pass", "pass"))
    }

    #[test]
    fn test_activate_sizes_to_render_size() {
        let mut engine = engine();
        let mut post_process = pass(&mut engine);
        let target = post_process
            .activate(&mut engine, &PostProcessContext::default(), None, true)
            .unwrap();
        assert!(target.is_some());
        assert_eq!((post_process.width, post_process.height), (200, 100));
        assert_eq!(post_process.texel_size(), Vector2::new(1.0 / 200.0, 1.0 / 100.0));
        assert!(engine.is_pass_open());
    }

    #[test]
    fn test_textures_only_recreated_on_resize() {
        let mut engine = engine();
        let mut post_process = pass(&mut engine);
        let resized = std::rc::Rc::new(std::cell::Cell::new(0));
        let counter = resized.clone();
        post_process
            .on_size_changed
            .add(move |_, _| counter.set(counter.get() + 1));
        let ctx = PostProcessContext::default();
        let first = post_process.activate(&mut engine, &ctx, None, false).unwrap();
        let second = post_process.activate(&mut engine, &ctx, None, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(resized.get(), 1);

        post_process.mark_texture_dirty();
        let third = post_process.activate(&mut engine, &ctx, None, false).unwrap();
        assert_ne!(first, third);
        assert_eq!(resized.get(), 2);
    }

    #[test]
    fn test_activate_reports_the_frame_camera() {
        let mut engine = engine();
        let mut post_process = pass(&mut engine);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let record = seen.clone();
        post_process.set_on_activate(move |camera, _| record.borrow_mut().push(camera.copied()));

        post_process
            .activate(&mut engine, &PostProcessContext::default(), None, false)
            .unwrap();
        let mut camera = CameraSnapshot::default();
        camera.position.x = 4.0;
        let ctx = PostProcessContext {
            camera: Some(&camera),
            ..Default::default()
        };
        post_process.activate(&mut engine, &ctx, None, false).unwrap();
        assert_eq!(*seen.borrow(), vec![None, Some(camera)]);
    }

    #[test]
    fn test_reusable_ping_pong() {
        let mut engine = engine();
        let mut post_process = PostProcess::new(
            &mut engine,
            PostProcessConfig::new("pass", "pass").with_reusable(true),
        );
        let ctx = PostProcessContext::default();
        let first = post_process.activate(&mut engine, &ctx, None, false).unwrap();
        let second = post_process.activate(&mut engine, &ctx, None, false).unwrap();
        assert_eq!(post_process.textures.len(), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn test_pot_rounding_when_npot_unsupported() {
        let caps = EngineCaps {
            non_power_of_two_textures: false,
            ..Default::default()
        };
        let mut engine = Engine::new(
            Box::new(HeadlessBackend::with_caps(200, 100, caps)),
            EngineOptions::default(),
        );
        let mut post_process = PostProcess::new(
            &mut engine,
            PostProcessConfig::new("half", "pass").with_ratio(0.5),
        );
        post_process
            .activate(&mut engine, &PostProcessContext::default(), None, false)
            .unwrap();
        assert_eq!((post_process.width, post_process.height), (64, 32));

        post_process.always_force_pot = true;
        post_process.scale_mode = ScaleMode::Ceiling;
        post_process.mark_texture_dirty();
        post_process
            .activate(&mut engine, &PostProcessContext::default(), None, false)
            .unwrap();
        assert_eq!((post_process.width, post_process.height), (128, 64));
    }

    #[test]
    fn test_forced_output_is_used_as_target() {
        let mut engine = engine();
        let forced = engine
            .create_render_target_texture(Size::new(32, 16), &RenderTargetOptions::default())
            .unwrap();
        let mut post_process = pass(&mut engine);
        post_process.set_input_texture(Some(forced));
        let target = post_process
            .activate(&mut engine, &PostProcessContext::default(), None, false)
            .unwrap();
        assert_eq!(target, Some(forced));
        assert_eq!((post_process.width, post_process.height), (32, 16));
        assert!(post_process.textures.is_empty());
    }

    #[test]
    fn test_apply_binds_scale_and_input() {
        let mut engine = engine();
        let mut post_process = pass(&mut engine);
        let target = post_process
            .activate(&mut engine, &PostProcessContext::default(), None, true)
            .unwrap();
        let key = post_process.apply(&mut engine).unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(effect.texture("textureSampler"), target);
        assert!(effect.value("scale").is_some());
        assert!(post_process.is_supported(&engine));
    }

    #[test]
    fn test_set_on_apply_replaces_previous_observer() {
        let mut engine = engine();
        let mut post_process = pass(&mut engine);
        post_process.set_on_apply(|_, _| {});
        post_process.set_on_apply(|_, _| {});
        assert_eq!(post_process.on_apply.len(), 1);
    }

    #[test]
    fn test_dispose_releases_textures_and_effect() {
        let mut engine = engine();
        let mut post_process = pass(&mut engine);
        post_process
            .activate(&mut engine, &PostProcessContext::default(), None, true)
            .unwrap();
        engine.end_render_pass().unwrap();
        post_process.dispose(&mut engine);
        assert_eq!(engine.internal_texture_count(), 0);
        assert_eq!(engine.effect_count(), 0);
    }
}
