//! The engine: backend ownership, texture and effect caches, frame state

use std::collections::HashMap;

use log::{debug, error, info, warn};
use slotmap::SlotMap;

use crate::engine::backend::{
    DrawCall, DrawGeometry, DrawState, EngineCaps, GpuMeshHandle, GpuTextureHandle, MeshVertex,
    PassDesc, ProgramDesc, RenderBackend, TextureDesc, TextureDimension, TextureUpload,
};
use crate::engine::constants::{
    AddressMode, InternalTextureSource, SamplingMode, TextureFormat, TextureType,
};
use crate::error::{EngineError, Result};
use crate::materials::effect::{Effect, EffectCreationOptions, EffectKey};
use crate::maths::{self, Color4, Size, Viewport};
use crate::misc::environment_texture_tools;
use crate::misc::file_tools;
use crate::shaders::{generate_bindings, process, ProcessingOptions, ShaderStage, ShaderStore};
use crate::textures::internal_texture::{InternalTexture, TextureKey};

const CUBE_FACE_ORDER: [usize; 6] = [0, 3, 1, 4, 2, 5];

/// Engine construction options
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Render at the device pixel ratio instead of in logical pixels
    pub adapt_to_device_ratio: bool,
    pub device_pixel_ratio: f32,
    /// Explicit hardware scaling level, overriding the device ratio
    pub hardware_scaling_level: Option<f32>,
    pub max_texture_size: Option<u32>,
    pub texture_float_render: Option<bool>,
    /// Whether draws may write the stencil buffer
    pub stencil: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            adapt_to_device_ratio: false,
            device_pixel_ratio: 1.0,
            hardware_scaling_level: None,
            max_texture_size: None,
            texture_float_render: None,
            stencil: true,
        }
    }
}

impl EngineOptions {
    pub fn with_device_ratio(mut self, ratio: f32) -> Self {
        self.adapt_to_device_ratio = true;
        self.device_pixel_ratio = ratio;
        self
    }

    pub fn with_hardware_scaling_level(mut self, level: f32) -> Self {
        self.hardware_scaling_level = Some(level);
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = Some(size);
        self
    }

    pub fn with_texture_float_render(mut self, supported: bool) -> Self {
        self.texture_float_render = Some(supported);
        self
    }
}

/// Creation parameters of a render target texture
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetOptions {
    pub generate_mipmaps: bool,
    pub texture_type: TextureType,
    pub format: TextureFormat,
    pub sampling_mode: SamplingMode,
    pub generate_depth_buffer: bool,
    pub generate_stencil_buffer: bool,
    pub samples: u32,
}

impl Default for RenderTargetOptions {
    fn default() -> Self {
        Self {
            generate_mipmaps: false,
            texture_type: TextureType::UnsignedInt,
            format: TextureFormat::Rgba,
            sampling_mode: SamplingMode::Trilinear,
            generate_depth_buffer: true,
            generate_stencil_buffer: false,
            samples: 1,
        }
    }
}

/// Targets and clears of one render pass
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassOptions {
    pub label: String,
    /// Color attachments; empty renders to the backbuffer
    pub targets: Vec<TextureKey>,
    /// Cube face or depth slice of layered targets
    pub layer: u32,
    pub clear_color: Option<Color4>,
    pub clear_depth: bool,
    pub depth_stencil: bool,
    /// Normalised viewport, converted to pixels of the target
    pub viewport: Option<Viewport>,
}

impl RenderPassOptions {
    pub fn backbuffer(label: &str) -> Self {
        Self {
            label: label.to_string(),
            targets: Vec::new(),
            layer: 0,
            clear_color: None,
            clear_depth: true,
            depth_stencil: true,
            viewport: None,
        }
    }

    pub fn texture(label: &str, target: TextureKey) -> Self {
        Self {
            targets: vec![target],
            ..Self::backbuffer(label)
        }
    }

    pub fn with_clear_color(mut self, color: Option<Color4>) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_viewport(mut self, viewport: Option<Viewport>) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    pub fn without_depth_clear(mut self) -> Self {
        self.clear_depth = false;
        self
    }
}

/// Owns the render backend and every GPU-side resource record
pub struct Engine {
    backend: Box<dyn RenderBackend>,
    options: EngineOptions,
    caps: EngineCaps,
    shader_store: ShaderStore,
    textures: SlotMap<TextureKey, InternalTexture>,
    texture_cache: HashMap<String, TextureKey>,
    effects: SlotMap<EffectKey, Effect>,
    effect_cache: HashMap<String, EffectKey>,
    fallback_textures: HashMap<TextureDimension, GpuTextureHandle>,
    hardware_scaling_level: f32,
    frame_id: u64,
    stencil_buffer: bool,
    pass_open: bool,
    current_render_target: Option<TextureKey>,
}

impl Engine {
    pub fn new(backend: Box<dyn RenderBackend>, options: EngineOptions) -> Self {
        let mut caps = backend.caps().clone();
        if let Some(max) = options.max_texture_size {
            caps.max_texture_size = caps.max_texture_size.min(max);
            caps.max_render_texture_size = caps.max_render_texture_size.min(max);
            caps.max_cube_texture_size = caps.max_cube_texture_size.min(max);
        }
        if let Some(float_render) = options.texture_float_render {
            caps.texture_float_render = caps.texture_float_render && float_render;
        }
        let hardware_scaling_level = options.hardware_scaling_level.unwrap_or(
            if options.adapt_to_device_ratio && options.device_pixel_ratio > 0.0 {
                1.0 / options.device_pixel_ratio
            } else {
                1.0
            },
        );
        info!(
            "Engine created on '{}' backend (max texture {}, float render {})",
            backend.name(),
            caps.max_texture_size,
            caps.texture_float_render
        );
        Self {
            backend,
            options,
            caps,
            shader_store: ShaderStore::with_builtin_shaders(),
            textures: SlotMap::with_key(),
            texture_cache: HashMap::new(),
            effects: SlotMap::with_key(),
            effect_cache: HashMap::new(),
            fallback_textures: HashMap::new(),
            hardware_scaling_level,
            frame_id: 0,
            stencil_buffer: false,
            pass_open: false,
            current_render_target: None,
        }
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    pub fn caps(&self) -> &EngineCaps {
        &self.caps
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn shader_store(&self) -> &ShaderStore {
        &self.shader_store
    }

    pub fn shader_store_mut(&mut self) -> &mut ShaderStore {
        &mut self.shader_store
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    // ---- Sizing -----------------------------------------------------------

    pub fn hardware_scaling_level(&self) -> f32 {
        self.hardware_scaling_level
    }

    /// Changes the scaling level; takes effect on the next [`Engine::resize`]
    pub fn set_hardware_scaling_level(&mut self, level: f32) {
        if level > 0.0 {
            self.hardware_scaling_level = level;
        }
    }

    /// Sets the backbuffer size directly; returns whether it changed
    pub fn set_size(&mut self, width: u32, height: u32) -> bool {
        if self.backend.backbuffer_size() == (width, height) {
            return false;
        }
        self.backend.resize(width, height);
        debug!("Engine resized to {}x{}", width, height);
        true
    }

    /// Resizes from a window size in physical pixels, applying the scaling level
    pub fn resize(&mut self, window_width: u32, window_height: u32) -> bool {
        let width = (window_width as f32 / self.hardware_scaling_level).max(1.0) as u32;
        let height = (window_height as f32 / self.hardware_scaling_level).max(1.0) as u32;
        self.set_size(width, height)
    }

    pub fn render_width(&self, use_screen: bool) -> u32 {
        self.render_size(use_screen).width
    }

    pub fn render_height(&self, use_screen: bool) -> u32 {
        self.render_size(use_screen).height
    }

    fn render_size(&self, use_screen: bool) -> Size {
        if !use_screen {
            if let Some(texture) = self
                .current_render_target
                .and_then(|key| self.textures.get(key))
            {
                return Size::new(texture.width, texture.height);
            }
        }
        let (width, height) = self.backend.backbuffer_size();
        Size::new(width, height)
    }

    pub fn aspect_ratio(&self) -> f32 {
        let size = self.render_size(true);
        size.width as f32 / size.height.max(1) as f32
    }

    // ---- Frames and passes ------------------------------------------------

    pub fn begin_frame(&mut self) {
        self.frame_id += 1;
    }

    pub fn end_frame(&mut self) -> Result<()> {
        self.end_render_pass()?;
        self.backend.present()
    }

    pub fn stencil_buffer(&self) -> bool {
        self.stencil_buffer
    }

    pub fn set_stencil_buffer(&mut self, enabled: bool) {
        self.stencil_buffer = enabled && self.options.stencil;
    }

    pub fn current_render_target(&self) -> Option<TextureKey> {
        self.current_render_target
    }

    /// Opens a render pass, closing any pass still open
    pub fn begin_render_pass(&mut self, options: &RenderPassOptions) -> Result<()> {
        self.end_render_pass()?;
        let mut targets = Vec::with_capacity(options.targets.len());
        for key in &options.targets {
            let texture = self
                .textures
                .get(*key)
                .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
            let gpu = texture
                .gpu
                .ok_or_else(|| EngineError::backend(format!("render target '{}' has no GPU texture", texture.url)))?;
            targets.push(gpu);
        }
        self.current_render_target = options.targets.first().copied();
        let size = self.render_size(false);
        let pass = PassDesc {
            label: options.label.clone(),
            targets,
            layer: options.layer,
            clear_color: options.clear_color,
            clear_depth: options.clear_depth,
            depth_stencil: options.depth_stencil,
            viewport: options
                .viewport
                .map(|viewport| viewport.to_global(size.width, size.height)),
        };
        self.backend.begin_pass(&pass)?;
        self.pass_open = true;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        if !self.pass_open {
            return Ok(());
        }
        self.pass_open = false;
        self.current_render_target = None;
        self.backend.end_pass()
    }

    pub fn is_pass_open(&self) -> bool {
        self.pass_open
    }

    /// Draws with an effect, resolving its textures to GPU handles
    ///
    /// Draws with an effect that is not compiled are skipped.
    pub fn draw_effect(
        &mut self,
        effect: EffectKey,
        geometry: DrawGeometry,
        state: DrawState,
    ) -> Result<()> {
        let effect = self
            .effects
            .get(effect)
            .ok_or(EngineError::UnknownHandle { kind: "effect" })?;
        let Some(program) = effect.program else {
            debug!("Skipping draw with effect '{}' (not ready)", effect.name);
            return Ok(());
        };
        let uniforms = effect.uniform_block();
        let bindings: Vec<(TextureDimension, Option<TextureKey>)> = effect
            .samplers()
            .iter()
            .map(|sampler| (sampler.dimension, effect.texture(&sampler.name)))
            .collect();

        let mut textures = Vec::with_capacity(bindings.len());
        for (dimension, key) in bindings {
            let bound = key
                .and_then(|key| self.textures.get(key))
                .filter(|texture| texture.is_ready && texture.dimension() == dimension)
                .and_then(|texture| texture.gpu);
            let gpu = match bound {
                Some(gpu) => gpu,
                None => self.fallback_texture(dimension)?,
            };
            textures.push(gpu);
        }

        let mut state = state;
        state.stencil_write = state.stencil_write || self.stencil_buffer;
        self.backend.draw(&DrawCall {
            program,
            uniforms,
            textures,
            geometry,
            state,
        })
    }

    fn fallback_texture(&mut self, dimension: TextureDimension) -> Result<GpuTextureHandle> {
        if let Some(texture) = self.fallback_textures.get(&dimension) {
            return Ok(*texture);
        }
        let desc = TextureDesc {
            label: format!("fallback {:?}", dimension),
            dimension,
            mip_levels: 1,
            ..Default::default()
        };
        let texture = self.backend.create_texture(&desc)?;
        let white = [255u8; 4];
        for layer in 0..desc.layers() {
            self.backend.upload_texture(
                texture,
                TextureUpload {
                    level: 0,
                    layer,
                    width: 1,
                    height: 1,
                    depth: 1,
                    data: &white,
                },
            )?;
        }
        self.fallback_textures.insert(dimension, texture);
        Ok(texture)
    }

    pub fn create_mesh_buffers(
        &mut self,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> Result<GpuMeshHandle> {
        self.backend.create_mesh(vertices, indices)
    }

    pub fn release_mesh_buffers(&mut self, mesh: GpuMeshHandle) {
        self.backend.release_mesh(mesh);
    }

    /// Reads back RGBA texels of a texture, or of the last presented frame
    pub fn read_pixels(&mut self, texture: Option<TextureKey>) -> Result<Vec<u8>> {
        let gpu = match texture {
            Some(key) => Some(
                self.textures
                    .get(key)
                    .and_then(|texture| texture.gpu)
                    .ok_or(EngineError::UnknownHandle { kind: "texture" })?,
            ),
            None => None,
        };
        self.backend.read_pixels(gpu)
    }

    // ---- Internal textures ------------------------------------------------

    pub fn internal_texture(&self, key: TextureKey) -> Option<&InternalTexture> {
        self.textures.get(key)
    }

    pub fn internal_texture_mut(&mut self, key: TextureKey) -> Option<&mut InternalTexture> {
        self.textures.get_mut(key)
    }

    pub fn internal_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn insert_texture(&mut self, mut texture: InternalTexture) -> Result<TextureKey> {
        texture.allocate(self.backend.as_mut())?;
        let key = self.textures.insert(texture);
        if let Some(texture) = self.textures.get_mut(key) {
            let mut observable = std::mem::take(&mut texture.on_loaded_observable);
            observable.notify(texture);
            texture.on_loaded_observable = observable;
        }
        Ok(key)
    }

    fn cached_texture(&mut self, cache_key: &str) -> Option<TextureKey> {
        let key = *self.texture_cache.get(cache_key)?;
        let texture = self.textures.get_mut(key)?;
        texture.increment_references();
        Some(key)
    }

    /// Fits a texture size to the device limits and power-of-two support
    fn fit_texture_size(&self, width: u32, height: u32, max: u32) -> (u32, u32) {
        let fit = |value: u32| {
            let value = if self.caps.non_power_of_two_textures {
                value
            } else {
                maths::nearest_pot(value)
            };
            value.clamp(1, max)
        };
        (fit(width), fit(height))
    }

    /// Creates (or reuses) a texture loaded from an image file
    pub fn create_texture(
        &mut self,
        url: &str,
        no_mipmap: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
    ) -> Result<TextureKey> {
        let cache_key = format!("{}|{}|{}|{}", url, no_mipmap, invert_y, sampling_mode.as_u32());
        if let Some(key) = self.cached_texture(&cache_key) {
            return Ok(key);
        }
        let image = file_tools::load_image(url, invert_y)?;
        let key = self.create_texture_from_image(
            InternalTextureSource::Url,
            url,
            image,
            no_mipmap,
            invert_y,
            sampling_mode,
        )?;
        self.texture_cache.insert(cache_key, key);
        Ok(key)
    }

    /// Creates a texture from encoded image bytes held in memory
    pub fn create_texture_from_buffer(
        &mut self,
        name: &str,
        bytes: &[u8],
        no_mipmap: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
    ) -> Result<TextureKey> {
        let image = file_tools::decode_image(bytes, invert_y)?;
        self.create_texture_from_image(
            InternalTextureSource::Raw,
            name,
            image,
            no_mipmap,
            invert_y,
            sampling_mode,
        )
    }

    fn create_texture_from_image(
        &mut self,
        source: InternalTextureSource,
        url: &str,
        image: file_tools::DecodedImage,
        no_mipmap: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
    ) -> Result<TextureKey> {
        let (width, height) =
            self.fit_texture_size(image.width, image.height, self.caps.max_texture_size);
        let image = file_tools::resize_rgba(&image, width, height)?;

        let mut texture = InternalTexture::new(source);
        texture.url = url.to_string();
        texture.extension = file_tools::extension_of(url);
        texture.invert_y = invert_y;
        texture.generate_mipmaps = !no_mipmap;
        texture.sampling_mode = sampling_mode;
        texture.update_size(width, height, 1);
        texture.buffer = Some(image.data);
        let key = self.insert_texture(texture)?;
        debug!("Created texture '{}' ({}x{})", url, width, height);
        Ok(key)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_raw_texture(
        &mut self,
        data: Option<&[u8]>,
        width: u32,
        height: u32,
        format: TextureFormat,
        generate_mipmaps: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
        texture_type: TextureType,
    ) -> Result<TextureKey> {
        let mut texture = InternalTexture::new(InternalTextureSource::Raw);
        texture.format = format;
        texture.texture_type = texture_type;
        texture.generate_mipmaps = generate_mipmaps;
        texture.invert_y = invert_y;
        texture.sampling_mode = sampling_mode;
        texture.update_size(width, height, 1);
        texture.buffer = data.map(|data| {
            if invert_y {
                flip_rows(data, height)
            } else {
                data.to_vec()
            }
        });
        self.insert_texture(texture)
    }

    /// Replaces the texels of a raw texture
    pub fn update_raw_texture(&mut self, key: TextureKey, data: &[u8]) -> Result<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        let data = if texture.invert_y {
            flip_rows(data, texture.height * texture.depth.max(1))
        } else {
            data.to_vec()
        };
        texture.upload(self.backend.as_mut(), 0, 0, &data)?;
        if texture.generate_mipmaps {
            if let Some(gpu) = texture.gpu {
                self.backend.generate_mipmaps(gpu)?;
            }
        }
        texture.buffer = Some(data);
        texture.is_ready = true;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_raw_cube_texture(
        &mut self,
        faces: Option<Vec<Vec<u8>>>,
        size: u32,
        format: TextureFormat,
        texture_type: TextureType,
        generate_mipmaps: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
    ) -> Result<TextureKey> {
        let mut texture = InternalTexture::new(InternalTextureSource::CubeRaw);
        texture.is_cube = true;
        texture.format = format;
        texture.texture_type = texture_type;
        texture.generate_mipmaps = generate_mipmaps;
        texture.invert_y = invert_y;
        texture.sampling_mode = sampling_mode;
        texture.update_size(size, size, 1);
        if let Some(faces) = faces {
            if faces.len() != 6 {
                return Err(EngineError::backend(format!(
                    "cube textures need 6 faces, got {}",
                    faces.len()
                )));
            }
            texture.buffer_views = vec![faces];
        }
        self.insert_texture(texture)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_raw_3d_texture(
        &mut self,
        data: Option<&[u8]>,
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        generate_mipmaps: bool,
        invert_y: bool,
        sampling_mode: SamplingMode,
        texture_type: TextureType,
    ) -> Result<TextureKey> {
        if !self.caps.texture_3d {
            return Err(EngineError::backend("3D textures are not supported"));
        }
        let mut texture = InternalTexture::new(InternalTextureSource::Raw3D);
        texture.is_3d = true;
        texture.format = format;
        texture.texture_type = texture_type;
        texture.generate_mipmaps = generate_mipmaps;
        texture.invert_y = invert_y;
        texture.sampling_mode = sampling_mode;
        texture.update_size(width, height, depth);
        texture.buffer = data.map(<[u8]>::to_vec);
        self.insert_texture(texture)
    }

    /// Creates a cube texture from six face images, or from a `.env` file
    pub fn create_cube_texture(
        &mut self,
        root_url: &str,
        files: &[String],
        no_mipmap: bool,
        format: Option<TextureFormat>,
    ) -> Result<TextureKey> {
        if file_tools::extension_of(root_url) == ".env" {
            return self.create_prefiltered_cube_texture(root_url, 0.8, 0.0);
        }
        if let Some(key) = self.cached_texture(root_url) {
            return Ok(key);
        }
        if files.len() != 6 {
            return Err(EngineError::TextureLoad {
                url: root_url.to_string(),
                reason: format!("cube textures need 6 files, got {}", files.len()),
            });
        }
        // Files come as +x +y +z -x -y -z, layers as +x -x +y -y +z -z
        let files: Vec<String> = CUBE_FACE_ORDER.iter().map(|&i| files[i].clone()).collect();
        let images = files
            .iter()
            .map(|file| file_tools::load_image(file, false))
            .collect::<Result<Vec<_>>>()?;
        let size = images
            .iter()
            .map(|image| image.width.max(image.height))
            .max()
            .unwrap_or(1);
        let (size, _) = self.fit_texture_size(size, size, self.caps.max_cube_texture_size);
        let faces = images
            .iter()
            .map(|image| file_tools::resize_rgba(image, size, size).map(|image| image.data))
            .collect::<Result<Vec<_>>>()?;

        let mut texture = InternalTexture::new(InternalTextureSource::Cube);
        texture.is_cube = true;
        texture.url = root_url.to_string();
        texture.files = files;
        texture.format = format.unwrap_or(TextureFormat::Rgba);
        texture.generate_mipmaps = !no_mipmap;
        texture.update_size(size, size, 1);
        texture.buffer_views = vec![faces];
        let key = self.insert_texture(texture)?;
        self.texture_cache.insert(root_url.to_string(), key);
        debug!("Created cube texture '{}' ({}px)", root_url, size);
        Ok(key)
    }

    /// Creates a cube texture holding prefiltered `.env` data
    pub fn create_prefiltered_cube_texture(
        &mut self,
        root_url: &str,
        lod_scale: f32,
        lod_offset: f32,
    ) -> Result<TextureKey> {
        if let Some(key) = self.cached_texture(root_url) {
            return Ok(key);
        }
        let data = file_tools::load_file(root_url)?;
        let key = self.create_prefiltered_cube_texture_from_data(root_url, &data, lod_scale, lod_offset)?;
        self.texture_cache.insert(root_url.to_string(), key);
        Ok(key)
    }

    /// Creates a prefiltered cube texture from `.env` bytes held in memory
    pub fn create_prefiltered_cube_texture_from_data(
        &mut self,
        name: &str,
        data: &[u8],
        lod_scale: f32,
        lod_offset: f32,
    ) -> Result<TextureKey> {
        let info = environment_texture_tools::get_env_info(data)?;
        let mut texture = InternalTexture::new(InternalTextureSource::CubePrefiltered);
        texture.is_cube = true;
        texture.url = name.to_string();
        texture.generate_mipmaps = true;
        texture.update_size(info.width, info.width, 1);
        texture.set_lod_generation(lod_scale, lod_offset);
        let key = self.textures.insert(texture);
        let result = environment_texture_tools::upload_env_levels(self, key, data, &info)
            .and_then(|_| environment_texture_tools::upload_env_spherical(self, key, &info));
        if let Err(err) = result {
            if let Some(mut texture) = self.textures.remove(key) {
                texture.dispose(self.backend.as_mut());
            }
            return Err(err);
        }
        debug!("Created prefiltered cube texture '{}'", name);
        Ok(key)
    }

    /// Uploads `[mip][face]` texels into a cube texture, recreating it
    pub fn upload_cube_levels(&mut self, key: TextureKey, levels: Vec<Vec<Vec<u8>>>) -> Result<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        texture.buffer_views = levels;
        texture.allocate(self.backend.as_mut())
    }

    pub fn create_render_target_texture(
        &mut self,
        size: Size,
        options: &RenderTargetOptions,
    ) -> Result<TextureKey> {
        let mut texture = InternalTexture::new(InternalTextureSource::RenderTarget);
        self.configure_render_target(&mut texture, size, options);
        let key = self.insert_texture(texture)?;
        debug!(
            "Created render target {}x{} ({:?})",
            size.width, size.height, options.texture_type
        );
        Ok(key)
    }

    /// Creates `count` same-sized targets used together as one MRT
    pub fn create_multiple_render_target(
        &mut self,
        size: Size,
        types: &[TextureType],
        options: &RenderTargetOptions,
    ) -> Result<Vec<TextureKey>> {
        let count = (types.len() as u32).min(self.caps.max_draw_buffers);
        let mut keys = Vec::with_capacity(count as usize);
        for texture_type in types.iter().take(count as usize) {
            let mut texture = InternalTexture::new(InternalTextureSource::MultiRenderTarget);
            let options = RenderTargetOptions {
                texture_type: *texture_type,
                ..options.clone()
            };
            self.configure_render_target(&mut texture, size, &options);
            keys.push(self.insert_texture(texture)?);
        }
        Ok(keys)
    }

    fn configure_render_target(
        &self,
        texture: &mut InternalTexture,
        size: Size,
        options: &RenderTargetOptions,
    ) {
        let mut texture_type = options.texture_type;
        if texture_type == TextureType::Float && !self.caps.texture_float_render {
            warn!("Float render targets are not supported, falling back to half float");
            texture_type = TextureType::HalfFloat;
        }
        if texture_type == TextureType::HalfFloat && !self.caps.texture_half_float_render {
            warn!("Half float render targets are not supported, falling back to unsigned byte");
            texture_type = TextureType::UnsignedInt;
        }
        let max = self.caps.max_render_texture_size;
        texture.render_target = true;
        texture.texture_type = texture_type;
        texture.format = options.format;
        texture.generate_mipmaps = options.generate_mipmaps;
        texture.sampling_mode = options.sampling_mode;
        texture.samples = options.samples.clamp(1, self.caps.max_samples.max(1));
        texture.generate_depth_buffer = options.generate_depth_buffer;
        texture.generate_stencil_buffer = options.generate_stencil_buffer;
        texture.cached_wrap_u = Some(AddressMode::Clamp);
        texture.cached_wrap_v = Some(AddressMode::Clamp);
        texture.cached_wrap_r = Some(AddressMode::Clamp);
        texture.update_size(size.width.clamp(1, max), size.height.clamp(1, max), 1);
    }

    /// Changes the MSAA sample count of a render target; returns the applied count
    pub fn update_render_target_samples(&mut self, key: TextureKey, samples: u32) -> Result<u32> {
        let max = self.caps.max_samples.max(1);
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        let samples = samples.clamp(1, max);
        if texture.samples != samples {
            texture.samples = samples;
            texture.allocate(self.backend.as_mut())?;
        }
        Ok(samples)
    }

    /// Recreates the GPU resource of a texture from its data source
    pub fn rebuild_texture(&mut self, key: TextureKey) -> Result<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        texture.rebuild(self.backend.as_mut())
    }

    /// Rebuilds every texture and effect, as after a device loss
    pub fn rebuild(&mut self) -> Result<()> {
        let keys: Vec<TextureKey> = self.textures.keys().collect();
        for key in keys {
            self.rebuild_texture(key)?;
        }
        self.fallback_textures.clear();
        let keys: Vec<EffectKey> = self.effects.keys().collect();
        for key in keys {
            if let Some(program) = self.effects.get_mut(key).and_then(|e| e.program.take()) {
                self.backend.release_program(program);
            }
            self.compile_effect(key);
        }
        info!("Engine resources rebuilt");
        Ok(())
    }

    /// Moves `source` into `target`, releasing `source`
    pub fn swap_textures(&mut self, source: TextureKey, target: TextureKey) -> Result<()> {
        let Some([source_texture, target_texture]) =
            self.textures.get_disjoint_mut([source, target])
        else {
            return Err(EngineError::UnknownHandle { kind: "texture" });
        };
        source_texture.swap_and_die(target_texture, self.backend.as_mut());
        self.textures.remove(source);
        self.texture_cache.retain(|_, key| *key != source);
        Ok(())
    }

    /// Drops a reference; the GPU texture is freed when none remain
    pub fn release_internal_texture(&mut self, key: TextureKey) {
        let Some(texture) = self.textures.get_mut(key) else {
            return;
        };
        if texture.dispose(self.backend.as_mut()) {
            self.textures.remove(key);
            self.texture_cache.retain(|_, cached| *cached != key);
        }
    }

    pub fn update_texture_sampling_mode(
        &mut self,
        sampling_mode: SamplingMode,
        key: TextureKey,
    ) -> Result<()> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        if texture.sampling_mode == sampling_mode {
            return Ok(());
        }
        texture.sampling_mode = sampling_mode;
        if let Some(gpu) = texture.gpu {
            self.backend.update_sampler(gpu, &texture.sampler_desc())?;
        }
        Ok(())
    }

    /// Applies wrap modes and anisotropy, touching the GPU only on change
    pub fn update_texture_wrapping(
        &mut self,
        key: TextureKey,
        wrap_u: AddressMode,
        wrap_v: AddressMode,
        wrap_r: AddressMode,
        anisotropic_filtering_level: u32,
    ) -> Result<()> {
        let max_anisotropy = self.caps.max_anisotropy.max(1);
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        let anisotropy = anisotropic_filtering_level.clamp(1, max_anisotropy);
        let changed = texture.cached_wrap_u != Some(wrap_u)
            || texture.cached_wrap_v != Some(wrap_v)
            || (texture.is_3d || texture.is_cube) && texture.cached_wrap_r != Some(wrap_r)
            || texture.cached_anisotropic_filtering_level != Some(anisotropy);
        if !changed {
            return Ok(());
        }
        texture.cached_wrap_u = Some(wrap_u);
        texture.cached_wrap_v = Some(wrap_v);
        texture.cached_wrap_r = Some(wrap_r);
        texture.cached_anisotropic_filtering_level = Some(anisotropy);
        if let Some(gpu) = texture.gpu {
            self.backend.update_sampler(gpu, &texture.sampler_desc())?;
        }
        Ok(())
    }

    // ---- Effects ------------------------------------------------------------

    /// Returns the cached effect for these options, compiling it when new
    ///
    /// Compilation failures are kept on the effect (see
    /// [`Effect::compilation_error`]) and leave it not ready.
    pub fn create_effect(&mut self, options: EffectCreationOptions) -> EffectKey {
        let cache_key = options.cache_key();
        if let Some(key) = self.effect_cache.get(&cache_key).copied() {
            if let Some(effect) = self.effects.get_mut(key) {
                effect.references += 1;
                return key;
            }
        }
        let key = self.effects.insert(Effect::new(&options));
        self.effect_cache.insert(cache_key, key);
        self.compile_effect(key);
        key
    }

    fn compile_effect(&mut self, key: EffectKey) {
        let Some(effect) = self.effects.get(key) else {
            return;
        };
        let result = match self.build_program(effect) {
            Ok(desc) => self.backend.compile_program(&desc),
            Err(err) => Err(err),
        };
        let Some(effect) = self.effects.get_mut(key) else {
            return;
        };
        match result {
            Ok(program) => {
                effect.program = Some(program);
                effect.compilation_error = None;
                debug!("Compiled effect '{}'", effect.name);
                let mut observable = std::mem::take(&mut effect.on_compiled);
                observable.notify(effect);
                effect.on_compiled = observable;
            }
            Err(err) => {
                error!("Unable to compile effect '{}': {}", effect.name, err);
                effect.compilation_error = Some(err.to_string());
                let mut observable = std::mem::take(&mut effect.on_error);
                observable.notify(effect);
                effect.on_error = observable;
            }
        }
    }

    /// Preprocesses both stages and joins them into one WGSL module
    fn build_program(&self, effect: &Effect) -> Result<ProgramDesc> {
        let includes = |name: &str| self.shader_store.include(name);
        let vertex_name = format!("{}.vertex", effect.vertex_name);
        let fragment_name = format!("{}.fragment", effect.fragment_name);
        let vertex = process(
            self.shader_store
                .get(ShaderStage::Vertex, &effect.vertex_name)?,
            &ProcessingOptions {
                source_name: &vertex_name,
                defines: &effect.defines,
                index_parameters: &effect.index_parameters,
                includes: &includes,
            },
        )?;
        let fragment = process(
            self.shader_store
                .get(ShaderStage::Fragment, &effect.fragment_name)?,
            &ProcessingOptions {
                source_name: &fragment_name,
                defines: &effect.defines,
                index_parameters: &effect.index_parameters,
                includes: &includes,
            },
        )?;

        let mut constants = std::collections::BTreeMap::new();
        for (name, value) in vertex.numeric_defines().chain(fragment.numeric_defines()) {
            constants.insert(name, value);
        }
        let mut source = String::new();
        for (name, value) in constants {
            source.push_str(&format!("const {} = {};\n", name, value));
        }
        source.push('\n');
        source.push_str(&generate_bindings(effect.layout(), effect.samplers()));
        source.push('\n');
        source.push_str(&vertex.code);
        source.push('\n');
        source.push_str(&fragment.code);

        Ok(ProgramDesc {
            name: effect.name.clone(),
            source,
            uniform_block_size: effect.layout().size,
            samplers: effect
                .samplers()
                .iter()
                .map(|sampler| (sampler.name.clone(), sampler.dimension))
                .collect(),
            vertex_input: effect.vertex_input,
        })
    }

    pub fn get_effect(&self, key: EffectKey) -> Option<&Effect> {
        self.effects.get(key)
    }

    pub fn get_effect_mut(&mut self, key: EffectKey) -> Option<&mut Effect> {
        self.effects.get_mut(key)
    }

    pub fn is_effect_ready(&self, key: EffectKey) -> bool {
        self.effects.get(key).is_some_and(Effect::is_ready)
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Drops a reference; the program is released when none remain
    pub fn release_effect(&mut self, key: EffectKey) {
        let Some(effect) = self.effects.get_mut(key) else {
            return;
        };
        effect.references = effect.references.saturating_sub(1);
        if effect.references > 0 {
            return;
        }
        if let Some(effect) = self.effects.remove(key) {
            if let Some(program) = effect.program {
                self.backend.release_program(program);
            }
            self.effect_cache.remove(&effect.cache_key);
            debug!("Released effect '{}'", effect.name);
        }
    }

    /// Releases every resource still held
    pub fn dispose(&mut self) {
        let _ = self.end_render_pass();
        for (_, mut texture) in self.textures.drain() {
            texture.references = 1;
            texture.dispose(self.backend.as_mut());
        }
        for (_, effect) in self.effects.drain() {
            if let Some(program) = effect.program {
                self.backend.release_program(program);
            }
        }
        for (_, texture) in self.fallback_textures.drain() {
            self.backend.release_texture(texture);
        }
        self.texture_cache.clear();
        self.effect_cache.clear();
        info!("Engine disposed");
    }
}

/// Reverses row order of a tightly packed image
fn flip_rows(data: &[u8], rows: u32) -> Vec<u8> {
    if rows == 0 || data.is_empty() {
        return data.to_vec();
    }
    let row_bytes = data.len() / rows as usize;
    if row_bytes == 0 {
        return data.to_vec();
    }
    data.chunks(row_bytes).rev().flatten().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::headless::HeadlessBackend;
    use crate::shaders::{SamplerDecl, UniformDecl, UniformType};

    fn engine() -> (Engine, crate::engine::headless::CommandLog) {
        let backend = HeadlessBackend::new(320, 240);
        let log = backend.log();
        (Engine::new(Box::new(backend), EngineOptions::default()), log)
    }

    fn pass_options() -> EffectCreationOptions {
        EffectCreationOptions::new("postprocess", "pass")
            .with_uniforms(vec![UniformDecl::new("scale", UniformType::Vec2)])
            .with_samplers(vec![SamplerDecl::new("textureSampler")])
    }

    #[test]
    fn test_effect_cache_shares_and_releases() {
        let (mut engine, log) = engine();
        let first = engine.create_effect(pass_options());
        let second = engine.create_effect(pass_options());
        assert_eq!(first, second);
        assert!(engine.is_effect_ready(first));
        assert_eq!(log.compiled_programs().len(), 1);

        engine.release_effect(first);
        assert!(engine.get_effect(first).is_some());
        engine.release_effect(first);
        assert!(engine.get_effect(first).is_none());
        assert_eq!(log.live_programs(), 0);
    }

    #[test]
    fn test_effect_errors_are_kept() {
        let (mut engine, _) = engine();
        let key = engine.create_effect(EffectCreationOptions::new("postprocess", "missing"));
        assert!(!engine.is_effect_ready(key));
        assert!(engine
            .get_effect(key)
            .and_then(Effect::compilation_error)
            .is_some_and(|message| message.contains("missing")));
    }

    #[test]
    fn test_numeric_defines_become_constants() {
        let (engine, _) = engine();
        let mut options = pass_options();
        options.defines = "#define KERNEL 3\n#define FLAG\n".to_string();
        let effect = Effect::new(&options);
        let desc = engine.build_program(&effect).unwrap();
        assert!(desc.source.contains("const KERNEL = 3;"));
        assert!(!desc.source.contains("const FLAG"));
        assert!(desc.source.contains("var<uniform> uniforms: Uniforms;"));
    }

    #[test]
    fn test_raw_texture_references() {
        let (mut engine, log) = engine();
        let key = engine
            .create_raw_texture(
                Some(&[0; 16]),
                2,
                2,
                TextureFormat::Rgba,
                false,
                false,
                SamplingMode::Nearest,
                TextureType::UnsignedInt,
            )
            .unwrap();
        engine.internal_texture_mut(key).unwrap().increment_references();
        engine.release_internal_texture(key);
        assert!(engine.internal_texture(key).is_some());
        engine.release_internal_texture(key);
        assert!(engine.internal_texture(key).is_none());
        assert_eq!(log.live_textures(), 0);
    }

    #[test]
    fn test_draw_binds_fallback_for_missing_texture() {
        let (mut engine, log) = engine();
        let effect = engine.create_effect(pass_options());
        engine
            .begin_render_pass(&RenderPassOptions::backbuffer("main"))
            .unwrap();
        engine
            .draw_effect(
                effect,
                DrawGeometry::FullscreenTriangle,
                DrawState::fullscreen(Default::default()),
            )
            .unwrap();
        engine.end_frame().unwrap();
        let draws = log.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].textures.len(), 1);
        assert_eq!(log.presents(), 1);
    }

    #[test]
    fn test_render_target_float_fallback() {
        let backend = HeadlessBackend::new(64, 64);
        let mut engine = Engine::new(
            Box::new(backend),
            EngineOptions::default().with_texture_float_render(false),
        );
        let key = engine
            .create_render_target_texture(
                Size::new(32, 16),
                &RenderTargetOptions {
                    texture_type: TextureType::Float,
                    ..Default::default()
                },
            )
            .unwrap();
        let texture = engine.internal_texture(key).unwrap();
        assert_eq!(texture.texture_type, TextureType::HalfFloat);
        assert_eq!((texture.width, texture.height), (32, 16));
        assert_eq!(engine.render_width(false), 64);
    }

    #[test]
    fn test_render_size_follows_bound_target() {
        let (mut engine, _) = engine();
        let key = engine
            .create_render_target_texture(Size::new(100, 50), &RenderTargetOptions::default())
            .unwrap();
        engine
            .begin_render_pass(&RenderPassOptions::texture("rt", key))
            .unwrap();
        assert_eq!(engine.render_width(false), 100);
        assert_eq!(engine.render_width(true), 320);
        engine.end_render_pass().unwrap();
        assert_eq!(engine.render_height(false), 240);
    }

    #[test]
    fn test_hardware_scaling_resize() {
        let (mut engine, _) = engine();
        engine.set_hardware_scaling_level(2.0);
        assert!(engine.resize(800, 600));
        assert_eq!(engine.render_width(true), 400);
        assert!(!engine.set_size(400, 300));
    }

    #[test]
    fn test_wrapping_updates_only_on_change() {
        let (mut engine, log) = engine();
        let key = engine
            .create_raw_texture(
                None,
                4,
                4,
                TextureFormat::Rgba,
                false,
                false,
                SamplingMode::Bilinear,
                TextureType::UnsignedInt,
            )
            .unwrap();
        let count = |log: &crate::engine::headless::CommandLog| {
            log.commands()
                .iter()
                .filter(|c| matches!(c, crate::engine::headless::BackendCommand::UpdateSampler { .. }))
                .count()
        };
        engine
            .update_texture_wrapping(key, AddressMode::Clamp, AddressMode::Clamp, AddressMode::Clamp, 4)
            .unwrap();
        engine
            .update_texture_wrapping(key, AddressMode::Clamp, AddressMode::Clamp, AddressMode::Clamp, 4)
            .unwrap();
        assert_eq!(count(&log), 1);
        engine
            .update_texture_sampling_mode(SamplingMode::Nearest, key)
            .unwrap();
        assert_eq!(count(&log), 2);
    }

    #[test]
    fn test_flip_rows() {
        assert_eq!(flip_rows(&[1, 2, 3, 4], 2), vec![3, 4, 1, 2]);
    }
}
