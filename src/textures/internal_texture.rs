//! Engine-level GPU texture record
//!
//! An [`InternalTexture`] is shared by every scene texture that points at the
//! same data (url cache) and is reference counted. It remembers where its
//! texels came from so the GPU resource can be rebuilt after a device reset.

use log::{debug, warn};

use crate::engine::backend::{
    GpuTextureHandle, RenderBackend, SamplerDesc, TextureDesc, TextureDimension, TextureUpload,
};
use crate::engine::constants::{
    bytes_per_texel, AddressMode, CoordinatesMode, InternalTextureSource, SamplingMode,
    TextureFormat, TextureType,
};
use crate::error::Result;
use crate::maths::SphericalPolynomial;
use crate::misc::file_tools;
use crate::misc::observable::Observable;

slotmap::new_key_type! {
    /// Key of an internal texture inside the engine arena
    pub struct TextureKey;
}

/// Shared GPU texture with its creation parameters and cached sampler state
#[derive(Debug)]
pub struct InternalTexture {
    pub is_ready: bool,
    pub is_cube: bool,
    pub is_3d: bool,
    pub is_multiview: bool,
    pub url: String,
    pub sampling_mode: SamplingMode,
    pub generate_mipmaps: bool,
    pub samples: u32,
    pub texture_type: TextureType,
    pub format: TextureFormat,
    pub on_loaded_observable: Observable<InternalTexture>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub base_width: u32,
    pub base_height: u32,
    pub base_depth: u32,
    pub invert_y: bool,

    pub(crate) source: InternalTextureSource,
    /// Texels of level 0 kept for raw sources
    pub(crate) buffer: Option<Vec<u8>>,
    /// `[mip][face]` texels kept for cube sources
    pub(crate) buffer_views: Vec<Vec<Vec<u8>>>,
    pub(crate) size: u32,
    pub(crate) extension: String,
    pub(crate) files: Vec<String>,
    pub(crate) render_target: bool,

    pub(crate) cached_coordinates_mode: Option<CoordinatesMode>,
    pub(crate) cached_wrap_u: Option<AddressMode>,
    pub(crate) cached_wrap_v: Option<AddressMode>,
    pub(crate) cached_wrap_r: Option<AddressMode>,
    pub(crate) cached_anisotropic_filtering_level: Option<u32>,
    pub(crate) is_disabled: bool,
    pub(crate) generate_stencil_buffer: bool,
    pub(crate) generate_depth_buffer: bool,
    pub(crate) comparison_function: u32,
    pub(crate) spherical_polynomial: Option<SphericalPolynomial>,
    pub(crate) lod_generation_scale: f32,
    pub(crate) lod_generation_offset: f32,
    pub(crate) is_rgbd: bool,
    pub(crate) references: u32,

    pub(crate) gpu: Option<GpuTextureHandle>,
}

impl Default for InternalTexture {
    fn default() -> Self {
        Self::new(InternalTextureSource::Unknown)
    }
}

impl InternalTexture {
    pub fn new(source: InternalTextureSource) -> Self {
        Self {
            is_ready: false,
            is_cube: false,
            is_3d: false,
            is_multiview: false,
            url: String::new(),
            sampling_mode: SamplingMode::Trilinear,
            generate_mipmaps: false,
            samples: 1,
            texture_type: TextureType::UnsignedInt,
            format: TextureFormat::Rgba,
            on_loaded_observable: Observable::new(),
            width: 0,
            height: 0,
            depth: 0,
            base_width: 0,
            base_height: 0,
            base_depth: 0,
            invert_y: false,
            source,
            buffer: None,
            buffer_views: Vec::new(),
            size: 0,
            extension: String::new(),
            files: Vec::new(),
            render_target: false,
            cached_coordinates_mode: None,
            cached_wrap_u: None,
            cached_wrap_v: None,
            cached_wrap_r: None,
            cached_anisotropic_filtering_level: None,
            is_disabled: false,
            generate_stencil_buffer: false,
            generate_depth_buffer: false,
            comparison_function: 0,
            spherical_polynomial: None,
            lod_generation_scale: 1.0,
            lod_generation_offset: 0.0,
            is_rgbd: false,
            references: 1,
            gpu: None,
        }
    }

    pub fn source(&self) -> InternalTextureSource {
        self.source
    }

    pub fn references(&self) -> u32 {
        self.references
    }

    pub fn gpu_texture(&self) -> Option<GpuTextureHandle> {
        self.gpu
    }

    pub fn is_rgbd(&self) -> bool {
        self.is_rgbd
    }

    pub fn set_rgbd(&mut self, rgbd: bool) {
        self.is_rgbd = rgbd;
    }

    pub fn lod_generation_scale(&self) -> f32 {
        self.lod_generation_scale
    }

    pub fn lod_generation_offset(&self) -> f32 {
        self.lod_generation_offset
    }

    pub fn set_lod_generation(&mut self, scale: f32, offset: f32) {
        self.lod_generation_scale = scale;
        self.lod_generation_offset = offset;
    }

    pub fn spherical_polynomial(&self) -> Option<&SphericalPolynomial> {
        self.spherical_polynomial.as_ref()
    }

    pub fn spherical_polynomial_mut(&mut self) -> Option<&mut SphericalPolynomial> {
        self.spherical_polynomial.as_mut()
    }

    pub fn set_spherical_polynomial(&mut self, polynomial: Option<SphericalPolynomial>) {
        self.spherical_polynomial = polynomial;
    }

    pub fn generate_stencil_buffer(&self) -> bool {
        self.generate_stencil_buffer
    }

    pub fn generate_depth_buffer(&self) -> bool {
        self.generate_depth_buffer
    }

    pub fn increment_references(&mut self) {
        self.references += 1;
    }

    /// Sets the current size and the size the texture was created with
    pub fn update_size(&mut self, width: u32, height: u32, depth: u32) {
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.base_width = width;
        self.base_height = height;
        self.base_depth = depth;
        self.size = width * height * depth.max(1);
    }

    pub(crate) fn dimension(&self) -> TextureDimension {
        if self.is_cube {
            TextureDimension::Cube
        } else if self.is_3d {
            TextureDimension::D3
        } else {
            TextureDimension::D2
        }
    }

    pub(crate) fn mip_level_count(&self) -> u32 {
        if !self.generate_mipmaps {
            return 1;
        }
        let largest = self.width.max(self.height).max(1);
        32 - largest.leading_zeros()
    }

    pub(crate) fn sampler_desc(&self) -> SamplerDesc {
        SamplerDesc {
            sampling_mode: self.sampling_mode,
            wrap_u: self.cached_wrap_u.unwrap_or(AddressMode::Wrap),
            wrap_v: self.cached_wrap_v.unwrap_or(AddressMode::Wrap),
            wrap_r: self.cached_wrap_r.unwrap_or(AddressMode::Wrap),
            anisotropy: self.cached_anisotropic_filtering_level.unwrap_or(1),
        }
    }

    pub(crate) fn texture_desc(&self) -> TextureDesc {
        let levels = if self.buffer_views.len() > 1 {
            self.buffer_views.len() as u32
        } else {
            self.mip_level_count()
        };
        TextureDesc {
            label: if self.url.is_empty() {
                format!("{:?} texture", self.source)
            } else {
                self.url.clone()
            },
            width: self.width.max(1),
            height: self.height.max(1),
            depth: self.depth.max(1),
            dimension: self.dimension(),
            format: self.format,
            texture_type: self.texture_type,
            mip_levels: levels,
            samples: self.samples.max(1),
            render_target: self.render_target,
            sampler: self.sampler_desc(),
        }
    }

    /// Uploads texels for one level and layer, expanding RGB to RGBA
    pub(crate) fn upload(
        &self,
        backend: &mut dyn RenderBackend,
        level: u32,
        layer: u32,
        data: &[u8],
    ) -> Result<()> {
        let Some(gpu) = self.gpu else {
            return Ok(());
        };
        let width = (self.width >> level).max(1);
        let height = (self.height >> level).max(1);
        let depth = if self.is_3d { self.depth.max(1) } else { 1 };
        let expanded;
        let data = if self.format == TextureFormat::Rgb
            && data.len() as u32 == width * height * depth * 3 * self.texture_type.bytes_per_channel()
        {
            expanded = expand_rgb_to_rgba(data, self.texture_type.bytes_per_channel() as usize);
            &expanded[..]
        } else {
            data
        };
        let expected = (width * height * depth * bytes_per_texel(self.format, self.texture_type)) as usize;
        if data.len() < expected {
            warn!(
                "Texture '{}' upload is {} bytes, expected {}",
                self.url,
                data.len(),
                expected
            );
        }
        backend.upload_texture(
            gpu,
            TextureUpload {
                level,
                layer,
                width,
                height,
                depth,
                data,
            },
        )
    }

    /// Recreates the GPU resource from the recorded data source
    pub fn rebuild(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        if let Some(gpu) = self.gpu.take() {
            backend.release_texture(gpu);
        }
        self.is_ready = false;

        match self.source {
            InternalTextureSource::Temp => return Ok(()),
            InternalTextureSource::Url => {
                let image = file_tools::load_image(&self.url, self.invert_y)?;
                self.update_size(image.width, image.height, 1);
                self.buffer = Some(image.data);
            }
            InternalTextureSource::Cube => {
                self.buffer_views = vec![self
                    .files
                    .iter()
                    .map(|file| file_tools::load_image(file, false).map(|image| image.data))
                    .collect::<Result<Vec<_>>>()?];
            }
            _ => {}
        }
        self.allocate(backend)?;
        debug!("Rebuilt {:?} texture '{}'", self.source, self.url);
        Ok(())
    }

    /// Creates the GPU resource and uploads whatever texels are held
    ///
    /// Url and file cube sources drop their texels afterwards; they reload
    /// from disk on rebuild.
    pub(crate) fn allocate(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        if let Some(gpu) = self.gpu.take() {
            backend.release_texture(gpu);
        }
        self.gpu = Some(backend.create_texture(&self.texture_desc())?);
        let keeps_data = !matches!(
            self.source,
            InternalTextureSource::Url | InternalTextureSource::Cube
        );

        if let Some(buffer) = self.buffer.take() {
            self.upload(backend, 0, 0, &buffer)?;
            if keeps_data {
                self.buffer = Some(buffer);
            }
        }
        let views = std::mem::take(&mut self.buffer_views);
        for (level, faces) in views.iter().enumerate() {
            for (face, data) in faces.iter().enumerate() {
                self.upload(backend, level as u32, face as u32, data)?;
            }
        }
        let uploaded_levels = views.len();
        if keeps_data {
            self.buffer_views = views;
        }

        if self.generate_mipmaps && uploaded_levels <= 1 && !self.render_target {
            if let Some(gpu) = self.gpu {
                backend.generate_mipmaps(gpu)?;
            }
        }
        self.is_ready = true;
        Ok(())
    }

    /// Moves this texture's GPU resource and description into `target`
    ///
    /// The target's previous resource is released; `self` is left disposed.
    pub fn swap_and_die(&mut self, target: &mut InternalTexture, backend: &mut dyn RenderBackend) {
        if let Some(previous) = target.gpu.take() {
            backend.release_texture(previous);
        }
        target.gpu = self.gpu.take();
        target.is_ready = self.is_ready;
        target.width = self.width;
        target.height = self.height;
        target.depth = self.depth;
        target.base_width = self.base_width;
        target.base_height = self.base_height;
        target.base_depth = self.base_depth;
        target.size = self.size;
        target.format = self.format;
        target.texture_type = self.texture_type;
        target.generate_mipmaps = self.generate_mipmaps;
        target.is_cube = self.is_cube;
        target.is_3d = self.is_3d;
        target.generate_stencil_buffer = self.generate_stencil_buffer;
        target.generate_depth_buffer = self.generate_depth_buffer;
        target.render_target = self.render_target;
        target.lod_generation_scale = self.lod_generation_scale;
        target.lod_generation_offset = self.lod_generation_offset;
        target.is_rgbd = self.is_rgbd;
        if self.spherical_polynomial.is_some() {
            target.spherical_polynomial = self.spherical_polynomial.take();
        }
        target.buffer = self.buffer.take();
        target.buffer_views = std::mem::take(&mut self.buffer_views);
        target.cached_wrap_u = None;
        target.cached_wrap_v = None;
        target.cached_wrap_r = None;
        target.cached_anisotropic_filtering_level = None;

        self.is_ready = false;
        self.references = 0;
    }

    /// Drops one reference; releases the GPU resource when none remain
    ///
    /// Returns true once the texture is fully released.
    pub fn dispose(&mut self, backend: &mut dyn RenderBackend) -> bool {
        self.references = self.references.saturating_sub(1);
        if self.references > 0 {
            return false;
        }
        if let Some(gpu) = self.gpu.take() {
            backend.release_texture(gpu);
        }
        self.on_loaded_observable.clear();
        self.buffer = None;
        self.buffer_views.clear();
        self.is_ready = false;
        debug!("Released {:?} texture '{}'", self.source, self.url);
        true
    }
}

fn expand_rgb_to_rgba(data: &[u8], bytes_per_channel: usize) -> Vec<u8> {
    let texel = 3 * bytes_per_channel;
    let one: Vec<u8> = match bytes_per_channel {
        4 => 1.0f32.to_le_bytes().to_vec(),
        // 1.0 as IEEE half
        2 => vec![0x00, 0x3c],
        _ => vec![255],
    };
    let mut out = Vec::with_capacity(data.len() / 3 * 4);
    for chunk in data.chunks_exact(texel) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(&one);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::headless::HeadlessBackend;

    fn raw_texture(backend: &mut HeadlessBackend) -> InternalTexture {
        let mut texture = InternalTexture::new(InternalTextureSource::Raw);
        texture.update_size(2, 2, 1);
        texture.buffer = Some(vec![128; 16]);
        texture.rebuild(backend).unwrap();
        texture
    }

    #[test]
    fn test_update_size_moves_base_size() {
        let mut texture = InternalTexture::default();
        texture.update_size(64, 32, 1);
        assert_eq!((texture.width, texture.base_width), (64, 64));
        assert_eq!((texture.height, texture.base_height), (32, 32));
        assert_eq!(texture.size, 64 * 32);
    }

    #[test]
    fn test_rebuild_recreates_from_raw_buffer() {
        let mut backend = HeadlessBackend::new(8, 8);
        let log = backend.log();
        let mut texture = raw_texture(&mut backend);
        assert!(texture.is_ready);
        let first = texture.gpu_texture().unwrap();
        texture.rebuild(&mut backend).unwrap();
        assert_ne!(texture.gpu_texture(), Some(first));
        assert_eq!(log.live_textures(), 1);
        assert_eq!(log.uploads(), 2);
    }

    #[test]
    fn test_references_release_at_zero() {
        let mut backend = HeadlessBackend::new(8, 8);
        let log = backend.log();
        let mut texture = raw_texture(&mut backend);
        texture.increment_references();
        assert!(!texture.dispose(&mut backend));
        assert_eq!(log.live_textures(), 1);
        assert!(texture.dispose(&mut backend));
        assert_eq!(log.live_textures(), 0);
        assert!(texture.gpu_texture().is_none());
    }

    #[test]
    fn test_swap_and_die_moves_resource() {
        let mut backend = HeadlessBackend::new(8, 8);
        let log = backend.log();
        let mut source = raw_texture(&mut backend);
        let mut target = raw_texture(&mut backend);
        let handle = source.gpu_texture();
        source.swap_and_die(&mut target, &mut backend);
        assert_eq!(target.gpu_texture(), handle);
        assert!(source.gpu_texture().is_none());
        assert!(!source.is_ready);
        assert_eq!(log.live_textures(), 1);
    }

    #[test]
    fn test_rgb_expansion() {
        let rgba = expand_rgb_to_rgba(&[1, 2, 3, 4, 5, 6], 1);
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_mip_level_count() {
        let mut texture = InternalTexture::default();
        texture.update_size(256, 64, 1);
        assert_eq!(texture.mip_level_count(), 1);
        texture.generate_mipmaps = true;
        assert_eq!(texture.mip_level_count(), 9);
    }
}
