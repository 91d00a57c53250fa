//! Reader and writer for `.env` prefiltered environment containers
//!
//! Layout: 8 magic bytes, a NUL-terminated JSON manifest, then the PNG
//! encoded RGBD faces of every specular mip level back to back.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::maths::spherical::EnvironmentIrradianceInfo;
use crate::misc::file_tools;
use crate::textures::internal_texture::TextureKey;

pub const MAGIC_BYTES: [u8; 8] = [0x86, 0x16, 0x87, 0x96, 0xf6, 0xd6, 0x96, 0x36];

const SUPPORTED_VERSION: u32 = 1;

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

/// Location of one encoded image inside the binary section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferImageData {
    pub length: usize,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentTextureSpecularInfo {
    /// Byte offset of the binary section, filled in when reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specular_data_position: Option<usize>,
    /// Six entries per mip level, faces in +x -x +y -y +z -z order
    pub mipmaps: Vec<BufferImageData>,
    #[serde(default = "default_lod_generation_scale")]
    pub lod_generation_scale: f32,
}

fn default_lod_generation_scale() -> f32 {
    0.8
}

/// Parsed manifest of an `.env` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentTextureInfo {
    #[serde(default = "default_version")]
    pub version: u32,
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irradiance: Option<EnvironmentIrradianceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specular: Option<EnvironmentTextureSpecularInfo>,
}

impl EnvironmentTextureInfo {
    pub fn mip_level_count(&self) -> usize {
        (self.width.max(1) as f32).log2().round() as usize + 1
    }
}

/// Validates the container header and parses its manifest
pub fn get_env_info(data: &[u8]) -> Result<EnvironmentTextureInfo> {
    if data.len() < MAGIC_BYTES.len() || data[..MAGIC_BYTES.len()] != MAGIC_BYTES {
        return Err(EngineError::InvalidEnvironment(
            "not an environment file (bad magic bytes)".to_string(),
        ));
    }
    let manifest_start = MAGIC_BYTES.len();
    let manifest_len = data[manifest_start..]
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| {
            EngineError::InvalidEnvironment("manifest is not NUL terminated".to_string())
        })?;
    let manifest = &data[manifest_start..manifest_start + manifest_len];
    let mut info: EnvironmentTextureInfo = serde_json::from_slice(manifest)?;
    if info.version != SUPPORTED_VERSION {
        return Err(EngineError::InvalidEnvironment(format!(
            "unsupported version {}",
            info.version
        )));
    }
    if let Some(specular) = info.specular.as_mut() {
        specular.specular_data_position = Some(manifest_start + manifest_len + 1);
    }
    Ok(info)
}

/// Slices the encoded images out of the container as `[mip][face]`
pub fn create_image_data_array_buffer_views<'a>(
    data: &'a [u8],
    info: &EnvironmentTextureInfo,
) -> Result<Vec<Vec<&'a [u8]>>> {
    let specular = info
        .specular
        .as_ref()
        .ok_or_else(|| EngineError::InvalidEnvironment("missing specular data".to_string()))?;
    let mip_count = info.mip_level_count();
    if specular.mipmaps.len() != 6 * mip_count {
        return Err(EngineError::InvalidEnvironment(format!(
            "expected {} images for {} mip levels, found {}",
            6 * mip_count,
            mip_count,
            specular.mipmaps.len()
        )));
    }
    let base = specular.specular_data_position.unwrap_or(0);
    let mut levels = Vec::with_capacity(mip_count);
    for level in specular.mipmaps.chunks(6) {
        let mut faces = Vec::with_capacity(6);
        for image in level {
            let (start, end) = base
                .checked_add(image.position)
                .and_then(|start| Some((start, start.checked_add(image.length)?)))
                .ok_or_else(|| {
                    EngineError::InvalidEnvironment(format!(
                        "image at {} + {} ({} bytes) overflows",
                        base, image.position, image.length
                    ))
                })?;
            let slice = data.get(start..end).ok_or_else(|| {
                EngineError::InvalidEnvironment(format!(
                    "image at {}..{} is out of bounds ({} bytes)",
                    start,
                    end,
                    data.len()
                ))
            })?;
            faces.push(slice);
        }
        levels.push(faces);
    }
    Ok(levels)
}

/// Decodes and uploads every specular level of a container into `texture`
pub fn upload_env_levels(
    engine: &mut Engine,
    texture: TextureKey,
    data: &[u8],
    info: &EnvironmentTextureInfo,
) -> Result<()> {
    let views = create_image_data_array_buffer_views(data, info)?;
    if let Some(specular) = info.specular.as_ref() {
        let internal = engine
            .internal_texture_mut(texture)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        let offset = internal.lod_generation_offset();
        internal.set_lod_generation(specular.lod_generation_scale, offset);
    }
    upload_levels(engine, texture, &views)
}

/// Uploads `[mip][face]` encoded RGBD images into a cube texture
pub fn upload_levels(engine: &mut Engine, texture: TextureKey, images: &[Vec<&[u8]>]) -> Result<()> {
    let width = engine
        .internal_texture(texture)
        .ok_or(EngineError::UnknownHandle { kind: "texture" })?
        .width;
    let mut levels = Vec::with_capacity(images.len());
    for (level, faces) in images.iter().enumerate() {
        let size = u32::try_from(level)
            .ok()
            .and_then(|level| width.checked_shr(level))
            .unwrap_or(0)
            .max(1);
        let mut decoded = Vec::with_capacity(faces.len());
        for face in faces {
            let image = file_tools::decode_image(face, false)?;
            let image = if image.width != size || image.height != size {
                warn!(
                    "Environment level {} is {}x{}, expected {}",
                    level, image.width, image.height, size
                );
                file_tools::resize_rgba(&image, size, size)?
            } else {
                image
            };
            decoded.push(image.data);
        }
        levels.push(decoded);
    }
    let count = levels.len();
    engine.upload_cube_levels(texture, levels)?;
    if let Some(internal) = engine.internal_texture_mut(texture) {
        internal.set_rgbd(true);
    }
    debug!("Uploaded {} environment levels", count);
    Ok(())
}

/// Stores the irradiance of a manifest as a spherical polynomial
pub fn upload_env_spherical(
    engine: &mut Engine,
    texture: TextureKey,
    info: &EnvironmentTextureInfo,
) -> Result<()> {
    let Some(irradiance) = info.irradiance.as_ref() else {
        return Ok(());
    };
    let polynomial = irradiance.to_polynomial();
    if polynomial.is_none() {
        warn!("Environment irradiance is incomplete, ignoring it");
    }
    engine
        .internal_texture_mut(texture)
        .ok_or(EngineError::UnknownHandle { kind: "texture" })?
        .set_spherical_polynomial(polynomial);
    Ok(())
}

/// Writes a container from PNG encoded faces given as `[mip][face]`
pub fn create_env_file(
    faces_by_mip: &[Vec<Vec<u8>>],
    width: u32,
    irradiance: Option<EnvironmentIrradianceInfo>,
    lod_generation_scale: f32,
) -> Result<Vec<u8>> {
    let mut mipmaps = Vec::new();
    let mut position = 0;
    for faces in faces_by_mip {
        if faces.len() != 6 {
            return Err(EngineError::InvalidEnvironment(format!(
                "each mip level needs 6 faces, got {}",
                faces.len()
            )));
        }
        for face in faces {
            mipmaps.push(BufferImageData {
                length: face.len(),
                position,
            });
            position += face.len();
        }
    }
    let info = EnvironmentTextureInfo {
        version: SUPPORTED_VERSION,
        width,
        irradiance,
        specular: Some(EnvironmentTextureSpecularInfo {
            specular_data_position: None,
            mipmaps,
            lod_generation_scale,
        }),
    };
    let manifest = serde_json::to_vec(&info)?;

    let mut out = Vec::with_capacity(MAGIC_BYTES.len() + manifest.len() + 1 + position);
    out.extend_from_slice(&MAGIC_BYTES);
    out.extend_from_slice(&manifest);
    out.push(0);
    for face in faces_by_mip.iter().flatten() {
        out.extend_from_slice(face);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};

    fn png(size: u32, value: u8) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(size, size, image::Rgba([value, value, value, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn sample_file() -> Vec<u8> {
        let levels = vec![vec![png(2, 200); 6], vec![png(1, 100); 6]];
        let irradiance = EnvironmentIrradianceInfo {
            l00: Some([1.0, 1.0, 1.0]),
            l1_1: Some([0.0; 3]),
            l10: Some([0.0; 3]),
            l11: Some([0.0; 3]),
            l2_2: Some([0.0; 3]),
            l2_1: Some([0.0; 3]),
            l20: Some([0.0; 3]),
            l21: Some([0.0; 3]),
            l22: Some([0.0; 3]),
            ..Default::default()
        };
        create_env_file(&levels, 2, Some(irradiance), 0.75).unwrap()
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(matches!(
            get_env_info(b"not an env file"),
            Err(EngineError::InvalidEnvironment(_))
        ));
    }

    #[test]
    fn test_manifest_defaults_version() {
        let mut data = MAGIC_BYTES.to_vec();
        data.extend_from_slice(br#"{"width":4}"#);
        data.push(0);
        let info = get_env_info(&data).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.mip_level_count(), 3);
        assert!(info.specular.is_none());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut data = MAGIC_BYTES.to_vec();
        data.extend_from_slice(br#"{"version":2,"width":4}"#);
        data.push(0);
        assert!(get_env_info(&data).is_err());
    }

    #[test]
    fn test_views_follow_manifest_positions() {
        let data = sample_file();
        let info = get_env_info(&data).unwrap();
        let views = create_image_data_array_buffer_views(&data, &info).unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|faces| faces.len() == 6));
        assert_eq!(views[1][5], &png(1, 100)[..]);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let data = sample_file();
        let info = get_env_info(&data).unwrap();
        let truncated = &data[..data.len() - 4];
        assert!(create_image_data_array_buffer_views(truncated, &info).is_err());
    }

    #[test]
    fn test_oversized_image_entry_is_rejected() {
        let data = sample_file();
        let mut info = get_env_info(&data).unwrap();
        let specular = info.specular.as_mut().unwrap();
        specular.mipmaps[3].length = usize::MAX;
        assert!(matches!(
            create_image_data_array_buffer_views(&data, &info),
            Err(EngineError::InvalidEnvironment(_))
        ));

        let mut info = get_env_info(&data).unwrap();
        info.specular.as_mut().unwrap().mipmaps[0].position = usize::MAX;
        assert!(matches!(
            create_image_data_array_buffer_views(&data, &info),
            Err(EngineError::InvalidEnvironment(_))
        ));
    }

    #[test]
    fn test_upload_levels_beyond_width_bits() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(16, 16)), EngineOptions::default());
        let key = engine
            .create_prefiltered_cube_texture_from_data("sky.env", &sample_file(), 0.8, 0.0)
            .unwrap();
        let face = png(1, 50);
        let images: Vec<Vec<&[u8]>> = (0..40).map(|_| vec![&face[..]; 6]).collect();
        upload_levels(&mut engine, key, &images).unwrap();
    }

    #[test]
    fn test_prefiltered_texture_from_container() {
        let backend = HeadlessBackend::new(16, 16);
        let log = backend.log();
        let mut engine = Engine::new(Box::new(backend), EngineOptions::default());
        let key = engine
            .create_prefiltered_cube_texture_from_data("sky.env", &sample_file(), 0.8, 0.0)
            .unwrap();
        let texture = engine.internal_texture(key).unwrap();
        assert!(texture.is_ready && texture.is_cube);
        assert!(texture.is_rgbd());
        assert_eq!(texture.lod_generation_scale(), 0.75);
        assert!(texture.spherical_polynomial().is_some());
        assert_eq!(log.uploads(), 12);
    }
}
