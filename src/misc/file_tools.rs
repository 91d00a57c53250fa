//! File and image loading helpers shared by the texture types

use std::path::Path;

use log::debug;

use crate::error::{EngineError, Result};

/// Decoded RGBA8 image
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

pub fn load_file(url: &str) -> Result<Vec<u8>> {
    std::fs::read(Path::new(url)).map_err(|err| EngineError::TextureLoad {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

/// Decodes an encoded image (png, jpeg, hdr) to RGBA8
pub fn decode_image(bytes: &[u8], invert_y: bool) -> Result<DecodedImage> {
    let image = image::load_from_memory(bytes)?;
    let image = if invert_y { image.flipv() } else { image };
    let rgba = image.to_rgba8();
    Ok(DecodedImage {
        width: rgba.width(),
        height: rgba.height(),
        data: rgba.into_raw(),
    })
}

/// Reads and decodes an image file to RGBA8
pub fn load_image(url: &str, invert_y: bool) -> Result<DecodedImage> {
    let bytes = load_file(url)?;
    let image = decode_image(&bytes, invert_y).map_err(|err| EngineError::TextureLoad {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    debug!("Loaded image '{}' ({}x{})", url, image.width, image.height);
    Ok(image)
}

/// Resizes RGBA8 texels with a bilinear filter
pub fn resize_rgba(image: &DecodedImage, width: u32, height: u32) -> Result<DecodedImage> {
    if image.width == width && image.height == height {
        return Ok(image.clone());
    }
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.data.clone())
        .ok_or_else(|| EngineError::parse("image", "texel buffer does not match its size"))?;
    let resized =
        image::imageops::resize(&buffer, width, height, image::imageops::FilterType::Triangle);
    Ok(DecodedImage {
        width,
        height,
        data: resized.into_raw(),
    })
}

/// Extension of a url including the dot, lower-cased
pub fn extension_of(url: &str) -> String {
    Path::new(url)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(width: u32, height: u32, data: Vec<u8>) -> Vec<u8> {
        let image = image::RgbaImage::from_raw(width, height, data).unwrap();
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_and_flip() {
        let png = encode_png(1, 2, vec![255, 0, 0, 255, 0, 0, 255, 255]);
        let upright = decode_image(&png, false).unwrap();
        assert_eq!(upright.data[0], 255);
        let flipped = decode_image(&png, true).unwrap();
        assert_eq!(flipped.data[2], 255);
        assert_eq!((flipped.width, flipped.height), (1, 2));
    }

    #[test]
    fn test_missing_file_reports_url() {
        match load_image("does/not/exist.png", false) {
            Err(EngineError::TextureLoad { url, .. }) => assert_eq!(url, "does/not/exist.png"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension_of("textures/sky.ENV"), ".env");
        assert_eq!(extension_of("noext"), "");
    }
}
