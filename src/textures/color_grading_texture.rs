//! Color grading lookup tables read from `.3dl` files

use std::any::Any;

use log::debug;

use crate::engine::constants::{AddressMode, SamplingMode, TextureFormat, TextureType};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::materials::image_processing::ColorGradingLut;
use crate::misc::file_tools;
use crate::textures::base_texture::{BaseTexture, SceneTexture};

/// Texels of a parsed `.3dl` table
#[derive(Debug, Clone, PartialEq)]
pub struct Lut3dl {
    /// Edge length of the cube
    pub size: u32,
    /// RGBA8 texels, `size^3` of them
    pub data: Vec<u8>,
}

/// Reads a `.3dl` table
///
/// The header line holds one word per grid step, so its word count is the
/// cube size. Values are normalised by the largest component in the file.
pub fn parse_3dl(text: &str) -> Result<Lut3dl> {
    let mut size = 0usize;
    let mut values: Vec<f32> = Vec::new();
    let (mut w, mut h, mut slice) = (0usize, 0usize, 0usize);
    let mut max_color = 0.0f32;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if size == 0 {
            size = words.len();
            values = vec![0.0; size * size * size * 4];
            continue;
        }
        if words.len() < 3 {
            return Err(EngineError::parse("3dl", format!("expected an r g b triple, got '{}'", line)));
        }
        let mut rgb = [0.0f32; 3];
        for (channel, word) in rgb.iter_mut().zip(&words) {
            // Components are integers; decimals are truncated
            let value = word
                .parse::<f32>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| EngineError::parse("3dl", format!("invalid component '{}'", word)))?;
            *channel = value.trunc().max(0.0);
            max_color = max_color.max(*channel);
        }
        if w >= size {
            return Err(EngineError::parse("3dl", "more entries than the header allows"));
        }

        let index = (w + slice * size + h * size * size) * 4;
        values[index..index + 3].copy_from_slice(&rgb);

        h += 1;
        if h % size == 0 {
            slice += 1;
            h = 0;
            if slice % size == 0 {
                w += 1;
                slice = 0;
            }
        }
    }
    if size == 0 {
        return Err(EngineError::parse("3dl", "missing header line"));
    }

    let scale = if max_color > 0.0 { 255.0 / max_color } else { 0.0 };
    let data = values
        .iter()
        .enumerate()
        .map(|(i, value)| if i % 4 == 3 { 255 } else { (value * scale) as u8 })
        .collect();
    Ok(Lut3dl {
        size: size as u32,
        data,
    })
}

#[derive(Debug)]
pub struct ColorGradingTexture {
    pub base: BaseTexture,
    url: String,
    size: u32,
}

impl ColorGradingTexture {
    pub fn new(engine: &mut Engine, url: &str) -> Result<Self> {
        let bytes = file_tools::load_file(url)?;
        let text = String::from_utf8_lossy(&bytes);
        Self::from_text(engine, url, &text)
    }

    /// Builds the table from `.3dl` text already in memory
    pub fn from_text(engine: &mut Engine, url: &str, text: &str) -> Result<Self> {
        let lut = parse_3dl(text)?;
        let mut base = BaseTexture::new(url);
        base.gamma_space = false;
        base.wrap_u = AddressMode::Clamp;
        base.wrap_v = AddressMode::Clamp;
        base.wrap_r = AddressMode::Clamp;
        base.anisotropic_filtering_level = 1;
        base.is_3d = engine.caps().texture_3d;

        let key = if base.is_3d {
            engine.create_raw_3d_texture(
                Some(&lut.data),
                lut.size,
                lut.size,
                lut.size,
                TextureFormat::Rgba,
                false,
                false,
                SamplingMode::Bilinear,
                TextureType::UnsignedInt,
            )?
        } else {
            engine.create_raw_texture(
                Some(&lut.data),
                lut.size * lut.size,
                lut.size,
                TextureFormat::Rgba,
                false,
                false,
                SamplingMode::Bilinear,
                TextureType::UnsignedInt,
            )?
        };
        engine.update_texture_wrapping(key, base.wrap_u, base.wrap_v, base.wrap_r, 1)?;
        base.texture = Some(key);
        debug!(
            "Loaded color grading table '{}' ({}^3, {})",
            url,
            lut.size,
            if base.is_3d { "3D" } else { "2D strip" }
        );
        Ok(Self {
            base,
            url: url.to_string(),
            size: lut.size,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// What an image processing configuration binds for this table
    pub fn lut(&self) -> Option<ColorGradingLut> {
        Some(ColorGradingLut {
            texture: self.base.texture?,
            is_3d: self.base.is_3d,
            size: self.size,
            level: self.base.level,
        })
    }

    pub fn clone_texture(&self, engine: &mut Engine) -> Result<Self> {
        let mut clone = Self::new(engine, &self.url)?;
        clone.base.level = self.base.level;
        Ok(clone)
    }

    pub fn parse(engine: &mut Engine, value: &serde_json::Value) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EngineError::parse("color grading texture", "missing name"))?;
        let mut texture = Self::new(engine, name)?;
        if let Some(level) = value.get("level").and_then(serde_json::Value::as_f64) {
            texture.base.level = level as f32;
        }
        Ok(texture)
    }
}

impl SceneTexture for ColorGradingTexture {
    fn base(&self) -> &BaseTexture {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseTexture {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "ColorGradingTexture"
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({
            "customType": "BABYLON.ColorGradingTexture",
            "name": self.url,
            "level": self.base.level,
        })
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
    use crate::engine::{EngineCaps, EngineOptions, HeadlessBackend};

    const LUT_2: &str = "# two step table\n\n0 1023\n0 0 0\n0 0 1023\n0 1023 0\n0 1023 1023\n1023 0 0\n1023 0 1023\n1023 1023 0\n-5 1023 2046\n";

    #[test]
    fn test_parse_fills_cube_and_normalises() {
        let lut = parse_3dl(LUT_2).unwrap();
        assert_eq!(lut.size, 2);
        assert_eq!(lut.data.len(), 2 * 2 * 2 * 4);
        // second entry: h = 1, slice = 0, w = 0
        assert_eq!(&lut.data[16..20], &[0, 0, 127, 255]);
        // last entry lands at w = 1, slice = 1, h = 1; red clamps at 0
        assert_eq!(&lut.data[28..32], &[0, 127, 255, 255]);
        assert!(lut.data.iter().skip(3).step_by(4).all(|alpha| *alpha == 255));
    }

    #[test]
    fn test_decimal_components_are_truncated() {
        let text = "0 1020\n0 0 0\n0 0 510.9\n0 1020.5 0\n0 0 0\n0 0 0\n0 0 0\n0 0 0\n-0.5 0 0\n";
        let lut = parse_3dl(text).unwrap();
        assert_eq!(&lut.data[16..20], &[0, 0, 127, 255]);
        assert_eq!(&lut.data[8..12], &[0, 255, 0, 255]);
        assert_eq!(&lut.data[28..32], &[0, 0, 0, 255]);
        assert!(parse_3dl("0 1\n0 x 0\n").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        assert!(parse_3dl("# only a comment\n").is_err());
        assert!(parse_3dl("0 1\n1 2\n").is_err());
    }

    #[test]
    fn test_falls_back_to_strip_without_3d_textures() {
        let backend = HeadlessBackend::with_caps(
            32,
            32,
            EngineCaps {
                texture_3d: false,
                ..Default::default()
            },
        );
        let mut engine = Engine::new(Box::new(backend), EngineOptions::default());
        let texture = ColorGradingTexture::from_text(&mut engine, "strip.3dl", LUT_2).unwrap();
        let lut = texture.lut().unwrap();
        assert!(!lut.is_3d);
        let internal = engine.internal_texture(lut.texture).unwrap();
        assert_eq!((internal.width, internal.height), (4, 2));
        assert_eq!(texture.texture_matrix(), cgmath::Matrix4::from_scale(1.0));
    }
}
