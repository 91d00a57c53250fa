//! Engine-wide enumerations
//!
//! Numeric values match the serialized scene format so they can be stored as
//! plain integers in JSON.

macro_rules! numeric_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_u32(self) -> u32 {
                self as u32
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }
    };
}

numeric_enum! {
    /// Component type of texture texels
    TextureType {
        UnsignedInt = 0,
        Float = 1,
        HalfFloat = 2,
    } default UnsignedInt
}

numeric_enum! {
    /// Channel layout of texture texels
    TextureFormat {
        Alpha = 0,
        Luminance = 1,
        LuminanceAlpha = 2,
        Rgb = 4,
        Rgba = 5,
        R = 6,
        Rg = 7,
        Depth24Stencil8 = 13,
        Depth32Float = 14,
    } default Rgba
}

numeric_enum! {
    SamplingMode {
        Nearest = 1,
        Bilinear = 2,
        Trilinear = 3,
    } default Trilinear
}

numeric_enum! {
    AddressMode {
        Clamp = 0,
        Wrap = 1,
        Mirror = 2,
    } default Wrap
}

numeric_enum! {
    /// Blend equation used when drawing
    AlphaMode {
        Disable = 0,
        Add = 1,
        Combine = 2,
        Subtract = 3,
        Multiply = 4,
        Maximized = 5,
        OneOne = 6,
        Premultiplied = 7,
        PremultipliedPorterDuff = 8,
        Interpolate = 9,
        ScreenMode = 10,
    } default Disable
}

numeric_enum! {
    /// Rounding applied when a post process needs power-of-two textures
    ScaleMode {
        Floor = 1,
        Nearest = 2,
        Ceiling = 3,
    } default Floor
}

numeric_enum! {
    DelayLoadState {
        None = 0,
        Loaded = 1,
        Loading = 2,
        NotLoaded = 4,
    } default None
}

numeric_enum! {
    /// How texture coordinates are generated for a texture
    CoordinatesMode {
        Explicit = 0,
        Spherical = 1,
        Planar = 2,
        Cubic = 3,
        Projection = 4,
        Skybox = 5,
        InvCubic = 6,
        Equirectangular = 7,
        FixedEquirectangular = 8,
        FixedEquirectangularMirrored = 9,
    } default Explicit
}

numeric_enum! {
    /// Where the texels of an internal texture come from, used to rebuild it
    InternalTextureSource {
        Unknown = 0,
        Url = 1,
        Temp = 2,
        Raw = 3,
        Dynamic = 4,
        RenderTarget = 5,
        MultiRenderTarget = 6,
        Cube = 7,
        CubeRaw = 8,
        CubePrefiltered = 9,
        Raw3D = 10,
        Depth = 11,
        CubeRawRgbd = 12,
    } default Unknown
}

numeric_enum! {
    /// How a material handles transparency
    TransparencyMode {
        Opaque = 0,
        AlphaTest = 1,
        AlphaBlend = 2,
        AlphaTestAndBlend = 3,
    } default Opaque
}

numeric_enum! {
    ToneMappingType {
        Standard = 0,
        Aces = 1,
    } default Standard
}

numeric_enum! {
    VignetteBlendMode {
        Multiply = 0,
        Opaque = 1,
    } default Multiply
}

numeric_enum! {
    LightType {
        Point = 0,
        Directional = 1,
        Spot = 2,
        Hemispheric = 3,
    } default Point
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32Float)
    }

    /// Channels stored per texel once expanded for upload
    pub fn channel_count(self) -> u32 {
        match self {
            Self::Alpha | Self::Luminance | Self::R => 1,
            Self::LuminanceAlpha | Self::Rg => 2,
            Self::Rgb | Self::Rgba => 4,
            Self::Depth24Stencil8 | Self::Depth32Float => 1,
        }
    }
}

impl TextureType {
    pub fn bytes_per_channel(self) -> u32 {
        match self {
            Self::UnsignedInt => 1,
            Self::HalfFloat => 2,
            Self::Float => 4,
        }
    }
}

/// Bytes per texel for an uploaded format/type pair
pub fn bytes_per_texel(format: TextureFormat, texture_type: TextureType) -> u32 {
    if format.is_depth() {
        return 4;
    }
    format.channel_count() * texture_type.bytes_per_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_numeric_values() {
        assert_eq!(TextureType::from_u32(2), Some(TextureType::HalfFloat));
        assert_eq!(ScaleMode::Ceiling.as_u32(), 3);
        assert_eq!(DelayLoadState::from_u32(4), Some(DelayLoadState::NotLoaded));
        assert_eq!(CoordinatesMode::from_u32(42), None);
    }

    #[test]
    fn test_texel_sizes() {
        assert_eq!(bytes_per_texel(TextureFormat::Rgba, TextureType::UnsignedInt), 4);
        assert_eq!(bytes_per_texel(TextureFormat::Rgba, TextureType::HalfFloat), 8);
        assert_eq!(bytes_per_texel(TextureFormat::Rgb, TextureType::Float), 16);
        assert_eq!(bytes_per_texel(TextureFormat::R, TextureType::Float), 4);
    }
}
