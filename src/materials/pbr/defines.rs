//! Define set of the PBR material

use std::fmt;
use std::ops::{Deref, DerefMut, Index};

use crate::materials::defines::MaterialDefines;
use crate::materials::image_processing::ImageProcessingConfigurationDefines;

const BOOL_DEFAULTS: &[(&str, bool)] = &[
    ("PBR", true),
    ("REALTIME_FILTERING", false),
    ("MAINUV1", false),
    ("MAINUV2", false),
    ("UV1", false),
    ("UV2", false),
    ("ALBEDO", false),
    ("GAMMAALBEDO", false),
    ("VERTEXCOLOR", false),
    ("DETAIL", false),
    ("AMBIENT", false),
    ("AMBIENTINGRAYSCALE", false),
    ("OPACITY", false),
    ("VERTEXALPHA", false),
    ("OPACITYRGB", false),
    ("ALPHATEST", false),
    ("DEPTHPREPASS", false),
    ("ALPHABLEND", false),
    ("ALPHAFROMALBEDO", false),
    ("SPECULAROVERALPHA", false),
    ("RADIANCEOVERALPHA", false),
    ("ALPHAFRESNEL", false),
    ("LINEARALPHAFRESNEL", false),
    ("PREMULTIPLYALPHA", false),
    ("EMISSIVE", false),
    ("REFLECTIVITY", false),
    ("SPECULARTERM", false),
    ("MICROSURFACEFROMREFLECTIVITYMAP", false),
    ("MICROSURFACEAUTOMATIC", false),
    ("LODBASEDMICROSFURACE", false),
    ("MICROSURFACEMAP", false),
    ("METALLICWORKFLOW", false),
    ("ROUGHNESSSTOREINMETALMAPALPHA", false),
    ("ROUGHNESSSTOREINMETALMAPGREEN", false),
    ("METALLNESSSTOREINMETALMAPBLUE", false),
    ("AOSTOREINMETALMAPRED", false),
    ("METALLIC_REFLECTANCE", false),
    ("ENVIRONMENTBRDF", false),
    ("ENVIRONMENTBRDF_RGBD", false),
    ("NORMAL", false),
    ("TANGENT", false),
    ("BUMP", false),
    ("OBJECTSPACE_NORMALMAP", false),
    ("PARALLAX", false),
    ("PARALLAXOCCLUSION", false),
    ("NORMALXYSCALE", true),
    ("LIGHTMAP", false),
    ("USELIGHTMAPASSHADOWMAP", false),
    ("GAMMALIGHTMAP", false),
    ("RGBDLIGHTMAP", false),
    ("REFLECTION", false),
    ("REFLECTIONMAP_3D", false),
    ("REFLECTIONMAP_SPHERICAL", false),
    ("REFLECTIONMAP_PLANAR", false),
    ("REFLECTIONMAP_CUBIC", false),
    ("USE_LOCAL_REFLECTIONMAP_CUBIC", false),
    ("REFLECTIONMAP_PROJECTION", false),
    ("REFLECTIONMAP_SKYBOX", false),
    ("REFLECTIONMAP_EXPLICIT", false),
    ("REFLECTIONMAP_EQUIRECTANGULAR", false),
    ("REFLECTIONMAP_EQUIRECTANGULAR_FIXED", false),
    ("REFLECTIONMAP_MIRROREDEQUIRECTANGULAR_FIXED", false),
    ("INVERTCUBICMAP", false),
    ("USESPHERICALFROMREFLECTIONMAP", false),
    ("USEIRRADIANCEMAP", false),
    ("SPHERICAL_HARMONICS", false),
    ("USESPHERICALINVERTEX", false),
    ("REFLECTIONMAP_OPPOSITEZ", false),
    ("LODINREFLECTIONALPHA", false),
    ("GAMMAREFLECTION", false),
    ("RGBDREFLECTION", false),
    ("LINEARSPECULARREFLECTION", false),
    ("RADIANCEOCCLUSION", false),
    ("HORIZONOCCLUSION", false),
    ("INSTANCES", false),
    ("THIN_INSTANCES", false),
    ("PREPASS", false),
    ("PREPASS_IRRADIANCE", false),
    ("PREPASS_ALBEDO", false),
    ("PREPASS_DEPTHNORMAL", false),
    ("PREPASS_POSITION", false),
    ("PREPASS_VELOCITY", false),
    ("PREPASS_REFLECTIVITY", false),
    ("BONETEXTURE", false),
    ("BONES_VELOCITY_ENABLED", false),
    ("NONUNIFORMSCALING", false),
    ("MORPHTARGETS", false),
    ("MORPHTARGETS_NORMAL", false),
    ("MORPHTARGETS_TANGENT", false),
    ("MORPHTARGETS_UV", false),
    ("MULTIVIEW", false),
    ("USEPHYSICALLIGHTFALLOFF", false),
    ("USEGLTFLIGHTFALLOFF", false),
    ("TWOSIDEDLIGHTING", false),
    ("SHADOWFLOAT", false),
    ("CLIPPLANE", false),
    ("CLIPPLANE2", false),
    ("CLIPPLANE3", false),
    ("CLIPPLANE4", false),
    ("CLIPPLANE5", false),
    ("CLIPPLANE6", false),
    ("POINTSIZE", false),
    ("FOG", false),
    ("LOGARITHMICDEPTH", false),
    ("FORCENORMALFORWARD", false),
    ("SPECULARAA", false),
    ("CLEARCOAT", false),
    ("CLEARCOAT_DEFAULTIOR", false),
    ("CLEARCOAT_TEXTURE", false),
    ("CLEARCOAT_TEXTURE_ROUGHNESS", false),
    ("CLEARCOAT_USE_ROUGHNESS_FROM_MAINTEXTURE", false),
    ("CLEARCOAT_TEXTURE_ROUGHNESS_IDENTICAL", false),
    ("CLEARCOAT_BUMP", false),
    ("CLEARCOAT_REMAP_F0", true),
    ("CLEARCOAT_TINT", false),
    ("CLEARCOAT_TINT_TEXTURE", false),
    ("ANISOTROPIC", false),
    ("ANISOTROPIC_TEXTURE", false),
    ("BRDF_V_HEIGHT_CORRELATED", false),
    ("MS_BRDF_ENERGY_CONSERVATION", false),
    ("SPECULAR_GLOSSINESS_ENERGY_CONSERVATION", false),
    ("SHEEN", false),
    ("SHEEN_TEXTURE", false),
    ("SHEEN_TEXTURE_ROUGHNESS", false),
    ("SHEEN_LINKWITHALBEDO", false),
    ("SHEEN_ROUGHNESS", false),
    ("SHEEN_ALBEDOSCALING", false),
    ("SHEEN_USE_ROUGHNESS_FROM_MAINTEXTURE", false),
    ("SHEEN_TEXTURE_ROUGHNESS_IDENTICAL", false),
    ("SUBSURFACE", false),
    ("SS_REFRACTION", false),
    ("SS_TRANSLUCENCY", false),
    ("SS_SCATTERING", false),
    ("SS_THICKNESSANDMASK_TEXTURE", false),
    ("SS_REFRACTIONMAP_3D", false),
    ("SS_REFRACTIONMAP_OPPOSITEZ", false),
    ("SS_LODINREFRACTIONALPHA", false),
    ("SS_GAMMAREFRACTION", false),
    ("SS_RGBDREFRACTION", false),
    ("SS_LINEARSPECULARREFRACTION", false),
    ("SS_LINKREFRACTIONTOTRANSPARENCY", false),
    ("SS_ALBEDOFORREFRACTIONTINT", false),
    ("SS_MASK_FROM_THICKNESS_TEXTURE", false),
    ("SS_MASK_FROM_THICKNESS_TEXTURE_GLTF", false),
    ("UNLIT", false),
];

const INT_DEFAULTS: &[(&str, i32)] = &[
    ("NUM_SAMPLES", 0),
    ("AMBIENTDIRECTUV", 0),
    ("ALBEDODIRECTUV", 0),
    ("DETAILDIRECTUV", 0),
    ("DETAIL_NORMALBLENDMETHOD", 0),
    ("OPACITYDIRECTUV", 0),
    ("EMISSIVEDIRECTUV", 0),
    ("REFLECTIVITYDIRECTUV", 0),
    ("MICROSURFACEMAPDIRECTUV", 0),
    ("METALLIC_REFLECTANCEDIRECTUV", 0),
    ("BUMPDIRECTUV", 0),
    ("LIGHTMAPDIRECTUV", 0),
    ("NUM_BONE_INFLUENCERS", 0),
    ("BonesPerMesh", 0),
    ("PREPASS_IRRADIANCE_INDEX", -1),
    ("PREPASS_ALBEDO_INDEX", -1),
    ("PREPASS_DEPTHNORMAL_INDEX", -1),
    ("PREPASS_POSITION_INDEX", -1),
    ("PREPASS_VELOCITY_INDEX", -1),
    ("PREPASS_REFLECTIVITY_INDEX", -1),
    ("SCENE_MRT_COUNT", 0),
    ("NUM_MORPH_INFLUENCERS", 0),
    ("CLEARCOAT_TEXTUREDIRECTUV", 0),
    ("CLEARCOAT_TEXTURE_ROUGHNESSDIRECTUV", 0),
    ("CLEARCOAT_BUMPDIRECTUV", 0),
    ("CLEARCOAT_TINT_TEXTUREDIRECTUV", 0),
    ("ANISOTROPIC_TEXTUREDIRECTUV", 0),
    ("SHEEN_TEXTUREDIRECTUV", 0),
    ("SHEEN_TEXTURE_ROUGHNESSDIRECTUV", 0),
    ("SS_THICKNESSANDMASK_TEXTUREDIRECTUV", 0),
    ("DEBUGMODE", 0),
];

const STRING_DEFAULTS: &[(&str, &str)] = &[("ALPHATESTVALUE", "0.5")];

/// Every define the PBR shaders understand, plus the image processing ones
#[derive(Debug, Clone, PartialEq)]
pub struct PbrMaterialDefines {
    defines: MaterialDefines,
    pub image_processing: ImageProcessingConfigurationDefines,
}

impl Default for PbrMaterialDefines {
    fn default() -> Self {
        Self::new()
    }
}

impl PbrMaterialDefines {
    pub fn new() -> Self {
        Self {
            defines: MaterialDefines::with_defaults(BOOL_DEFAULTS, INT_DEFAULTS, STRING_DEFAULTS),
            image_processing: ImageProcessingConfigurationDefines::default(),
        }
    }

    /// Restores the declared defaults and clears the image processing defines
    pub fn reset(&mut self) {
        self.defines.reset();
        self.image_processing = ImageProcessingConfigurationDefines::default();
    }

    pub fn defines(&self) -> &MaterialDefines {
        &self.defines
    }

    /// Compares the material and image processing values
    pub fn is_equal(&self, other: &PbrMaterialDefines) -> bool {
        self.defines.is_equal(&other.defines) && self.image_processing == other.image_processing
    }
}

impl Deref for PbrMaterialDefines {
    type Target = MaterialDefines;

    fn deref(&self) -> &MaterialDefines {
        &self.defines
    }
}

impl DerefMut for PbrMaterialDefines {
    fn deref_mut(&mut self) -> &mut MaterialDefines {
        &mut self.defines
    }
}

impl Index<&str> for PbrMaterialDefines {
    type Output = bool;

    fn index(&self, name: &str) -> &bool {
        if self.defines.has_bool(name) {
            &self.defines[name]
        } else if self.image_processing.is_enabled(name) {
            &true
        } else {
            &false
        }
    }
}

impl fmt::Display for PbrMaterialDefines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.defines, self.image_processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defines = PbrMaterialDefines::new();
        assert!(defines["PBR"]);
        assert!(defines["NORMALXYSCALE"]);
        assert!(defines["CLEARCOAT_REMAP_F0"]);
        assert!(!defines["ALBEDO"]);
        assert_eq!(defines.int("PREPASS_IRRADIANCE_INDEX"), -1);
        assert_eq!(defines.int("SCENE_MRT_COUNT"), 0);
        assert_eq!(defines.string("ALPHATESTVALUE"), "0.5");
    }

    #[test]
    fn test_reset_restores_pbr_defaults() {
        let mut defines = PbrMaterialDefines::new();
        defines
            .set_bool("PBR", false)
            .set_bool("ALBEDO", true)
            .set_int("PREPASS_ALBEDO_INDEX", 3);
        defines.image_processing.imageprocessing = true;
        defines.reset();
        assert!(defines["PBR"]);
        assert!(!defines["ALBEDO"]);
        assert_eq!(defines.int("PREPASS_ALBEDO_INDEX"), -1);
        assert!(!defines["IMAGEPROCESSING"]);
    }

    #[test]
    fn test_to_string_appends_image_processing() {
        let mut defines = PbrMaterialDefines::new();
        defines.image_processing.imageprocessing = true;
        defines.image_processing.tonemapping = true;
        let text = defines.to_string();
        assert!(text.starts_with("#define PBR\n"));
        assert!(text.contains("#define NORMALXYSCALE\n"));
        assert!(text.contains("#define ALPHATESTVALUE 0.5\n"));
        let pbr_end = text.find("#define ALPHATESTVALUE").unwrap_or_default();
        let ip = text.find("#define IMAGEPROCESSING\n").unwrap_or_default();
        assert!(ip > pbr_end);
        assert!(defines["TONEMAPPING"]);
    }
}
