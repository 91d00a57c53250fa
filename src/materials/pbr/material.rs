//! Physically based material (metallic/roughness or specular/glossiness)

use std::any::Any;
use std::collections::HashMap;

use cgmath::EuclideanSpace;
use log::debug;

use crate::engine::backend::{TextureDimension, VertexInput};
use crate::engine::constants::{AlphaMode, CoordinatesMode, TransparencyMode};
use crate::engine::Engine;
use crate::error::Result;
use crate::lights::LightSnapshot;
use crate::materials::image_processing::ImageProcessingConfiguration;
use crate::materials::pbr::brdf_configuration::PbrBrdfConfiguration;
use crate::materials::pbr::defines::PbrMaterialDefines;
use crate::materials::{
    DrawWrapper, EffectCreationOptions, EffectKey, Material, MaterialBase, MaterialContext,
    MaterialDirtyFlags, MeshDrawInfo,
};
use crate::maths::Color3;
use crate::prepass::{PrePassRenderer, PrePassTextureType};
use crate::shaders::{SamplerDecl, UniformDecl, UniformType};
use crate::textures::{BaseTexture, TextureId};

pub const DEFAULT_MAX_SIMULTANEOUS_LIGHTS: usize = 4;

const SAMPLERS: [&str; 7] = [
    "albedoSampler",
    "opacitySampler",
    "bumpSampler",
    "reflectivitySampler",
    "ambientSampler",
    "lightmapSampler",
    "emissiveSampler",
];

const SPHERICAL_UNIFORMS: [&str; 18] = [
    "vSphericalL00",
    "vSphericalL1_1",
    "vSphericalL10",
    "vSphericalL11",
    "vSphericalL2_2",
    "vSphericalL2_1",
    "vSphericalL20",
    "vSphericalL21",
    "vSphericalL22",
    "vSphericalX",
    "vSphericalY",
    "vSphericalZ",
    "vSphericalXX_ZZ",
    "vSphericalYY_ZZ",
    "vSphericalZZ",
    "vSphericalXY",
    "vSphericalYZ",
    "vSphericalZX",
];

macro_rules! texture_slot {
    ($(#[$meta:meta])* $getter:ident, $setter:ident) => {
        $(#[$meta])*
        pub fn $getter(&self) -> Option<TextureId> {
            self.$getter
        }

        pub fn $setter(&mut self, texture: Option<TextureId>) {
            if self.$getter != texture {
                self.$getter = texture;
                self.base.mark_dirty(MaterialDirtyFlags::TEXTURE);
            }
        }
    };
}

macro_rules! misc_flag {
    ($getter:ident, $setter:ident, $flags:expr) => {
        pub fn $getter(&self) -> bool {
            self.$getter
        }

        pub fn $setter(&mut self, value: bool) {
            if self.$getter != value {
                self.$getter = value;
                self.base.mark_dirty($flags);
            }
        }
    };
}

#[derive(Debug)]
pub struct PbrMaterial {
    base: MaterialBase,
    pub albedo_color: Color3,
    /// Specular color of the specular/glossiness workflow
    pub reflectivity_color: Color3,
    /// Glossiness of the specular/glossiness workflow
    pub micro_surface: f32,
    pub emissive_color: Color3,
    pub ambient_color: Color3,
    pub reflection_color: Color3,
    pub direct_intensity: f32,
    pub emissive_intensity: f32,
    pub environment_intensity: f32,
    pub specular_intensity: f32,
    pub ambient_texture_strength: f32,
    pub ambient_texture_impact_on_analytical_lights: f32,
    /// Profile index in the scene's sub-surface configuration
    pub scattering_diffusion_profile: usize,
    pub brdf: PbrBrdfConfiguration,
    metallic: Option<f32>,
    roughness: Option<f32>,
    alpha_cutoff: f32,
    max_simultaneous_lights: usize,
    albedo_texture: Option<TextureId>,
    ambient_texture: Option<TextureId>,
    opacity_texture: Option<TextureId>,
    emissive_texture: Option<TextureId>,
    bump_texture: Option<TextureId>,
    reflection_texture: Option<TextureId>,
    lightmap_texture: Option<TextureId>,
    metallic_texture: Option<TextureId>,
    reflectivity_texture: Option<TextureId>,
    unlit: bool,
    two_sided_lighting: bool,
    use_alpha_from_albedo_texture: bool,
    use_roughness_from_metallic_texture_alpha: bool,
    use_metallness_from_metallic_texture_blue: bool,
    use_micro_surface_from_reflectivity_map_alpha: bool,
    use_ambient_in_grayscale: bool,
    use_lightmap_as_shadowmap: bool,
    use_sub_surface_scattering: bool,
    image_processing: Option<ImageProcessingConfiguration>,
    image_processing_id: Option<u64>,
}

impl PbrMaterial {
    pub fn new(name: &str) -> Self {
        Self {
            base: MaterialBase::new(name),
            albedo_color: Color3::white(),
            reflectivity_color: Color3::white(),
            micro_surface: 1.0,
            emissive_color: Color3::black(),
            ambient_color: Color3::black(),
            reflection_color: Color3::white(),
            direct_intensity: 1.0,
            emissive_intensity: 1.0,
            environment_intensity: 1.0,
            specular_intensity: 1.0,
            ambient_texture_strength: 1.0,
            ambient_texture_impact_on_analytical_lights: 0.0,
            scattering_diffusion_profile: 0,
            brdf: PbrBrdfConfiguration::new(),
            metallic: None,
            roughness: None,
            alpha_cutoff: 0.4,
            max_simultaneous_lights: DEFAULT_MAX_SIMULTANEOUS_LIGHTS,
            albedo_texture: None,
            ambient_texture: None,
            opacity_texture: None,
            emissive_texture: None,
            bump_texture: None,
            reflection_texture: None,
            lightmap_texture: None,
            metallic_texture: None,
            reflectivity_texture: None,
            unlit: false,
            two_sided_lighting: false,
            use_alpha_from_albedo_texture: false,
            use_roughness_from_metallic_texture_alpha: true,
            use_metallness_from_metallic_texture_blue: false,
            use_micro_surface_from_reflectivity_map_alpha: false,
            use_ambient_in_grayscale: false,
            use_lightmap_as_shadowmap: false,
            use_sub_surface_scattering: false,
            image_processing: None,
            image_processing_id: None,
        }
    }

    /// Metal/rough values; setting either switches to the metallic workflow
    pub fn metallic(&self) -> Option<f32> {
        self.metallic
    }

    pub fn set_metallic(&mut self, value: Option<f32>) {
        if self.metallic.is_some() != value.is_some() {
            self.base.mark_dirty(MaterialDirtyFlags::TEXTURE);
        }
        self.metallic = value;
    }

    pub fn roughness(&self) -> Option<f32> {
        self.roughness
    }

    pub fn set_roughness(&mut self, value: Option<f32>) {
        if self.roughness.is_some() != value.is_some() {
            self.base.mark_dirty(MaterialDirtyFlags::TEXTURE);
        }
        self.roughness = value;
    }

    pub fn alpha_cutoff(&self) -> f32 {
        self.alpha_cutoff
    }

    pub fn set_alpha_cutoff(&mut self, value: f32) {
        if self.alpha_cutoff != value {
            self.alpha_cutoff = value;
            self.base.mark_dirty(MaterialDirtyFlags::MISC);
        }
    }

    pub fn max_simultaneous_lights(&self) -> usize {
        self.max_simultaneous_lights
    }

    pub fn set_max_simultaneous_lights(&mut self, value: usize) {
        if self.max_simultaneous_lights != value {
            self.max_simultaneous_lights = value;
            self.base.mark_dirty(MaterialDirtyFlags::LIGHT);
        }
    }

    texture_slot!(albedo_texture, set_albedo_texture);
    texture_slot!(ambient_texture, set_ambient_texture);
    texture_slot!(opacity_texture, set_opacity_texture);
    texture_slot!(emissive_texture, set_emissive_texture);
    texture_slot!(bump_texture, set_bump_texture);
    texture_slot!(
        /// Environment override; the scene environment texture is used otherwise
        reflection_texture,
        set_reflection_texture
    );
    texture_slot!(lightmap_texture, set_lightmap_texture);
    texture_slot!(
        /// Metallic (blue or red), roughness (green or alpha) packed texture
        metallic_texture,
        set_metallic_texture
    );
    texture_slot!(reflectivity_texture, set_reflectivity_texture);

    misc_flag!(unlit, set_unlit, MaterialDirtyFlags::MISC);
    misc_flag!(two_sided_lighting, set_two_sided_lighting, MaterialDirtyFlags::MISC);
    misc_flag!(
        use_alpha_from_albedo_texture,
        set_use_alpha_from_albedo_texture,
        MaterialDirtyFlags::TEXTURE
    );
    misc_flag!(
        use_roughness_from_metallic_texture_alpha,
        set_use_roughness_from_metallic_texture_alpha,
        MaterialDirtyFlags::TEXTURE
    );
    misc_flag!(
        use_metallness_from_metallic_texture_blue,
        set_use_metallness_from_metallic_texture_blue,
        MaterialDirtyFlags::TEXTURE
    );
    misc_flag!(
        use_micro_surface_from_reflectivity_map_alpha,
        set_use_micro_surface_from_reflectivity_map_alpha,
        MaterialDirtyFlags::TEXTURE
    );
    misc_flag!(use_ambient_in_grayscale, set_use_ambient_in_grayscale, MaterialDirtyFlags::TEXTURE);
    misc_flag!(use_lightmap_as_shadowmap, set_use_lightmap_as_shadowmap, MaterialDirtyFlags::TEXTURE);
    misc_flag!(
        use_sub_surface_scattering,
        set_use_sub_surface_scattering,
        MaterialDirtyFlags::PREPASS
    );

    /// Configuration used instead of the scene's one
    pub fn image_processing_configuration(&self) -> Option<&ImageProcessingConfiguration> {
        self.image_processing.as_ref()
    }

    pub fn set_image_processing_configuration(&mut self, configuration: Option<ImageProcessingConfiguration>) {
        self.image_processing = configuration;
        self.image_processing_id = None;
        self.base.mark_dirty(MaterialDirtyFlags::IMAGE_PROCESSING);
    }

    fn is_metallic_workflow(&self) -> bool {
        self.metallic.is_some() || self.roughness.is_some() || self.metallic_texture.is_some()
    }

    fn reflection_source(&self, ctx: &MaterialContext<'_>) -> Option<TextureId> {
        self.reflection_texture.or(ctx.environment_texture)
    }

    fn uniforms(&self) -> Vec<UniformDecl> {
        let mut uniforms = vec![
            UniformDecl::new("world", UniformType::Mat4),
            UniformDecl::new("view", UniformType::Mat4),
            UniformDecl::new("viewProjection", UniformType::Mat4),
            UniformDecl::new("vEyePosition", UniformType::Vec4),
            UniformDecl::new("vAlbedoColor", UniformType::Vec4),
            UniformDecl::new("vAlbedoInfos", UniformType::Vec2),
            UniformDecl::new("vOpacityInfos", UniformType::Vec2),
            UniformDecl::new("vBumpInfos", UniformType::Vec3),
            UniformDecl::new("vReflectivityColor", UniformType::Vec4),
            UniformDecl::new("vReflectivityInfos", UniformType::Vec3),
            UniformDecl::new("vAmbientInfos", UniformType::Vec4),
            UniformDecl::new("vLightmapInfos", UniformType::Vec2),
            UniformDecl::new("vReflectionMicrosurfaceInfos", UniformType::Vec3),
            UniformDecl::new("vReflectionInfos", UniformType::Vec2),
            UniformDecl::new("vReflectionColor", UniformType::Vec3),
            UniformDecl::new("vEmissiveColor", UniformType::Vec3),
            UniformDecl::new("vEmissiveInfos", UniformType::Vec2),
            UniformDecl::new("vLightingIntensity", UniformType::Vec4),
            UniformDecl::new("vAmbientColor", UniformType::Vec3),
            UniformDecl::new("visibility", UniformType::Float),
            UniformDecl::new("scatteringDiffusionProfile", UniformType::Float),
            UniformDecl::new("vClipPlane", UniformType::Vec4),
        ];
        uniforms.extend(
            SPHERICAL_UNIFORMS
                .iter()
                .map(|name| UniformDecl::new(name, UniformType::Vec3)),
        );
        for index in 0..self.max_simultaneous_lights {
            uniforms.extend(LightSnapshot::uniforms(index));
        }
        ImageProcessingConfiguration::prepare_uniforms(&mut uniforms);
        uniforms
    }

    fn samplers(&self, defines: &PbrMaterialDefines) -> Vec<SamplerDecl> {
        let mut samplers: Vec<SamplerDecl> = SAMPLERS.iter().map(|name| SamplerDecl::new(name)).collect();
        samplers.push(SamplerDecl::with_dimension("reflectionSampler", TextureDimension::Cube));
        ImageProcessingConfiguration::prepare_samplers(&mut samplers, &defines.image_processing);
        samplers
    }

    fn prepare_texture_defines(
        &self,
        engine: &Engine,
        ctx: &MaterialContext<'_>,
        defines: &mut PbrMaterialDefines,
    ) {
        let texture = |id: Option<TextureId>| -> Option<&BaseTexture> {
            id.and_then(|id| ctx.textures.get(id)).map(|t| t.base())
        };

        let albedo = texture(self.albedo_texture);
        defines
            .set_bool("ALBEDO", albedo.is_some())
            .set_bool("GAMMAALBEDO", albedo.is_some_and(|t| t.gamma_space))
            .set_bool(
                "ALPHAFROMALBEDO",
                albedo.is_some_and(|t| t.has_alpha) && self.use_alpha_from_albedo_texture,
            );

        let ambient = texture(self.ambient_texture);
        defines
            .set_bool("AMBIENT", ambient.is_some())
            .set_bool("AMBIENTINGRAYSCALE", ambient.is_some() && self.use_ambient_in_grayscale);

        let opacity = texture(self.opacity_texture);
        defines
            .set_bool("OPACITY", opacity.is_some())
            .set_bool("OPACITYRGB", opacity.is_some_and(|t| t.get_alpha_from_rgb));

        let reflection = texture(self.reflection_source(ctx)).filter(|t| t.is_cube);
        let polynomial = reflection
            .and_then(|t| t.internal_texture())
            .and_then(|key| engine.internal_texture(key))
            .is_some_and(|t| t.spherical_polynomial().is_some());
        defines
            .set_bool("REFLECTION", reflection.is_some())
            .set_bool("REFLECTIONMAP_3D", reflection.is_some())
            .set_bool("REFLECTIONMAP_CUBIC", reflection.is_some())
            .set_bool("LODBASEDMICROSFURACE", reflection.is_some())
            .set_bool("REFLECTIONMAP_OPPOSITEZ", reflection.is_some_and(|t| t.invert_z))
            .set_bool(
                "INVERTCUBICMAP",
                reflection.is_some_and(|t| t.coordinates_mode == CoordinatesMode::InvCubic),
            )
            .set_bool("GAMMAREFLECTION", reflection.is_some_and(|t| t.gamma_space))
            .set_bool("RGBDREFLECTION", reflection.is_some_and(|t| t.is_rgbd(engine)))
            .set_bool("USESPHERICALFROMREFLECTIONMAP", polynomial);

        let lightmap = texture(self.lightmap_texture);
        defines
            .set_bool("LIGHTMAP", lightmap.is_some())
            .set_bool("GAMMALIGHTMAP", lightmap.is_some_and(|t| t.gamma_space))
            .set_bool("USELIGHTMAPASSHADOWMAP", lightmap.is_some() && self.use_lightmap_as_shadowmap);

        defines.set_bool("EMISSIVE", texture(self.emissive_texture).is_some());

        let metallic_workflow = self.is_metallic_workflow();
        defines.set_bool("METALLICWORKFLOW", metallic_workflow);
        if metallic_workflow {
            let metallic = texture(self.metallic_texture);
            defines
                .set_bool("REFLECTIVITY", metallic.is_some())
                .set_bool(
                    "ROUGHNESSSTOREINMETALMAPALPHA",
                    metallic.is_some() && self.use_roughness_from_metallic_texture_alpha,
                )
                .set_bool(
                    "ROUGHNESSSTOREINMETALMAPGREEN",
                    metallic.is_some() && !self.use_roughness_from_metallic_texture_alpha,
                )
                .set_bool(
                    "METALLNESSSTOREINMETALMAPBLUE",
                    metallic.is_some() && self.use_metallness_from_metallic_texture_blue,
                )
                .set_bool("MICROSURFACEFROMREFLECTIVITYMAP", false);
        } else {
            let reflectivity = texture(self.reflectivity_texture);
            defines
                .set_bool("REFLECTIVITY", reflectivity.is_some())
                .set_bool("ROUGHNESSSTOREINMETALMAPALPHA", false)
                .set_bool("ROUGHNESSSTOREINMETALMAPGREEN", false)
                .set_bool("METALLNESSSTOREINMETALMAPBLUE", false)
                .set_bool(
                    "MICROSURFACEFROMREFLECTIVITYMAP",
                    reflectivity.is_some() && self.use_micro_surface_from_reflectivity_map_alpha,
                );
        }

        defines.set_bool("BUMP", texture(self.bump_texture).is_some());
        defines.needs_uvs = self.active_textures().iter().any(|id| {
            ctx.textures
                .get(*id)
                .is_some_and(|t| t.base().coordinates_mode == CoordinatesMode::Explicit)
        });
    }

    fn prepare_light_defines(&self, ctx: &MaterialContext<'_>, defines: &mut PbrMaterialDefines) {
        let mut any_physical = false;
        let mut any_gltf = false;
        for index in 0..self.max_simultaneous_lights {
            match ctx.lights.get(index) {
                Some(light) => {
                    light.prepare_defines(defines, index);
                    any_physical |= light.falloff == crate::lights::LightFalloff::Physical;
                    any_gltf |= light.falloff == crate::lights::LightFalloff::Gltf;
                }
                None => LightSnapshot::clear_defines(defines, index),
            }
        }
        // Slots beyond the current limit may still hold defines from before
        let mut index = self.max_simultaneous_lights;
        while defines.has_bool(&format!("LIGHT{}", index)) {
            LightSnapshot::clear_defines(defines, index);
            index += 1;
        }
        defines
            .set_bool("USEPHYSICALLIGHTFALLOFF", any_physical)
            .set_bool("USEGLTFLIGHTFALLOFF", any_gltf);
        defines.needs_normals |= !ctx.lights.is_empty();
    }

    fn prepare_misc_defines(
        &self,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        defines: &mut PbrMaterialDefines,
    ) {
        let alpha_test = self.needs_alpha_testing()
            || (defines.bool("ALPHAFROMALBEDO") && !self.needs_alpha_blending());
        defines
            .set_bool("ALPHATEST", alpha_test)
            .set_string("ALPHATESTVALUE", &format_cutoff(self.alpha_cutoff))
            .set_bool("ALPHABLEND", self.needs_alpha_blending_for_mesh(mesh))
            .set_bool(
                "PREMULTIPLYALPHA",
                matches!(
                    self.base.alpha_mode,
                    AlphaMode::Premultiplied | AlphaMode::PremultipliedPorterDuff
                ),
            )
            .set_bool("UNLIT", self.unlit)
            .set_bool("TWOSIDEDLIGHTING", !self.base.back_face_culling && self.two_sided_lighting)
            .set_bool("CLIPPLANE", ctx.clip_plane.is_some())
            .set_bool("NONUNIFORMSCALING", mesh.non_uniform_scaling)
            .set_bool("SPECULARTERM", !self.unlit);
        self.brdf.prepare_defines(defines);
    }

    fn prepare_pre_pass_defines(&self, ctx: &MaterialContext<'_>, defines: &mut PbrMaterialDefines) {
        match ctx.pre_pass.filter(|p| p.enabled() && self.base.use_pre_pass) {
            Some(pre_pass) => {
                pre_pass.prepare_defines(defines);
                defines.set_bool(
                    "SS_SCATTERING",
                    self.use_sub_surface_scattering
                        && pre_pass.get_index(PrePassTextureType::Irradiance) >= 0,
                );
            }
            None => {
                PrePassRenderer::default().prepare_defines(defines);
                defines.set_bool("SS_SCATTERING", false);
            }
        }
    }

    fn prepare_attribute_defines(&self, mesh: &MeshDrawInfo, defines: &mut PbrMaterialDefines) {
        defines.normals = mesh.has_normals;
        defines.uvs = mesh.has_uvs;
        let normals = defines.needs_normals && mesh.has_normals;
        let uvs = defines.needs_uvs && mesh.has_uvs;
        defines
            .set_bool("NORMAL", normals)
            .set_bool("MAINUV1", uvs)
            .set_bool("UV1", uvs)
            .set_bool("VERTEXCOLOR", mesh.has_vertex_colors)
            .set_bool("VERTEXALPHA", mesh.has_vertex_colors && mesh.has_vertex_alpha);
    }

    fn textures_ready(&self, engine: &Engine, ctx: &MaterialContext<'_>) -> bool {
        let mut ids = self.active_textures();
        ids.extend(self.reflection_source(ctx));
        ids.iter()
            .filter_map(|id| ctx.textures.get(*id))
            .all(|texture| texture.is_ready(engine))
    }
}

/// Formats the cutoff so it parses back as a float constant
fn format_cutoff(value: f32) -> String {
    let text = format!("{}", value);
    if text.contains('.') || text.contains('e') {
        text
    } else {
        format!("{}.0", text)
    }
}

impl Material for PbrMaterial {
    fn base(&self) -> &MaterialBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MaterialBase {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "PBRMaterial"
    }

    fn needs_alpha_blending(&self) -> bool {
        match self.base.transparency_mode {
            Some(mode) => matches!(
                mode,
                TransparencyMode::AlphaBlend | TransparencyMode::AlphaTestAndBlend
            ),
            None => self.base.alpha < 1.0 || self.opacity_texture.is_some(),
        }
    }

    fn is_ready_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &mut DrawWrapper,
    ) -> Result<bool> {
        let mut defines = wrapper.take_defines::<PbrMaterialDefines>();
        let flags = wrapper.take_material_dirty(&self.base);
        defines.mark_dirty(flags);
        if self.brdf.take_dirty() {
            self.base.mark_dirty(MaterialDirtyFlags::MISC);
            defines.mark_as_misc_dirty();
            // Keep the log in step so this wrapper does not see MISC twice
            wrapper.take_material_dirty(&self.base);
        }

        let ready = self.prepare_for_mesh(engine, ctx, mesh, wrapper, &mut defines);
        wrapper.put_defines(defines);
        ready
    }

    fn bind_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &DrawWrapper,
    ) -> Option<EffectKey> {
        let key = wrapper.effect?;
        let defines = wrapper.defines::<PbrMaterialDefines>()?;
        let texture = |id: Option<TextureId>| id.and_then(|id| ctx.textures.get(id));
        let texture_key = |id: Option<TextureId>| texture(id).and_then(|t| t.base().internal_texture());

        let reflection = texture(self.reflection_source(ctx)).filter(|t| t.base().is_cube);
        let reflection_key = reflection.and_then(|t| t.base().internal_texture());
        let mut microsurface_infos = [0.0f32; 3];
        let mut harmonics = None;
        if let Some(key) = reflection_key {
            if let Some(internal) = engine.internal_texture_mut(key) {
                microsurface_infos = [
                    internal.width as f32,
                    internal.lod_generation_scale(),
                    internal.lod_generation_offset(),
                ];
                if defines.bool("USESPHERICALFROMREFLECTIONMAP") {
                    harmonics = internal.spherical_polynomial_mut().map(|p| {
                        let polynomial = p.clone();
                        (p.pre_scaled_harmonics(), polynomial)
                    });
                }
            }
        }
        let level = |id: Option<TextureId>| texture(id).map_or(1.0, |t| t.base().level);
        let image_processing = self.image_processing.as_ref().unwrap_or(ctx.image_processing);

        let effect = engine.get_effect_mut(key)?;
        effect
            .set_matrix("world", &mesh.world)
            .set_matrix("view", &ctx.camera.view)
            .set_matrix("viewProjection", &ctx.camera.view_projection())
            .set_vector4("vEyePosition", ctx.camera.position.to_vec().extend(1.0))
            .set_color4("vAlbedoColor", &self.albedo_color, self.base.alpha)
            .set_float2("vAlbedoInfos", 0.0, level(self.albedo_texture))
            .set_float2("vOpacityInfos", 0.0, level(self.opacity_texture))
            .set_float3("vBumpInfos", 0.0, level(self.bump_texture), 0.05)
            .set_float2("vLightmapInfos", 0.0, level(self.lightmap_texture))
            .set_float2("vEmissiveInfos", 0.0, level(self.emissive_texture))
            .set_float4(
                "vAmbientInfos",
                0.0,
                level(self.ambient_texture),
                self.ambient_texture_strength,
                self.ambient_texture_impact_on_analytical_lights,
            )
            .set_float3(
                "vReflectionMicrosurfaceInfos",
                microsurface_infos[0],
                microsurface_infos[1],
                microsurface_infos[2],
            )
            .set_float2(
                "vReflectionInfos",
                reflection.map_or(0.0, |t| t.base().level),
                0.0,
            )
            .set_color3("vReflectionColor", &self.reflection_color)
            .set_color3("vEmissiveColor", &self.emissive_color)
            .set_float4(
                "vLightingIntensity",
                self.direct_intensity,
                self.emissive_intensity,
                self.environment_intensity,
                self.specular_intensity,
            )
            .set_color3("vAmbientColor", &Color3::new(
                ctx.ambient_color.r * self.ambient_color.r,
                ctx.ambient_color.g * self.ambient_color.g,
                ctx.ambient_color.b * self.ambient_color.b,
            ))
            .set_float("visibility", mesh.visibility)
            .set_float("scatteringDiffusionProfile", self.scattering_diffusion_profile as f32);

        if self.is_metallic_workflow() {
            effect.set_float4(
                "vReflectivityColor",
                self.metallic.unwrap_or(1.0),
                self.roughness.unwrap_or(1.0),
                0.0,
                0.0,
            );
            effect.set_float3("vReflectivityInfos", 0.0, level(self.metallic_texture), 1.0);
        } else {
            effect.set_color4("vReflectivityColor", &self.reflectivity_color, self.micro_surface);
            effect.set_float3("vReflectivityInfos", 0.0, level(self.reflectivity_texture), 1.0);
        }

        if let Some(plane) = ctx.clip_plane {
            let [a, b, c, d] = plane.to_array();
            effect.set_float4("vClipPlane", a, b, c, d);
        }

        if let Some((harmonics, polynomial)) = harmonics {
            if defines.bool("SPHERICAL_HARMONICS") {
                let coefficients = harmonics.coefficients();
                for (name, value) in SPHERICAL_UNIFORMS.iter().zip(coefficients) {
                    effect.set_vector3(name, value);
                }
            } else {
                let polynomial_values = [
                    polynomial.x,
                    polynomial.y,
                    polynomial.z,
                    polynomial.xx - polynomial.zz,
                    polynomial.yy - polynomial.zz,
                    polynomial.zz,
                    polynomial.xy,
                    polynomial.yz,
                    polynomial.zx,
                ];
                for (name, value) in SPHERICAL_UNIFORMS[9..].iter().zip(polynomial_values) {
                    effect.set_vector3(name, value);
                }
            }
        }

        for (index, light) in ctx.lights.iter().take(self.max_simultaneous_lights).enumerate() {
            light.bind(effect, index);
        }

        effect
            .set_texture("albedoSampler", texture_key(self.albedo_texture))
            .set_texture("opacitySampler", texture_key(self.opacity_texture))
            .set_texture("bumpSampler", texture_key(self.bump_texture))
            .set_texture(
                "reflectivitySampler",
                texture_key(if self.is_metallic_workflow() {
                    self.metallic_texture
                } else {
                    self.reflectivity_texture
                }),
            )
            .set_texture("ambientSampler", texture_key(self.ambient_texture))
            .set_texture("lightmapSampler", texture_key(self.lightmap_texture))
            .set_texture("emissiveSampler", texture_key(self.emissive_texture))
            .set_texture("reflectionSampler", reflection_key);

        if defines.image_processing.imageprocessing || defines.image_processing.colorgrading {
            image_processing.bind(effect, ctx.render_size.width, ctx.render_size.height, None);
        }
        Some(key)
    }

    fn mark_dirty(&mut self, flags: MaterialDirtyFlags) {
        self.base.mark_dirty(flags);
    }

    fn active_textures(&self) -> Vec<TextureId> {
        [
            self.albedo_texture,
            self.ambient_texture,
            self.opacity_texture,
            self.emissive_texture,
            self.bump_texture,
            self.reflection_texture,
            self.lightmap_texture,
            self.metallic_texture,
            self.reflectivity_texture,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({
            "customType": "BABYLON.PBRMaterial",
            "name": self.base.name,
            "alpha": self.base.alpha,
            "backFaceCulling": self.base.back_face_culling,
            "albedoColor": self.albedo_color.to_array(),
            "reflectivityColor": self.reflectivity_color.to_array(),
            "emissiveColor": self.emissive_color.to_array(),
            "ambientColor": self.ambient_color.to_array(),
            "microSurface": self.micro_surface,
            "metallic": self.metallic,
            "roughness": self.roughness,
            "alphaCutOff": self.alpha_cutoff,
            "unlit": self.unlit,
            "maxSimultaneousLights": self.max_simultaneous_lights,
            "brdf": self.brdf.serialize(),
        })
    }

    fn dispose(&mut self, _engine: &mut Engine) {
        self.image_processing = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PbrMaterial {
    fn prepare_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &mut DrawWrapper,
        defines: &mut PbrMaterialDefines,
    ) -> Result<bool> {
        if defines.render_id == Some(ctx.render_id) && !defines.is_dirty() {
            return Ok(wrapper.effect.is_some_and(|key| engine.is_effect_ready(key)));
        }
        if !self.textures_ready(engine, ctx) {
            return Ok(false);
        }

        let image_processing = self.image_processing.as_ref().unwrap_or(ctx.image_processing);
        if self.image_processing_id != Some(image_processing.update_id()) {
            self.image_processing_id = Some(image_processing.update_id());
            defines.mark_as_image_processing_dirty();
        }

        self.prepare_texture_defines(engine, ctx, defines);
        self.prepare_light_defines(ctx, defines);
        self.prepare_misc_defines(ctx, mesh, defines);
        self.prepare_pre_pass_defines(ctx, defines);
        self.prepare_attribute_defines(mesh, defines);
        let mut ip_defines = defines.image_processing;
        image_processing.prepare_defines(&mut ip_defines, false);
        if ip_defines != defines.image_processing {
            defines.image_processing = ip_defines;
            defines.mark_as_unprocessed();
        }

        if defines.is_dirty() || wrapper.effect.is_none() {
            let mut index_parameters = HashMap::new();
            index_parameters.insert(
                "maxSimultaneousLights".to_string(),
                self.max_simultaneous_lights as i64,
            );
            let options = EffectCreationOptions::new("pbr", "pbr")
                .with_uniforms(self.uniforms())
                .with_samplers(self.samplers(defines))
                .with_defines(&defines.to_string())
                .with_index_parameters(index_parameters)
                .with_vertex_input(VertexInput::Mesh, &["position", "normal", "uv", "color"]);
            let key = engine.create_effect(options);
            if wrapper.effect != Some(key) {
                debug!("Material '{}' switched effect", self.base.name);
            }
            wrapper.set_effect(engine, key);
            defines.mark_as_processed();
        }
        defines.render_id = Some(ctx.render_id);

        Ok(wrapper.effect.is_some_and(|key| engine.is_effect_ready(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::CameraSnapshot;
    use crate::engine::constants::SamplingMode;
    use crate::engine::{EngineOptions, HeadlessBackend};
    use crate::maths::Size;
    use crate::prepass::PrePassEffectConfiguration;
    use crate::scene::NodeId;
    use crate::textures::{Texture, TextureArena};
    use cgmath::{Matrix4, SquareMatrix};

    struct Fixture {
        engine: Engine,
        camera: CameraSnapshot,
        image_processing: ImageProcessingConfiguration,
        textures: TextureArena,
        mesh: MeshDrawInfo,
    }

    impl Fixture {
        fn new() -> Self {
            let id = slotmap::SlotMap::<NodeId, ()>::with_key().insert(());
            Self {
                engine: Engine::new(Box::new(HeadlessBackend::new(32, 32)), EngineOptions::default()),
                camera: CameraSnapshot::default(),
                image_processing: ImageProcessingConfiguration::new(),
                textures: TextureArena::with_key(),
                mesh: MeshDrawInfo {
                    id,
                    world: Matrix4::identity(),
                    visibility: 1.0,
                    has_normals: true,
                    has_uvs: true,
                    has_vertex_colors: false,
                    has_vertex_alpha: false,
                    non_uniform_scaling: false,
                },
            }
        }

        fn ctx<'a>(&'a self, pre_pass: Option<&'a PrePassRenderer>, render_id: u64) -> MaterialContext<'a> {
            MaterialContext {
                camera: &self.camera,
                lights: &[],
                image_processing: &self.image_processing,
                pre_pass,
                textures: &self.textures,
                ambient_color: Color3::black(),
                environment_texture: None,
                clip_plane: None,
                render_size: Size::new(32, 32),
                render_id,
            }
        }
    }

    fn ready(material: &mut PbrMaterial, fixture: &mut Fixture, wrapper: &mut DrawWrapper, render_id: u64) -> bool {
        let mut engine = std::mem::replace(
            &mut fixture.engine,
            Engine::new(Box::new(HeadlessBackend::new(1, 1)), EngineOptions::default()),
        );
        let mesh = fixture.mesh;
        let result = material
            .is_ready_for_mesh(&mut engine, &fixture.ctx(None, render_id), &mesh, wrapper)
            .unwrap();
        fixture.engine = engine;
        result
    }

    #[test]
    fn test_effect_compiles_and_is_shared() {
        let mut fixture = Fixture::new();
        let mut material = PbrMaterial::new("pbr");
        let mut first = DrawWrapper::default();
        let mut second = DrawWrapper::default();
        assert!(ready(&mut material, &mut fixture, &mut first, 1));
        assert!(ready(&mut material, &mut fixture, &mut second, 1));
        assert_eq!(first.effect, second.effect);
        assert_eq!(fixture.engine.effect_count(), 1);
    }

    #[test]
    fn test_texture_switches_defines() {
        let mut fixture = Fixture::new();
        let texture = Texture::from_raw_rgba(
            &mut fixture.engine,
            "white",
            &[255; 16],
            2,
            2,
            SamplingMode::Bilinear,
        )
        .unwrap();
        let id = fixture.textures.insert(Box::new(texture));

        let mut material = PbrMaterial::new("pbr");
        let mut wrapper = DrawWrapper::default();
        assert!(ready(&mut material, &mut fixture, &mut wrapper, 1));
        let before = wrapper.effect;
        assert!(!wrapper.defines::<PbrMaterialDefines>().unwrap()["ALBEDO"]);

        material.set_albedo_texture(Some(id));
        assert!(ready(&mut material, &mut fixture, &mut wrapper, 2));
        let defines = wrapper.defines::<PbrMaterialDefines>().unwrap();
        assert!(defines["ALBEDO"]);
        assert!(defines["MAINUV1"]);
        assert_ne!(wrapper.effect, before);
        assert_eq!(fixture.engine.effect_count(), 1);
    }

    #[test]
    fn test_metallic_workflow_and_brdf_defines() {
        let mut fixture = Fixture::new();
        let mut material = PbrMaterial::new("pbr");
        material.set_metallic(Some(0.2));
        material.brdf.set_use_energy_conservation(false);
        let mut wrapper = DrawWrapper::default();
        assert!(ready(&mut material, &mut fixture, &mut wrapper, 1));
        let defines = wrapper.defines::<PbrMaterialDefines>().unwrap();
        assert!(defines["METALLICWORKFLOW"]);
        assert!(!defines["MS_BRDF_ENERGY_CONSERVATION"]);
        assert!(defines["SPHERICAL_HARMONICS"]);
    }

    #[test]
    fn test_alpha_cutoff_becomes_a_float_define() {
        let mut material = PbrMaterial::new("pbr");
        material.base_mut().transparency_mode = Some(crate::engine::constants::TransparencyMode::AlphaTest);
        material.set_alpha_cutoff(1.0);
        let mut fixture = Fixture::new();
        let mut wrapper = DrawWrapper::default();
        assert!(ready(&mut material, &mut fixture, &mut wrapper, 1));
        let defines = wrapper.defines::<PbrMaterialDefines>().unwrap();
        assert!(defines["ALPHATEST"]);
        assert_eq!(defines.string("ALPHATESTVALUE"), "1.0");
    }

    #[test]
    fn test_pre_pass_defines_follow_renderer() {
        let mut fixture = Fixture::new();
        let mut pre_pass = PrePassRenderer::new();
        pre_pass.add_effect_configuration(PrePassEffectConfiguration::new(
            "subSurface",
            &[PrePassTextureType::Irradiance, PrePassTextureType::Albedo],
        ));
        let mut material = PbrMaterial::new("pbr");
        material.set_use_sub_surface_scattering(true);
        let mut wrapper = DrawWrapper::default();
        let mesh = fixture.mesh;
        let mut engine = std::mem::replace(
            &mut fixture.engine,
            Engine::new(Box::new(HeadlessBackend::new(1, 1)), EngineOptions::default()),
        );
        let ctx = fixture.ctx(Some(&pre_pass), 1);
        assert!(material.is_ready_for_mesh(&mut engine, &ctx, &mesh, &mut wrapper).unwrap());
        let defines = wrapper.defines::<PbrMaterialDefines>().unwrap();
        assert!(defines["PREPASS"]);
        assert!(defines["SS_SCATTERING"]);
        assert_eq!(defines.int("SCENE_MRT_COUNT"), 3);
        assert_eq!(defines.int("PREPASS_ALBEDO_INDEX"), 2);
    }

    #[test]
    fn test_bind_writes_uniforms() {
        let mut fixture = Fixture::new();
        let mut material = PbrMaterial::new("pbr");
        material.albedo_color = Color3::new(1.0, 0.5, 0.25);
        let mut wrapper = DrawWrapper::default();
        assert!(ready(&mut material, &mut fixture, &mut wrapper, 1));
        let mesh = fixture.mesh;
        let mut engine = std::mem::replace(
            &mut fixture.engine,
            Engine::new(Box::new(HeadlessBackend::new(1, 1)), EngineOptions::default()),
        );
        let key = material
            .bind_for_mesh(&mut engine, &fixture.ctx(None, 1), &mesh, &wrapper)
            .unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert_eq!(
            effect.value("vAlbedoColor"),
            Some(crate::materials::effect::UniformValue::Vec4([1.0, 0.5, 0.25, 1.0]))
        );
    }

    #[test]
    fn test_attribute_defines_follow_mesh() {
        let mut fixture = Fixture::new();
        fixture.mesh.has_uvs = false;
        fixture.mesh.has_vertex_colors = true;
        let texture = Texture::from_raw_rgba(
            &mut fixture.engine,
            "white",
            &[255; 16],
            2,
            2,
            SamplingMode::Bilinear,
        )
        .unwrap();
        let id = fixture.textures.insert(Box::new(texture));
        let mut material = PbrMaterial::new("pbr");
        material.set_albedo_texture(Some(id));
        let mut wrapper = DrawWrapper::default();
        assert!(ready(&mut material, &mut fixture, &mut wrapper, 1));
        let defines = wrapper.defines::<PbrMaterialDefines>().unwrap();
        assert!(!defines["MAINUV1"]);
        assert!(!defines["UV1"]);
        assert!(defines["VERTEXCOLOR"]);
        assert!(!defines["VERTEXALPHA"]);
    }

    #[test]
    fn test_format_cutoff() {
        assert_eq!(format_cutoff(0.4), "0.4");
        assert_eq!(format_cutoff(1.0), "1.0");
    }
}
