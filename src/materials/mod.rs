//! Materials: define sets, effects and the shading models built on them

pub mod defines;
pub mod effect;
pub mod image_processing;
pub mod node;
pub mod pbr;

use std::any::Any;
use std::fmt;

use cgmath::Matrix4;
use slotmap::SlotMap;

use crate::cameras::CameraSnapshot;
use crate::engine::constants::{AlphaMode, TransparencyMode};
use crate::engine::Engine;
use crate::error::Result;
use crate::lights::LightSnapshot;
use crate::maths::{Color3, Plane, Size};
use crate::prepass::PrePassRenderer;
use crate::scene::NodeId;
use crate::textures::{TextureArena, TextureId};

pub use defines::{MaterialDefines, MaterialDirtyFlags};
pub use effect::{Effect, EffectCreationOptions, EffectKey};
pub use image_processing::{ImageProcessingConfiguration, ImageProcessingConfigurationDefines};
pub use node::NodeMaterial;
pub use pbr::{PbrBrdfConfiguration, PbrMaterial, PbrMaterialDefines};

slotmap::new_key_type! {
    /// Key of a material inside the scene
    pub struct MaterialId;
}

/// Arena of every material of a scene
pub type MaterialArena = SlotMap<MaterialId, Box<dyn Material>>;

/// Dirty marks kept so far; older marks collapse into "everything"
const DIRTY_HISTORY: usize = 32;

/// State shared by every material
#[derive(Debug, Clone)]
pub struct MaterialBase {
    pub name: String,
    pub alpha: f32,
    pub alpha_mode: AlphaMode,
    pub back_face_culling: bool,
    pub disable_depth_write: bool,
    pub transparency_mode: Option<TransparencyMode>,
    /// Renders into the pre-pass attachments when the scene has them
    pub use_pre_pass: bool,
    dirty_id: u64,
    dirty_log: Vec<(u64, MaterialDirtyFlags)>,
}

impl MaterialBase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alpha: 1.0,
            alpha_mode: AlphaMode::Combine,
            back_face_culling: true,
            disable_depth_write: false,
            transparency_mode: None,
            use_pre_pass: true,
            dirty_id: 0,
            dirty_log: Vec::new(),
        }
    }

    /// Records an invalidation every mesh picks up before its next draw
    pub fn mark_dirty(&mut self, flags: MaterialDirtyFlags) {
        if flags.is_empty() {
            return;
        }
        self.dirty_id += 1;
        self.dirty_log.push((self.dirty_id, flags));
        if self.dirty_log.len() > DIRTY_HISTORY {
            self.dirty_log.remove(0);
        }
    }

    /// Flags marked since `seen`, or `ALL` when that mark is no longer kept
    pub fn dirty_since(&self, seen: u64) -> MaterialDirtyFlags {
        if seen == self.dirty_id {
            return MaterialDirtyFlags::empty();
        }
        match self.dirty_log.first() {
            Some((oldest, _)) if *oldest <= seen + 1 => self
                .dirty_log
                .iter()
                .filter(|(id, _)| *id > seen)
                .fold(MaterialDirtyFlags::empty(), |acc, (_, flags)| acc | *flags),
            _ => MaterialDirtyFlags::ALL,
        }
    }

    pub fn dirty_id(&self) -> u64 {
        self.dirty_id
    }

    pub fn state(&self, has_alpha_blending: bool) -> (AlphaMode, bool) {
        if has_alpha_blending {
            (self.alpha_mode, false)
        } else {
            (AlphaMode::Disable, !self.disable_depth_write)
        }
    }
}

/// Per-mesh cache of the defines and effect a material computed
#[derive(Default)]
pub struct DrawWrapper {
    pub effect: Option<EffectKey>,
    defines: Option<Box<dyn Any>>,
    material: Option<MaterialId>,
    material_dirty_id: u64,
}

impl fmt::Debug for DrawWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawWrapper")
            .field("effect", &self.effect)
            .field("material", &self.material)
            .field("has_defines", &self.defines.is_some())
            .finish()
    }
}

impl DrawWrapper {
    /// Removes the cached defines of type `T`, or fresh ones when missing or
    /// of another type; hand them back with [`DrawWrapper::put_defines`]
    pub fn take_defines<T: Default + 'static>(&mut self) -> Box<T> {
        self.defines
            .take()
            .and_then(|defines| defines.downcast::<T>().ok())
            .unwrap_or_default()
    }

    pub fn put_defines<T: 'static>(&mut self, defines: Box<T>) {
        self.defines = Some(defines);
    }

    pub fn defines<T: 'static>(&self) -> Option<&T> {
        self.defines.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn material(&self) -> Option<MaterialId> {
        self.material
    }

    /// Points the wrapper at a material, dropping what the previous one cached
    pub fn bind_material(&mut self, engine: &mut Engine, material: Option<MaterialId>) {
        if self.material == material {
            return;
        }
        self.reset(engine);
        self.material = material;
    }

    /// Invalidations of `base` this wrapper has not applied yet
    pub fn take_material_dirty(&mut self, base: &MaterialBase) -> MaterialDirtyFlags {
        let flags = base.dirty_since(self.material_dirty_id);
        self.material_dirty_id = base.dirty_id();
        flags
    }

    /// Swaps the cached effect, keeping one engine reference
    pub fn set_effect(&mut self, engine: &mut Engine, effect: EffectKey) {
        if self.effect == Some(effect) {
            engine.release_effect(effect);
            return;
        }
        if let Some(previous) = self.effect.replace(effect) {
            engine.release_effect(previous);
        }
    }

    pub fn reset(&mut self, engine: &mut Engine) {
        if let Some(effect) = self.effect.take() {
            engine.release_effect(effect);
        }
        self.defines = None;
        self.material_dirty_id = 0;
    }
}

/// Mesh facts a material needs while choosing its defines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDrawInfo {
    pub id: NodeId,
    pub world: Matrix4<f32>,
    pub visibility: f32,
    pub has_normals: bool,
    pub has_uvs: bool,
    pub has_vertex_colors: bool,
    pub has_vertex_alpha: bool,
    pub non_uniform_scaling: bool,
}

/// Scene state visible to materials while meshes are drawn
#[derive(Clone, Copy)]
pub struct MaterialContext<'a> {
    pub camera: &'a CameraSnapshot,
    pub lights: &'a [LightSnapshot],
    pub image_processing: &'a ImageProcessingConfiguration,
    pub pre_pass: Option<&'a PrePassRenderer>,
    pub textures: &'a TextureArena,
    pub ambient_color: Color3,
    pub environment_texture: Option<TextureId>,
    pub clip_plane: Option<Plane>,
    pub render_size: Size,
    pub render_id: u64,
}

/// Behaviour of every material stored in a scene
pub trait Material: Any {
    fn base(&self) -> &MaterialBase;

    fn base_mut(&mut self) -> &mut MaterialBase;

    fn class_name(&self) -> &'static str;

    fn needs_alpha_blending(&self) -> bool {
        let base = self.base();
        match base.transparency_mode {
            Some(mode) => matches!(
                mode,
                TransparencyMode::AlphaBlend | TransparencyMode::AlphaTestAndBlend
            ),
            None => base.alpha < 1.0,
        }
    }

    fn needs_alpha_blending_for_mesh(&self, mesh: &MeshDrawInfo) -> bool {
        self.needs_alpha_blending() || mesh.visibility < 1.0
    }

    fn needs_alpha_testing(&self) -> bool {
        self.base()
            .transparency_mode
            .is_some_and(|mode| {
                matches!(
                    mode,
                    TransparencyMode::AlphaTest | TransparencyMode::AlphaTestAndBlend
                )
            })
    }

    /// Computes the mesh defines and compiles the matching effect
    ///
    /// Returns true once the effect in `wrapper` can be drawn with.
    fn is_ready_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &mut DrawWrapper,
    ) -> Result<bool>;

    /// Writes the uniforms and samplers of the mesh effect
    fn bind_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &DrawWrapper,
    ) -> Option<EffectKey>;

    fn mark_dirty(&mut self, flags: MaterialDirtyFlags) {
        self.base_mut().mark_dirty(flags);
    }

    /// Textures the material samples, for readiness checks
    fn active_textures(&self) -> Vec<TextureId> {
        Vec::new()
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({
            "customType": format!("BABYLON.{}", self.class_name()),
            "name": self.base().name,
            "alpha": self.base().alpha,
            "backFaceCulling": self.base().back_face_culling,
        })
    }

    fn dispose(&mut self, _engine: &mut Engine) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_since_collects_flags() {
        let mut base = MaterialBase::new("m");
        assert!(base.dirty_since(0).is_empty());
        base.mark_dirty(MaterialDirtyFlags::TEXTURE);
        base.mark_dirty(MaterialDirtyFlags::LIGHT);
        assert_eq!(
            base.dirty_since(0),
            MaterialDirtyFlags::TEXTURE | MaterialDirtyFlags::LIGHT
        );
        assert_eq!(base.dirty_since(1), MaterialDirtyFlags::LIGHT);
        assert!(base.dirty_since(2).is_empty());
    }

    #[test]
    fn test_forgotten_marks_dirty_everything() {
        let mut base = MaterialBase::new("m");
        for _ in 0..(DIRTY_HISTORY + 4) {
            base.mark_dirty(MaterialDirtyFlags::MISC);
        }
        assert_eq!(base.dirty_since(0), MaterialDirtyFlags::ALL);
        assert_eq!(base.dirty_since(base.dirty_id() - 1), MaterialDirtyFlags::MISC);
    }

    #[test]
    fn test_wrapper_defines_are_typed() {
        let mut wrapper = DrawWrapper::default();
        let mut defines = wrapper.take_defines::<MaterialDefines>();
        defines.set_bool("A", true);
        wrapper.put_defines(defines);
        assert!(wrapper.defines::<MaterialDefines>().is_some_and(|d| d["A"]));
        assert!(wrapper.defines::<PbrMaterialDefines>().is_none());

        let pbr = wrapper.take_defines::<PbrMaterialDefines>();
        wrapper.put_defines(pbr);
        assert!(wrapper.defines::<MaterialDefines>().is_none());
    }
}
