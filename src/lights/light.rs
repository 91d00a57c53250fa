//! Light data carried by light nodes

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Transform, Vector3};

use crate::engine::constants::LightType;
use crate::materials::defines::MaterialDefines;
use crate::materials::effect::Effect;
use crate::maths::Color3;
use crate::scene::NodeId;
use crate::shaders::{UniformDecl, UniformType};

/// Distance attenuation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightFalloff {
    /// Linear falloff reaching zero at `range`
    #[default]
    Standard,
    /// Inverse square law
    Physical,
    /// Inverse square law windowed by `range`, as in glTF
    Gltf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightType,
    pub diffuse: Color3,
    pub specular: Color3,
    /// Color lighting faces pointing away from the sky (hemispheric only)
    pub ground_color: Color3,
    pub intensity: f32,
    pub range: f32,
    /// Position relative to the parent node
    pub position: Vector3<f32>,
    pub direction: Vector3<f32>,
    /// Cone angle in radians (spot only)
    pub angle: f32,
    pub exponent: f32,
    pub falloff: LightFalloff,
    /// When not empty, only these meshes are lit
    pub included_only_meshes: Vec<NodeId>,
    pub excluded_meshes: Vec<NodeId>,
    index: Option<usize>,
}

impl Light {
    fn new(kind: LightType) -> Self {
        Self {
            kind,
            diffuse: Color3::white(),
            specular: Color3::white(),
            ground_color: Color3::black(),
            intensity: 1.0,
            range: f32::MAX,
            position: Vector3::new(0.0, 0.0, 0.0),
            direction: Vector3::new(0.0, -1.0, 0.0),
            angle: std::f32::consts::FRAC_PI_2,
            exponent: 2.0,
            falloff: LightFalloff::Standard,
            included_only_meshes: Vec::new(),
            excluded_meshes: Vec::new(),
            index: None,
        }
    }

    pub fn new_point(position: Vector3<f32>) -> Self {
        Self {
            position,
            ..Self::new(LightType::Point)
        }
    }

    pub fn new_directional(direction: Vector3<f32>) -> Self {
        Self {
            direction,
            ..Self::new(LightType::Directional)
        }
    }

    pub fn new_spot(position: Vector3<f32>, direction: Vector3<f32>, angle: f32, exponent: f32) -> Self {
        Self {
            position,
            direction,
            angle,
            exponent,
            ..Self::new(LightType::Spot)
        }
    }

    /// A sky/ground light; `direction` points towards the sky
    pub fn new_hemispheric(direction: Vector3<f32>) -> Self {
        Self {
            direction,
            ..Self::new(LightType::Hemispheric)
        }
    }

    pub fn get_class_name(&self) -> &'static str {
        match self.kind {
            LightType::Point => "PointLight",
            LightType::Directional => "DirectionalLight",
            LightType::Spot => "SpotLight",
            LightType::Hemispheric => "HemisphericLight",
        }
    }

    /// Slot of the light in the scene's light list, set when the scene
    /// collects lights for a frame
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: Option<usize>) {
        self.index = index;
    }

    pub fn can_affect_mesh(&self, mesh: NodeId) -> bool {
        if !self.included_only_meshes.is_empty() && !self.included_only_meshes.contains(&mesh) {
            return false;
        }
        !self.excluded_meshes.contains(&mesh)
    }

    /// Resolves the light in world space for one frame
    pub fn snapshot(&self, id: NodeId, parent_world: Option<Matrix4<f32>>) -> LightSnapshot {
        let (position, direction) = match parent_world {
            Some(world) => (
                world
                    .transform_point(Point3::from_vec(self.position))
                    .to_vec(),
                world.transform_vector(self.direction),
            ),
            None => (self.position, self.direction),
        };
        LightSnapshot {
            id,
            kind: self.kind,
            position,
            direction: if direction.magnitude2() > 0.0 {
                direction.normalize()
            } else {
                direction
            },
            diffuse: self.diffuse.scale(self.intensity),
            specular: self.specular.scale(self.intensity),
            ground_color: self.ground_color.scale(self.intensity),
            range: self.range,
            cos_half_angle: (self.angle * 0.5).cos(),
            exponent: self.exponent,
            falloff: self.falloff,
        }
    }
}

/// World-space light values used while binding materials
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSnapshot {
    pub id: NodeId,
    pub kind: LightType,
    pub position: Vector3<f32>,
    pub direction: Vector3<f32>,
    pub diffuse: Color3,
    pub specular: Color3,
    pub ground_color: Color3,
    pub range: f32,
    pub cos_half_angle: f32,
    pub exponent: f32,
    pub falloff: LightFalloff,
}

impl LightSnapshot {
    /// Uniforms the light fragment include reads for slot `index`
    pub fn uniforms(index: usize) -> Vec<UniformDecl> {
        vec![
            UniformDecl::new(&format!("vLightData{}", index), UniformType::Vec4),
            UniformDecl::new(&format!("vLightDiffuse{}", index), UniformType::Vec4),
            UniformDecl::new(&format!("vLightSpecular{}", index), UniformType::Vec4),
            UniformDecl::new(&format!("vLightDirection{}", index), UniformType::Vec4),
            UniformDecl::new(&format!("vLightGround{}", index), UniformType::Vec3),
        ]
    }

    /// Sets `LIGHT{index}` and the kind define for this light
    pub fn prepare_defines(&self, defines: &mut MaterialDefines, index: usize) {
        defines
            .set_bool(&format!("LIGHT{}", index), true)
            .set_bool(
                &format!("POINTLIGHT{}", index),
                self.kind == LightType::Point,
            )
            .set_bool(&format!("SPOTLIGHT{}", index), self.kind == LightType::Spot)
            .set_bool(
                &format!("HEMILIGHT{}", index),
                self.kind == LightType::Hemispheric,
            )
            .set_bool(
                &format!("DIRLIGHT{}", index),
                self.kind == LightType::Directional,
            );
    }

    /// Clears the defines of a slot no light occupies
    pub fn clear_defines(defines: &mut MaterialDefines, index: usize) {
        for prefix in ["LIGHT", "POINTLIGHT", "SPOTLIGHT", "HEMILIGHT", "DIRLIGHT"] {
            let name = format!("{}{}", prefix, index);
            if defines.has_bool(&name) {
                defines.set_bool(&name, false);
            }
        }
    }

    pub fn bind(&self, effect: &mut Effect, index: usize) {
        let data = match self.kind {
            LightType::Point => self.position.extend(0.0),
            LightType::Spot => self.position.extend(self.exponent),
            LightType::Directional => self.direction.extend(1.0),
            LightType::Hemispheric => self.direction.extend(0.0),
        };
        effect
            .set_vector4(&format!("vLightData{}", index), data)
            .set_color4(&format!("vLightDiffuse{}", index), &self.diffuse, self.range)
            .set_color4(&format!("vLightSpecular{}", index), &self.specular, 0.0)
            .set_vector4(
                &format!("vLightDirection{}", index),
                self.direction.extend(self.cos_half_angle),
            )
            .set_color3(&format!("vLightGround{}", index), &self.ground_color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> NodeId {
        slotmap::SlotMap::<NodeId, ()>::with_key().insert(())
    }

    #[test]
    fn test_kind_defines() {
        let light = Light::new_spot(Vector3::new(0.0, 5.0, 0.0), -Vector3::unit_y(), 1.0, 2.0);
        let snapshot = light.snapshot(id(), None);
        let mut defines = MaterialDefines::new();
        snapshot.prepare_defines(&mut defines, 2);
        assert!(defines["LIGHT2"]);
        assert!(defines["SPOTLIGHT2"]);
        assert!(!defines["POINTLIGHT2"]);
        LightSnapshot::clear_defines(&mut defines, 2);
        assert!(!defines["LIGHT2"]);
    }

    #[test]
    fn test_snapshot_applies_parent_and_intensity() {
        let mut light = Light::new_point(Vector3::new(1.0, 0.0, 0.0));
        light.intensity = 2.0;
        let parent = Matrix4::from_translation(Vector3::new(0.0, 3.0, 0.0));
        let snapshot = light.snapshot(id(), Some(parent));
        assert_eq!(snapshot.position, Vector3::new(1.0, 3.0, 0.0));
        assert_eq!(snapshot.diffuse, Color3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn test_included_and_excluded_meshes() {
        let mut keys = slotmap::SlotMap::<NodeId, ()>::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let mut light = Light::new_hemispheric(Vector3::unit_y());
        assert!(light.can_affect_mesh(a));
        light.excluded_meshes.push(a);
        assert!(!light.can_affect_mesh(a));
        light.included_only_meshes.push(b);
        assert!(light.can_affect_mesh(b));
        light.excluded_meshes.clear();
        assert!(!light.can_affect_mesh(a));
    }
}
