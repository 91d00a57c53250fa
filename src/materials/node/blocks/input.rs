use cgmath::{EuclideanSpace, Matrix4, Vector2, Vector3, Vector4};

use crate::error::{EngineError, Result};
use crate::materials::node::blocks::{block_accessors, build_error, BlockInput, BlockTarget, NodeMaterialBlock};
use crate::materials::node::build_state::{BlockBinding, NodeMaterialBuildState};
use crate::materials::node::connection_point::{ConnectionPoint, ConnectionPointType};
use crate::materials::{Effect, MaterialContext, MeshDrawInfo};
use crate::maths::{Color3, Color4};
use crate::shaders::{ShaderStage, UniformDecl, UniformType};

/// Engine supplied values an input can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemValue {
    World,
    View,
    Projection,
    ViewProjection,
    WorldViewProjection,
    CameraPosition,
}

impl SystemValue {
    const ALL: [SystemValue; 6] = [
        Self::World,
        Self::View,
        Self::Projection,
        Self::ViewProjection,
        Self::WorldViewProjection,
        Self::CameraPosition,
    ];

    pub fn uniform_name(self) -> &'static str {
        match self {
            Self::World => "world",
            Self::View => "view",
            Self::Projection => "projection",
            Self::ViewProjection => "viewProjection",
            Self::WorldViewProjection => "worldViewProjection",
            Self::CameraPosition => "cameraPosition",
        }
    }

    pub fn ty(self) -> ConnectionPointType {
        match self {
            Self::CameraPosition => ConnectionPointType::Vector3,
            _ => ConnectionPointType::Matrix,
        }
    }

    fn from_uniform_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|value| value.uniform_name() == name)
    }
}

/// Constant fed to the shader through a uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Float(f32),
    Vector2(Vector2<f32>),
    Vector3(Vector3<f32>),
    Vector4(Vector4<f32>),
    Color3(Color3),
    Color4(Color4),
    Matrix(Matrix4<f32>),
}

impl InputValue {
    pub fn ty(&self) -> ConnectionPointType {
        match self {
            Self::Float(_) => ConnectionPointType::Float,
            Self::Vector2(_) => ConnectionPointType::Vector2,
            Self::Vector3(_) => ConnectionPointType::Vector3,
            Self::Vector4(_) => ConnectionPointType::Vector4,
            Self::Color3(_) => ConnectionPointType::Color3,
            Self::Color4(_) => ConnectionPointType::Color4,
            Self::Matrix(_) => ConnectionPointType::Matrix,
        }
    }

    fn uniform_type(&self) -> UniformType {
        match self {
            Self::Float(_) => UniformType::Float,
            Self::Vector2(_) => UniformType::Vec2,
            Self::Vector3(_) | Self::Color3(_) => UniformType::Vec3,
            Self::Vector4(_) | Self::Color4(_) => UniformType::Vec4,
            Self::Matrix(_) => UniformType::Mat4,
        }
    }

    fn bind(&self, effect: &mut Effect, name: &str) {
        match self {
            Self::Float(v) => effect.set_float(name, *v),
            Self::Vector2(v) => effect.set_vector2(name, *v),
            Self::Vector3(v) => effect.set_vector3(name, *v),
            Self::Vector4(v) => effect.set_vector4(name, *v),
            Self::Color3(c) => effect.set_color3(name, c),
            Self::Color4(c) => effect.set_direct_color4(name, c),
            Self::Matrix(m) => effect.set_matrix(name, m),
        };
    }

    fn components(&self) -> Vec<f32> {
        match self {
            Self::Float(v) => vec![*v],
            Self::Vector2(v) => vec![v.x, v.y],
            Self::Vector3(v) => vec![v.x, v.y, v.z],
            Self::Vector4(v) => vec![v.x, v.y, v.z, v.w],
            Self::Color3(c) => c.to_array().to_vec(),
            Self::Color4(c) => c.to_array().to_vec(),
            Self::Matrix(m) => {
                let columns: &[[f32; 4]; 4] = m.as_ref();
                columns.iter().flatten().copied().collect()
            }
        }
    }

    fn from_components(ty: ConnectionPointType, values: &[f32]) -> Option<Self> {
        let get = |i: usize| values.get(i).copied();
        Some(match ty {
            ConnectionPointType::Float => Self::Float(get(0)?),
            ConnectionPointType::Vector2 => Self::Vector2(Vector2::new(get(0)?, get(1)?)),
            ConnectionPointType::Vector3 => Self::Vector3(Vector3::new(get(0)?, get(1)?, get(2)?)),
            ConnectionPointType::Vector4 => {
                Self::Vector4(Vector4::new(get(0)?, get(1)?, get(2)?, get(3)?))
            }
            ConnectionPointType::Color3 => Self::Color3(Color3::new(get(0)?, get(1)?, get(2)?)),
            ConnectionPointType::Color4 => {
                Self::Color4(Color4::new(get(0)?, get(1)?, get(2)?, get(3)?))
            }
            ConnectionPointType::Matrix => {
                if values.len() != 16 {
                    return None;
                }
                let mut columns = [[0.0f32; 4]; 4];
                for (i, value) in values.iter().enumerate() {
                    columns[i / 4][i % 4] = *value;
                }
                Self::Matrix(Matrix4::from(columns))
            }
            ConnectionPointType::AutoDetect => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputMode {
    /// Mesh vertex attribute, only readable in the vertex stage
    Attribute(String),
    Uniform(InputValue),
    SystemValue(SystemValue),
}

const ATTRIBUTES: [(&str, ConnectionPointType); 4] = [
    ("position", ConnectionPointType::Vector3),
    ("normal", ConnectionPointType::Vector3),
    ("uv", ConnectionPointType::Vector2),
    ("color", ConnectionPointType::Vector4),
];

/// Source of a value: vertex attribute, constant or engine value
#[derive(Debug, Clone)]
pub struct InputBlock {
    name: String,
    mode: InputMode,
    inputs: Vec<ConnectionPoint>,
    outputs: Vec<ConnectionPoint>,
}

impl InputBlock {
    fn with_mode(name: &str, mode: InputMode, ty: ConnectionPointType) -> Self {
        Self {
            name: name.to_string(),
            mode,
            inputs: Vec::new(),
            outputs: vec![ConnectionPoint::output("output", ty)],
        }
    }

    pub fn attribute(name: &str) -> Self {
        let ty = ATTRIBUTES
            .iter()
            .find(|(attribute, _)| *attribute == name)
            .map_or(ConnectionPointType::Vector4, |(_, ty)| *ty);
        Self::with_mode(name, InputMode::Attribute(name.to_string()), ty)
    }

    pub fn uniform(name: &str, value: InputValue) -> Self {
        Self::with_mode(name, InputMode::Uniform(value), value.ty())
    }

    pub fn system_value(value: SystemValue) -> Self {
        Self::with_mode(value.uniform_name(), InputMode::SystemValue(value), value.ty())
    }

    pub fn mode(&self) -> &InputMode {
        &self.mode
    }

    /// Replaces the constant of a uniform input; other modes are left as is
    pub fn set_value(&mut self, value: InputValue) {
        if let InputMode::Uniform(current) = &mut self.mode {
            *current = value;
            if let Some(output) = self.outputs.first_mut() {
                output.ty = value.ty();
            }
        }
    }

    pub fn value(&self) -> Option<InputValue> {
        match self.mode {
            InputMode::Uniform(value) => Some(value),
            _ => None,
        }
    }
}

impl NodeMaterialBlock for InputBlock {
    block_accessors!();

    fn class_name(&self) -> &'static str {
        "InputBlock"
    }

    fn target(&self) -> BlockTarget {
        match self.mode {
            InputMode::Attribute(_) => BlockTarget::Vertex,
            _ => BlockTarget::Neutral,
        }
    }

    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        _stage: ShaderStage,
        _inputs: &[BlockInput],
    ) -> Result<Vec<String>> {
        let expression = match &self.mode {
            InputMode::Attribute(attribute) => {
                if !ATTRIBUTES.iter().any(|(name, _)| name == attribute) {
                    return Err(build_error(format!("unknown attribute '{}'", attribute)));
                }
                state.emit_attribute(attribute)
            }
            InputMode::Uniform(value) => {
                let name = state.emit_block_uniform(&self.name, value.uniform_type());
                format!("uniforms.{}", name)
            }
            InputMode::SystemValue(value) => {
                let ty = match value.ty() {
                    ConnectionPointType::Vector3 => UniformType::Vec3,
                    _ => UniformType::Mat4,
                };
                state.emit_uniform(UniformDecl::new(value.uniform_name(), ty));
                format!("uniforms.{}", value.uniform_name())
            }
        };
        Ok(vec![expression])
    }

    fn bind(
        &self,
        effect: &mut Effect,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        binding: &BlockBinding,
    ) {
        match &self.mode {
            InputMode::Attribute(_) => {}
            InputMode::Uniform(value) => {
                for name in &binding.uniforms {
                    value.bind(effect, name);
                }
            }
            InputMode::SystemValue(value) => {
                let name = value.uniform_name();
                let view_projection = ctx.camera.view_projection();
                match value {
                    SystemValue::World => effect.set_matrix(name, &mesh.world),
                    SystemValue::View => effect.set_matrix(name, &ctx.camera.view),
                    SystemValue::Projection => effect.set_matrix(name, &ctx.camera.projection),
                    SystemValue::ViewProjection => effect.set_matrix(name, &view_projection),
                    SystemValue::WorldViewProjection => {
                        effect.set_matrix(name, &(view_projection * mesh.world))
                    }
                    SystemValue::CameraPosition => {
                        effect.set_vector3(name, ctx.camera.position.to_vec())
                    }
                };
            }
        }
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "customType": "BABYLON.InputBlock",
            "name": self.name,
            "type": self.outputs.first().map(|o| o.ty),
        });
        match &self.mode {
            InputMode::Attribute(attribute) => value["attribute"] = attribute.clone().into(),
            InputMode::Uniform(constant) => value["value"] = constant.components().into(),
            InputMode::SystemValue(system) => value["systemValue"] = system.uniform_name().into(),
        }
        value
    }

    fn deserialize(&mut self, value: &serde_json::Value) -> Result<()> {
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.name)
            .to_string();
        if let Some(attribute) = value.get("attribute").and_then(|v| v.as_str()) {
            *self = Self::attribute(attribute);
        } else if let Some(system) = value.get("systemValue").and_then(|v| v.as_str()) {
            let system = SystemValue::from_uniform_name(system)
                .ok_or_else(|| EngineError::parse("input block", format!("unknown system value '{}'", system)))?;
            *self = Self::system_value(system);
        } else {
            let ty: ConnectionPointType = serde_json::from_value(
                value.get("type").cloned().unwrap_or(serde_json::Value::Null),
            )?;
            let components: Vec<f32> = serde_json::from_value(
                value.get("value").cloned().unwrap_or(serde_json::Value::Null),
            )?;
            let constant = InputValue::from_components(ty, &components)
                .ok_or_else(|| EngineError::parse("input block", "value does not match its type"))?;
            *self = Self::uniform(&name, constant);
        }
        self.name = name;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_value_survives_serialization() {
        let block = InputBlock::uniform("tint", InputValue::Color4(Color4::new(1.0, 0.5, 0.0, 1.0)));
        let mut parsed = InputBlock::uniform("x", InputValue::Float(0.0));
        parsed.deserialize(&block.serialize()).unwrap();
        assert_eq!(parsed.name(), "tint");
        assert_eq!(parsed.value(), block.value());
        assert_eq!(parsed.outputs()[0].ty, ConnectionPointType::Color4);
    }

    #[test]
    fn test_attribute_types() {
        assert_eq!(InputBlock::attribute("uv").outputs()[0].ty, ConnectionPointType::Vector2);
        assert_eq!(InputBlock::attribute("position").target(), BlockTarget::Vertex);
        let mut state = NodeMaterialBuildState::new(4);
        let error = InputBlock::attribute("tangent").build(&mut state, ShaderStage::Vertex, &[]);
        assert!(error.is_err());
    }

    #[test]
    fn test_system_values_share_one_uniform() {
        let mut state = NodeMaterialBuildState::new(4);
        let block = InputBlock::system_value(SystemValue::World);
        let first = block.build(&mut state, ShaderStage::Vertex, &[]).unwrap();
        let second = block.build(&mut state, ShaderStage::Fragment, &[]).unwrap();
        assert_eq!(first, vec!["uniforms.world".to_string()]);
        assert_eq!(first, second);
        assert_eq!(state.uniforms.len(), 1);
    }
}
