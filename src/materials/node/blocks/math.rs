use crate::error::Result;
use crate::materials::node::blocks::{block_accessors, required, BlockInput, NodeMaterialBlock};
use crate::materials::node::build_state::NodeMaterialBuildState;
use crate::materials::node::connection_point::{ConnectionPoint, ConnectionPointType};
use crate::shaders::ShaderStage;

/// Multiplies a vector by a matrix
#[derive(Debug, Clone)]
pub struct TransformBlock {
    name: String,
    /// W used when the input is a vec3: 1 for positions, 0 for directions
    pub complement_w: f32,
    inputs: Vec<ConnectionPoint>,
    outputs: Vec<ConnectionPoint>,
}

impl TransformBlock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            complement_w: 1.0,
            inputs: vec![
                ConnectionPoint::input("vector", ConnectionPointType::AutoDetect),
                ConnectionPoint::input("transform", ConnectionPointType::Matrix),
            ],
            outputs: vec![
                ConnectionPoint::output("output", ConnectionPointType::Vector4),
                ConnectionPoint::output("xyz", ConnectionPointType::Vector3),
            ],
        }
    }
}

impl NodeMaterialBlock for TransformBlock {
    block_accessors!();

    fn class_name(&self) -> &'static str {
        "TransformBlock"
    }

    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        stage: ShaderStage,
        inputs: &[BlockInput],
    ) -> Result<Vec<String>> {
        let vector = required(inputs, 0, &self.name)?;
        let transform = required(inputs, 1, &self.name)?;
        let vector = match inputs.first().and_then(|i| i.as_ref()).map(|(_, ty)| *ty) {
            Some(ConnectionPointType::Vector4 | ConnectionPointType::Color4) if self.complement_w == 0.0 => {
                format!("vec4<f32>(({}).xyz, 0.0)", vector)
            }
            Some(ConnectionPointType::Vector4 | ConnectionPointType::Color4) => vector.to_string(),
            _ => format!("vec4<f32>({}, {:?})", vector, self.complement_w),
        };
        let output = state.get_free_variable_name(&format!("{}_output", self.name));
        state.emit_code(stage, &format!("let {} = {} * {};", output, transform, vector));
        Ok(vec![output.clone(), format!("{}.xyz", output)])
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({
            "customType": "BABYLON.TransformBlock",
            "name": self.name,
            "complementW": self.complement_w,
        })
    }

    fn deserialize(&mut self, value: &serde_json::Value) -> Result<()> {
        if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }
        if let Some(w) = value.get("complementW").and_then(|v| v.as_f64()) {
            self.complement_w = w as f32;
        }
        Ok(())
    }
}

/// Component-wise sum of two values of the same type
#[derive(Debug, Clone)]
pub struct AddBlock {
    name: String,
    inputs: Vec<ConnectionPoint>,
    outputs: Vec<ConnectionPoint>,
}

impl AddBlock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: vec![
                ConnectionPoint::input("left", ConnectionPointType::AutoDetect),
                ConnectionPoint::input("right", ConnectionPointType::AutoDetect),
            ],
            outputs: vec![ConnectionPoint::output("output", ConnectionPointType::AutoDetect)],
        }
    }
}

impl NodeMaterialBlock for AddBlock {
    block_accessors!();

    fn class_name(&self) -> &'static str {
        "AddBlock"
    }

    fn output_type(&self, _index: usize, inputs: &[BlockInput]) -> ConnectionPointType {
        inputs
            .iter()
            .flatten()
            .map(|(_, ty)| *ty)
            .next()
            .unwrap_or(ConnectionPointType::Float)
    }

    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        stage: ShaderStage,
        inputs: &[BlockInput],
    ) -> Result<Vec<String>> {
        let left = required(inputs, 0, &self.name)?;
        let right = required(inputs, 1, &self.name)?;
        let left_type = self.output_type(0, inputs);
        let right_type = inputs
            .get(1)
            .and_then(|i| i.as_ref())
            .map_or(left_type, |(_, ty)| *ty);
        let output = state.get_free_variable_name(&format!("{}_output", self.name));
        state.emit_code(
            stage,
            &format!("let {} = {} + {};", output, left, left_type.cast(right, right_type)),
        );
        Ok(vec![output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_extends_vec3() {
        let mut state = NodeMaterialBuildState::new(4);
        let mut block = TransformBlock::new("worldPos");
        let inputs = vec![
            Some(("input.position".to_string(), ConnectionPointType::Vector3)),
            Some(("uniforms.world".to_string(), ConnectionPointType::Matrix)),
        ];
        let outputs = block.build(&mut state, ShaderStage::Vertex, &inputs).unwrap();
        assert_eq!(outputs, vec!["worldPos_output", "worldPos_output.xyz"]);
        assert!(state
            .vertex_code
            .contains("let worldPos_output = uniforms.world * vec4<f32>(input.position, 1.0);"));

        block.complement_w = 0.0;
        block.build(&mut state, ShaderStage::Vertex, &inputs).unwrap();
        assert!(state.vertex_code.contains("vec4<f32>(input.position, 0.0)"));
    }

    #[test]
    fn test_add_casts_right_to_left_type() {
        let mut state = NodeMaterialBuildState::new(4);
        let block = AddBlock::new("sum");
        let inputs = vec![
            Some(("a".to_string(), ConnectionPointType::Color3)),
            Some(("b".to_string(), ConnectionPointType::Float)),
        ];
        assert_eq!(block.output_type(0, &inputs), ConnectionPointType::Color3);
        block.build(&mut state, ShaderStage::Fragment, &inputs).unwrap();
        assert!(state.fragment_code.contains("let sum_output = a + vec3<f32>(b);"));
    }
}
