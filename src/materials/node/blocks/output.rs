use crate::error::Result;
use crate::materials::node::blocks::{block_accessors, build_error, required, BlockInput, BlockTarget, NodeMaterialBlock};
use crate::materials::node::build_state::NodeMaterialBuildState;
use crate::materials::node::connection_point::{ConnectionPoint, ConnectionPointType};
use crate::shaders::ShaderStage;

/// Writes the clip-space position
#[derive(Debug, Clone)]
pub struct VertexOutputBlock {
    name: String,
    inputs: Vec<ConnectionPoint>,
    outputs: Vec<ConnectionPoint>,
}

impl VertexOutputBlock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: vec![ConnectionPoint::input("vector", ConnectionPointType::Vector4)],
            outputs: Vec::new(),
        }
    }
}

impl NodeMaterialBlock for VertexOutputBlock {
    block_accessors!();

    fn class_name(&self) -> &'static str {
        "VertexOutputBlock"
    }

    fn target(&self) -> BlockTarget {
        BlockTarget::Vertex
    }

    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        stage: ShaderStage,
        inputs: &[BlockInput],
    ) -> Result<Vec<String>> {
        let vector = required(inputs, 0, &self.name)?;
        state.emit_code(stage, &format!("out.position = {};", vector));
        Ok(Vec::new())
    }
}

/// Writes the final fragment color
#[derive(Debug, Clone)]
pub struct FragmentOutputBlock {
    name: String,
    inputs: Vec<ConnectionPoint>,
    outputs: Vec<ConnectionPoint>,
}

impl FragmentOutputBlock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: vec![
                ConnectionPoint::optional_input("rgba", ConnectionPointType::Color4),
                ConnectionPoint::optional_input("rgb", ConnectionPointType::Color3),
                ConnectionPoint::optional_input("a", ConnectionPointType::Float),
            ],
            outputs: Vec::new(),
        }
    }
}

impl NodeMaterialBlock for FragmentOutputBlock {
    block_accessors!();

    fn class_name(&self) -> &'static str {
        "FragmentOutputBlock"
    }

    fn target(&self) -> BlockTarget {
        BlockTarget::Fragment
    }

    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        stage: ShaderStage,
        inputs: &[BlockInput],
    ) -> Result<Vec<String>> {
        let input = |index: usize| {
            inputs
                .get(index)
                .and_then(|i| i.as_ref())
                .map(|(expression, _)| expression.as_str())
        };
        let color = match (input(0), input(1)) {
            (Some(rgba), _) => rgba.to_string(),
            (None, Some(rgb)) => format!("vec4<f32>({}, {})", rgb, input(2).unwrap_or("1.0")),
            (None, None) => {
                return Err(build_error(format!(
                    "'{}' needs either its rgb or its rgba input connected",
                    self.name
                )));
            }
        };
        state.emit_code(stage, &format!("return {};", color));
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_output_combines_rgb_and_alpha() {
        let mut state = NodeMaterialBuildState::new(4);
        let block = FragmentOutputBlock::new("out");
        let inputs = vec![
            None,
            Some(("color".to_string(), ConnectionPointType::Color3)),
            Some(("0.5".to_string(), ConnectionPointType::Float)),
        ];
        block.build(&mut state, ShaderStage::Fragment, &inputs).unwrap();
        assert!(state.fragment_code.contains("return vec4<f32>(color, 0.5);"));
        assert!(block.build(&mut state, ShaderStage::Fragment, &[None, None, None]).is_err());
    }
}
