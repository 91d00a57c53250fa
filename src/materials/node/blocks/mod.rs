//! Blocks a node material graph is made of

pub mod input;
pub mod light;
pub mod math;
pub mod output;

use std::any::Any;
use std::fmt;

use crate::error::{EngineError, Result};
use crate::materials::node::build_state::{BlockBinding, NodeMaterialBuildState};
use crate::materials::node::connection_point::{ConnectionPoint, ConnectionPointType};
use crate::materials::{Effect, MaterialContext, MaterialDefines, MeshDrawInfo};
use crate::shaders::ShaderStage;

pub use input::{InputBlock, InputMode, InputValue, SystemValue};
pub use light::LightBlock;
pub use math::{AddBlock, TransformBlock};
pub use output::{FragmentOutputBlock, VertexOutputBlock};

/// Shader stage a block is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTarget {
    Vertex,
    Fragment,
    /// Follows the stage of its inputs
    Neutral,
}

/// Compiled expression and type of a connected input
pub type BlockInput = Option<(String, ConnectionPointType)>;

pub(crate) fn build_error(message: impl Into<String>) -> EngineError {
    EngineError::NodeMaterialBuild {
        material: String::new(),
        message: message.into(),
    }
}

pub trait NodeMaterialBlock: Any + fmt::Debug {
    fn name(&self) -> &str;

    fn set_name(&mut self, name: &str);

    fn class_name(&self) -> &'static str;

    fn target(&self) -> BlockTarget {
        BlockTarget::Neutral
    }

    fn inputs(&self) -> &[ConnectionPoint];

    fn inputs_mut(&mut self) -> &mut [ConnectionPoint];

    fn outputs(&self) -> &[ConnectionPoint];

    /// Resolved type of output `index` given the connected input types
    fn output_type(&self, index: usize, _inputs: &[BlockInput]) -> ConnectionPointType {
        self.outputs()
            .get(index)
            .map_or(ConnectionPointType::Float, |point| point.ty)
    }

    /// Emits the block code and returns one expression per output
    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        stage: ShaderStage,
        inputs: &[BlockInput],
    ) -> Result<Vec<String>>;

    /// System values to connect to unconnected inputs, by input index
    fn auto_configure(&self) -> Vec<(usize, SystemValue)> {
        Vec::new()
    }

    fn prepare_defines(
        &self,
        _ctx: &MaterialContext<'_>,
        _mesh: &MeshDrawInfo,
        _binding: &BlockBinding,
        _defines: &mut MaterialDefines,
    ) {
    }

    fn update_uniforms_and_samples(&self, _state: &mut NodeMaterialBuildState) {}

    fn bind(
        &self,
        _effect: &mut Effect,
        _ctx: &MaterialContext<'_>,
        _mesh: &MeshDrawInfo,
        _binding: &BlockBinding,
    ) {
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({
            "customType": format!("BABYLON.{}", self.class_name()),
            "name": self.name(),
        })
    }

    fn deserialize(&mut self, value: &serde_json::Value) -> Result<()> {
        if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
            self.set_name(name);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Instantiates a block from its serialized class name
pub fn create_block(custom_type: &str) -> Option<Box<dyn NodeMaterialBlock>> {
    let class = custom_type.strip_prefix("BABYLON.").unwrap_or(custom_type);
    let block: Box<dyn NodeMaterialBlock> = match class {
        "InputBlock" => Box::new(InputBlock::uniform("input", InputValue::Float(0.0))),
        "TransformBlock" => Box::new(TransformBlock::new("transform")),
        "AddBlock" => Box::new(AddBlock::new("add")),
        "LightBlock" => Box::new(LightBlock::new("light")),
        "VertexOutputBlock" => Box::new(VertexOutputBlock::new("vertexOutput")),
        "FragmentOutputBlock" => Box::new(FragmentOutputBlock::new("fragmentOutput")),
        _ => return None,
    };
    Some(block)
}

/// Implements the name and connection point accessors of a block
macro_rules! block_accessors {
    () => {
        fn name(&self) -> &str {
            &self.name
        }

        fn set_name(&mut self, name: &str) {
            self.name = name.to_string();
        }

        fn inputs(&self) -> &[ConnectionPoint] {
            &self.inputs
        }

        fn inputs_mut(&mut self) -> &mut [ConnectionPoint] {
            &mut self.inputs
        }

        fn outputs(&self) -> &[ConnectionPoint] {
            &self.outputs
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

pub(crate) use block_accessors;

/// Expression of a required input
pub(crate) fn required<'a>(inputs: &'a [BlockInput], index: usize, block: &str) -> Result<&'a str> {
    inputs
        .get(index)
        .and_then(|input| input.as_ref())
        .map(|(expression, _)| expression.as_str())
        .ok_or_else(|| build_error(format!("block '{}' is missing input {}", block, index)))
}
