use std::collections::{BTreeMap, HashMap};

use crate::materials::node::connection_point::ConnectionPointType;
use crate::materials::node::BlockId;
use crate::shaders::{SamplerDecl, ShaderStage, UniformDecl};

/// Values recorded for one block while the graph was built
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockBinding {
    /// Uniforms the block declared, in declaration order
    pub uniforms: Vec<String>,
    /// First light slot reserved by the block
    pub light_slot: usize,
    pub light_count: usize,
}

/// Code and declarations accumulated while a node graph is compiled
#[derive(Debug, Default)]
pub struct NodeMaterialBuildState {
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub attributes: Vec<String>,
    pub functions: BTreeMap<String, String>,
    pub vertex_code: String,
    pub fragment_code: String,
    pub varyings: Vec<(String, ConnectionPointType)>,
    pub max_simultaneous_lights: usize,
    pub(crate) bindings: HashMap<BlockId, BlockBinding>,
    pub(crate) current_block: Option<BlockId>,
    next_light_slot: usize,
    variable_names: HashMap<String, usize>,
}

impl NodeMaterialBuildState {
    pub fn new(max_simultaneous_lights: usize) -> Self {
        Self {
            max_simultaneous_lights,
            ..Default::default()
        }
    }

    /// Unique identifier starting with `prefix`
    pub fn get_free_variable_name(&mut self, prefix: &str) -> String {
        let clean: String = prefix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let clean = if clean.is_empty() || clean.starts_with(|c: char| c.is_ascii_digit()) {
            format!("v_{}", clean)
        } else {
            clean
        };
        let counter = self.variable_names.entry(clean.clone()).or_insert(0);
        let name = if *counter == 0 {
            clean
        } else {
            format!("{}{}", clean, counter)
        };
        *counter += 1;
        name
    }

    pub fn emit_code(&mut self, stage: ShaderStage, line: &str) {
        let code = match stage {
            ShaderStage::Vertex => &mut self.vertex_code,
            ShaderStage::Fragment => &mut self.fragment_code,
        };
        code.push_str("    ");
        code.push_str(line);
        code.push('\n');
    }

    /// Declares a shared uniform; repeated names are declared once
    pub fn emit_uniform(&mut self, uniform: UniformDecl) {
        if !self.uniforms.iter().any(|u| u.name == uniform.name) {
            self.uniforms.push(uniform);
        }
    }

    /// Declares a uniform owned by the block being built and returns its name
    pub fn emit_block_uniform(&mut self, hint: &str, ty: crate::shaders::UniformType) -> String {
        let name = self.get_free_variable_name(hint);
        self.uniforms.push(UniformDecl::new(&name, ty));
        if let Some(block) = self.current_block {
            self.bindings.entry(block).or_default().uniforms.push(name.clone());
        }
        name
    }

    /// Reserves consecutive light slots for the block being built
    pub fn reserve_light_slots(&mut self, count: usize) -> usize {
        let start = self.next_light_slot;
        self.next_light_slot += count;
        if let Some(block) = self.current_block {
            let binding = self.bindings.entry(block).or_default();
            binding.light_slot = start;
            binding.light_count = count;
        }
        start
    }

    pub fn emit_attribute(&mut self, name: &str) -> String {
        if !self.attributes.iter().any(|a| a == name) {
            self.attributes.push(name.to_string());
        }
        format!("input.{}", name)
    }

    pub fn emit_function(&mut self, name: &str, code: &str) {
        self.functions
            .entry(name.to_string())
            .or_insert_with(|| code.to_string());
    }

    /// Adds a vertex to fragment varying and returns its field name
    pub fn emit_varying(&mut self, ty: ConnectionPointType) -> String {
        let name = format!("v{}", self.varyings.len());
        self.varyings.push((name.clone(), ty));
        name
    }

    pub fn binding(&self, block: BlockId) -> Option<&BlockBinding> {
        self.bindings.get(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::UniformType;

    #[test]
    fn test_free_variable_names() {
        let mut state = NodeMaterialBuildState::new(4);
        assert_eq!(state.get_free_variable_name("output"), "output");
        assert_eq!(state.get_free_variable_name("output"), "output1");
        assert_eq!(state.get_free_variable_name("my color"), "my_color");
        assert_eq!(state.get_free_variable_name("2d"), "v_2d");
    }

    #[test]
    fn test_uniforms_and_light_slots_belong_to_current_block() {
        let block = slotmap::SlotMap::<BlockId, ()>::with_key().insert(());
        let mut state = NodeMaterialBuildState::new(4);
        state.current_block = Some(block);
        let name = state.emit_block_uniform("color", UniformType::Vec4);
        assert_eq!(state.reserve_light_slots(4), 0);
        assert_eq!(state.reserve_light_slots(1), 4);
        let binding = state.binding(block).unwrap();
        assert_eq!(binding.uniforms, vec![name]);
        assert_eq!(binding.light_slot, 4);

        state.emit_uniform(UniformDecl::new("world", UniformType::Mat4));
        state.emit_uniform(UniformDecl::new("world", UniformType::Mat4));
        assert_eq!(state.uniforms.len(), 2);
    }
}
