use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use slotmap::{Key, SlotMap};

use crate::engine::backend::VertexInput;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::materials::node::blocks::{
    create_block, AddBlock, BlockInput, BlockTarget, FragmentOutputBlock, InputBlock, LightBlock,
    NodeMaterialBlock, SystemValue, TransformBlock, VertexOutputBlock,
};
use crate::materials::node::build_state::{BlockBinding, NodeMaterialBuildState};
use crate::materials::node::connection_point::{Connection, ConnectionPointType};
use crate::materials::node::BlockId;
use crate::materials::{
    DrawWrapper, EffectCreationOptions, EffectKey, Material, MaterialBase, MaterialContext,
    MaterialDefines, MaterialDirtyFlags, MeshDrawInfo,
};
use crate::shaders::ShaderStage;

static NEXT_NODE_MATERIAL_ID: AtomicU64 = AtomicU64::new(0);

const VERTEX_INPUT: &str = "struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) color: vec4<f32>,
};
";

/// Result of the last successful graph build
#[derive(Debug, Clone)]
struct CompiledGraph {
    build_id: u64,
    shader_name: String,
    uniforms: Vec<crate::shaders::UniformDecl>,
    samplers: Vec<crate::shaders::SamplerDecl>,
    /// Blocks reached from the outputs, dependencies first
    blocks: Vec<(BlockId, BlockBinding)>,
}

/// Walks the graph from the output blocks, emitting code per stage
struct GraphCompiler<'g> {
    blocks: &'g SlotMap<BlockId, Box<dyn NodeMaterialBlock>>,
    state: NodeMaterialBuildState,
    outputs: HashMap<(BlockId, ShaderStage), Vec<(String, ConnectionPointType)>>,
    varyings: HashMap<(BlockId, usize), (String, ConnectionPointType)>,
    order: Vec<BlockId>,
    visiting: Vec<BlockId>,
}

fn build_error(message: impl Into<String>) -> EngineError {
    crate::materials::node::blocks::build_error(message)
}

impl<'g> GraphCompiler<'g> {
    fn block(&self, id: BlockId) -> Result<&'g dyn NodeMaterialBlock> {
        self.blocks
            .get(id)
            .map(|block| block.as_ref())
            .ok_or(EngineError::UnknownHandle { kind: "node material block" })
    }

    fn is_vertex_bound(&self, id: BlockId) -> bool {
        let Some(block) = self.blocks.get(id) else {
            return false;
        };
        match block.target() {
            BlockTarget::Vertex => true,
            BlockTarget::Fragment => false,
            BlockTarget::Neutral => block
                .inputs()
                .iter()
                .filter_map(|point| point.connected)
                .any(|connection| self.is_vertex_bound(connection.block)),
        }
    }

    fn compile_output(
        &mut self,
        connection: Connection,
        stage: ShaderStage,
    ) -> Result<(String, ConnectionPointType)> {
        if stage == ShaderStage::Fragment && self.is_vertex_bound(connection.block) {
            let key = (connection.block, connection.output);
            if let Some(varying) = self.varyings.get(&key) {
                return Ok(varying.clone());
            }
            let (expression, ty) = self.compile_output(connection, ShaderStage::Vertex)?;
            let name = self.state.emit_varying(ty);
            self.state
                .emit_code(ShaderStage::Vertex, &format!("out.{} = {};", name, expression));
            let varying = (format!("in.{}", name), ty);
            self.varyings.insert(key, varying.clone());
            return Ok(varying);
        }
        let outputs = self.compile_block(connection.block, stage)?;
        outputs.get(connection.output).cloned().ok_or_else(|| {
            build_error(format!("block output {} does not exist", connection.output))
        })
    }

    fn compile_block(
        &mut self,
        id: BlockId,
        stage: ShaderStage,
    ) -> Result<Vec<(String, ConnectionPointType)>> {
        if let Some(outputs) = self.outputs.get(&(id, stage)) {
            return Ok(outputs.clone());
        }
        let block = self.block(id)?;
        if stage == ShaderStage::Vertex && block.target() == BlockTarget::Fragment {
            return Err(build_error(format!(
                "'{}' only works in the fragment shader",
                block.name()
            )));
        }
        if self.visiting.contains(&id) {
            return Err(build_error(format!("'{}' is part of a cycle", block.name())));
        }
        self.visiting.push(id);

        let mut inputs: Vec<BlockInput> = Vec::with_capacity(block.inputs().len());
        for point in block.inputs() {
            match point.connected {
                Some(connection) => {
                    let (expression, source) = self.compile_output(connection, stage)?;
                    let ty = if point.ty == ConnectionPointType::AutoDetect {
                        source
                    } else {
                        point.ty
                    };
                    inputs.push(Some((point.ty.cast(&expression, source), ty)));
                }
                None if point.optional => inputs.push(None),
                None => {
                    return Err(build_error(format!(
                        "input '{}' of '{}' is not connected",
                        point.name,
                        block.name()
                    )))
                }
            }
        }

        let previous = self.state.current_block.replace(id);
        let expressions = block.build(&mut self.state, stage, &inputs)?;
        self.state.current_block = previous;
        self.visiting.retain(|visited| *visited != id);

        let outputs: Vec<(String, ConnectionPointType)> = expressions
            .into_iter()
            .enumerate()
            .map(|(index, expression)| (expression, block.output_type(index, &inputs)))
            .collect();
        if !self.order.contains(&id) {
            self.order.push(id);
        }
        self.outputs.insert((id, stage), outputs.clone());
        Ok(outputs)
    }

    fn vertex_source(&self) -> String {
        let mut source = String::from(VERTEX_INPUT);
        source.push_str("\nstruct VertexOutput {\n    @builtin(position) position: vec4<f32>,\n");
        for (location, (name, ty)) in self.state.varyings.iter().enumerate() {
            source.push_str(&format!("    @location({}) {}: {},\n", location, name, ty.wgsl()));
        }
        source.push_str("};\n\n@vertex\nfn vs_main(input: VertexInput) -> VertexOutput {\n    var out: VertexOutput;\n");
        source.push_str(&self.state.vertex_code);
        source.push_str("    return out;\n}\n");
        source
    }

    fn fragment_source(&self) -> String {
        let mut source = String::new();
        for function in self.state.functions.values() {
            source.push_str(function);
            source.push('\n');
        }
        source.push_str("@fragment\nfn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {\n");
        source.push_str(&self.state.fragment_code);
        source.push_str("}\n");
        source
    }
}

/// Material whose shaders are generated from a block graph
#[derive(Debug)]
pub struct NodeMaterial {
    base: MaterialBase,
    blocks: SlotMap<BlockId, Box<dyn NodeMaterialBlock>>,
    pub max_simultaneous_lights: usize,
    unique_id: u64,
    build_id: u64,
    compiled: Option<CompiledGraph>,
}

impl NodeMaterial {
    pub fn new(name: &str) -> Self {
        Self {
            base: MaterialBase::new(name),
            blocks: SlotMap::with_key(),
            max_simultaneous_lights: 4,
            unique_id: NEXT_NODE_MATERIAL_ID.fetch_add(1, Ordering::Relaxed),
            build_id: 1,
            compiled: None,
        }
    }

    /// Lit material: transformed position, one light block, lit color out
    pub fn with_default_graph(name: &str) -> Result<Self> {
        let mut material = Self::new(name);
        material.set_to_default()?;
        Ok(material)
    }

    pub fn set_to_default(&mut self) -> Result<()> {
        self.clear();
        let position = self.add_block(Box::new(InputBlock::attribute("position")));
        let normal = self.add_block(Box::new(InputBlock::attribute("normal")));
        let world = self.add_block(Box::new(InputBlock::system_value(SystemValue::World)));
        let view_projection =
            self.add_block(Box::new(InputBlock::system_value(SystemValue::ViewProjection)));
        let world_position = self.add_block(Box::new(TransformBlock::new("worldPos")));
        let mut normal_transform = TransformBlock::new("worldNormal");
        normal_transform.complement_w = 0.0;
        let world_normal = self.add_block(Box::new(normal_transform));
        let clip_position = self.add_block(Box::new(TransformBlock::new("clipPos")));
        let vertex_output = self.add_block(Box::new(VertexOutputBlock::new("vertexOutput")));
        let light = self.add_block(Box::new(LightBlock::new("lights")));
        let sum = self.add_block(Box::new(AddBlock::new("litColor")));
        let fragment_output = self.add_block(Box::new(FragmentOutputBlock::new("fragmentOutput")));

        self.connect(position, "output", world_position, "vector")?;
        self.connect(world, "output", world_position, "transform")?;
        self.connect(normal, "output", world_normal, "vector")?;
        self.connect(world, "output", world_normal, "transform")?;
        self.connect(world_position, "output", clip_position, "vector")?;
        self.connect(view_projection, "output", clip_position, "transform")?;
        self.connect(clip_position, "output", vertex_output, "vector")?;
        self.connect(world_position, "output", light, "worldPosition")?;
        self.connect(world_normal, "output", light, "worldNormal")?;
        self.connect(light, "diffuseOutput", sum, "left")?;
        self.connect(light, "specularOutput", sum, "right")?;
        self.connect(sum, "output", fragment_output, "rgb")?;
        self.auto_configure();
        Ok(())
    }

    fn graph_changed(&mut self) {
        self.build_id += 1;
        self.base.mark_dirty(MaterialDirtyFlags::MISC);
    }

    pub fn add_block(&mut self, block: Box<dyn NodeMaterialBlock>) -> BlockId {
        self.graph_changed();
        self.blocks.insert(block)
    }

    /// Removes a block and every connection it fed
    pub fn remove_block(&mut self, id: BlockId) -> bool {
        if self.blocks.remove(id).is_none() {
            return false;
        }
        for (_, block) in self.blocks.iter_mut() {
            for point in block.inputs_mut() {
                if point.connected.is_some_and(|c| c.block == id) {
                    point.connected = None;
                }
            }
        }
        self.graph_changed();
        true
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.graph_changed();
    }

    pub fn block(&self, id: BlockId) -> Option<&dyn NodeMaterialBlock> {
        self.blocks.get(id).map(|block| block.as_ref())
    }

    /// Mutable access; the graph is rebuilt before the next draw
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Box<dyn NodeMaterialBlock>> {
        if self.blocks.contains_key(id) {
            self.graph_changed();
        }
        self.blocks.get_mut(id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &dyn NodeMaterialBlock)> {
        self.blocks.iter().map(|(id, block)| (id, block.as_ref()))
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, block)| block.name() == name)
            .map(|(id, _)| id)
    }

    /// Whether `ancestor` is `block` or one of its inputs, transitively
    fn depends_on(&self, block: BlockId, ancestor: BlockId) -> bool {
        block == ancestor
            || self.blocks.get(block).is_some_and(|b| {
                b.inputs()
                    .iter()
                    .filter_map(|point| point.connected)
                    .any(|connection| self.depends_on(connection.block, ancestor))
            })
    }

    /// Connects output `output` of `source` to input `input` of `target`
    pub fn connect(&mut self, source: BlockId, output: &str, target: BlockId, input: &str) -> Result<()> {
        let source_block = self.blocks.get(source).ok_or(EngineError::UnknownHandle {
            kind: "node material block",
        })?;
        let output_index = source_block
            .outputs()
            .iter()
            .position(|p| p.name == output)
            .ok_or_else(|| self.named_error(format!("'{}' has no output '{}'", source_block.name(), output)))?;
        let output_type = source_block.outputs()[output_index].ty;

        let target_block = self.blocks.get(target).ok_or(EngineError::UnknownHandle {
            kind: "node material block",
        })?;
        let input_index = target_block
            .inputs()
            .iter()
            .position(|p| p.name == input)
            .ok_or_else(|| self.named_error(format!("'{}' has no input '{}'", target_block.name(), input)))?;
        let input_type = target_block.inputs()[input_index].ty;
        if output_type != ConnectionPointType::AutoDetect && !input_type.accepts(output_type) {
            return Err(self.named_error(format!(
                "cannot connect {:?} output '{}' to {:?} input '{}'",
                output_type, output, input_type, input
            )));
        }
        if self.depends_on(source, target) {
            return Err(self.named_error(format!(
                "connecting '{}' to '{}' would create a cycle",
                output, input
            )));
        }

        if let Some(block) = self.blocks.get_mut(target) {
            block.inputs_mut()[input_index].connected = Some(Connection {
                block: source,
                output: output_index,
            });
        }
        self.graph_changed();
        Ok(())
    }

    pub fn disconnect(&mut self, target: BlockId, input: &str) -> bool {
        let Some(point) = self
            .blocks
            .get_mut(target)
            .and_then(|block| block.inputs_mut().iter_mut().find(|p| p.name == input))
        else {
            return false;
        };
        let was_connected = point.connected.take().is_some();
        if was_connected {
            self.graph_changed();
        }
        was_connected
    }

    /// Connects system values to the inputs blocks ask for; returns how many
    pub fn auto_configure(&mut self) -> usize {
        let requests: Vec<(BlockId, usize, SystemValue)> = self
            .blocks
            .iter()
            .flat_map(|(id, block)| {
                block
                    .auto_configure()
                    .into_iter()
                    .map(move |(input, value)| (id, input, value))
            })
            .collect();
        let count = requests.len();
        for (target, input, value) in requests {
            let existing = self.blocks.iter().find_map(|(id, block)| {
                block
                    .as_any()
                    .downcast_ref::<InputBlock>()
                    .filter(|input| input.mode() == &crate::materials::node::InputMode::SystemValue(value))
                    .map(|_| id)
            });
            let source = match existing {
                Some(id) => id,
                None => self.add_block(Box::new(InputBlock::system_value(value))),
            };
            if let Some(point) = self
                .blocks
                .get_mut(target)
                .and_then(|block| block.inputs_mut().get_mut(input))
            {
                point.connected = Some(Connection { block: source, output: 0 });
            }
        }
        if count > 0 {
            self.graph_changed();
        }
        count
    }

    fn named_error(&self, message: String) -> EngineError {
        EngineError::NodeMaterialBuild {
            material: self.base.name.clone(),
            message,
        }
    }

    fn find_output(&self, class_name: &str) -> Result<BlockId> {
        self.blocks
            .iter()
            .find(|(_, block)| block.class_name() == class_name)
            .map(|(id, _)| id)
            .ok_or_else(|| self.named_error(format!("the graph has no {}", class_name)))
    }

    pub fn is_built(&self) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|compiled| compiled.build_id == self.build_id)
    }

    /// Generates the shaders and registers them in the engine shader store
    pub fn build(&mut self, engine: &mut Engine) -> Result<()> {
        let vertex_output = self.find_output("VertexOutputBlock")?;
        let fragment_output = self.find_output("FragmentOutputBlock")?;

        let mut compiler = GraphCompiler {
            blocks: &self.blocks,
            state: NodeMaterialBuildState::new(self.max_simultaneous_lights),
            outputs: HashMap::new(),
            varyings: HashMap::new(),
            order: Vec::new(),
            visiting: Vec::new(),
        };
        let name = self.base.name.clone();
        let rename = |error: EngineError| match error {
            EngineError::NodeMaterialBuild { message, .. } => EngineError::NodeMaterialBuild {
                material: name.clone(),
                message,
            },
            other => other,
        };
        compiler
            .compile_block(vertex_output, ShaderStage::Vertex)
            .map_err(rename)?;
        compiler
            .compile_block(fragment_output, ShaderStage::Fragment)
            .map_err(rename)?;

        let shader_name = format!("nodeMaterial{}_{}", self.unique_id, self.build_id);
        let vertex = compiler.vertex_source();
        let fragment = compiler.fragment_source();
        let blocks = compiler
            .order
            .iter()
            .map(|id| (*id, compiler.state.binding(*id).cloned().unwrap_or_default()))
            .collect();
        let compiled = CompiledGraph {
            build_id: self.build_id,
            shader_name: shader_name.clone(),
            uniforms: compiler.state.uniforms.clone(),
            samplers: compiler.state.samplers.clone(),
            blocks,
        };

        let store = engine.shader_store_mut();
        store.register(ShaderStage::Vertex, &shader_name, &vertex);
        store.register(ShaderStage::Fragment, &shader_name, &fragment);
        info!(
            "Built node material '{}' ({} blocks, {} uniforms)",
            self.base.name,
            compiled.blocks.len(),
            compiled.uniforms.len()
        );
        self.compiled = Some(compiled);
        Ok(())
    }

    /// Generated WGSL of the last build, vertex then fragment
    pub fn compiled_sources<'e>(&self, engine: &'e Engine) -> Option<(&'e str, &'e str)> {
        let compiled = self.compiled.as_ref()?;
        let store = engine.shader_store();
        Some((
            store.get(ShaderStage::Vertex, &compiled.shader_name).ok()?,
            store.get(ShaderStage::Fragment, &compiled.shader_name).ok()?,
        ))
    }

    fn prepare_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &mut DrawWrapper,
        defines: &mut MaterialDefines,
    ) -> Result<bool> {
        if !self.is_built() {
            self.build(engine)?;
            defines.mark_as_unprocessed();
        }
        if defines.render_id == Some(ctx.render_id) && !defines.is_dirty() {
            return Ok(wrapper.effect.is_some_and(|key| engine.is_effect_ready(key)));
        }
        let Some(compiled) = self.compiled.as_ref() else {
            return Ok(false);
        };

        for (id, binding) in &compiled.blocks {
            if let Some(block) = self.blocks.get(*id) {
                block.prepare_defines(ctx, mesh, binding, defines);
            }
        }

        let stale = wrapper
            .effect
            .and_then(|key| engine.get_effect(key))
            .is_none_or(|effect| effect.vertex_name != compiled.shader_name);
        if defines.is_dirty() || stale {
            let options = EffectCreationOptions::new(&compiled.shader_name, &compiled.shader_name)
                .with_uniforms(compiled.uniforms.clone())
                .with_samplers(compiled.samplers.clone())
                .with_defines(&defines.to_string())
                .with_vertex_input(VertexInput::Mesh, &["position", "normal", "uv", "color"]);
            let key = engine.create_effect(options);
            wrapper.set_effect(engine, key);
            defines.mark_as_processed();
            debug!("Node material '{}' effect updated", self.base.name);
        }
        defines.render_id = Some(ctx.render_id);
        Ok(wrapper.effect.is_some_and(|key| engine.is_effect_ready(key)))
    }

    /// Serializes the graph; connections refer to blocks by serialized id
    pub fn serialize_graph(&self) -> serde_json::Value {
        let blocks: Vec<serde_json::Value> = self
            .blocks
            .iter()
            .map(|(id, block)| {
                let mut value = block.serialize();
                value["id"] = id.data().as_ffi().into();
                value["inputs"] = block
                    .inputs()
                    .iter()
                    .map(|point| {
                        let mut input = serde_json::json!({ "inputName": point.name });
                        if let Some(connection) = point.connected {
                            input["targetBlockId"] = connection.block.data().as_ffi().into();
                            input["targetConnectionName"] = self
                                .blocks
                                .get(connection.block)
                                .and_then(|source| source.outputs().get(connection.output))
                                .map(|p| p.name.clone())
                                .into();
                        }
                        input
                    })
                    .collect::<Vec<_>>()
                    .into();
                value
            })
            .collect();
        serde_json::json!({
            "customType": "BABYLON.NodeMaterial",
            "name": self.base.name,
            "maxSimultaneousLights": self.max_simultaneous_lights,
            "blocks": blocks,
        })
    }

    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("nodeMaterial");
        let mut material = Self::new(name);
        if let Some(lights) = value.get("maxSimultaneousLights").and_then(|v| v.as_u64()) {
            material.max_simultaneous_lights = lights as usize;
        }
        let serialized = value
            .get("blocks")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EngineError::parse("node material", "missing blocks"))?;

        let mut ids: HashMap<u64, BlockId> = HashMap::new();
        for block_value in serialized {
            let custom_type = block_value
                .get("customType")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let mut block = create_block(custom_type).ok_or_else(|| {
                EngineError::parse("node material", format!("unknown block type '{}'", custom_type))
            })?;
            block.deserialize(block_value)?;
            let id = material.add_block(block);
            if let Some(old) = block_value.get("id").and_then(|v| v.as_u64()) {
                ids.insert(old, id);
            }
        }

        for block_value in serialized {
            let Some(target) = block_value
                .get("id")
                .and_then(|v| v.as_u64())
                .and_then(|old| ids.get(&old).copied())
            else {
                continue;
            };
            let inputs = block_value.get("inputs").and_then(|v| v.as_array());
            for input in inputs.into_iter().flatten() {
                let (Some(input_name), Some(source), Some(output)) = (
                    input.get("inputName").and_then(|v| v.as_str()),
                    input.get("targetBlockId").and_then(|v| v.as_u64()),
                    input.get("targetConnectionName").and_then(|v| v.as_str()),
                ) else {
                    continue;
                };
                let source = ids.get(&source).copied().ok_or_else(|| {
                    EngineError::parse("node material", format!("unknown block id {}", source))
                })?;
                material.connect(source, output, target, input_name)?;
            }
        }
        Ok(material)
    }
}

impl Material for NodeMaterial {
    fn base(&self) -> &MaterialBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MaterialBase {
        &mut self.base
    }

    fn class_name(&self) -> &'static str {
        "NodeMaterial"
    }

    fn is_ready_for_mesh(
        &mut self,
        engine: &mut Engine,
        ctx: &MaterialContext<'_>,
        mesh: &MeshDrawInfo,
        wrapper: &mut DrawWrapper,
    ) -> Result<bool> {
        let mut defines = wrapper.take_defines::<MaterialDefines>();
        let flags = wrapper.take_material_dirty(&self.base);
        defines.mark_dirty(flags);
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
        let compiled = self.compiled.as_ref()?;
        let effect = engine.get_effect_mut(key)?;
        for (id, binding) in &compiled.blocks {
            if let Some(block) = self.blocks.get(*id) {
                block.bind(effect, ctx, mesh, binding);
            }
        }
        Some(key)
    }

    fn serialize(&self) -> serde_json::Value {
        self.serialize_graph()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::CameraSnapshot;
    use crate::engine::{EngineOptions, HeadlessBackend};
    use crate::lights::Light;
    use crate::materials::node::InputValue;
    use crate::materials::ImageProcessingConfiguration;
    use crate::maths::{Color3, Color4, Size};
    use crate::scene::NodeId;
    use crate::textures::TextureArena;
    use cgmath::{Matrix4, SquareMatrix, Vector3};

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(16, 16)), EngineOptions::default())
    }

    fn mesh_info(id: NodeId) -> MeshDrawInfo {
        MeshDrawInfo {
            id,
            world: Matrix4::identity(),
            visibility: 1.0,
            has_normals: true,
            has_uvs: true,
            has_vertex_colors: false,
            has_vertex_alpha: false,
            non_uniform_scaling: false,
        }
    }

    #[test]
    fn test_default_graph_builds_with_varyings() {
        let mut engine = engine();
        let mut material = NodeMaterial::with_default_graph("lit").unwrap();
        material.build(&mut engine).unwrap();
        let (vertex, fragment) = material.compiled_sources(&engine).unwrap();
        assert!(vertex.contains("out.position = clipPos_output;"));
        // world position and normal cross into the fragment stage
        assert!(vertex.contains("@location(1) v1: vec4<f32>"));
        assert!(fragment.contains("computeNodeLighting"));
        assert!(fragment.contains("return vec4<f32>("));
        assert!(fragment.contains("#ifdef LIGHT3"));
    }

    #[test]
    fn test_ready_with_lights_and_binding() {
        let mut engine = engine();
        let mut nodes = slotmap::SlotMap::<NodeId, ()>::with_key();
        let mesh_id = nodes.insert(());
        let light_id = nodes.insert(());
        let lights = [Light::new_point(Vector3::new(0.0, 2.0, 0.0)).snapshot(light_id, None)];
        let camera = CameraSnapshot::default();
        let image_processing = ImageProcessingConfiguration::new();
        let textures = TextureArena::with_key();
        let ctx = MaterialContext {
            camera: &camera,
            lights: &lights,
            image_processing: &image_processing,
            pre_pass: None,
            textures: &textures,
            ambient_color: Color3::black(),
            environment_texture: None,
            clip_plane: None,
            render_size: Size::new(16, 16),
            render_id: 1,
        };
        let mesh = mesh_info(mesh_id);

        let mut material = NodeMaterial::with_default_graph("lit").unwrap();
        let mut wrapper = DrawWrapper::default();
        assert!(material.is_ready_for_mesh(&mut engine, &ctx, &mesh, &mut wrapper).unwrap());
        let defines = wrapper.defines::<MaterialDefines>().unwrap();
        assert!(defines["LIGHT0"]);
        assert!(defines["POINTLIGHT0"]);
        assert!(!defines["LIGHT1"]);

        let key = material.bind_for_mesh(&mut engine, &ctx, &mesh, &wrapper).unwrap();
        let effect = engine.get_effect(key).unwrap();
        assert!(effect.value("vLightData0").is_some());
        assert!(effect.value("cameraPosition").is_some());
        assert!(effect.value("world").is_some());
    }

    #[test]
    fn test_graph_edit_rebuilds_effect() {
        let mut engine = engine();
        let mut nodes = slotmap::SlotMap::<NodeId, ()>::with_key();
        let camera = CameraSnapshot::default();
        let image_processing = ImageProcessingConfiguration::new();
        let textures = TextureArena::with_key();
        let ctx = |render_id| MaterialContext {
            camera: &camera,
            lights: &[],
            image_processing: &image_processing,
            pre_pass: None,
            textures: &textures,
            ambient_color: Color3::black(),
            environment_texture: None,
            clip_plane: None,
            render_size: Size::new(16, 16),
            render_id,
        };
        let mesh = mesh_info(nodes.insert(()));

        let mut material = NodeMaterial::with_default_graph("lit").unwrap();
        let mut wrapper = DrawWrapper::default();
        assert!(material.is_ready_for_mesh(&mut engine, &ctx(1), &mesh, &mut wrapper).unwrap());
        let first = wrapper.effect;

        let output = material.block_by_name("fragmentOutput").unwrap();
        let tint = material.add_block(Box::new(InputBlock::uniform(
            "tint",
            InputValue::Color4(Color4::new(1.0, 0.0, 0.0, 1.0)),
        )));
        material.connect(tint, "output", output, "rgba").unwrap();
        assert!(material.is_ready_for_mesh(&mut engine, &ctx(2), &mesh, &mut wrapper).unwrap());
        assert_ne!(wrapper.effect, first);
        assert_eq!(engine.effect_count(), 1);

        let key = material.bind_for_mesh(&mut engine, &ctx(2), &mesh, &wrapper).unwrap();
        assert!(engine.get_effect(key).unwrap().value("tint").is_some());
    }

    #[test]
    fn test_invalid_connections_are_rejected() {
        let mut material = NodeMaterial::new("broken");
        let world = material.add_block(Box::new(InputBlock::system_value(SystemValue::World)));
        let output = material.add_block(Box::new(FragmentOutputBlock::new("out")));
        assert!(material.connect(world, "output", output, "rgb").is_err());
        assert!(material.connect(world, "missing", output, "rgb").is_err());

        let a = material.add_block(Box::new(AddBlock::new("a")));
        let b = material.add_block(Box::new(AddBlock::new("b")));
        material.connect(a, "output", b, "left").unwrap();
        assert!(material.connect(b, "output", a, "left").is_err());
    }

    #[test]
    fn test_light_block_cannot_feed_vertex_stage() {
        let mut engine = engine();
        let mut material = NodeMaterial::with_default_graph("bad").unwrap();
        let vertex_output = material.block_by_name("vertexOutput").unwrap();
        let light = material.block_by_name("lights").unwrap();
        let bridge = material.add_block(Box::new(AddBlock::new("bridge")));
        material.connect(light, "diffuseOutput", bridge, "left").unwrap();
        material.connect(light, "diffuseOutput", bridge, "right").unwrap();
        material.connect(bridge, "output", vertex_output, "vector").unwrap();
        let error = material.build(&mut engine).unwrap_err();
        assert!(matches!(error, EngineError::NodeMaterialBuild { ref material, .. } if material == "bad"));
    }

    #[test]
    fn test_graph_serialization_keeps_connections() {
        let mut engine = engine();
        let material = NodeMaterial::with_default_graph("lit").unwrap();
        let mut parsed = NodeMaterial::parse(&material.serialize_graph()).unwrap();
        assert_eq!(parsed.blocks().count(), material.blocks().count());
        let light = parsed.block_by_name("lights").unwrap();
        assert!(parsed
            .block(light)
            .unwrap()
            .inputs()
            .iter()
            .all(|point| point.is_connected()));
        parsed.build(&mut engine).unwrap();
        assert!(parsed.is_built());
    }
}
