use slotmap::{Key, KeyData};

use crate::error::Result;
use crate::lights::LightSnapshot;
use crate::materials::node::blocks::{block_accessors, required, BlockInput, BlockTarget, NodeMaterialBlock, SystemValue};
use crate::materials::node::build_state::{BlockBinding, NodeMaterialBuildState};
use crate::materials::node::connection_point::{ConnectionPoint, ConnectionPointType};
use crate::materials::{Effect, MaterialContext, MaterialDefines, MeshDrawInfo};
use crate::scene::NodeId;
use crate::shaders::ShaderStage;

const CAMERA_POSITION_INPUT: usize = 2;

const LIGHTING_FUNCTION: &str = "struct NodeLighting {
    diffuse: vec3<f32>,
    specular: vec3<f32>,
};

fn computeNodeLighting(lightVector: vec3<f32>, attenuation: f32, diffuseColor: vec3<f32>, specularColor: vec3<f32>, normal: vec3<f32>, viewDirection: vec3<f32>) -> NodeLighting {
    var result: NodeLighting;
    let ndl = max(0.0, dot(normal, lightVector));
    result.diffuse = ndl * diffuseColor * attenuation;
    let halfVector = normalize(lightVector + viewDirection);
    let specComp = pow(max(0.0, dot(normal, halfVector)), 64.0);
    result.specular = specComp * specularColor * attenuation;
    return result;
}
";

/// Diffuse and specular lighting from one light or every scene light
#[derive(Debug, Clone)]
pub struct LightBlock {
    name: String,
    /// Light to use; `None` uses the lights affecting the mesh
    pub light: Option<NodeId>,
    inputs: Vec<ConnectionPoint>,
    outputs: Vec<ConnectionPoint>,
}

impl LightBlock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            light: None,
            inputs: vec![
                ConnectionPoint::input("worldPosition", ConnectionPointType::Vector4),
                ConnectionPoint::input("worldNormal", ConnectionPointType::Vector4),
                ConnectionPoint::input("cameraPosition", ConnectionPointType::Vector3),
            ],
            outputs: vec![
                ConnectionPoint::output("diffuseOutput", ConnectionPointType::Color3),
                ConnectionPoint::output("specularOutput", ConnectionPointType::Color3),
            ],
        }
    }

    /// Lights feeding the slots reserved at build time
    fn slot_lights<'a>(
        &self,
        ctx: &MaterialContext<'a>,
        binding: &BlockBinding,
    ) -> impl Iterator<Item = (usize, Option<&'a LightSnapshot>)> + 'a {
        let lights = ctx.lights;
        let light = self.light;
        let first = binding.light_slot;
        (0..binding.light_count).map(move |offset| {
            let snapshot = match light {
                Some(id) => lights.iter().find(|l| l.id == id),
                None => lights.get(offset),
            };
            (first + offset, snapshot)
        })
    }

    fn emit_slot(state: &mut NodeMaterialBuildState, slot: usize, vars: &SlotVariables<'_>) {
        let lines = [
            format!("#ifdef LIGHT{}", slot),
            "{".to_string(),
            format!("#ifdef HEMILIGHT{}", slot),
            format!(
                "let hemiWeight = dot({}, uniforms.vLightData{}.xyz) * 0.5 + 0.5;",
                vars.normal, slot
            ),
            format!(
                "{} += mix(uniforms.vLightGround{}, uniforms.vLightDiffuse{}.rgb, hemiWeight);",
                vars.diffuse, slot, slot
            ),
            "#else".to_string(),
            format!("#ifdef DIRLIGHT{}", slot),
            format!("let lightVector = normalize(-uniforms.vLightData{}.xyz);", slot),
            "var attenuation = 1.0;".to_string(),
            "#else".to_string(),
            format!(
                "let toLight = uniforms.vLightData{}.xyz - ({}).xyz;",
                slot, vars.position
            ),
            "let lightVector = normalize(toLight);".to_string(),
            format!(
                "var attenuation = max(0.0, 1.0 - length(toLight) / uniforms.vLightDiffuse{}.a);",
                slot
            ),
            format!("#ifdef SPOTLIGHT{}", slot),
            format!(
                "let cosAngle = max(0.0, dot(uniforms.vLightDirection{}.xyz, -lightVector));",
                slot
            ),
            format!(
                "attenuation *= select(0.0, pow(cosAngle, uniforms.vLightData{}.w), cosAngle >= uniforms.vLightDirection{}.w);",
                slot, slot
            ),
            "#endif".to_string(),
            "#endif".to_string(),
            format!(
                "let lighting = computeNodeLighting(lightVector, attenuation, uniforms.vLightDiffuse{}.rgb, uniforms.vLightSpecular{}.rgb, {}, {});",
                slot, slot, vars.normal, vars.view
            ),
            format!("{} += lighting.diffuse;", vars.diffuse),
            format!("{} += lighting.specular;", vars.specular),
            "#endif".to_string(),
            "}".to_string(),
            "#endif".to_string(),
        ];
        for line in lines {
            state.emit_code(ShaderStage::Fragment, &line);
        }
    }
}

struct SlotVariables<'a> {
    position: &'a str,
    normal: &'a str,
    view: &'a str,
    diffuse: &'a str,
    specular: &'a str,
}

impl NodeMaterialBlock for LightBlock {
    block_accessors!();

    fn class_name(&self) -> &'static str {
        "LightBlock"
    }

    fn target(&self) -> BlockTarget {
        BlockTarget::Fragment
    }

    fn auto_configure(&self) -> Vec<(usize, SystemValue)> {
        match self.inputs.get(CAMERA_POSITION_INPUT) {
            Some(point) if !point.is_connected() => {
                vec![(CAMERA_POSITION_INPUT, SystemValue::CameraPosition)]
            }
            _ => Vec::new(),
        }
    }

    fn build(
        &self,
        state: &mut NodeMaterialBuildState,
        stage: ShaderStage,
        inputs: &[BlockInput],
    ) -> Result<Vec<String>> {
        let position = required(inputs, 0, &self.name)?;
        let normal_input = required(inputs, 1, &self.name)?;
        let camera = required(inputs, 2, &self.name)?;

        let count = if self.light.is_some() {
            1
        } else {
            state.max_simultaneous_lights
        };
        let first = state.reserve_light_slots(count);
        self.update_uniforms_and_samples(state);
        state.emit_function("computeNodeLighting", LIGHTING_FUNCTION);

        let diffuse = state.get_free_variable_name("diffuseOutput");
        let specular = state.get_free_variable_name("specularOutput");
        let normal = state.get_free_variable_name("normalW");
        let view = state.get_free_variable_name("viewDirectionW");
        state.emit_code(stage, &format!("var {} = vec3<f32>(0.0);", diffuse));
        state.emit_code(stage, &format!("var {} = vec3<f32>(0.0);", specular));
        state.emit_code(stage, &format!("let {} = normalize(({}).xyz);", normal, normal_input));
        state.emit_code(
            stage,
            &format!("let {} = normalize({} - ({}).xyz);", view, camera, position),
        );
        let vars = SlotVariables {
            position,
            normal: &normal,
            view: &view,
            diffuse: &diffuse,
            specular: &specular,
        };
        for slot in first..first + count {
            Self::emit_slot(state, slot, &vars);
        }
        Ok(vec![diffuse, specular])
    }

    fn prepare_defines(
        &self,
        ctx: &MaterialContext<'_>,
        _mesh: &MeshDrawInfo,
        binding: &BlockBinding,
        defines: &mut MaterialDefines,
    ) {
        for (slot, light) in self.slot_lights(ctx, binding) {
            match light {
                Some(light) => light.prepare_defines(defines, slot),
                None => LightSnapshot::clear_defines(defines, slot),
            }
        }
    }

    fn update_uniforms_and_samples(&self, state: &mut NodeMaterialBuildState) {
        let Some(binding) = state.current_block.and_then(|block| state.binding(block)).cloned() else {
            return;
        };
        for slot in binding.light_slot..binding.light_slot + binding.light_count {
            for uniform in LightSnapshot::uniforms(slot) {
                state.emit_uniform(uniform);
            }
        }
    }

    fn bind(
        &self,
        effect: &mut Effect,
        ctx: &MaterialContext<'_>,
        _mesh: &MeshDrawInfo,
        binding: &BlockBinding,
    ) {
        for (slot, light) in self.slot_lights(ctx, binding) {
            if let Some(light) = light {
                light.bind(effect, slot);
            }
        }
    }

    fn serialize(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "customType": "BABYLON.LightBlock",
            "name": self.name,
        });
        if let Some(light) = self.light {
            value["lightId"] = light.data().as_ffi().into();
        }
        value
    }

    fn deserialize(&mut self, value: &serde_json::Value) -> Result<()> {
        if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }
        self.light = value
            .get("lightId")
            .and_then(|v| v.as_u64())
            .map(|id| KeyData::from_ffi(id).into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::CameraSnapshot;
    use crate::lights::Light;
    use crate::materials::ImageProcessingConfiguration;
    use crate::maths::{Color3, Size};
    use crate::textures::TextureArena;
    use cgmath::{Matrix4, SquareMatrix, Vector3};

    fn inputs() -> Vec<BlockInput> {
        vec![
            Some(("worldPos".to_string(), ConnectionPointType::Vector4)),
            Some(("worldNormal".to_string(), ConnectionPointType::Vector4)),
            Some(("uniforms.cameraPosition".to_string(), ConnectionPointType::Vector3)),
        ]
    }

    #[test]
    fn test_build_reserves_slots_and_uniforms() {
        let block_id = slotmap::SlotMap::<crate::materials::node::BlockId, ()>::with_key().insert(());
        let mut state = NodeMaterialBuildState::new(2);
        state.current_block = Some(block_id);
        let block = LightBlock::new("light");
        let outputs = block.build(&mut state, ShaderStage::Fragment, &inputs()).unwrap();
        assert_eq!(outputs, vec!["diffuseOutput", "specularOutput"]);
        assert_eq!(state.binding(block_id).unwrap().light_count, 2);
        assert!(state.uniforms.iter().any(|u| u.name == "vLightData1"));
        assert!(state.fragment_code.contains("#ifdef LIGHT1"));
        assert!(state.functions.contains_key("computeNodeLighting"));
    }

    #[test]
    fn test_bound_light_uses_one_slot() {
        let mut nodes = slotmap::SlotMap::<NodeId, ()>::with_key();
        let first = nodes.insert(());
        let second = nodes.insert(());
        let lights = [
            Light::new_point(Vector3::new(0.0, 1.0, 0.0)).snapshot(first, None),
            Light::new_directional(-Vector3::unit_y()).snapshot(second, None),
        ];
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
            render_size: Size::new(1, 1),
            render_id: 1,
        };
        let mesh = MeshDrawInfo {
            id: first,
            world: Matrix4::identity(),
            visibility: 1.0,
            has_normals: true,
            has_uvs: false,
            has_vertex_colors: false,
            has_vertex_alpha: false,
            non_uniform_scaling: false,
        };
        let mut block = LightBlock::new("light");
        block.light = Some(second);
        let binding = BlockBinding {
            uniforms: Vec::new(),
            light_slot: 3,
            light_count: 1,
        };
        let mut defines = MaterialDefines::new();
        block.prepare_defines(&ctx, &mesh, &binding, &mut defines);
        assert!(defines["LIGHT3"]);
        assert!(defines["DIRLIGHT3"]);
        assert!(!defines.has_bool("LIGHT0"));

        let restored = {
            let mut parsed = LightBlock::new("other");
            parsed.deserialize(&block.serialize()).unwrap();
            parsed
        };
        assert_eq!(restored.light, Some(second));
        assert_eq!(restored.name(), "light");
    }

    #[test]
    fn test_auto_configure_requests_camera_position() {
        let mut block = LightBlock::new("light");
        assert_eq!(
            block.auto_configure(),
            vec![(CAMERA_POSITION_INPUT, SystemValue::CameraPosition)]
        );
        let source = slotmap::SlotMap::<crate::materials::node::BlockId, ()>::with_key().insert(());
        block.inputs_mut()[CAMERA_POSITION_INPUT].connected = Some(crate::materials::node::connection_point::Connection {
            block: source,
            output: 0,
        });
        assert!(block.auto_configure().is_empty());
    }
}
