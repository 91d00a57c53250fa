//! Compiled shader permutations and their bound values
//!
//! An [`Effect`] is created by the engine from a vertex/fragment pair, a
//! defines string and index parameters. Materials and post processes write
//! uniform values and textures into it by name before each draw; the engine
//! packs them into the uniform block layout generated for the program.

use std::collections::HashMap;

use cgmath::{Matrix4, Vector2, Vector3, Vector4};

use crate::engine::backend::{GpuProgramHandle, VertexInput};
use crate::maths::{Color3, Color4};
use crate::misc::observable::Observable;
use crate::shaders::{SamplerDecl, UniformDecl, UniformLayout, UniformType};
use crate::textures::internal_texture::TextureKey;

slotmap::new_key_type! {
    /// Key of a compiled effect inside the engine cache
    pub struct EffectKey;
}

/// Everything needed to build an effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectCreationOptions {
    /// Vertex shader name in the shader store
    pub vertex: String,
    /// Fragment shader name in the shader store
    pub fragment: String,
    pub attributes: Vec<String>,
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub defines: String,
    pub index_parameters: HashMap<String, i64>,
    pub vertex_input: VertexInput,
}

impl EffectCreationOptions {
    pub fn new(vertex: &str, fragment: &str) -> Self {
        Self {
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
            attributes: Vec::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            defines: String::new(),
            index_parameters: HashMap::new(),
            vertex_input: VertexInput::None,
        }
    }

    pub fn with_uniforms(mut self, uniforms: Vec<UniformDecl>) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_samplers(mut self, samplers: Vec<SamplerDecl>) -> Self {
        self.samplers = samplers;
        self
    }

    pub fn with_defines(mut self, defines: &str) -> Self {
        self.defines = defines.to_string();
        self
    }

    pub fn with_index_parameters(mut self, index_parameters: HashMap<String, i64>) -> Self {
        self.index_parameters = index_parameters;
        self
    }

    pub fn with_vertex_input(mut self, vertex_input: VertexInput, attributes: &[&str]) -> Self {
        self.vertex_input = vertex_input;
        self.attributes = attributes.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Cache key: same shaders, defines and index parameters share one effect
    pub fn cache_key(&self) -> String {
        let mut parameters: Vec<_> = self.index_parameters.iter().collect();
        parameters.sort();
        let mut uniforms: Vec<_> = self.uniforms.iter().map(|u| u.name.as_str()).collect();
        uniforms.sort_unstable();
        format!(
            "{}+{}|{}|{:?}|{}",
            self.vertex,
            self.fragment,
            self.defines,
            parameters,
            uniforms.join(",")
        )
    }
}

/// A value written to a uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    fn write(&self, ty: UniformType, out: &mut [u8]) {
        let mut floats = [0f32; 16];
        let count = match (self, ty) {
            (Self::Int(v), UniformType::Int) => {
                out[..4].copy_from_slice(&v.to_le_bytes());
                return;
            }
            (Self::Int(v), _) => {
                floats[0] = *v as f32;
                1
            }
            (Self::Float(v), UniformType::Int) => {
                out[..4].copy_from_slice(&(*v as i32).to_le_bytes());
                return;
            }
            (Self::Float(v), _) => {
                floats[0] = *v;
                1
            }
            (Self::Vec2(v), _) => {
                floats[..2].copy_from_slice(v);
                2
            }
            (Self::Vec3(v), _) => {
                floats[..3].copy_from_slice(v);
                3
            }
            (Self::Vec4(v), _) => {
                floats[..4].copy_from_slice(v);
                4
            }
            (Self::Mat4(m), _) => {
                for (column, values) in m.iter().enumerate() {
                    floats[column * 4..column * 4 + 4].copy_from_slice(values);
                }
                16
            }
        };
        let count = count.min((ty.size() / 4) as usize);
        out[..count * 4].copy_from_slice(bytemuck::cast_slice(&floats[..count]));
    }
}

/// A shader permutation owned by the engine
#[derive(Debug)]
pub struct Effect {
    pub name: String,
    pub vertex_name: String,
    pub fragment_name: String,
    pub attributes: Vec<String>,
    pub defines: String,
    pub index_parameters: HashMap<String, i64>,
    pub vertex_input: VertexInput,
    pub on_compiled: Observable<Effect>,
    pub on_error: Observable<Effect>,
    layout: UniformLayout,
    samplers: Vec<SamplerDecl>,
    values: HashMap<String, UniformValue>,
    textures: HashMap<String, Option<TextureKey>>,
    pub(crate) program: Option<GpuProgramHandle>,
    pub(crate) compilation_error: Option<String>,
    pub(crate) references: u32,
    pub(crate) cache_key: String,
}

impl Effect {
    pub fn new(options: &EffectCreationOptions) -> Self {
        Self {
            name: format!("{}+{}", options.vertex, options.fragment),
            vertex_name: options.vertex.clone(),
            fragment_name: options.fragment.clone(),
            attributes: options.attributes.clone(),
            defines: options.defines.clone(),
            index_parameters: options.index_parameters.clone(),
            vertex_input: options.vertex_input,
            on_compiled: Observable::new(),
            on_error: Observable::new(),
            layout: UniformLayout::new(&options.uniforms),
            samplers: options.samplers.clone(),
            values: HashMap::new(),
            textures: HashMap::new(),
            program: None,
            compilation_error: None,
            references: 1,
            cache_key: options.cache_key(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_some()
    }

    pub fn compilation_error(&self) -> Option<&str> {
        self.compilation_error.as_deref()
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn samplers(&self) -> &[SamplerDecl] {
        &self.samplers
    }

    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.layout.entries.iter().map(|(decl, _)| decl.name.as_str())
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.layout.offset_of(name).is_some()
    }

    pub fn has_sampler(&self, name: &str) -> bool {
        self.samplers.iter().any(|s| s.name == name)
    }

    pub fn set_value(&mut self, name: &str, value: UniformValue) -> &mut Self {
        if self.has_uniform(name) {
            self.values.insert(name.to_string(), value);
        }
        self
    }

    pub fn value(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> &mut Self {
        self.set_value(name, UniformValue::Float(value))
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> &mut Self {
        self.set_value(name, UniformValue::Int(value))
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> &mut Self {
        self.set_value(name, UniformValue::Int(value as i32))
    }

    pub fn set_float2(&mut self, name: &str, x: f32, y: f32) -> &mut Self {
        self.set_value(name, UniformValue::Vec2([x, y]))
    }

    pub fn set_float3(&mut self, name: &str, x: f32, y: f32, z: f32) -> &mut Self {
        self.set_value(name, UniformValue::Vec3([x, y, z]))
    }

    pub fn set_float4(&mut self, name: &str, x: f32, y: f32, z: f32, w: f32) -> &mut Self {
        self.set_value(name, UniformValue::Vec4([x, y, z, w]))
    }

    pub fn set_vector2(&mut self, name: &str, value: Vector2<f32>) -> &mut Self {
        self.set_value(name, UniformValue::Vec2(value.into()))
    }

    pub fn set_vector3(&mut self, name: &str, value: Vector3<f32>) -> &mut Self {
        self.set_value(name, UniformValue::Vec3(value.into()))
    }

    pub fn set_vector4(&mut self, name: &str, value: Vector4<f32>) -> &mut Self {
        self.set_value(name, UniformValue::Vec4(value.into()))
    }

    pub fn set_color3(&mut self, name: &str, color: &Color3) -> &mut Self {
        self.set_value(name, UniformValue::Vec3(color.to_array()))
    }

    pub fn set_color4(&mut self, name: &str, color: &Color3, alpha: f32) -> &mut Self {
        self.set_value(name, UniformValue::Vec4([color.r, color.g, color.b, alpha]))
    }

    pub fn set_direct_color4(&mut self, name: &str, color: &Color4) -> &mut Self {
        self.set_value(name, UniformValue::Vec4(color.to_array()))
    }

    pub fn set_matrix(&mut self, name: &str, matrix: &Matrix4<f32>) -> &mut Self {
        self.set_value(name, UniformValue::Mat4((*matrix).into()))
    }

    /// Binds an internal texture (or nothing, which samples a fallback)
    pub fn set_texture(&mut self, sampler: &str, texture: Option<TextureKey>) -> &mut Self {
        if self.has_sampler(sampler) {
            self.textures.insert(sampler.to_string(), texture);
        }
        self
    }

    pub fn texture(&self, sampler: &str) -> Option<TextureKey> {
        self.textures.get(sampler).copied().flatten()
    }

    /// Packs the recorded values following the WGSL uniform layout
    pub fn uniform_block(&self) -> Vec<u8> {
        let mut block = vec![0u8; self.layout.size as usize];
        for (decl, offset) in &self.layout.entries {
            if let Some(value) = self.values.get(&decl.name) {
                let start = *offset as usize;
                let end = start + decl.ty.size() as usize;
                value.write(decl.ty, &mut block[start..end]);
            }
        }
        block
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
        self.textures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::SamplerDecl;

    fn effect() -> Effect {
        Effect::new(
            &EffectCreationOptions::new("postprocess", "pass")
                .with_uniforms(vec![
                    UniformDecl::new("scale", UniformType::Vec2),
                    UniformDecl::new("color", UniformType::Vec3),
                    UniformDecl::new("count", UniformType::Int),
                ])
                .with_samplers(vec![SamplerDecl::new("textureSampler")]),
        )
    }

    #[test]
    fn test_uniform_block_packing() {
        let mut effect = effect();
        effect
            .set_float2("scale", 1.0, 2.0)
            .set_color3("color", &Color3::new(0.25, 0.5, 0.75))
            .set_int("count", 7);
        let block = effect.uniform_block();
        assert_eq!(block.len(), 32);
        let floats: &[f32] = bytemuck::cast_slice(&block);
        assert_eq!(&floats[0..2], &[1.0, 2.0]);
        assert_eq!(&floats[4..7], &[0.25, 0.5, 0.75]);
        assert_eq!(i32::from_le_bytes([block[28], block[29], block[30], block[31]]), 7);
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let mut effect = effect();
        effect.set_float("missing", 3.0);
        effect.set_texture("missingSampler", None);
        assert!(effect.value("missing").is_none());
        assert!(effect.texture("missingSampler").is_none());
        assert!(!effect.is_ready());
    }

    #[test]
    fn test_cache_key_ignores_index_parameter_order() {
        let mut first = HashMap::new();
        first.insert("a".to_string(), 1);
        first.insert("b".to_string(), 2);
        let options = EffectCreationOptions::new("v", "f").with_index_parameters(first.clone());
        let mut second = HashMap::new();
        second.insert("b".to_string(), 2);
        second.insert("a".to_string(), 1);
        let other = EffectCreationOptions::new("v", "f").with_index_parameters(second);
        assert_eq!(options.cache_key(), other.cache_key());
        let changed = EffectCreationOptions::new("v", "f").with_defines("#define X\n");
        assert_ne!(options.cache_key(), changed.cache_key());
    }
}
