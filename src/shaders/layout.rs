//! Uniform block layout and generated WGSL bindings
//!
//! Effects declare their uniforms by name and type. The layout follows WGSL
//! uniform address space rules so the packed bytes can be copied straight into
//! the backend's uniform buffer.

use crate::engine::backend::TextureDimension;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    pub fn wgsl(self) -> &'static str {
        match self {
            Self::Float => "f32",
            Self::Int => "i32",
            Self::Vec2 => "vec2<f32>",
            Self::Vec3 => "vec3<f32>",
            Self::Vec4 => "vec4<f32>",
            Self::Mat4 => "mat4x4<f32>",
        }
    }

    pub fn align(self) -> u64 {
        match self {
            Self::Float | Self::Int => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }

    pub fn size(self) -> u64 {
        match self {
            Self::Float | Self::Int => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }
}

/// A named uniform declared by an effect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformDecl {
    pub name: String,
    pub ty: UniformType,
}

impl UniformDecl {
    pub fn new(name: &str, ty: UniformType) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

/// A named texture/sampler pair declared by an effect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDecl {
    pub name: String,
    pub dimension: TextureDimension,
}

impl SamplerDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dimension: TextureDimension::D2,
        }
    }

    pub fn with_dimension(name: &str, dimension: TextureDimension) -> Self {
        Self {
            name: name.to_string(),
            dimension,
        }
    }
}

/// Byte offsets of every uniform inside the block
#[derive(Debug, Clone, PartialEq)]
pub struct UniformLayout {
    pub entries: Vec<(UniformDecl, u64)>,
    pub size: u64,
}

fn align_to(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

impl UniformLayout {
    pub fn new(uniforms: &[UniformDecl]) -> Self {
        let mut offset = 0;
        let mut entries = Vec::with_capacity(uniforms.len());
        for decl in uniforms {
            offset = align_to(offset, decl.ty.align());
            entries.push((decl.clone(), offset));
            offset += decl.ty.size();
        }
        // Empty structs are not valid WGSL, so an empty block still holds a vec4
        let size = align_to(offset.max(16), 16);
        Self { entries, size }
    }

    pub fn offset_of(&self, name: &str) -> Option<(UniformType, u64)> {
        self.entries
            .iter()
            .find(|(decl, _)| decl.name == name)
            .map(|(decl, offset)| (decl.ty, *offset))
    }
}

/// Generates the uniform struct and texture bindings shared by both stages
pub fn generate_bindings(layout: &UniformLayout, samplers: &[SamplerDecl]) -> String {
    let mut code = String::from("struct Uniforms {\n");
    if layout.entries.is_empty() {
        code.push_str("    _unused: vec4<f32>,\n");
    }
    for (decl, _) in &layout.entries {
        code.push_str(&format!("    {}: {},\n", decl.name, decl.ty.wgsl()));
    }
    code.push_str("};\n\n@group(0) @binding(0) var<uniform> uniforms: Uniforms;\n");

    for (i, sampler) in samplers.iter().enumerate() {
        let texture_type = match sampler.dimension {
            TextureDimension::D2 => "texture_2d<f32>",
            TextureDimension::Cube => "texture_cube<f32>",
            TextureDimension::D3 => "texture_3d<f32>",
        };
        code.push_str(&format!(
            "@group(1) @binding({}) var {}: {};\n@group(1) @binding({}) var {}Smp: sampler;\n",
            i * 2,
            sampler.name,
            texture_type,
            i * 2 + 1,
            sampler.name
        ));
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wgsl_alignment() {
        let layout = UniformLayout::new(&[
            UniformDecl::new("exposure", UniformType::Float),
            UniformDecl::new("color", UniformType::Vec3),
            UniformDecl::new("scale", UniformType::Float),
            UniformDecl::new("offset", UniformType::Vec2),
            UniformDecl::new("world", UniformType::Mat4),
        ]);
        assert_eq!(layout.offset_of("exposure"), Some((UniformType::Float, 0)));
        assert_eq!(layout.offset_of("color"), Some((UniformType::Vec3, 16)));
        // vec3 leaves a 4 byte tail that a scalar can occupy
        assert_eq!(layout.offset_of("scale"), Some((UniformType::Float, 28)));
        assert_eq!(layout.offset_of("offset"), Some((UniformType::Vec2, 32)));
        assert_eq!(layout.offset_of("world"), Some((UniformType::Mat4, 48)));
        assert_eq!(layout.size, 112);
    }

    #[test]
    fn test_empty_block_is_padded() {
        let layout = UniformLayout::new(&[]);
        assert_eq!(layout.size, 16);
        let code = generate_bindings(&layout, &[SamplerDecl::new("textureSampler")]);
        assert!(code.contains("_unused"));
        assert!(code.contains("@group(1) @binding(0) var textureSampler: texture_2d<f32>;"));
        assert!(code.contains("@group(1) @binding(1) var textureSamplerSmp: sampler;"));
    }
}
