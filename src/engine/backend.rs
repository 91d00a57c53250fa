//! Render backend abstraction
//!
//! The [`Engine`](super::Engine) never talks to a graphics API directly. It
//! records textures, programs and draws through a [`RenderBackend`], which is
//! either the wgpu backend or the headless recorder used for tests and
//! offscreen validation.

use crate::engine::constants::{AddressMode, AlphaMode, SamplingMode, TextureFormat, TextureType};
use crate::error::Result;
use crate::maths::Color4;

/// Opaque GPU texture owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuTextureHandle(pub u64);

/// Opaque compiled shader program owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuProgramHandle(pub u64);

/// Opaque vertex/index buffer pair owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuMeshHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    Cube,
    D3,
}

/// Hardware capabilities reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCaps {
    pub max_texture_size: u32,
    pub max_cube_texture_size: u32,
    pub max_render_texture_size: u32,
    pub max_samples: u32,
    pub max_anisotropy: u32,
    pub texture_float: bool,
    pub texture_float_render: bool,
    pub texture_half_float: bool,
    pub texture_half_float_render: bool,
    pub texture_3d: bool,
    pub non_power_of_two_textures: bool,
    pub multiple_render_targets: bool,
    pub max_draw_buffers: u32,
}

impl Default for EngineCaps {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_cube_texture_size: 4096,
            max_render_texture_size: 4096,
            max_samples: 4,
            max_anisotropy: 16,
            texture_float: true,
            texture_float_render: true,
            texture_half_float: true,
            texture_half_float_render: true,
            texture_3d: true,
            non_power_of_two_textures: true,
            multiple_render_targets: true,
            max_draw_buffers: 8,
        }
    }
}

/// Filtering and addressing for a texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub sampling_mode: SamplingMode,
    pub wrap_u: AddressMode,
    pub wrap_v: AddressMode,
    pub wrap_r: AddressMode,
    pub anisotropy: u32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            sampling_mode: SamplingMode::Trilinear,
            wrap_u: AddressMode::Wrap,
            wrap_v: AddressMode::Wrap,
            wrap_r: AddressMode::Wrap,
            anisotropy: 1,
        }
    }
}

impl SamplerDesc {
    pub fn clamped(sampling_mode: SamplingMode) -> Self {
        Self {
            sampling_mode,
            wrap_u: AddressMode::Clamp,
            wrap_v: AddressMode::Clamp,
            wrap_r: AddressMode::Clamp,
            anisotropy: 1,
        }
    }
}

/// Description of a GPU texture allocation
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Depth slices for 3D textures, ignored otherwise
    pub depth: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub texture_type: TextureType,
    pub mip_levels: u32,
    pub samples: u32,
    pub render_target: bool,
    pub sampler: SamplerDesc,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            width: 1,
            height: 1,
            depth: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba,
            texture_type: TextureType::UnsignedInt,
            mip_levels: 1,
            samples: 1,
            render_target: false,
            sampler: SamplerDesc::default(),
        }
    }
}

impl TextureDesc {
    /// Number of array layers backing this texture
    pub fn layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
            TextureDimension::D3 => self.depth.max(1),
        }
    }
}

/// One level (or cube face) of texel data
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    pub level: u32,
    /// Cube face index, or first depth slice for 3D textures
    pub layer: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub data: &'a [u8],
}

/// Vertex input expected by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexInput {
    /// Fullscreen triangle generated from the vertex index
    None,
    /// Interleaved [`MeshVertex`] buffer
    Mesh,
}

/// A processed shader program ready for compilation
#[derive(Debug, Clone)]
pub struct ProgramDesc {
    pub name: String,
    pub source: String,
    pub uniform_block_size: u64,
    pub samplers: Vec<(String, TextureDimension)>,
    pub vertex_input: VertexInput,
}

/// Interleaved vertex used by every mesh buffer
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

impl MeshVertex {
    /// Vertex buffer layout for wgpu pipelines
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
            0 => Float32x3,
            1 => Float32x3,
            2 => Float32x2,
            3 => Float32x4
        ];
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Render pass setup
#[derive(Debug, Clone, PartialEq)]
pub struct PassDesc {
    pub label: String,
    /// Color attachments; empty renders to the backbuffer
    pub targets: Vec<GpuTextureHandle>,
    /// Cube face or depth slice to render into for layered targets
    pub layer: u32,
    pub clear_color: Option<Color4>,
    pub clear_depth: bool,
    pub depth_stencil: bool,
    /// Viewport in pixels (x, y, width, height)
    pub viewport: Option<[f32; 4]>,
}

impl PassDesc {
    pub fn backbuffer(label: &str) -> Self {
        Self {
            label: label.to_string(),
            targets: Vec::new(),
            layer: 0,
            clear_color: None,
            clear_depth: true,
            depth_stencil: true,
            viewport: None,
        }
    }

    pub fn offscreen(label: &str, targets: Vec<GpuTextureHandle>) -> Self {
        Self {
            targets,
            ..Self::backbuffer(label)
        }
    }

    pub fn with_clear_color(mut self, color: Option<Color4>) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_viewport(mut self, viewport: Option<[f32; 4]>) -> Self {
        self.viewport = viewport;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawGeometry {
    FullscreenTriangle,
    Mesh(GpuMeshHandle),
}

/// Fixed-function state for one draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub alpha_mode: AlphaMode,
    pub alpha_constants: Color4,
    pub cull_back_faces: Option<bool>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub stencil_write: bool,
    /// Only draw where the stencil buffer is still clear
    pub stencil_test: bool,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            alpha_mode: AlphaMode::Disable,
            alpha_constants: Color4::transparent(),
            cull_back_faces: Some(true),
            depth_test: true,
            depth_write: true,
            stencil_write: false,
            stencil_test: false,
        }
    }
}

impl DrawState {
    pub fn fullscreen(alpha_mode: AlphaMode) -> Self {
        Self {
            alpha_mode,
            cull_back_faces: None,
            depth_test: false,
            depth_write: false,
            ..Default::default()
        }
    }
}

/// A single draw with its packed uniforms and bound textures
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: GpuProgramHandle,
    pub uniforms: Vec<u8>,
    /// One entry per declared sampler, in declaration order
    pub textures: Vec<GpuTextureHandle>,
    pub geometry: DrawGeometry,
    pub state: DrawState,
}

/// Graphics API used by the engine
pub trait RenderBackend {
    fn name(&self) -> &str;

    fn caps(&self) -> &EngineCaps;

    /// Current backbuffer size in pixels
    fn backbuffer_size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuTextureHandle>;

    fn upload_texture(&mut self, texture: GpuTextureHandle, upload: TextureUpload<'_>)
        -> Result<()>;

    fn generate_mipmaps(&mut self, texture: GpuTextureHandle) -> Result<()>;

    fn update_sampler(&mut self, texture: GpuTextureHandle, sampler: &SamplerDesc) -> Result<()>;

    fn release_texture(&mut self, texture: GpuTextureHandle);

    fn create_mesh(&mut self, vertices: &[MeshVertex], indices: &[u32]) -> Result<GpuMeshHandle>;

    fn release_mesh(&mut self, mesh: GpuMeshHandle);

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<GpuProgramHandle>;

    fn release_program(&mut self, program: GpuProgramHandle);

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()>;

    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    fn end_pass(&mut self) -> Result<()>;

    /// Submits the frame and presents the backbuffer
    fn present(&mut self) -> Result<()>;

    /// Reads back RGBA texels of a texture level (or the last presented frame)
    fn read_pixels(&mut self, texture: Option<GpuTextureHandle>) -> Result<Vec<u8>>;
}
