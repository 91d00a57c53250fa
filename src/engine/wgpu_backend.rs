//! Render backend on top of wgpu
//!
//! Draws are recorded while a pass is open and encoded in one command buffer
//! when the pass ends, so every pass is submitted in the order the engine
//! issued it. Pipelines are built lazily for each program, target layout and
//! fixed-function state, then cached.

use std::collections::HashMap;
use std::iter;
use std::sync::Arc;

use log::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::engine::backend::{
    DrawCall, DrawGeometry, DrawState, EngineCaps, GpuMeshHandle, GpuProgramHandle,
    GpuTextureHandle, MeshVertex, PassDesc, ProgramDesc, RenderBackend, SamplerDesc,
    TextureDesc, TextureDimension, TextureUpload, VertexInput,
};
use crate::engine::constants::{
    bytes_per_texel, AddressMode, AlphaMode, SamplingMode, TextureFormat, TextureType,
};
use crate::error::{EngineError, Result};
use crate::maths::Color4;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Stencil value written by meshes and tested by overlays
const STENCIL_REFERENCE: u32 = 1;

const BLIT_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var sourceSmp: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source, sourceSmp, in.uv);
}
"#;

/// Everything a render pipeline is specialised for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    pub program: GpuProgramHandle,
    pub color_formats: Vec<wgpu::TextureFormat>,
    pub samples: u32,
    pub depth_stencil: bool,
    pub alpha_mode: AlphaMode,
    pub cull_mode: Option<wgpu::Face>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub stencil_write: bool,
    pub stencil_test: bool,
}

impl PipelineConfig {
    fn new(program: GpuProgramHandle, pass: &RecordedPass, state: &DrawState) -> Self {
        Self {
            program,
            color_formats: pass.color_formats.clone(),
            samples: pass.samples,
            depth_stencil: pass.desc.depth_stencil,
            alpha_mode: state.alpha_mode,
            cull_mode: state.cull_back_faces.map(|back| {
                if back {
                    wgpu::Face::Back
                } else {
                    wgpu::Face::Front
                }
            }),
            depth_test: state.depth_test,
            depth_write: state.depth_write,
            stencil_write: state.stencil_write,
            stencil_test: state.stencil_test,
        }
    }
}

struct GpuTexture {
    desc: TextureDesc,
    format: wgpu::TextureFormat,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    /// Multisampled color buffer resolved into `texture` at the end of a pass
    msaa: Option<wgpu::TextureView>,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct GpuProgram {
    name: String,
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    uniform_block_size: u64,
    sampler_count: usize,
    vertex_input: VertexInput,
}

struct RecordedDraw {
    pipeline: PipelineConfig,
    uniforms: wgpu::BindGroup,
    textures: Option<wgpu::BindGroup>,
    geometry: DrawGeometry,
    blend_constant: wgpu::Color,
}

struct RecordedPass {
    desc: PassDesc,
    color_formats: Vec<wgpu::TextureFormat>,
    samples: u32,
    draws: Vec<RecordedDraw>,
}

enum Presentation {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        frame: Option<wgpu::SurfaceTexture>,
    },
    Offscreen {
        target: wgpu::Texture,
    },
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    caps: EngineCaps,
    width: u32,
    height: u32,
    presentation: Presentation,
    backbuffer_format: wgpu::TextureFormat,
    backbuffer_depth: wgpu::TextureView,
    depth_targets: HashMap<(u32, u32, u32), wgpu::TextureView>,
    next_handle: u64,
    textures: HashMap<u64, GpuTexture>,
    meshes: HashMap<u64, GpuMesh>,
    programs: HashMap<u64, GpuProgram>,
    pipelines: HashMap<PipelineConfig, wgpu::RenderPipeline>,
    blit_module: Option<wgpu::ShaderModule>,
    blit_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    pass: Option<RecordedPass>,
}

impl WgpuBackend {
    /// Creates a backend presenting to a window surface
    pub async fn new(
        window: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        present_mode: wgpu::PresentMode,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|err| EngineError::backend(err.to_string()))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| EngineError::AdapterUnavailable)?;
        let (device, queue) = request_device(&adapter).await?;

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| EngineError::backend("the surface reports no texture format"))?;
        let present_mode = if capabilities.present_modes.contains(&present_mode) {
            present_mode
        } else {
            warn!("Present mode {:?} unsupported, using Fifo", present_mode);
            wgpu::PresentMode::Fifo
        };
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let presentation = Presentation::Surface {
            surface,
            config,
            frame: None,
        };
        Ok(Self::from_parts(
            device,
            queue,
            &adapter,
            presentation,
            format,
            width,
            height,
        ))
    }

    /// Creates a backend rendering the backbuffer into an offscreen texture
    /// that `read_pixels(None)` can read back
    pub async fn new_offscreen(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| EngineError::AdapterUnavailable)?;
        let (device, queue) = request_device(&adapter).await?;
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let target = create_offscreen_target(&device, format, width, height);
        Ok(Self::from_parts(
            device,
            queue,
            &adapter,
            Presentation::Offscreen { target },
            format,
            width,
            height,
        ))
    }

    fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter: &wgpu::Adapter,
        presentation: Presentation,
        backbuffer_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let adapter_name = adapter.get_info().name;
        let caps = caps_for(&device);
        info!(
            "wgpu backend on '{}' ({:?}), max texture size {}",
            adapter_name,
            adapter.get_info().backend,
            caps.max_texture_size
        );
        let (width, height) = (width.max(1), height.max(1));
        let backbuffer_depth = create_depth_view(&device, width, height, 1);
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            caps,
            width,
            height,
            presentation,
            backbuffer_format,
            backbuffer_depth,
            depth_targets: HashMap::new(),
            next_handle: 1,
            textures: HashMap::new(),
            meshes: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            blit_module: None,
            blit_pipelines: HashMap::new(),
            pass: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Number of cached render pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn texture(&self, texture: GpuTextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&texture.0)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })
    }

    /// Runs `create` and turns wgpu validation errors into engine errors
    fn validated<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> std::result::Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn acquire_frame(&mut self) -> Result<()> {
        let Presentation::Surface {
            surface,
            config,
            frame,
        } = &mut self.presentation
        else {
            return Ok(());
        };
        if frame.is_some() {
            return Ok(());
        }
        let texture = match surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("Surface lost or outdated, reconfiguring");
                surface.configure(&self.device, config);
                surface
                    .get_current_texture()
                    .map_err(|err| EngineError::backend(err.to_string()))?
            }
            Err(err) => return Err(EngineError::backend(err.to_string())),
        };
        *frame = Some(texture);
        Ok(())
    }

    fn ensure_blit_pipeline(&mut self, format: wgpu::TextureFormat) {
        let device = &self.device;
        let module = &*self.blit_module.get_or_insert_with(|| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("mipmap blit"),
                source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
            })
        });
        self.blit_pipelines.entry(format).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("mipmap blit"),
                layout: None,
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(format.into())],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });
    }

    fn build_pipeline(
        device: &wgpu::Device,
        program: &GpuProgram,
        config: &PipelineConfig,
    ) -> wgpu::RenderPipeline {
        let blend = blend_state(config.alpha_mode);
        let targets: Vec<Option<wgpu::ColorTargetState>> = config
            .color_formats
            .iter()
            .map(|format| {
                let blendable = format
                    .guaranteed_format_features(device.features())
                    .flags
                    .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE);
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: blend.filter(|_| blendable),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_stencil = config.depth_stencil.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: config.depth_write,
            depth_compare: if config.depth_test {
                wgpu::CompareFunction::LessEqual
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: stencil_state(config.stencil_write, config.stencil_test),
            bias: wgpu::DepthBiasState::default(),
        });
        let buffers = match program.vertex_input {
            VertexInput::Mesh => vec![MeshVertex::desc()],
            VertexInput::None => Vec::new(),
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.name),
            layout: Some(&program.layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: Some("vs_main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: Some("fs_main"),
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: config.cull_mode,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: config.samples,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        })
    }

    /// Encodes and submits the draws recorded for one pass
    fn submit_pass(&mut self, recorded: RecordedPass) -> Result<()> {
        let desc = &recorded.desc;
        let offscreen = !desc.targets.is_empty();

        let mut size = (self.width, self.height);
        if let Some(first) = desc.targets.first() {
            let texture = self.texture(*first)?;
            size = (texture.desc.width, texture.desc.height);
        }
        if desc.depth_stencil && offscreen {
            let device = &self.device;
            let key = (size.0, size.1, recorded.samples);
            self.depth_targets
                .entry(key)
                .or_insert_with(|| create_depth_view(device, key.0, key.1, key.2));
        }
        if !offscreen {
            self.acquire_frame()?;
        }

        // Per-pass single-layer views of the targets
        let mut layer_views = Vec::with_capacity(desc.targets.len().max(1));
        if offscreen {
            for target in &desc.targets {
                let texture = self.texture(*target)?;
                layer_views.push(texture.texture.create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: 0,
                    mip_level_count: Some(1),
                    base_array_layer: desc.layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                }));
            }
        } else {
            let view = match &self.presentation {
                Presentation::Surface { frame, .. } => frame
                    .as_ref()
                    .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default())),
                Presentation::Offscreen { target } => {
                    Some(target.create_view(&wgpu::TextureViewDescriptor::default()))
                }
            };
            layer_views.push(view.ok_or_else(|| EngineError::backend("no frame to render into"))?);
        }

        let load = match desc.clear_color {
            Some(color) => wgpu::LoadOp::Clear(to_wgpu_color(color)),
            None => wgpu::LoadOp::Load,
        };
        let mut color_attachments = Vec::with_capacity(layer_views.len());
        for (index, view) in layer_views.iter().enumerate() {
            let msaa = desc
                .targets
                .get(index)
                .and_then(|target| self.textures.get(&target.0))
                .and_then(|texture| texture.msaa.as_ref());
            let (view, resolve_target) = match msaa {
                Some(msaa) => (msaa, Some(view)),
                None => (view, None),
            };
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let depth_view = match (desc.depth_stencil, offscreen) {
            (false, _) => None,
            (true, false) => Some(&self.backbuffer_depth),
            (true, true) => self.depth_targets.get(&(size.0, size.1, recorded.samples)),
        };
        let depth_stencil_attachment =
            depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: if desc.clear_depth {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if desc.clear_depth {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&desc.label),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&desc.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some([x, y, width, height]) = desc.viewport {
                let x = x.clamp(0.0, size.0 as f32);
                let y = y.clamp(0.0, size.1 as f32);
                let width = width.clamp(1.0, (size.0 as f32 - x).max(1.0));
                let height = height.clamp(1.0, (size.1 as f32 - y).max(1.0));
                render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
            }
            if depth_view.is_some() {
                render_pass.set_stencil_reference(STENCIL_REFERENCE);
            }
            for draw in &recorded.draws {
                let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                render_pass.set_blend_constant(draw.blend_constant);
                render_pass.set_bind_group(0, &draw.uniforms, &[]);
                if let Some(textures) = &draw.textures {
                    render_pass.set_bind_group(1, textures, &[]);
                }
                match draw.geometry {
                    DrawGeometry::FullscreenTriangle => render_pass.draw(0..3, 0..1),
                    DrawGeometry::Mesh(handle) => {
                        let Some(mesh) = self.meshes.get(&handle.0) else {
                            continue;
                        };
                        render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                        render_pass
                            .set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                    }
                }
            }
        }
        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    // Float render targets are only sampled with filtering when supported
    let features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("babylon device"),
            required_features: features,
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        })
        .await
        .map_err(|err| EngineError::backend(err.to_string()))
}

fn caps_for(device: &wgpu::Device) -> EngineCaps {
    let limits = device.limits();
    let float_filterable = device
        .features()
        .contains(wgpu::Features::FLOAT32_FILTERABLE);
    EngineCaps {
        max_texture_size: limits.max_texture_dimension_2d,
        max_cube_texture_size: limits.max_texture_dimension_2d,
        max_render_texture_size: limits.max_texture_dimension_2d,
        max_samples: 4,
        max_anisotropy: 16,
        texture_float: float_filterable,
        texture_float_render: float_filterable,
        texture_half_float: true,
        texture_half_float_render: true,
        texture_3d: limits.max_texture_dimension_3d > 0,
        non_power_of_two_textures: true,
        multiple_render_targets: limits.max_color_attachments > 1,
        max_draw_buffers: limits.max_color_attachments,
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32, samples: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("depth stencil"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: samples.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_offscreen_target(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen backbuffer"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

fn wgpu_format(format: TextureFormat, texture_type: TextureType) -> wgpu::TextureFormat {
    use wgpu::TextureFormat as F;
    match format {
        TextureFormat::Depth24Stencil8 => return F::Depth24PlusStencil8,
        TextureFormat::Depth32Float => return F::Depth32Float,
        _ => {}
    }
    match (format.channel_count(), texture_type) {
        (1, TextureType::UnsignedInt) => F::R8Unorm,
        (1, TextureType::HalfFloat) => F::R16Float,
        (1, TextureType::Float) => F::R32Float,
        (2, TextureType::UnsignedInt) => F::Rg8Unorm,
        (2, TextureType::HalfFloat) => F::Rg16Float,
        (2, TextureType::Float) => F::Rg32Float,
        (_, TextureType::UnsignedInt) => F::Rgba8Unorm,
        (_, TextureType::HalfFloat) => F::Rgba16Float,
        (_, TextureType::Float) => F::Rgba32Float,
    }
}

fn view_dimension(dimension: TextureDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureDimension::D2 => wgpu::TextureViewDimension::D2,
        TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
        TextureDimension::D3 => wgpu::TextureViewDimension::D3,
    }
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
    }
}

fn sampler_descriptor(desc: &SamplerDesc) -> wgpu::SamplerDescriptor<'static> {
    use wgpu::FilterMode::{Linear, Nearest};
    let (filter, mipmap_filter) = match desc.sampling_mode {
        SamplingMode::Nearest => (Nearest, Nearest),
        SamplingMode::Bilinear => (Linear, Nearest),
        SamplingMode::Trilinear => (Linear, Linear),
    };
    // Anisotropy is only valid with every filter linear
    let anisotropy_clamp = if desc.sampling_mode == SamplingMode::Trilinear {
        desc.anisotropy.clamp(1, 16) as u16
    } else {
        1
    };
    wgpu::SamplerDescriptor {
        label: None,
        address_mode_u: address_mode(desc.wrap_u),
        address_mode_v: address_mode(desc.wrap_v),
        address_mode_w: address_mode(desc.wrap_r),
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter,
        anisotropy_clamp,
        ..Default::default()
    }
}

fn blend_state(mode: AlphaMode) -> Option<wgpu::BlendState> {
    use wgpu::BlendFactor as F;
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    let (color, alpha) = match mode {
        AlphaMode::Disable => return None,
        AlphaMode::Add => (component(F::SrcAlpha, F::One), component(F::Zero, F::One)),
        AlphaMode::Combine => (
            component(F::SrcAlpha, F::OneMinusSrcAlpha),
            component(F::One, F::One),
        ),
        AlphaMode::Subtract => (component(F::Zero, F::OneMinusSrc), component(F::One, F::One)),
        AlphaMode::Multiply => (component(F::Dst, F::Zero), component(F::One, F::One)),
        AlphaMode::Maximized => (
            component(F::SrcAlpha, F::OneMinusSrc),
            component(F::One, F::One),
        ),
        AlphaMode::OneOne => (component(F::One, F::One), component(F::Zero, F::One)),
        AlphaMode::Premultiplied => (
            component(F::One, F::OneMinusSrcAlpha),
            component(F::One, F::One),
        ),
        AlphaMode::PremultipliedPorterDuff => (
            component(F::One, F::OneMinusSrcAlpha),
            component(F::One, F::OneMinusSrcAlpha),
        ),
        AlphaMode::Interpolate => (
            component(F::Constant, F::OneMinusConstant),
            component(F::Constant, F::OneMinusConstant),
        ),
        AlphaMode::ScreenMode => (
            component(F::One, F::OneMinusSrc),
            component(F::One, F::OneMinusSrcAlpha),
        ),
    };
    Some(wgpu::BlendState { color, alpha })
}

fn stencil_state(write: bool, test: bool) -> wgpu::StencilState {
    let face = wgpu::StencilFaceState {
        compare: if test {
            wgpu::CompareFunction::NotEqual
        } else {
            wgpu::CompareFunction::Always
        },
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op: if write {
            wgpu::StencilOperation::Replace
        } else {
            wgpu::StencilOperation::Keep
        },
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: 0xff,
        write_mask: if write { 0xff } else { 0 },
    }
}

fn to_wgpu_color(color: Color4) -> wgpu::Color {
    wgpu::Color {
        r: color.r as f64,
        g: color.g as f64,
        b: color.b as f64,
        a: color.a as f64,
    }
}

/// Row pitch of a texture-to-buffer copy
fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn caps(&self) -> &EngineCaps {
        &self.caps
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        match &mut self.presentation {
            Presentation::Surface { surface, config, frame } => {
                frame.take();
                config.width = self.width;
                config.height = self.height;
                surface.configure(&self.device, config);
            }
            Presentation::Offscreen { target } => {
                *target = create_offscreen_target(
                    &self.device,
                    self.backbuffer_format,
                    self.width,
                    self.height,
                );
            }
        }
        self.backbuffer_depth = create_depth_view(&self.device, self.width, self.height, 1);
        debug!("wgpu backbuffer resized to {}x{}", self.width, self.height);
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuTextureHandle> {
        if desc.width > self.caps.max_texture_size || desc.height > self.caps.max_texture_size {
            return Err(EngineError::backend(format!(
                "texture '{}' of {}x{} exceeds the maximum size",
                desc.label, desc.width, desc.height
            )));
        }
        let format = wgpu_format(desc.format, desc.texture_type);
        let (dimension, layers) = match desc.dimension {
            TextureDimension::D2 => (wgpu::TextureDimension::D2, 1),
            TextureDimension::Cube => (wgpu::TextureDimension::D2, 6),
            TextureDimension::D3 => (wgpu::TextureDimension::D3, desc.depth.max(1)),
        };
        let usage = if desc.format.is_depth() {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else {
            let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC;
            let mipmapped = desc.mip_levels > 1;
            if (desc.render_target || mipmapped) && desc.dimension != TextureDimension::D3 {
                usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
            }
            usage
        };
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: layers,
        };

        let created = self.validated(|device| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size,
                mip_level_count: desc.mip_levels.max(1),
                sample_count: 1,
                dimension,
                format,
                usage,
                view_formats: &[],
            });
            let msaa = (desc.render_target && desc.samples > 1).then(|| {
                device
                    .create_texture(&wgpu::TextureDescriptor {
                        label: Some(&desc.label),
                        size: wgpu::Extent3d {
                            depth_or_array_layers: 1,
                            ..size
                        },
                        mip_level_count: 1,
                        sample_count: desc.samples,
                        dimension: wgpu::TextureDimension::D2,
                        format,
                        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                        view_formats: &[],
                    })
                    .create_view(&wgpu::TextureViewDescriptor::default())
            });
            (texture, msaa)
        });
        let (texture, msaa) = created.map_err(EngineError::Backend)?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(view_dimension(desc.dimension)),
            ..Default::default()
        });
        let sampler = self.device.create_sampler(&sampler_descriptor(&desc.sampler));

        let handle = GpuTextureHandle(self.next());
        self.textures.insert(
            handle.0,
            GpuTexture {
                desc: desc.clone(),
                format,
                texture,
                view,
                sampler,
                msaa,
            },
        );
        Ok(handle)
    }

    fn upload_texture(
        &mut self,
        texture: GpuTextureHandle,
        upload: TextureUpload<'_>,
    ) -> Result<()> {
        let gpu = self.texture(texture)?;
        if upload.level >= gpu.desc.mip_levels.max(1) {
            return Err(EngineError::backend(format!(
                "mip level {} out of range for '{}'",
                upload.level, gpu.desc.label
            )));
        }
        let texel_size = bytes_per_texel(gpu.desc.format, gpu.desc.texture_type);
        let (width, height, depth) = (upload.width.max(1), upload.height.max(1), upload.depth.max(1));
        let expected = (width * height * depth * texel_size) as usize;
        if upload.data.len() < expected {
            return Err(EngineError::backend(format!(
                "'{}' upload needs {} bytes, got {}",
                gpu.desc.label,
                expected,
                upload.data.len()
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: upload.level,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: upload.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &upload.data[..expected],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * texel_size),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: depth,
            },
        );
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: GpuTextureHandle) -> Result<()> {
        let (format, mip_levels, layers, dimension) = {
            let gpu = self.texture(texture)?;
            (gpu.format, gpu.desc.mip_levels, gpu.desc.layers(), gpu.desc.dimension)
        };
        if mip_levels <= 1 {
            return Ok(());
        }
        if dimension == TextureDimension::D3 {
            warn!("Mipmap generation is not available for 3D textures");
            return Ok(());
        }
        let filterable = format
            .guaranteed_format_features(self.device.features())
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE);
        if !filterable {
            warn!("Mipmap generation skipped for unfilterable {:?}", format);
            return Ok(());
        }

        self.ensure_blit_pipeline(format);
        let Some(pipeline) = self.blit_pipelines.get(&format) else {
            return Ok(());
        };
        let gpu = self.texture(texture)?;
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let level_view = |layer: u32, level: u32| {
            gpu.texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: level,
                mip_level_count: Some(1),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            })
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mipmaps"),
            });
        for layer in 0..layers {
            for level in 1..mip_levels {
                let source = level_view(layer, level - 1);
                let destination = level_view(layer, level);
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout: &pipeline.get_bind_group_layout(0),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&sampler),
                        },
                    ],
                });
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("mipmap level"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &destination,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }

    fn update_sampler(&mut self, texture: GpuTextureHandle, sampler: &SamplerDesc) -> Result<()> {
        let created = self.device.create_sampler(&sampler_descriptor(sampler));
        let gpu = self
            .textures
            .get_mut(&texture.0)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
        gpu.desc.sampler = *sampler;
        gpu.sampler = created;
        Ok(())
    }

    fn release_texture(&mut self, texture: GpuTextureHandle) {
        if let Some(gpu) = self.textures.remove(&texture.0) {
            gpu.texture.destroy();
        }
    }

    fn create_mesh(&mut self, vertices: &[MeshVertex], indices: &[u32]) -> Result<GpuMeshHandle> {
        if let Some(index) = indices.iter().find(|i| **i as usize >= vertices.len()) {
            return Err(EngineError::backend(format!(
                "index {} out of range for {} vertices",
                index,
                vertices.len()
            )));
        }
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh vertices"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh indices"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let mesh = GpuMeshHandle(self.next());
        self.meshes.insert(
            mesh.0,
            GpuMesh {
                vertices: vertex_buffer,
                indices: index_buffer,
                index_count: indices.len() as u32,
            },
        );
        Ok(mesh)
    }

    fn release_mesh(&mut self, mesh: GpuMeshHandle) {
        if let Some(gpu) = self.meshes.remove(&mesh.0) {
            gpu.vertices.destroy();
            gpu.indices.destroy();
        }
    }

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<GpuProgramHandle> {
        let module = self
            .validated(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&desc.name),
                    source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
                })
            })
            .map_err(|message| EngineError::ShaderCompilation {
                name: desc.name.clone(),
                message,
            })?;

        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.name),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
        let texture_layout = (!desc.samplers.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
                .samplers
                .iter()
                .enumerate()
                .flat_map(|(i, (_, dimension))| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: (i * 2) as u32,
                            visibility,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: view_dimension(*dimension),
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: (i * 2 + 1) as u32,
                            visibility,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&desc.name),
                    entries: &entries,
                })
        });
        let mut layouts = vec![&uniform_layout];
        layouts.extend(texture_layout.as_ref());
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.name),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let program = GpuProgramHandle(self.next());
        self.programs.insert(
            program.0,
            GpuProgram {
                name: desc.name.clone(),
                module,
                layout,
                uniform_layout,
                texture_layout,
                uniform_block_size: desc.uniform_block_size,
                sampler_count: desc.samplers.len(),
                vertex_input: desc.vertex_input,
            },
        );
        debug!("Compiled program '{}'", desc.name);
        Ok(program)
    }

    fn release_program(&mut self, program: GpuProgramHandle) {
        if self.programs.remove(&program.0).is_some() {
            self.pipelines.retain(|config, _| config.program != program);
        }
    }

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()> {
        if self.pass.is_some() {
            return Err(EngineError::backend("a render pass is already open"));
        }
        let mut color_formats = Vec::with_capacity(pass.targets.len().max(1));
        let mut samples = 1;
        if pass.targets.is_empty() {
            color_formats.push(self.backbuffer_format);
        }
        for target in &pass.targets {
            let texture = self.texture(*target)?;
            if texture.desc.dimension == TextureDimension::D3 {
                return Err(EngineError::backend(format!(
                    "cannot render into 3D texture '{}'",
                    texture.desc.label
                )));
            }
            if texture.msaa.is_some() {
                samples = texture.desc.samples;
            }
            color_formats.push(texture.format);
        }
        self.pass = Some(RecordedPass {
            desc: pass.clone(),
            color_formats,
            samples,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let pass = self
            .pass
            .as_ref()
            .ok_or_else(|| EngineError::backend("draw outside of a render pass"))?;
        let program = self
            .programs
            .get(&call.program.0)
            .ok_or(EngineError::UnknownHandle { kind: "program" })?;
        if call.uniforms.len() as u64 != program.uniform_block_size {
            return Err(EngineError::backend(format!(
                "'{}' expects {} uniform bytes, got {}",
                program.name,
                program.uniform_block_size,
                call.uniforms.len()
            )));
        }
        if call.textures.len() != program.sampler_count {
            return Err(EngineError::backend(format!(
                "'{}' expects {} textures, got {}",
                program.name,
                program.sampler_count,
                call.textures.len()
            )));
        }

        let config = PipelineConfig::new(call.program, pass, &call.state);
        if !self.pipelines.contains_key(&config) {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let pipeline = Self::build_pipeline(&self.device, program, &config);
            if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
                return Err(EngineError::backend(format!(
                    "pipeline for '{}' failed: {}",
                    program.name, error
                )));
            }
            debug!("Created pipeline for '{}' ({:?})", program.name, config.alpha_mode);
            self.pipelines.insert(config.clone(), pipeline);
        }

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&program.name),
                contents: &call.uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniforms = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.name),
            layout: &program.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        let textures = match &program.texture_layout {
            Some(layout) => {
                let mut entries = Vec::with_capacity(call.textures.len() * 2);
                for (i, handle) in call.textures.iter().enumerate() {
                    let texture = self
                        .textures
                        .get(&handle.0)
                        .ok_or(EngineError::UnknownHandle { kind: "texture" })?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: (i * 2) as u32,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: (i * 2 + 1) as u32,
                        resource: wgpu::BindingResource::Sampler(&texture.sampler),
                    });
                }
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&program.name),
                    layout,
                    entries: &entries,
                }))
            }
            None => None,
        };

        let draw = RecordedDraw {
            pipeline: config,
            uniforms,
            textures,
            geometry: call.geometry,
            blend_constant: to_wgpu_color(call.state.alpha_constants),
        };
        if let Some(pass) = self.pass.as_mut() {
            pass.draws.push(draw);
        }
        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        let recorded = self
            .pass
            .take()
            .ok_or_else(|| EngineError::backend("no render pass is open"))?;
        self.submit_pass(recorded)
    }

    fn present(&mut self) -> Result<()> {
        if self.pass.is_some() {
            warn!("Presenting with an open render pass, closing it");
            self.end_pass()?;
        }
        if let Presentation::Surface { frame, .. } = &mut self.presentation {
            if let Some(frame) = frame.take() {
                frame.present();
            }
        }
        Ok(())
    }

    fn read_pixels(&mut self, texture: Option<GpuTextureHandle>) -> Result<Vec<u8>> {
        let (source, width, height, texel_size) = match texture {
            Some(handle) => {
                let gpu = self.texture(handle)?;
                if gpu.desc.format.is_depth() {
                    return Err(EngineError::backend("depth textures cannot be read back"));
                }
                (
                    &gpu.texture,
                    gpu.desc.width,
                    gpu.desc.height,
                    bytes_per_texel(gpu.desc.format, gpu.desc.texture_type),
                )
            }
            None => match &self.presentation {
                Presentation::Offscreen { target } => (target, self.width, self.height, 4),
                Presentation::Surface { .. } => {
                    return Err(EngineError::backend(
                        "the window surface cannot be read back",
                    ))
                }
            },
        };

        let unpadded = width * texel_size;
        let padded = padded_bytes_per_row(unpadded);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("read pixels"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read pixels"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::MaintainBase::Wait);
        match futures::executor::block_on(rx) {
            Ok(Ok(())) => {
                let mapped = slice.get_mapped_range();
                let mut pixels = Vec::with_capacity((unpadded * height) as usize);
                for row in mapped.chunks(padded as usize) {
                    pixels.extend_from_slice(&row[..unpadded as usize]);
                }
                drop(mapped);
                staging.unmap();
                Ok(pixels)
            }
            _ => Err(EngineError::backend("failed to map the read-back buffer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_follow_channels_and_type() {
        assert_eq!(
            wgpu_format(TextureFormat::Rgba, TextureType::UnsignedInt),
            wgpu::TextureFormat::Rgba8Unorm
        );
        assert_eq!(
            wgpu_format(TextureFormat::Rgb, TextureType::HalfFloat),
            wgpu::TextureFormat::Rgba16Float
        );
        assert_eq!(
            wgpu_format(TextureFormat::R, TextureType::Float),
            wgpu::TextureFormat::R32Float
        );
        assert_eq!(
            wgpu_format(TextureFormat::LuminanceAlpha, TextureType::UnsignedInt),
            wgpu::TextureFormat::Rg8Unorm
        );
        assert_eq!(
            wgpu_format(TextureFormat::Depth24Stencil8, TextureType::Float),
            wgpu::TextureFormat::Depth24PlusStencil8
        );
    }

    #[test]
    fn test_blend_states() {
        assert!(blend_state(AlphaMode::Disable).is_none());
        let combine = blend_state(AlphaMode::Combine).unwrap();
        assert_eq!(combine.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(combine.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        let interpolate = blend_state(AlphaMode::Interpolate).unwrap();
        assert_eq!(interpolate.alpha.src_factor, wgpu::BlendFactor::Constant);
    }

    #[test]
    fn test_stencil_write_and_test() {
        let write = stencil_state(true, false);
        assert_eq!(write.front.pass_op, wgpu::StencilOperation::Replace);
        assert_eq!(write.front.compare, wgpu::CompareFunction::Always);
        assert_eq!(write.write_mask, 0xff);

        let test = stencil_state(false, true);
        assert_eq!(test.front.compare, wgpu::CompareFunction::NotEqual);
        assert_eq!(test.write_mask, 0);
    }

    #[test]
    fn test_sampler_anisotropy_needs_trilinear() {
        let mut desc = SamplerDesc {
            anisotropy: 8,
            ..Default::default()
        };
        assert_eq!(sampler_descriptor(&desc).anisotropy_clamp, 8);
        desc.sampling_mode = SamplingMode::Bilinear;
        let bilinear = sampler_descriptor(&desc);
        assert_eq!(bilinear.anisotropy_clamp, 1);
        assert_eq!(bilinear.mipmap_filter, wgpu::FilterMode::Nearest);
        desc.wrap_u = AddressMode::Mirror;
        assert_eq!(
            sampler_descriptor(&desc).address_mode_u,
            wgpu::AddressMode::MirrorRepeat
        );
    }

    #[test]
    fn test_read_back_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(4), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(260), 512);
    }
}
