//! Recording backend without a GPU
//!
//! Every call is appended to a shared [`CommandLog`] so tests can assert on
//! the exact passes and draws a frame produced. Texel uploads are kept so
//! `read_pixels` returns what was last written.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::engine::backend::{
    DrawCall, EngineCaps, GpuMeshHandle, GpuProgramHandle, GpuTextureHandle, MeshVertex,
    PassDesc, ProgramDesc, RenderBackend, SamplerDesc, TextureDesc, TextureUpload,
};
use crate::engine::constants::bytes_per_texel;
use crate::error::{EngineError, Result};

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    CreateTexture {
        texture: GpuTextureHandle,
        desc: TextureDesc,
    },
    UploadTexture {
        texture: GpuTextureHandle,
        level: u32,
        layer: u32,
        bytes: usize,
    },
    GenerateMipmaps(GpuTextureHandle),
    UpdateSampler {
        texture: GpuTextureHandle,
        sampler: SamplerDesc,
    },
    ReleaseTexture(GpuTextureHandle),
    CreateMesh {
        mesh: GpuMeshHandle,
        vertices: usize,
        indices: usize,
    },
    ReleaseMesh(GpuMeshHandle),
    CompileProgram {
        program: GpuProgramHandle,
        name: String,
    },
    ReleaseProgram(GpuProgramHandle),
    BeginPass(PassDesc),
    Draw(DrawCall),
    EndPass,
    Present,
}

#[derive(Debug, Default)]
struct LogState {
    commands: Vec<BackendCommand>,
    live_textures: usize,
    live_programs: usize,
}

/// Shared view of the commands recorded by a [`HeadlessBackend`]
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    state: Rc<RefCell<LogState>>,
}

impl CommandLog {
    fn push(&self, command: BackendCommand) {
        self.state.borrow_mut().commands.push(command);
    }

    pub fn commands(&self) -> Vec<BackendCommand> {
        self.state.borrow().commands.clone()
    }

    pub fn clear(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.state
            .borrow()
            .commands
            .iter()
            .filter_map(|command| match command {
                BackendCommand::Draw(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn passes(&self) -> Vec<PassDesc> {
        self.state
            .borrow()
            .commands
            .iter()
            .filter_map(|command| match command {
                BackendCommand::BeginPass(pass) => Some(pass.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of the programs compiled so far, in order
    pub fn compiled_programs(&self) -> Vec<String> {
        self.state
            .borrow()
            .commands
            .iter()
            .filter_map(|command| match command {
                BackendCommand::CompileProgram { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> usize {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|command| matches!(command, BackendCommand::UploadTexture { .. }))
            .count()
    }

    pub fn presents(&self) -> usize {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|command| matches!(command, BackendCommand::Present))
            .count()
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().live_textures
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().live_programs
    }
}

/// Backend that validates and records instead of rendering
pub struct HeadlessBackend {
    caps: EngineCaps,
    width: u32,
    height: u32,
    next_handle: u64,
    textures: HashMap<u64, (TextureDesc, Vec<u8>)>,
    programs: HashMap<u64, ProgramDesc>,
    meshes: HashMap<u64, usize>,
    in_pass: bool,
    log: CommandLog,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_caps(width, height, EngineCaps::default())
    }

    pub fn with_caps(width: u32, height: u32, caps: EngineCaps) -> Self {
        Self {
            caps,
            width,
            height,
            next_handle: 1,
            textures: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            in_pass: false,
            log: CommandLog::default(),
        }
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn texture(&mut self, texture: GpuTextureHandle) -> Result<&mut (TextureDesc, Vec<u8>)> {
        self.textures
            .get_mut(&texture.0)
            .ok_or(EngineError::UnknownHandle { kind: "texture" })
    }
}

/// Light structural validation standing in for a real compiler
fn validate_wgsl(desc: &ProgramDesc) -> Result<()> {
    let error = |message: String| EngineError::ShaderCompilation {
        name: desc.name.clone(),
        message,
    };
    let mut depth: i64 = 0;
    for (line_number, line) in desc.source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or_default();
        for c in code.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(error(format!("unbalanced '}}' at line {}", line_number + 1)));
            }
        }
        if code.trim_start().starts_with('#') {
            return Err(error(format!(
                "unprocessed directive at line {}: {}",
                line_number + 1,
                code.trim()
            )));
        }
    }
    if depth != 0 {
        return Err(error("unbalanced braces".to_string()));
    }
    for entry in ["fn vs_main", "fn fs_main"] {
        if !desc.source.contains(entry) {
            return Err(error(format!("missing entry point '{}'", entry)));
        }
    }
    Ok(())
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
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
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuTextureHandle> {
        if desc.width > self.caps.max_texture_size || desc.height > self.caps.max_texture_size {
            return Err(EngineError::backend(format!(
                "texture '{}' of {}x{} exceeds the maximum size",
                desc.label, desc.width, desc.height
            )));
        }
        let texture = GpuTextureHandle(self.next());
        let bytes = (desc.width * desc.height * desc.layers()) as usize
            * bytes_per_texel(desc.format, desc.texture_type) as usize;
        self.textures
            .insert(texture.0, (desc.clone(), vec![0; bytes]));
        let mut state = self.log.state.borrow_mut();
        state.live_textures += 1;
        state.commands.push(BackendCommand::CreateTexture {
            texture,
            desc: desc.clone(),
        });
        Ok(texture)
    }

    fn upload_texture(
        &mut self,
        texture: GpuTextureHandle,
        upload: TextureUpload<'_>,
    ) -> Result<()> {
        let (desc, texels) = self.texture(texture)?;
        if upload.level >= desc.mip_levels {
            return Err(EngineError::backend(format!(
                "mip level {} out of range for '{}'",
                upload.level, desc.label
            )));
        }
        if upload.level == 0 {
            let texel_size = bytes_per_texel(desc.format, desc.texture_type) as usize;
            let layer_bytes = (desc.width * desc.height) as usize * texel_size;
            let start = (upload.layer as usize * layer_bytes).min(texels.len());
            let end = (start + upload.data.len()).min(texels.len());
            texels[start..end].copy_from_slice(&upload.data[..end - start]);
        }
        self.log.push(BackendCommand::UploadTexture {
            texture,
            level: upload.level,
            layer: upload.layer,
            bytes: upload.data.len(),
        });
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: GpuTextureHandle) -> Result<()> {
        self.texture(texture)?;
        self.log.push(BackendCommand::GenerateMipmaps(texture));
        Ok(())
    }

    fn update_sampler(&mut self, texture: GpuTextureHandle, sampler: &SamplerDesc) -> Result<()> {
        self.texture(texture)?.0.sampler = *sampler;
        self.log.push(BackendCommand::UpdateSampler {
            texture,
            sampler: *sampler,
        });
        Ok(())
    }

    fn release_texture(&mut self, texture: GpuTextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            let mut state = self.log.state.borrow_mut();
            state.live_textures -= 1;
            state.commands.push(BackendCommand::ReleaseTexture(texture));
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
        let mesh = GpuMeshHandle(self.next());
        self.meshes.insert(mesh.0, indices.len());
        self.log.push(BackendCommand::CreateMesh {
            mesh,
            vertices: vertices.len(),
            indices: indices.len(),
        });
        Ok(mesh)
    }

    fn release_mesh(&mut self, mesh: GpuMeshHandle) {
        if self.meshes.remove(&mesh.0).is_some() {
            self.log.push(BackendCommand::ReleaseMesh(mesh));
        }
    }

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<GpuProgramHandle> {
        validate_wgsl(desc)?;
        let program = GpuProgramHandle(self.next());
        self.programs.insert(program.0, desc.clone());
        debug!("Headless compiled program '{}'", desc.name);
        let mut state = self.log.state.borrow_mut();
        state.live_programs += 1;
        state.commands.push(BackendCommand::CompileProgram {
            program,
            name: desc.name.clone(),
        });
        Ok(program)
    }

    fn release_program(&mut self, program: GpuProgramHandle) {
        if self.programs.remove(&program.0).is_some() {
            let mut state = self.log.state.borrow_mut();
            state.live_programs -= 1;
            state.commands.push(BackendCommand::ReleaseProgram(program));
        }
    }

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()> {
        if self.in_pass {
            return Err(EngineError::backend("a render pass is already open"));
        }
        for target in &pass.targets {
            self.texture(*target)?;
        }
        self.in_pass = true;
        self.log.push(BackendCommand::BeginPass(pass.clone()));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        if !self.in_pass {
            return Err(EngineError::backend("draw outside of a render pass"));
        }
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
        if call.textures.len() != program.samplers.len() {
            return Err(EngineError::backend(format!(
                "'{}' expects {} textures, got {}",
                program.name,
                program.samplers.len(),
                call.textures.len()
            )));
        }
        for texture in &call.textures {
            self.texture(*texture)?;
        }
        self.log.push(BackendCommand::Draw(call.clone()));
        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        if !self.in_pass {
            return Err(EngineError::backend("no render pass is open"));
        }
        self.in_pass = false;
        self.log.push(BackendCommand::EndPass);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.log.push(BackendCommand::Present);
        Ok(())
    }

    fn read_pixels(&mut self, texture: Option<GpuTextureHandle>) -> Result<Vec<u8>> {
        match texture {
            Some(texture) => Ok(self.texture(texture)?.1.clone()),
            None => Ok(vec![0; (self.width * self.height * 4) as usize]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{DrawGeometry, DrawState, VertexInput};

    fn program(source: &str) -> ProgramDesc {
        ProgramDesc {
            name: "test".to_string(),
            source: source.to_string(),
            uniform_block_size: 16,
            samplers: Vec::new(),
            vertex_input: VertexInput::None,
        }
    }

    #[test]
    fn test_validation_rejects_broken_sources() {
        let mut backend = HeadlessBackend::new(4, 4);
        assert!(backend
            .compile_program(&program("fn vs_main() {} fn fs_main() {"))
            .is_err());
        assert!(backend.compile_program(&program("fn vs_main() {}")).is_err());
        assert!(backend
            .compile_program(&program("#ifdef X\nfn vs_main() {} fn fs_main() {}"))
            .is_err());
        assert!(backend
            .compile_program(&program("fn vs_main() {}\nfn fs_main() {}"))
            .is_ok());
    }

    #[test]
    fn test_draw_requires_open_pass_and_matching_block() {
        let mut backend = HeadlessBackend::new(4, 4);
        let log = backend.log();
        let program = backend
            .compile_program(&program("fn vs_main() {}\nfn fs_main() {}"))
            .unwrap();
        let mut call = DrawCall {
            program,
            uniforms: vec![0; 16],
            textures: Vec::new(),
            geometry: DrawGeometry::FullscreenTriangle,
            state: DrawState::default(),
        };
        assert!(backend.draw(&call).is_err());
        backend.begin_pass(&PassDesc::backbuffer("main")).unwrap();
        backend.draw(&call).unwrap();
        call.uniforms.truncate(4);
        assert!(backend.draw(&call).is_err());
        backend.end_pass().unwrap();
        assert_eq!(log.draws().len(), 1);
        assert_eq!(log.passes().len(), 1);
    }

    #[test]
    fn test_upload_is_readable() {
        let mut backend = HeadlessBackend::new(4, 4);
        let texture = backend
            .create_texture(&TextureDesc {
                width: 2,
                height: 1,
                ..Default::default()
            })
            .unwrap();
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        backend
            .upload_texture(
                texture,
                TextureUpload {
                    level: 0,
                    layer: 0,
                    width: 2,
                    height: 1,
                    depth: 1,
                    data: &data,
                },
            )
            .unwrap();
        assert_eq!(backend.read_pixels(Some(texture)).unwrap(), data.to_vec());
    }
}
