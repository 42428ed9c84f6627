//! A backend that records every call instead of rendering, for tests.
//!
//! Each texture and the default target carry a version that is bumped
//! whenever a pass that clears or draws into them ends, so tests can see
//! which contents a later pass sampled.

use std::collections::{HashMap, HashSet};

use super::{MeshId, ProgramId, RenderBackend};
use crate::error::RenderError;
use crate::graph::{
    ClearValues, DrawUniforms, PassDescriptor, PassId, PassUniforms, RasterState, Target,
    TextureBinding, ViewportRect,
};
use crate::mesh::MeshData;
use crate::resources::{
    Extent, FramebufferId, ResourceTable, SamplerDesc, SamplerId, TextureDesc, TextureId,
};
use crate::texture::ImageData;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateTexture(TextureId, Extent),
    WriteTexture(TextureId),
    CreateSampler(SamplerId),
    CreateFramebuffer(FramebufferId),
    UploadMesh(MeshId, u32),
    RegisterProgram(ProgramId, String),
    PreparePass(PassId),
    ResizeDefaultTarget(Extent),
    ReloadPrograms,
    BeginFrame,
    BindTarget(PassId, Target, ViewportRect),
    ApplyState(RasterState),
    Clear(ClearValues),
    /// Bound textures with the version each had when bound.
    BindTextures(Vec<(TextureId, u64)>),
    UploadUniforms(ProgramId, Box<PassUniforms>),
    DrawMesh(MeshId, Option<TextureId>),
    DrawFullscreen,
    UnbindTextures,
    EndPass(PassId),
    EndFrame,
}

impl Command {
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            Command::CreateTexture(..)
                | Command::CreateSampler(_)
                | Command::CreateFramebuffer(_)
                | Command::UploadMesh(..)
                | Command::RegisterProgram(..)
                | Command::PreparePass(_)
        )
    }
}

#[derive(Default)]
struct OpenPass {
    id: Option<PassId>,
    target: Option<Target>,
    wrote: bool,
}

#[derive(Default)]
pub struct RecordingBackend {
    commands: Vec<Command>,
    framebuffers: HashMap<FramebufferId, Vec<TextureId>>,
    programs: Vec<String>,
    meshes: usize,
    incomplete: HashSet<FramebufferId>,
    broken_programs: HashSet<String>,
    versions: HashMap<TextureId, u64>,
    default_version: u64,
    open: OpenPass,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Makes `framebuffer_status` report `id` as incomplete until cleared.
    pub fn set_incomplete(&mut self, id: FramebufferId, incomplete: bool) {
        if incomplete {
            self.incomplete.insert(id);
        } else {
            self.incomplete.remove(&id);
        }
    }

    /// Makes the next reloads fail while `name`'s source is broken.
    pub fn set_broken(&mut self, name: &str, broken: bool) {
        if broken {
            self.broken_programs.insert(name.to_string());
        } else {
            self.broken_programs.remove(name);
        }
    }

    pub fn version(&self, id: TextureId) -> u64 {
        self.versions.get(&id).copied().unwrap_or(0)
    }

    /// Number of passes that have rendered into the default target.
    pub fn default_version(&self) -> u64 {
        self.default_version
    }

    pub fn program_name(&self, id: ProgramId) -> Option<&str> {
        self.programs.get(id.0).map(String::as_str)
    }
}

impl RenderBackend for RecordingBackend {
    fn create_texture(
        &mut self,
        id: TextureId,
        _desc: &TextureDesc,
        extent: Extent,
    ) -> Result<(), RenderError> {
        self.commands.push(Command::CreateTexture(id, extent));
        Ok(())
    }

    fn write_texture(&mut self, id: TextureId, _image: &ImageData) -> Result<(), RenderError> {
        self.commands.push(Command::WriteTexture(id));
        Ok(())
    }

    fn create_sampler(&mut self, id: SamplerId, _desc: &SamplerDesc) -> Result<(), RenderError> {
        self.commands.push(Command::CreateSampler(id));
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        id: FramebufferId,
        table: &ResourceTable,
    ) -> Result<(), RenderError> {
        let desc = table.framebuffer_desc(id)?;
        let attachments = desc.colors.iter().chain(desc.depth.iter()).copied().collect();
        self.framebuffers.insert(id, attachments);
        self.commands.push(Command::CreateFramebuffer(id));
        Ok(())
    }

    fn upload_mesh(&mut self, _label: &str, mesh: &MeshData) -> Result<MeshId, RenderError> {
        let id = MeshId(self.meshes);
        self.meshes += 1;
        self.commands.push(Command::UploadMesh(id, mesh.index_count()));
        Ok(id)
    }

    fn register_program(&mut self, name: &str) -> Result<ProgramId, RenderError> {
        if self.broken_programs.contains(name) {
            return Err(RenderError::creation(name, "program failed to compile"));
        }
        let id = ProgramId(self.programs.len());
        self.programs.push(name.to_string());
        self.commands.push(Command::RegisterProgram(id, name.to_string()));
        Ok(id)
    }

    fn prepare_pass(
        &mut self,
        id: PassId,
        _pass: &PassDescriptor,
        _table: &ResourceTable,
    ) -> Result<(), RenderError> {
        self.commands.push(Command::PreparePass(id));
        Ok(())
    }

    fn resize_default_target(&mut self, extent: Extent) -> Result<(), RenderError> {
        self.commands.push(Command::ResizeDefaultTarget(extent));
        Ok(())
    }

    fn reload_programs(&mut self) -> Result<(), RenderError> {
        self.commands.push(Command::ReloadPrograms);
        let broken = self
            .programs
            .iter()
            .find(|name| self.broken_programs.contains(*name));
        match broken {
            Some(name) => Err(RenderError::ShaderReload {
                program: name.clone(),
                message: "expected expression, found '}'".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn begin_frame(&mut self) {
        self.commands.push(Command::BeginFrame);
    }

    fn framebuffer_status(&self, id: FramebufferId) -> Result<(), RenderError> {
        if !self.framebuffers.contains_key(&id) {
            return Err(RenderError::FramebufferIncomplete {
                framebuffer: format!("{id:?}"),
                reason: "never created".to_string(),
            });
        }
        if self.incomplete.contains(&id) {
            return Err(RenderError::FramebufferIncomplete {
                framebuffer: format!("{id:?}"),
                reason: "missing attachment".to_string(),
            });
        }
        Ok(())
    }

    fn bind_target(&mut self, pass: PassId, target: Target, viewport: ViewportRect) {
        self.open = OpenPass {
            id: Some(pass),
            target: Some(target),
            wrote: false,
        };
        self.commands.push(Command::BindTarget(pass, target, viewport));
    }

    fn apply_state(&mut self, state: &RasterState) {
        self.commands.push(Command::ApplyState(*state));
    }

    fn clear(&mut self, values: ClearValues) {
        if values.color.is_some() || values.depth.is_some() {
            self.open.wrote = true;
        }
        self.commands.push(Command::Clear(values));
    }

    fn bind_textures(&mut self, bindings: &[TextureBinding]) {
        let seen = bindings
            .iter()
            .map(|b| (b.texture, self.version(b.texture)))
            .collect();
        self.commands.push(Command::BindTextures(seen));
    }

    fn upload_uniforms(&mut self, program: ProgramId, uniforms: &PassUniforms) {
        self.commands
            .push(Command::UploadUniforms(program, Box::new(*uniforms)));
    }

    fn draw_mesh(&mut self, mesh: MeshId, albedo: Option<TextureId>, _uniforms: &DrawUniforms) {
        self.open.wrote = true;
        self.commands.push(Command::DrawMesh(mesh, albedo));
    }

    fn draw_fullscreen(&mut self) {
        self.open.wrote = true;
        self.commands.push(Command::DrawFullscreen);
    }

    fn unbind_textures(&mut self) {
        self.commands.push(Command::UnbindTextures);
    }

    fn end_pass(&mut self) {
        let open = std::mem::take(&mut self.open);
        if open.wrote {
            match open.target {
                Some(Target::Default) => self.default_version += 1,
                Some(Target::Framebuffer(fb)) => {
                    for texture in self.framebuffers.get(&fb).into_iter().flatten() {
                        *self.versions.entry(*texture).or_insert(0) += 1;
                    }
                }
                None => {}
            }
        }
        if let Some(id) = open.id {
            self.commands.push(Command::EndPass(id));
        }
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        self.commands.push(Command::EndFrame);
        Ok(())
    }
}
