//! The seam between the pass graph and a graphics API.
//!
//! [`PassGraph`](crate::graph::PassGraph) and [`ResourceTable`] never touch
//! wgpu directly; they drive a [`RenderBackend`]. Setup methods may allocate
//! and fail. Per-frame methods are infallible apart from
//! [`framebuffer_status`](RenderBackend::framebuffer_status) and
//! [`end_frame`](RenderBackend::end_frame), whose errors the caller logs and
//! recovers from.

mod wgpu_backend;

#[cfg(test)]
pub mod recording;

pub use wgpu_backend::WgpuBackend;

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

/// Handle to a mesh uploaded with [`RenderBackend::upload_mesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub usize);

/// Handle to a compiled shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub usize);

pub trait RenderBackend {
    /// Creates (or recreates at a new size) the texture behind `id`.
    fn create_texture(
        &mut self,
        id: TextureId,
        desc: &TextureDesc,
        extent: Extent,
    ) -> Result<(), RenderError>;

    /// Uploads every layer of `image` into an existing texture.
    fn write_texture(&mut self, id: TextureId, image: &ImageData) -> Result<(), RenderError>;

    fn create_sampler(&mut self, id: SamplerId, desc: &SamplerDesc) -> Result<(), RenderError>;

    /// Creates (or recreates) a framebuffer from its declared attachments.
    fn create_framebuffer(
        &mut self,
        id: FramebufferId,
        table: &ResourceTable,
    ) -> Result<(), RenderError>;

    fn upload_mesh(&mut self, label: &str, mesh: &MeshData) -> Result<MeshId, RenderError>;

    /// Compiles the program named `name`.
    fn register_program(&mut self, name: &str) -> Result<ProgramId, RenderError>;

    /// Builds whatever `pass` needs at draw time so frames never allocate.
    fn prepare_pass(
        &mut self,
        id: PassId,
        pass: &PassDescriptor,
        table: &ResourceTable,
    ) -> Result<(), RenderError>;

    /// Resizes the default colour and depth target.
    fn resize_default_target(&mut self, extent: Extent) -> Result<(), RenderError>;

    /// Recompiles every program from its current source. Either all programs
    /// are replaced or, on failure, none are.
    fn reload_programs(&mut self) -> Result<(), RenderError>;

    fn begin_frame(&mut self);

    /// Whether a framebuffer can be rendered into right now.
    fn framebuffer_status(&self, id: FramebufferId) -> Result<(), RenderError>;

    fn bind_target(&mut self, pass: PassId, target: Target, viewport: ViewportRect);

    fn apply_state(&mut self, state: &RasterState);

    fn clear(&mut self, values: ClearValues);

    fn bind_textures(&mut self, bindings: &[TextureBinding]);

    fn upload_uniforms(&mut self, program: ProgramId, uniforms: &PassUniforms);

    fn draw_mesh(&mut self, mesh: MeshId, albedo: Option<TextureId>, uniforms: &DrawUniforms);

    fn draw_fullscreen(&mut self);

    fn unbind_textures(&mut self);

    fn end_pass(&mut self);

    /// Submits the frame and presents the default target.
    fn end_frame(&mut self) -> Result<(), RenderError>;
}
