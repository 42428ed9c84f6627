//! Error kinds shared by the mesh builder, resource table, pass graph and backends.

use thiserror::Error;

/// Errors raised while building or running the render pipeline.
///
/// Setup-time variants (`ResourceCreation`, `InvalidParameter`,
/// `DependencyViolation`, `UnknownResource`) abort startup. `FramebufferIncomplete`
/// and `ShaderReload` are recovered per frame: the offending pass is skipped or
/// rendering is suspended until the next successful reload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// A texture, framebuffer, sampler, program or mesh could not be created.
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation { resource: String, reason: String },

    /// A framebuffer failed its completeness check before a pass.
    #[error("framebuffer '{framebuffer}' is incomplete: {reason}")]
    FramebufferIncomplete { framebuffer: String, reason: String },

    /// One or more shader programs failed to recompile.
    #[error("shader program '{program}' failed to reload: {message}")]
    ShaderReload { program: String, message: String },

    /// Degenerate arguments handed to a mesh generator or resource declaration.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The declared pass order does not respect a texture read/write dependency.
    #[error("pass '{pass}' violates dependency on '{texture}': {reason}")]
    DependencyViolation {
        pass: String,
        texture: String,
        reason: String,
    },

    /// A logical resource name was referenced but never declared.
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    /// The presentation surface could not provide a frame.
    #[error("surface error: {0}")]
    Surface(String),
}

impl RenderError {
    pub(crate) fn creation(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::ResourceCreation {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}
