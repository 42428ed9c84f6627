//! # Caustica
//!
//! **Real-time underwater caustics with a wgpu frame graph.**
//!
//! A small pool scene rendered by a fixed sequence of passes: a ping-pong
//! water height simulation, shadow and environment maps, a caustics map
//! refracted through the water surface, an underwater view, a mirrored
//! reflection view and a final composite of walls, water and sky.
//!
//! ## Quick Start
//!
//! ```no_run
//! fn main() -> anyhow::Result<()> {
//!     let config = caustica::AppConfig::load(None)?;
//!     caustica::run(config)
//! }
//! ```
//!
//! ## Structure
//!
//! - [`resources`] declares every texture, framebuffer and sampler once, by name.
//! - [`graph`] holds the pass descriptors and executes them in order.
//! - [`backend`] is the seam between the graph and the GPU: [`backend::WgpuBackend`]
//!   renders, [`backend::recording::RecordingBackend`] records for tests.
//! - [`pipeline`] describes the concrete passes of the caustics demo.
//! - [`driver`] turns input into frames, pauses, toggles and reloads shaders.
//!
//! Controls: right mouse drag to look, WASD/QE to move, left click to disturb
//! the water, `R` reload shaders, `P` pause, `T` show intermediate textures,
//! `L` show the light volume, `Esc` quit.

mod app;
pub mod backend;
pub mod camera;
pub mod config;
pub mod driver;
mod error;
mod geometry;
mod gpu;
pub mod graph;
pub mod input;
mod mesh;
pub mod picking;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod shaders;
pub mod shapes;
pub mod simulation;
pub mod texture;

pub use app::run;
pub use backend::{MeshId, ProgramId, RenderBackend};
pub use config::AppConfig;
pub use driver::{FrameDriver, FrameOutcome};
pub use error::RenderError;
pub use geometry::{GeometryError, ModelLoader, RawGeometry};
pub use gpu::GpuContext;
pub use mesh::{MeshData, Transform, Vertex, VertexAttribute};

// Re-export math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
