//! Pass descriptors: what a pass renders into, with which state, reading
//! which textures, and drawing what.

use crate::backend::ProgramId;
use crate::graph::uniforms::{FrameContext, PassUniforms};
use crate::resources::{CompareFunc, Extent, FramebufferId, SamplerId, TextureId};
use crate::scene::Layer;

/// Index of a pass in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub usize);

/// Where a pass renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// The window's colour and depth buffers.
    Default,
    Framebuffer(FramebufferId),
}

/// The part of the target a pass renders into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Viewport {
    /// The whole target at its native resolution.
    Native,
    /// A rectangle given as fractions of the target, origin top-left.
    Fraction { x: f32, y: f32, width: f32, height: f32 },
}

/// A viewport resolved to pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Rectangle between normalized device corners `(x0, y0)` and `(x1, y1)`, y up.
    pub fn from_ndc(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Viewport::Fraction {
            x: (x0 + 1.0) / 2.0,
            y: (1.0 - y1) / 2.0,
            width: (x1 - x0) / 2.0,
            height: (y1 - y0) / 2.0,
        }
    }

    pub fn resolve(self, target: Extent) -> ViewportRect {
        let (w, h) = (target.width as f32, target.height as f32);
        match self {
            Viewport::Native => ViewportRect {
                x: 0.0,
                y: 0.0,
                width: w,
                height: h,
            },
            Viewport::Fraction {
                x,
                y,
                width,
                height,
            } => ViewportRect {
                x: x * w,
                y: y * h,
                width: width * w,
                height: height * h,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearColor {
    Fixed([f32; 4]),
    /// The frame's ambient colour (sky above water, water tint below).
    Ambient,
}

/// Buffers to clear before drawing.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ClearMask {
    pub color: Option<ClearColor>,
    pub depth: bool,
}

impl ClearMask {
    pub const NONE: Self = Self {
        color: None,
        depth: false,
    };

    pub fn color_and_depth(color: ClearColor) -> Self {
        Self {
            color: Some(color),
            depth: true,
        }
    }

    pub fn depth_only() -> Self {
        Self {
            color: None,
            depth: true,
        }
    }
}

/// Clear values after resolving [`ClearColor::Ambient`].
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    Alpha,
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

/// Full raster, depth and blend state of a pass. Every pass carries all of
/// it, so no pass depends on what an earlier one left behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub cull: CullMode,
    /// `None` disables the depth test.
    pub depth_test: Option<CompareFunc>,
    pub depth_write: bool,
    pub blend: BlendMode,
    pub polygon: PolygonMode,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            depth_test: Some(CompareFunc::Less),
            depth_write: true,
            blend: BlendMode::Replace,
            polygon: PolygonMode::Fill,
        }
    }
}

impl RasterState {
    /// Full-screen passes: no culling, no depth.
    pub fn fullscreen() -> Self {
        Self {
            cull: CullMode::None,
            depth_test: None,
            depth_write: false,
            ..Default::default()
        }
    }

    pub fn cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }

    pub fn depth(mut self, test: Option<CompareFunc>, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn polygon(mut self, polygon: PolygonMode) -> Self {
        self.polygon = polygon;
        self
    }
}

/// Whether a binding reads this frame's contents or the previous frame's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadKind {
    /// Must come after the last pass writing the texture this frame.
    SameFrame,
    /// Must come before any pass writing the texture this frame.
    PreviousFrame,
}

/// A texture bound to a numbered unit with a sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub unit: u32,
    pub texture: TextureId,
    pub sampler: SamplerId,
    pub read: ReadKind,
}

/// What a pass submits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawSource {
    /// One triangle covering the viewport.
    Fullscreen,
    /// Every drawable in a scene layer.
    Layer(Layer),
}

/// Which view-projection the draws use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewSource {
    /// Identity matrices (full-screen passes).
    None,
    Camera,
    Light,
    /// The camera reflected about the water plane.
    MirroredCamera,
    /// The camera without translation, for the sky box.
    Sky,
    /// The mirrored camera without translation.
    MirroredSky,
}

/// When a pass runs relative to the suspend state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    /// Skipped while rendering is suspended by a failed shader reload.
    #[default]
    Main,
    /// Debug overlay; runs even while suspended.
    Overlay,
}

/// Display toggle gating a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Condition {
    #[default]
    Always,
    ShowTextures,
    ShowLightVolume,
}

/// Fills the program-specific part of a pass's uniforms.
pub type UniformCallback = Box<dyn Fn(&FrameContext, &mut PassUniforms)>;

/// One pass of the frame.
///
/// ```
/// use caustica::graph::{ClearColor, ClearMask, DrawSource, PassDescriptor, RasterState, Target};
/// use caustica::backend::ProgramId;
///
/// let pass = PassDescriptor::new("blit", ProgramId(0))
///     .target(Target::Default)
///     .clear(ClearMask::color_and_depth(ClearColor::Fixed([0.0, 0.0, 0.0, 1.0])))
///     .state(RasterState::fullscreen())
///     .draw(DrawSource::Fullscreen);
/// assert_eq!(pass.name, "blit");
/// ```
pub struct PassDescriptor {
    pub name: String,
    pub program: ProgramId,
    pub target: Target,
    pub viewport: Viewport,
    pub clear: ClearMask,
    pub state: RasterState,
    pub bindings: Vec<TextureBinding>,
    pub draws: DrawSource,
    pub view: ViewSource,
    pub phase: Phase,
    pub condition: Condition,
    pub uniforms: Option<UniformCallback>,
}

impl std::fmt::Debug for PassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassDescriptor")
            .field("name", &self.name)
            .field("program", &self.program)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("bindings", &self.bindings)
            .field("draws", &self.draws)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl PassDescriptor {
    pub fn new(name: impl Into<String>, program: ProgramId) -> Self {
        Self {
            name: name.into(),
            program,
            target: Target::Default,
            viewport: Viewport::Native,
            clear: ClearMask::NONE,
            state: RasterState::default(),
            bindings: Vec::new(),
            draws: DrawSource::Fullscreen,
            view: ViewSource::None,
            phase: Phase::Main,
            condition: Condition::Always,
            uniforms: None,
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn clear(mut self, clear: ClearMask) -> Self {
        self.clear = clear;
        self
    }

    pub fn state(mut self, state: RasterState) -> Self {
        self.state = state;
        self
    }

    /// Samples `texture` as written earlier in the same frame.
    pub fn bind(mut self, unit: u32, texture: TextureId, sampler: SamplerId) -> Self {
        self.bindings.push(TextureBinding {
            unit,
            texture,
            sampler,
            read: ReadKind::SameFrame,
        });
        self
    }

    /// Samples `texture` as left by the previous frame.
    pub fn bind_previous(mut self, unit: u32, texture: TextureId, sampler: SamplerId) -> Self {
        self.bindings.push(TextureBinding {
            unit,
            texture,
            sampler,
            read: ReadKind::PreviousFrame,
        });
        self
    }

    pub fn draw(mut self, draws: DrawSource) -> Self {
        self.draws = draws;
        self
    }

    pub fn view(mut self, view: ViewSource) -> Self {
        self.view = view;
        self
    }

    pub fn overlay(mut self) -> Self {
        self.phase = Phase::Overlay;
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn uniforms(
        mut self,
        callback: impl Fn(&FrameContext, &mut PassUniforms) + 'static,
    ) -> Self {
        self.uniforms = Some(Box::new(callback));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndc_rectangle_maps_to_top_left_fractions() {
        let viewport = Viewport::from_ndc(0.7, 0.55, 0.95, 0.95);
        let rect = viewport.resolve(Extent::new(1000, 1000));
        assert!((rect.x - 850.0).abs() < 1e-3);
        assert!((rect.y - 25.0).abs() < 1e-3);
        assert!((rect.width - 125.0).abs() < 1e-3);
        assert!((rect.height - 200.0).abs() < 1e-3);
    }

    #[test]
    fn native_viewport_covers_target() {
        let rect = Viewport::Native.resolve(Extent::new(640, 480));
        assert_eq!(
            rect,
            ViewportRect {
                x: 0.0,
                y: 0.0,
                width: 640.0,
                height: 480.0
            }
        );
    }
}
