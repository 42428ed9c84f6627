//! The pass graph: an ordered list of passes executed against a
//! [`RenderBackend`] once per frame.
//!
//! Execution order is the declared order. [`PassGraph::build`] can verify
//! that this order respects every texture's read-after-write dependencies;
//! [`PassGraph::execute`] then walks the list, skipping passes whose target
//! is incomplete and, while rendering is suspended, every pass outside the
//! overlay phase.

mod dependency;
mod pass;
mod uniforms;

pub use dependency::{validate_bindings, validate_order};
pub use pass::{
    BlendMode, ClearColor, ClearMask, ClearValues, Condition, CullMode, DrawSource,
    PassDescriptor, PassId, Phase, PolygonMode, RasterState, ReadKind, Target, TextureBinding,
    UniformCallback, ViewSource, Viewport, ViewportRect,
};
pub use uniforms::{
    DrawUniforms, FrameContext, Impulse, PassUniforms, Toggles, ViewMatrices,
};

use glam::Vec2;
use tracing::{debug, error, info, trace};

use crate::backend::RenderBackend;
use crate::error::RenderError;
use crate::resources::{Extent, ResourceTable};
use crate::scene::Scene;

/// What happened to each pass during one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Passes that ran.
    pub executed: Vec<PassId>,
    /// Passes skipped because their target could not be rendered into.
    pub skipped: Vec<PassId>,
    /// Whether main rendering was suspended for this frame.
    pub suspended: bool,
}

pub struct PassGraph {
    passes: Vec<PassDescriptor>,
}

impl PassGraph {
    /// Checks binding compatibility and, with `validate_dependencies`, the
    /// read-after-write order of `passes`.
    pub fn build(
        passes: Vec<PassDescriptor>,
        table: &ResourceTable,
        validate_dependencies: bool,
    ) -> Result<Self, RenderError> {
        validate_bindings(&passes, table)?;
        if validate_dependencies {
            validate_order(&passes, table)?;
        } else {
            debug!("Pass dependency validation disabled");
        }
        info!(passes = passes.len(), "Built pass graph");
        Ok(Self { passes })
    }

    /// Lets the backend build pipelines and bind groups for every pass.
    pub fn prepare(
        &self,
        backend: &mut impl RenderBackend,
        table: &ResourceTable,
    ) -> Result<(), RenderError> {
        for (index, pass) in self.passes.iter().enumerate() {
            backend.prepare_pass(PassId(index), pass, table)?;
        }
        Ok(())
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<PassId> {
        self.passes.iter().position(|p| p.name == name).map(PassId)
    }

    /// Runs every pass in order. Never fails: a pass that cannot run is
    /// logged and reported as skipped, and the rest of the frame continues.
    pub fn execute(
        &self,
        backend: &mut impl RenderBackend,
        table: &ResourceTable,
        scene: &Scene,
        frame: &FrameContext,
        suspended: bool,
    ) -> FrameReport {
        let mut report = FrameReport {
            suspended,
            ..Default::default()
        };
        backend.begin_frame();

        for (index, pass) in self.passes.iter().enumerate() {
            let id = PassId(index);
            if !condition_holds(pass.condition, frame) {
                continue;
            }
            if suspended && pass.phase == Phase::Main {
                continue;
            }

            let target_size = match target_extent(pass.target, backend, table) {
                Ok(extent) => extent,
                Err(err) => {
                    error!("Skipping pass '{}': {err}", pass.name);
                    report.skipped.push(id);
                    continue;
                }
            };

            let viewport = pass.viewport.resolve(target_size);
            backend.bind_target(id, pass.target, viewport);
            backend.apply_state(&pass.state);
            backend.clear(ClearValues {
                color: pass.clear.color.map(|color| match color {
                    ClearColor::Fixed(rgba) => rgba,
                    ClearColor::Ambient => frame.ambient.to_array(),
                }),
                depth: pass.clear.depth.then_some(1.0),
            });
            backend.bind_textures(&pass.bindings);

            let view = match pass.view {
                ViewSource::None => ViewMatrices::IDENTITY,
                ViewSource::Camera => frame.camera,
                ViewSource::Light => frame.light,
                ViewSource::MirroredCamera => frame.mirrored_camera,
                ViewSource::Sky => frame.camera.rotation_only(),
                ViewSource::MirroredSky => frame.mirrored_camera.rotation_only(),
            };
            let mut uniforms =
                PassUniforms::for_view(frame, &view, Vec2::new(viewport.width, viewport.height));
            if let Some(callback) = &pass.uniforms {
                callback(frame, &mut uniforms);
            }
            backend.upload_uniforms(pass.program, &uniforms);

            match pass.draws {
                DrawSource::Fullscreen => backend.draw_fullscreen(),
                DrawSource::Layer(layer) => {
                    let view_proj = view.view_projection();
                    for (model, drawable) in scene.layer(layer) {
                        backend.draw_mesh(
                            drawable.mesh,
                            drawable.albedo,
                            &DrawUniforms::new(model, view_proj),
                        );
                    }
                }
            }

            backend.unbind_textures();
            backend.end_pass();
            trace!("Executed pass '{}'", pass.name);
            report.executed.push(id);
        }
        report
    }
}

fn condition_holds(condition: Condition, frame: &FrameContext) -> bool {
    match condition {
        Condition::Always => true,
        Condition::ShowTextures => frame.toggles.show_textures,
        Condition::ShowLightVolume => frame.toggles.show_light_volume,
    }
}

fn target_extent(
    target: Target,
    backend: &impl RenderBackend,
    table: &ResourceTable,
) -> Result<Extent, RenderError> {
    match target {
        Target::Default => Ok(table.screen()),
        Target::Framebuffer(fb) => {
            backend.framebuffer_status(fb)?;
            table.framebuffer_extent(fb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Command, RecordingBackend};
    use crate::backend::{MeshId, ProgramId};
    use crate::mesh::Transform;
    use crate::resources::{Filter, SizeClass, TextureFormat, TextureKind, Wrap};
    use crate::scene::{Drawable, Layer};

    struct Setup {
        backend: RecordingBackend,
        table: ResourceTable,
        graph: PassGraph,
        scene: Scene,
    }

    /// offscreen (draws the solid layer) -> present (samples it), plus a
    /// gated overlay.
    fn setup() -> Setup {
        let mut backend = RecordingBackend::new();
        let mut table = ResourceTable::new(Extent::new(320, 240));
        let color = table
            .declare("color", SizeClass::Screen, TextureFormat::Rgba8, TextureKind::D2)
            .unwrap();
        let fb = table.declare_framebuffer("offscreen", &[color], None).unwrap();
        let linear = table
            .declare_sampler("linear", Filter::Linear, Wrap::Clamp, None)
            .unwrap();
        table.realize(&mut backend).unwrap();

        let mut scene = Scene::new();
        scene.spawn(
            Layer::Solid,
            Drawable {
                mesh: MeshId(0),
                albedo: None,
            },
            Transform::new(),
        );

        let passes = vec![
            PassDescriptor::new("offscreen", ProgramId(0))
                .target(Target::Framebuffer(fb))
                .clear(ClearMask::color_and_depth(ClearColor::Ambient))
                .view(ViewSource::Camera)
                .draw(DrawSource::Layer(Layer::Solid))
                .uniforms(|_, u| u.params = [7.0, 0.0, 0.0, 0.0]),
            PassDescriptor::new("present", ProgramId(1))
                .target(Target::Default)
                .state(RasterState::fullscreen())
                .bind(0, color, linear),
            PassDescriptor::new("overlay", ProgramId(1))
                .viewport(Viewport::from_ndc(0.0, 0.0, 1.0, 1.0))
                .state(RasterState::fullscreen())
                .bind(0, color, linear)
                .overlay()
                .when(Condition::ShowTextures),
        ];
        let graph = PassGraph::build(passes, &table, true).unwrap();
        graph.prepare(&mut backend, &table).unwrap();
        backend.take_commands();
        Setup {
            backend,
            table,
            graph,
            scene,
        }
    }

    #[test]
    fn passes_run_in_declared_order_with_full_state() {
        let mut s = setup();
        let frame = FrameContext::default();
        let report = s.graph.execute(&mut s.backend, &s.table, &s.scene, &frame, false);
        assert_eq!(report.executed, vec![PassId(0), PassId(1)]);
        assert!(report.skipped.is_empty());

        let commands = s.backend.take_commands();
        let order = commands
            .iter()
            .filter_map(|c| match c {
                Command::BindTarget(id, ..) => Some(*id),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(order, vec![PassId(0), PassId(1)]);
        let states = commands
            .iter()
            .filter(|c| matches!(c, Command::ApplyState(_)))
            .count();
        assert_eq!(states, 2);
        assert!(commands.contains(&Command::DrawMesh(MeshId(0), None)));
        assert!(commands.contains(&Command::Clear(ClearValues {
            color: Some([0.0, 0.0, 0.0, 1.0]),
            depth: Some(1.0),
        })));
    }

    #[test]
    fn uniform_callback_fills_pass_values() {
        let mut s = setup();
        s.graph
            .execute(&mut s.backend, &s.table, &s.scene, &FrameContext::default(), false);
        let uploaded = s
            .backend
            .take_commands()
            .into_iter()
            .find_map(|c| match c {
                Command::UploadUniforms(ProgramId(0), u) => Some(u),
                _ => None,
            })
            .unwrap();
        assert_eq!(uploaded.params[0], 7.0);
        assert_eq!(uploaded.inv_resolution[0], 1.0 / 320.0);
    }

    #[test]
    fn later_passes_sample_this_frames_output() {
        let mut s = setup();
        s.graph
            .execute(&mut s.backend, &s.table, &s.scene, &FrameContext::default(), false);
        let color = s.table.texture("color").unwrap();
        assert!(
            s.backend
                .commands()
                .contains(&Command::BindTextures(vec![(color, 1)]))
        );
    }

    #[test]
    fn incomplete_framebuffer_skips_only_that_pass() {
        let mut s = setup();
        let fb = s.table.framebuffer("offscreen").unwrap();
        s.backend.set_incomplete(fb, true);
        let report = s
            .graph
            .execute(&mut s.backend, &s.table, &s.scene, &FrameContext::default(), false);
        assert_eq!(report.skipped, vec![PassId(0)]);
        assert_eq!(report.executed, vec![PassId(1)]);
        let color = s.table.texture("color").unwrap();
        assert_eq!(s.backend.version(color), 0);
    }

    #[test]
    fn suspension_keeps_only_overlays() {
        let mut s = setup();
        let frame = FrameContext {
            toggles: Toggles {
                show_textures: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let report = s.graph.execute(&mut s.backend, &s.table, &s.scene, &frame, true);
        assert!(report.suspended);
        assert_eq!(report.executed, vec![PassId(2)]);

        let report = s.graph.execute(&mut s.backend, &s.table, &s.scene, &frame, false);
        assert_eq!(report.executed, vec![PassId(0), PassId(1), PassId(2)]);
    }

    #[test]
    fn frames_do_not_allocate() {
        let mut s = setup();
        for _ in 0..3 {
            s.graph
                .execute(&mut s.backend, &s.table, &s.scene, &FrameContext::default(), false);
        }
        assert!(!s.backend.commands().iter().any(Command::is_allocation));
    }

    #[test]
    fn find_looks_up_by_name() {
        let s = setup();
        assert_eq!(s.graph.find("present"), Some(PassId(1)));
        assert_eq!(s.graph.find("missing"), None);
        assert_eq!(s.graph.len(), 3);
    }
}
