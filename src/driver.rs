//! Per-frame orchestration.
//!
//! [`FrameDriver`] owns everything the setup phase creates (resource table,
//! pass graph, scene, backend) and turns one [`FrameInput`] into one
//! rendered frame: apply toggles and shader reloads, advance time unless
//! paused, move the camera, turn a click into a water impulse, compute the
//! view matrices, run the pass graph and present.

use anyhow::{Context, Result};
use glam::{Vec2, Vec3, Vec4};
use tracing::{error, info, warn};

use crate::backend::RenderBackend;
use crate::camera::{FpsCamera, Light, mirrored};
use crate::config::AppConfig;
use crate::error::RenderError;
use crate::graph::{FrameContext, FrameReport, Impulse, PassGraph, Toggles, ViewMatrices};
use crate::input::FrameInput;
use crate::picking::{Ray, WaterPlane};
use crate::pipeline::{Programs, Resources, SceneConstants, canonical_passes};
use crate::resources::{Extent, ResourceTable};
use crate::scene::{self, Scene, SceneTextures};
use crate::shaders::ShaderWatcher;
use crate::texture;

/// What the application should do after a frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub report: FrameReport,
    pub exit: bool,
}

pub struct FrameDriver<B: RenderBackend> {
    backend: B,
    table: ResourceTable,
    resources: Resources,
    programs: Programs,
    graph: PassGraph,
    scene: Scene,
    camera: FpsCamera,
    light: Light,
    water: WaterPlane,
    atmosphere: Vec3,
    underwater: Vec3,
    impulse_radius: f32,
    impulse_strength: f32,
    watcher: Option<ShaderWatcher>,
    time: f32,
    paused: bool,
    toggles: Toggles,
    suspended: bool,
    reload_error: Option<RenderError>,
}

impl<B: RenderBackend> FrameDriver<B> {
    /// Runs the whole setup phase on `backend`: declares and realizes the
    /// resources, uploads assets, compiles programs, builds the scene and the
    /// pass graph. Any failure here aborts the run.
    pub fn new(mut backend: B, config: &AppConfig, screen: Extent) -> Result<Self> {
        let atmosphere = Vec3::from_array(config.colors.atmosphere);
        let underwater = Vec3::from_array(config.colors.underwater);

        let sky_image = texture::load_sky(
            config.assets.skybox_dir.as_deref(),
            atmosphere,
            atmosphere * 0.6,
        );
        let floor_image = texture::load_albedo(config.assets.floor_texture.as_deref());

        let mut table = ResourceTable::new(screen);
        let resources = Resources::declare(
            &mut table,
            config,
            Extent::new(sky_image.width, sky_image.height),
            Extent::new(floor_image.width, floor_image.height),
        )
        .context("Failed to declare render resources")?;
        table
            .realize(&mut backend)
            .context("Failed to create render resources")?;
        backend
            .write_texture(resources.sky, &sky_image)
            .context("Failed to upload the sky cubemap")?;
        backend
            .write_texture(resources.floor_albedo, &floor_image)
            .context("Failed to upload the floor texture")?;

        let programs = Programs::register(&mut backend).context("Failed to compile shaders")?;

        let light = Light::from_config(&config.light);
        let mut scene = Scene::new();
        scene::populate(
            &mut scene,
            &mut backend,
            config,
            &light,
            SceneTextures {
                floor_albedo: resources.floor_albedo,
            },
        )
        .context("Failed to build the scene")?;

        let passes = canonical_passes(&resources, &programs, SceneConstants::from_config(config));
        let graph = PassGraph::build(passes, &table, config.validate_passes)
            .context("Invalid pass graph")?;
        graph
            .prepare(&mut backend, &table)
            .context("Failed to prepare render passes")?;

        let watcher = config.watch_shaders.then(|| {
            info!("Watching '{}' for shader changes", config.shader_dir.display());
            ShaderWatcher::new(&config.shader_dir)
        });

        Ok(Self {
            backend,
            table,
            resources,
            programs,
            graph,
            scene,
            camera: FpsCamera::from_config(&config.camera),
            light,
            water: WaterPlane {
                height: config.water.sea_level,
                size: config.water.size,
            },
            atmosphere,
            underwater,
            impulse_radius: config.simulation.impulse_radius,
            impulse_strength: config.simulation.impulse_strength,
            watcher,
            time: 0.0,
            paused: false,
            toggles: Toggles::default(),
            suspended: false,
            reload_error: None,
        })
    }

    /// Renders one frame. Never fails: skipped passes and presentation
    /// problems are logged and reported.
    pub fn frame(&mut self, input: &FrameInput) -> FrameOutcome {
        let actions = input.actions;
        if actions.toggle_pause {
            self.paused = !self.paused;
            info!(paused = self.paused, "Toggled pause");
        }
        if actions.toggle_textures {
            self.toggles.show_textures = !self.toggles.show_textures;
        }
        if actions.toggle_light_volume {
            self.toggles.show_light_volume = !self.toggles.show_light_volume;
        }
        let files_changed = self.watcher.as_mut().is_some_and(ShaderWatcher::poll);
        if actions.reload_shaders || files_changed {
            self.reload();
        }

        if !self.paused {
            self.time += input.dt;
        }
        self.camera.update(input);

        let camera = self.camera.matrices(self.aspect());
        let impulse = input.click.and_then(|click| self.pick(click, &camera));
        let frame = FrameContext {
            time: self.time,
            camera,
            mirrored_camera: mirrored(&camera, self.water.height),
            light: self.light.matrices(),
            toggles: self.toggles,
            impulse,
            ambient: self.ambient(camera.position),
        };

        let report = self.graph.execute(
            &mut self.backend,
            &self.table,
            &self.scene,
            &frame,
            self.suspended,
        );
        if let Err(err) = self.backend.end_frame() {
            warn!("Frame not presented: {err}");
        }

        FrameOutcome {
            report,
            exit: actions.exit,
        }
    }

    /// Recompiles every program. On failure the previous programs stay in use
    /// and main rendering is suspended until a later reload succeeds.
    pub fn reload_shaders(&mut self) -> Result<(), RenderError> {
        self.reload();
        match &self.reload_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Reloads programs and updates the suspended state from the outcome.
    fn reload(&mut self) {
        match self.backend.reload_programs() {
            Ok(()) => {
                if self.suspended {
                    info!("Shaders compile again, resuming rendering");
                }
                self.suspended = false;
                self.reload_error = None;
            }
            Err(err) => {
                error!("Shader reload failed, rendering suspended: {err}");
                self.suspended = true;
                self.reload_error = Some(err);
            }
        }
    }

    /// Follows a new window size. Only screen-sized resources are recreated.
    pub fn resize(&mut self, screen: Extent) -> Result<(), RenderError> {
        self.table.resize(&mut self.backend, screen)?;
        Ok(())
    }

    /// Clear colour for the eye: sky above the water, water tint below.
    fn ambient(&self, eye: Vec3) -> Vec4 {
        let color = if eye.y < self.water.height {
            self.underwater
        } else {
            self.atmosphere
        };
        color.extend(1.0)
    }

    fn aspect(&self) -> f32 {
        let screen = self.table.screen();
        screen.width as f32 / screen.height.max(1) as f32
    }

    fn pick(&self, click: Vec2, camera: &ViewMatrices) -> Option<Impulse> {
        let screen = self.table.screen();
        let size = Vec2::new(screen.width as f32, screen.height as f32);
        let ray = Ray::from_screen(click, size, camera.view, camera.projection);
        let uv = self.water.pick(&ray)?;
        Some(Impulse {
            uv,
            radius: self.impulse_radius,
            strength: self.impulse_strength,
        })
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// The error that suspended rendering, if any.
    pub fn reload_error(&self) -> Option<&RenderError> {
        self.reload_error.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn toggles(&self) -> Toggles {
        self.toggles
    }

    pub fn camera_mut(&mut self) -> &mut FpsCamera {
        &mut self.camera
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn programs(&self) -> &Programs {
        &self.programs
    }

    pub fn graph(&self) -> &PassGraph {
        &self.graph
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Command, RecordingBackend};
    use crate::graph::PassId;
    use crate::input::Actions;
    use crate::resources::TextureId;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.resolution.light = 32;
        config.resolution.heightmap = 16;
        config.water.resolution = 4;
        config
    }

    fn driver() -> FrameDriver<RecordingBackend> {
        FrameDriver::new(RecordingBackend::new(), &config(), Extent::new(320, 240)).unwrap()
    }

    fn step(dt: f32) -> FrameInput {
        FrameInput {
            dt,
            ..Default::default()
        }
    }

    fn with_actions(actions: Actions) -> FrameInput {
        FrameInput {
            dt: 0.016,
            actions,
            ..Default::default()
        }
    }

    /// Texture versions a pass saw when it bound its inputs.
    fn bound_by(commands: &[Command], pass: PassId) -> Vec<(TextureId, u64)> {
        let start = commands
            .iter()
            .position(|c| matches!(c, Command::BindTarget(id, ..) if *id == pass))
            .unwrap();
        commands[start..]
            .iter()
            .find_map(|c| match c {
                Command::BindTextures(seen) => Some(seen.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn first_frame_runs_every_main_pass() {
        let mut driver = driver();
        let outcome = driver.frame(&step(0.016));
        assert!(outcome.report.skipped.is_empty());
        assert!(!outcome.exit);
        let main = driver
            .graph()
            .passes()
            .iter()
            .filter(|p| p.condition == crate::graph::Condition::Always)
            .count();
        assert_eq!(outcome.report.executed.len(), main);
        assert_eq!(driver.backend().commands().last(), Some(&Command::EndFrame));
    }

    #[test]
    fn incomplete_caustics_target_keeps_previous_contents() {
        let mut driver = driver();
        driver.frame(&step(0.016));
        let caustics = driver.resources().caustics;
        assert_eq!(driver.backend().version(caustics), 1);

        let fb = driver.resources().caustics_fb;
        driver.backend_mut().set_incomplete(fb, true);
        driver.backend_mut().take_commands();
        let report = driver.frame(&step(0.016)).report;

        let caustics_pass = driver.graph().find("caustics").unwrap();
        assert_eq!(caustics_pass, PassId(5));
        assert_eq!(report.skipped, vec![caustics_pass]);
        for later in 6..=12 {
            assert!(report.executed.contains(&PassId(later)), "pass {later}");
        }
        assert_eq!(driver.backend().version(caustics), 1);

        let commands = driver.backend().commands();
        assert!(bound_by(commands, PassId(6)).contains(&(caustics, 1)));
        assert!(!commands.contains(&Command::EndPass(caustics_pass)));

        driver.backend_mut().set_incomplete(fb, false);
        driver.frame(&step(0.016));
        assert_eq!(driver.backend().version(caustics), 2);
    }

    #[test]
    fn broken_reload_freezes_the_last_frame() {
        let mut driver = driver();
        driver.frame(&step(0.016));
        let presented = driver.backend().default_version();
        assert!(presented > 0);

        driver.backend_mut().set_broken("water", true);
        let outcome = driver.frame(&with_actions(Actions {
            reload_shaders: true,
            ..Default::default()
        }));
        assert!(driver.is_suspended());
        assert!(outcome.report.suspended);
        assert!(outcome.report.executed.is_empty());
        assert!(matches!(
            driver.reload_error(),
            Some(RenderError::ShaderReload { program, .. }) if program == "water"
        ));
        assert_eq!(driver.backend().default_version(), presented);

        // The loop keeps running and presenting the frozen image.
        for _ in 0..3 {
            driver.frame(&step(0.016));
        }
        assert_eq!(driver.backend().default_version(), presented);
        assert!(driver.backend().commands().ends_with(&[Command::EndFrame]));

        driver.backend_mut().set_broken("water", false);
        driver.frame(&with_actions(Actions {
            reload_shaders: true,
            ..Default::default()
        }));
        assert!(!driver.is_suspended());
        assert!(driver.reload_error().is_none());
        assert!(driver.backend().default_version() > presented);
    }

    #[test]
    fn explicit_reload_reports_its_outcome() {
        let mut driver = driver();
        driver.backend_mut().set_broken("caustics", true);
        let err = driver.reload_shaders().unwrap_err();
        assert!(matches!(&err, RenderError::ShaderReload { program, .. } if program == "caustics"));
        assert_eq!(driver.reload_error(), Some(&err));
        assert!(driver.is_suspended());

        driver.backend_mut().set_broken("caustics", false);
        driver.reload_shaders().unwrap();
        assert!(!driver.is_suspended());
        assert!(driver.reload_error().is_none());
    }

    #[test]
    fn overlays_still_draw_while_suspended() {
        let mut driver = driver();
        driver.backend_mut().set_broken("sky", true);
        driver.frame(&with_actions(Actions {
            reload_shaders: true,
            toggle_textures: true,
            ..Default::default()
        }));
        let report = driver.frame(&step(0.016)).report;
        assert!(report.suspended);
        assert_eq!(report.executed.len(), 4);
        for id in &report.executed {
            assert!(driver.graph().passes()[id.0].name.starts_with("debug-"));
        }
    }

    #[test]
    fn pause_freezes_time() {
        let mut driver = driver();
        driver.frame(&step(0.5));
        assert_eq!(driver.time(), 0.5);
        driver.frame(&FrameInput {
            dt: 0.5,
            actions: Actions {
                toggle_pause: true,
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(driver.is_paused());
        assert_eq!(driver.time(), 0.5);
        driver.frame(&step(0.5));
        assert_eq!(driver.time(), 0.5);
    }

    #[test]
    fn ambient_follows_the_sea_level() {
        let driver = driver();
        let config = config();
        assert_eq!(
            driver.ambient(Vec3::new(0.0, 5.0, 0.0)),
            Vec3::from_array(config.colors.atmosphere).extend(1.0)
        );
        assert_eq!(
            driver.ambient(Vec3::new(0.0, -1.0, 0.0)),
            Vec3::from_array(config.colors.underwater).extend(1.0)
        );
    }

    #[test]
    fn click_on_water_perturbs_the_height_field() {
        let mut driver = driver();
        let camera = driver.camera_mut();
        camera.position = Vec3::new(0.0, 6.0, 0.0);
        camera.pitch = -1.2;
        driver.backend_mut().take_commands();
        driver.frame(&FrameInput {
            dt: 0.016,
            click: Some(Vec2::new(160.0, 120.0)),
            ..Default::default()
        });

        let perturb = driver.programs().height_perturb;
        let impulse = driver
            .backend()
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::UploadUniforms(program, uniforms) if *program == perturb => {
                    Some(uniforms.impulse)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(impulse[3], config().simulation.impulse_strength);
        assert!(impulse[0] > 0.0 && impulse[0] < 1.0);
    }

    #[test]
    fn toggles_gate_optional_passes() {
        let mut driver = driver();
        let volume = driver.graph().find("light-volume").unwrap();
        assert!(!driver.frame(&step(0.016)).report.executed.contains(&volume));
        let report = driver
            .frame(&with_actions(Actions {
                toggle_light_volume: true,
                ..Default::default()
            }))
            .report;
        assert!(driver.toggles().show_light_volume);
        assert!(report.executed.contains(&volume));
    }

    #[test]
    fn exit_is_reported() {
        let mut driver = driver();
        let outcome = driver.frame(&with_actions(Actions {
            exit: true,
            ..Default::default()
        }));
        assert!(outcome.exit);
    }

    #[test]
    fn resize_recreates_screen_textures_only() {
        let mut driver = driver();
        driver.backend_mut().take_commands();
        driver.resize(Extent::new(640, 480)).unwrap();
        let underwater = driver.resources().underwater_color;
        let shadow = driver.resources().shadow_map;
        let commands = driver.backend_mut().take_commands();
        assert!(commands.contains(&Command::CreateTexture(underwater, Extent::new(640, 480))));
        assert!(
            !commands
                .iter()
                .any(|c| matches!(c, Command::CreateTexture(t, _) if *t == shadow))
        );
    }
}
