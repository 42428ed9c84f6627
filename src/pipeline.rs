//! The demo's frame: every texture, framebuffer, sampler and program it
//! uses, and the ordered pass list wiring them together.
//!
//! | # | pass | writes | reads |
//! |---|------|--------|-------|
//! | 0 | `perturb` | ping | pong (previous frame) |
//! | 1 | `diffuse` | pong | ping |
//! | 2 | `shadow-map` | shadow map | |
//! | 3 | `water-depth` | water depth | pong |
//! | 4 | `environment-map` | environment | |
//! | 5 | `caustics` | caustics | environment, pong |
//! | 6 | `underwater-scene` | underwater | shadow map, caustics, water depth |
//! | 7 | `sky` | screen | sky |
//! | 8 | `sky-reflected` | reflection | sky |
//! | 9 | `reflection` | reflection | shadow map, caustics, water depth |
//! | 10 | `composite-solids` | screen | shadow map, caustics, water depth |
//! | 11 | `composite-water` | screen | pong, underwater, reflection |
//! | 12 | `composite-walls` | screen | shadow map, caustics, water depth |
//! | 13 | `light-volume` | screen | |
//! | 14-17 | `debug-*` | screen | intermediate textures |

use glam::Vec3;

use crate::backend::{ProgramId, RenderBackend};
use crate::config::{AppConfig, WaveConfig};
use crate::error::RenderError;
use crate::graph::{
    BlendMode, ClearColor, ClearMask, Condition, CullMode, DrawSource, FrameContext,
    PassDescriptor, PassUniforms, PolygonMode, RasterState, Target, ViewSource, Viewport,
};
use crate::resources::{
    CompareFunc, Extent, Filter, FramebufferId, ResourceTable, SamplerId, SizeClass, TextureFormat,
    TextureId, TextureKind, Wrap,
};
use crate::scene::Layer;
use crate::simulation::{DIFFUSE, PERTURB};

/// Every program the frame uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Programs {
    pub height_perturb: ProgramId,
    pub height_diffuse: ProgramId,
    pub shadow: ProgramId,
    pub water_depth: ProgramId,
    pub environment: ProgramId,
    pub caustics: ProgramId,
    pub scene_lit: ProgramId,
    pub water: ProgramId,
    pub sky: ProgramId,
    pub light_volume: ProgramId,
    pub debug_blit: ProgramId,
    pub debug_depth: ProgramId,
}

impl Programs {
    pub fn register(backend: &mut impl RenderBackend) -> Result<Self, RenderError> {
        Ok(Self {
            height_perturb: backend.register_program("height_perturb")?,
            height_diffuse: backend.register_program("height_diffuse")?,
            shadow: backend.register_program("shadow")?,
            water_depth: backend.register_program("water_depth")?,
            environment: backend.register_program("environment")?,
            caustics: backend.register_program("caustics")?,
            scene_lit: backend.register_program("scene_lit")?,
            water: backend.register_program("water")?,
            sky: backend.register_program("sky")?,
            light_volume: backend.register_program("light_volume")?,
            debug_blit: backend.register_program("debug_blit")?,
            debug_depth: backend.register_program("debug_depth")?,
        })
    }
}

/// Handles of every declared resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resources {
    pub ping: TextureId,
    pub pong: TextureId,
    pub shadow_map: TextureId,
    pub water_depth: TextureId,
    pub environment: TextureId,
    pub caustics: TextureId,
    pub underwater_color: TextureId,
    pub underwater_depth: TextureId,
    pub reflection_color: TextureId,
    pub sky: TextureId,
    pub floor_albedo: TextureId,

    pub ping_fb: FramebufferId,
    pub pong_fb: FramebufferId,
    pub shadow_fb: FramebufferId,
    pub water_depth_fb: FramebufferId,
    pub environment_fb: FramebufferId,
    pub caustics_fb: FramebufferId,
    pub underwater_fb: FramebufferId,
    pub reflection_fb: FramebufferId,

    /// Nearest, clamped: float height fields and world positions.
    pub nearest: SamplerId,
    /// Depth comparison for shadow lookups.
    pub shadow: SamplerId,
    /// Raw depth reads.
    pub depth: SamplerId,
    pub linear: SamplerId,
    pub sky_sampler: SamplerId,
}

impl Resources {
    /// Declares the frame's resources. `sky` and `floor` are the sizes of the
    /// images uploaded into the cubemap and the floor albedo.
    pub fn declare(
        table: &mut ResourceTable,
        config: &AppConfig,
        sky: Extent,
        floor: Extent,
    ) -> Result<Self, RenderError> {
        use TextureFormat::*;
        use TextureKind::*;

        let light = SizeClass::Fixed(Extent::square(config.resolution.light));
        let heightmap = SizeClass::Fixed(Extent::square(config.resolution.heightmap));
        let screen = SizeClass::Screen;

        let ping = table.declare(PERTURB.destination, heightmap, Rgba32Float, D2)?;
        let pong = table.declare(DIFFUSE.destination, heightmap, Rgba32Float, D2)?;
        let shadow_map = table.declare("shadowmap", light, Depth32Float, D2)?;
        let water_depth = table.declare("water-depth", light, Depth32Float, D2)?;
        let environment = table.declare("environment", light, Rgba32Float, D2)?;
        let environment_depth = table.declare("environment-depth", light, Depth32Float, D2)?;
        let caustics = table.declare("caustics", light, Rgba8, D2)?;
        let underwater_color = table.declare("underwater-color", screen, Rgba8, D2)?;
        let underwater_depth = table.declare("underwater-depth", screen, Depth32Float, D2)?;
        let reflection_color = table.declare("reflection-color", screen, Rgba8, D2)?;
        let reflection_depth = table.declare("reflection-depth", screen, Depth32Float, D2)?;
        let sky = table.declare("sky", SizeClass::Fixed(sky), Rgba8, Cube)?;
        let floor_albedo = table.declare("floor-albedo", SizeClass::Fixed(floor), Rgba8, D2)?;

        Ok(Self {
            ping,
            pong,
            shadow_map,
            water_depth,
            environment,
            caustics,
            underwater_color,
            underwater_depth,
            reflection_color,
            sky,
            floor_albedo,

            ping_fb: table.declare_framebuffer(PERTURB.destination, &[ping], None)?,
            pong_fb: table.declare_framebuffer(DIFFUSE.destination, &[pong], None)?,
            shadow_fb: table.declare_framebuffer("shadow", &[], Some(shadow_map))?,
            water_depth_fb: table.declare_framebuffer("water-depth", &[], Some(water_depth))?,
            environment_fb: table.declare_framebuffer(
                "environment",
                &[environment],
                Some(environment_depth),
            )?,
            caustics_fb: table.declare_framebuffer("caustics", &[caustics], None)?,
            underwater_fb: table.declare_framebuffer(
                "underwater",
                &[underwater_color],
                Some(underwater_depth),
            )?,
            reflection_fb: table.declare_framebuffer(
                "reflection",
                &[reflection_color],
                Some(reflection_depth),
            )?,

            nearest: table.declare_sampler("nearest", Filter::Nearest, Wrap::Clamp, None)?,
            shadow: table.declare_sampler(
                "shadow",
                Filter::Linear,
                Wrap::Clamp,
                Some(CompareFunc::LessEqual),
            )?,
            depth: table.declare_sampler("depth", Filter::Nearest, Wrap::Clamp, None)?,
            linear: table.declare_sampler("linear", Filter::Linear, Wrap::Clamp, None)?,
            sky_sampler: table.declare_sampler("sky", Filter::Linear, Wrap::Clamp, None)?,
        })
    }
}

/// Configuration-derived uniform values every program may read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneConstants {
    pub light_direction: Vec3,
    pub light_intensity: f32,
    pub light_color: Vec3,
    pub atmosphere: Vec3,
    pub underwater: Vec3,
    pub sea_level: f32,
    pub water_size: f32,
    pub near: f32,
    pub far: f32,
    pub light_resolution: u32,
    pub heightmap_resolution: u32,
    pub damping: f32,
    pub stiffness: f32,
    pub waves: [WaveConfig; 2],
}

impl SceneConstants {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            light_direction: config.light.direction(),
            light_intensity: config.light.intensity,
            light_color: config.light.color(),
            atmosphere: Vec3::from_array(config.colors.atmosphere),
            underwater: Vec3::from_array(config.colors.underwater),
            sea_level: config.water.sea_level,
            water_size: config.water.size,
            near: config.camera.near,
            far: config.camera.far,
            light_resolution: config.resolution.light,
            heightmap_resolution: config.resolution.heightmap,
            damping: config.simulation.damping,
            stiffness: config.simulation.stiffness,
            waves: config.wave_pair(),
        }
    }

    pub fn apply(&self, uniforms: &mut PassUniforms) {
        let [first, second] = self.waves;
        let shape = |w: WaveConfig| [w.amplitude, w.frequency, w.phase, w.sharpness];
        let (d1, d2) = (first.direction(), second.direction());

        uniforms.light_direction = self.light_direction.extend(self.light_intensity).to_array();
        uniforms.light_color = self.light_color.extend(1.0).to_array();
        uniforms.atmosphere_color = self.atmosphere.extend(1.0).to_array();
        uniforms.underwater_color = self.underwater.extend(1.0).to_array();
        let light_texel = 1.0 / self.light_resolution as f32;
        uniforms.inv_resolution[2] = light_texel;
        uniforms.inv_resolution[3] = light_texel;
        uniforms.water = [self.sea_level, self.water_size / 2.0, self.near, self.far];
        uniforms.simulation = [
            self.damping,
            self.stiffness,
            1.0 / self.heightmap_resolution as f32,
            0.0,
        ];
        uniforms.wave1 = shape(first);
        uniforms.wave2 = shape(second);
        uniforms.wave_directions = [d1.x, d1.y, d2.x, d2.y];
    }
}

/// Uniform callback filling the constants and this pass's `params`.
fn with_params(
    constants: SceneConstants,
    params: [f32; 4],
) -> impl Fn(&FrameContext, &mut PassUniforms) + 'static {
    move |_, uniforms| {
        constants.apply(uniforms);
        uniforms.params = params;
    }
}

const FOG: f32 = 1.0;
const WALL_ALPHA: f32 = 0.35;

/// Debug panels down the right edge of the screen, top to bottom.
const DEBUG_PANELS: [[f32; 4]; 4] = [
    [0.6, 0.5, 0.95, 0.95],
    [0.6, 0.0, 0.95, 0.45],
    [0.6, -0.5, 0.95, -0.05],
    [0.6, -0.95, 0.95, -0.55],
];

fn debug_panel(index: usize) -> Viewport {
    let [x0, y0, x1, y1] = DEBUG_PANELS[index];
    Viewport::from_ndc(x0, y0, x1, y1)
}

/// The full frame, in execution order.
pub fn canonical_passes(
    resources: &Resources,
    programs: &Programs,
    constants: SceneConstants,
) -> Vec<PassDescriptor> {
    let r = resources;
    let p = programs;
    let lit_solids = |name: &str, target: Target, view: ViewSource, state: RasterState| {
        PassDescriptor::new(name, p.scene_lit)
            .target(target)
            .state(state)
            .bind(0, r.shadow_map, r.shadow)
            .bind(1, r.caustics, r.linear)
            .bind(2, r.water_depth, r.depth)
            .view(view)
            .draw(DrawSource::Layer(Layer::Solid))
    };
    let ambient = ClearMask::color_and_depth(ClearColor::Ambient);
    let opaque = RasterState::default();
    let overlay = RasterState::fullscreen();

    vec![
        PassDescriptor::new("perturb", p.height_perturb)
            .target(Target::Framebuffer(r.ping_fb))
            .state(RasterState::fullscreen())
            .bind_previous(0, r.pong, r.nearest)
            .uniforms(move |frame, uniforms| {
                constants.apply(uniforms);
                uniforms.impulse = frame
                    .impulse
                    .map(|i| [i.uv.x, i.uv.y, i.radius, i.strength])
                    .unwrap_or_default();
            }),
        PassDescriptor::new("diffuse", p.height_diffuse)
            .target(Target::Framebuffer(r.pong_fb))
            .state(RasterState::fullscreen())
            .bind(0, r.ping, r.nearest)
            .uniforms(with_params(constants, [0.0; 4])),
        PassDescriptor::new("shadow-map", p.shadow)
            .target(Target::Framebuffer(r.shadow_fb))
            .clear(ClearMask::depth_only())
            .state(opaque.cull(CullMode::None))
            .view(ViewSource::Light)
            .draw(DrawSource::Layer(Layer::Solid))
            .uniforms(with_params(constants, [0.0; 4])),
        PassDescriptor::new("water-depth", p.water_depth)
            .target(Target::Framebuffer(r.water_depth_fb))
            .clear(ClearMask::depth_only())
            .state(opaque.cull(CullMode::None))
            .bind(0, r.pong, r.nearest)
            .view(ViewSource::Light)
            .draw(DrawSource::Layer(Layer::Water))
            .uniforms(with_params(constants, [0.0; 4])),
        PassDescriptor::new("environment-map", p.environment)
            .target(Target::Framebuffer(r.environment_fb))
            .clear(ClearMask::color_and_depth(ClearColor::Fixed([0.0; 4])))
            .state(opaque.cull(CullMode::None))
            .view(ViewSource::Light)
            .draw(DrawSource::Layer(Layer::Solid))
            .uniforms(with_params(constants, [0.0; 4])),
        PassDescriptor::new("caustics", p.caustics)
            .target(Target::Framebuffer(r.caustics_fb))
            .state(RasterState::fullscreen())
            .bind(0, r.environment, r.nearest)
            .bind(1, r.pong, r.nearest)
            .view(ViewSource::Light)
            .uniforms(with_params(constants, [0.0; 4])),
        lit_solids(
            "underwater-scene",
            Target::Framebuffer(r.underwater_fb),
            ViewSource::Camera,
            opaque,
        )
        .clear(ambient)
        .uniforms(with_params(constants, [FOG, 0.0, 0.0, 0.0])),
        PassDescriptor::new("sky", p.sky)
            .target(Target::Default)
            .clear(ambient)
            .state(opaque.cull(CullMode::Front).depth(None, false))
            .bind(0, r.sky, r.sky_sampler)
            .view(ViewSource::Sky)
            .draw(DrawSource::Layer(Layer::Sky))
            .uniforms(with_params(constants, [0.0; 4])),
        // The mirror flips winding, so culling is reversed in both reflected passes.
        PassDescriptor::new("sky-reflected", p.sky)
            .target(Target::Framebuffer(r.reflection_fb))
            .clear(ambient)
            .state(opaque.cull(CullMode::Back).depth(None, false))
            .bind(0, r.sky, r.sky_sampler)
            .view(ViewSource::MirroredSky)
            .draw(DrawSource::Layer(Layer::Sky))
            .uniforms(with_params(constants, [0.0; 4])),
        lit_solids(
            "reflection",
            Target::Framebuffer(r.reflection_fb),
            ViewSource::MirroredCamera,
            opaque.cull(CullMode::Front),
        )
        .uniforms(with_params(constants, [0.0, 1.0, 0.0, 0.0])),
        lit_solids("composite-solids", Target::Default, ViewSource::Camera, opaque)
            .uniforms(with_params(constants, [FOG, 0.0, 0.0, 0.0])),
        PassDescriptor::new("composite-water", p.water)
            .target(Target::Default)
            .state(opaque.cull(CullMode::None))
            .bind(0, r.pong, r.nearest)
            .bind(1, r.underwater_color, r.linear)
            .bind(2, r.reflection_color, r.linear)
            .bind(3, r.underwater_depth, r.depth)
            .view(ViewSource::Camera)
            .draw(DrawSource::Layer(Layer::Water))
            .uniforms(with_params(constants, [0.0; 4])),
        lit_solids(
            "composite-walls",
            Target::Default,
            ViewSource::Camera,
            opaque
                .cull(CullMode::None)
                .depth(Some(CompareFunc::Less), false)
                .blend(BlendMode::Alpha),
        )
        .draw(DrawSource::Layer(Layer::Wall))
        .uniforms(with_params(constants, [FOG, 0.0, WALL_ALPHA, 0.0])),
        PassDescriptor::new("light-volume", p.light_volume)
            .target(Target::Default)
            .state(
                opaque
                    .cull(CullMode::None)
                    .depth(Some(CompareFunc::Less), false)
                    .polygon(PolygonMode::Line),
            )
            .view(ViewSource::Camera)
            .draw(DrawSource::Layer(Layer::LightVolume))
            .when(Condition::ShowLightVolume)
            .uniforms(with_params(constants, [0.0; 4])),
        PassDescriptor::new("debug-shadow-map", p.debug_depth)
            .viewport(debug_panel(0))
            .state(overlay)
            .bind(0, r.shadow_map, r.depth)
            .overlay()
            .when(Condition::ShowTextures)
            .uniforms(with_params(constants, [0.3, 1.0, 0.0, 0.0])),
        PassDescriptor::new("debug-caustics", p.debug_blit)
            .viewport(debug_panel(1))
            .state(overlay)
            .bind(0, r.caustics, r.linear)
            .overlay()
            .when(Condition::ShowTextures)
            .uniforms(with_params(constants, [2.0, 0.0, 0.0, 0.0])),
        PassDescriptor::new("debug-underwater", p.debug_blit)
            .viewport(debug_panel(2))
            .state(overlay)
            .bind(0, r.underwater_color, r.linear)
            .overlay()
            .when(Condition::ShowTextures)
            .uniforms(with_params(constants, [1.0, 0.0, 0.0, 0.0])),
        PassDescriptor::new("debug-heightmap", p.debug_blit)
            .viewport(debug_panel(3))
            .state(overlay)
            .bind(0, r.pong, r.nearest)
            .overlay()
            .when(Condition::ShowTextures)
            .uniforms(with_params(constants, [5.0, 0.5, 0.0, 0.0])),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::graph::{PassGraph, Phase, ReadKind, validate_order};

    struct Setup {
        table: ResourceTable,
        resources: Resources,
        passes: Vec<PassDescriptor>,
    }

    fn setup() -> Setup {
        let config = AppConfig::default();
        let mut backend = RecordingBackend::new();
        let mut table = ResourceTable::new(Extent::new(640, 480));
        let resources =
            Resources::declare(&mut table, &config, Extent::square(4), Extent::square(8)).unwrap();
        table.realize(&mut backend).unwrap();
        let programs = Programs::register(&mut backend).unwrap();
        let passes = canonical_passes(&resources, &programs, SceneConstants::from_config(&config));
        Setup {
            table,
            resources,
            passes,
        }
    }

    fn index(passes: &[PassDescriptor], name: &str) -> usize {
        passes.iter().position(|p| p.name == name).unwrap()
    }

    #[test]
    fn canonical_order_is_a_valid_schedule() {
        let s = setup();
        validate_order(&s.passes, &s.table).unwrap();
        PassGraph::build(s.passes, &s.table, true).unwrap();
    }

    #[test]
    fn canonical_sequence_keeps_its_numbering() {
        let s = setup();
        let names = s.passes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            &names[..12],
            &[
                "perturb",
                "diffuse",
                "shadow-map",
                "water-depth",
                "environment-map",
                "caustics",
                "underwater-scene",
                "sky",
                "sky-reflected",
                "reflection",
                "composite-solids",
                "composite-water",
            ]
        );
        assert!(
            s.passes[index(&s.passes, "debug-caustics")..]
                .iter()
                .all(|p| p.phase == Phase::Overlay)
        );
        assert_eq!(
            s.passes.iter().filter(|p| p.phase == Phase::Overlay).count(),
            4
        );
    }

    #[test]
    fn simulation_roles_are_fixed() {
        let s = setup();
        let r = s.resources;
        let perturb = &s.passes[0];
        let diffuse = &s.passes[1];
        assert_eq!(perturb.target, Target::Framebuffer(r.ping_fb));
        assert_eq!(perturb.bindings[0].texture, r.pong);
        assert_eq!(perturb.bindings[0].read, ReadKind::PreviousFrame);
        assert_eq!(diffuse.target, Target::Framebuffer(r.pong_fb));
        assert_eq!(diffuse.bindings[0].texture, r.ping);
        assert_eq!(diffuse.bindings[0].read, ReadKind::SameFrame);

        // Every later reader of the height field samples pong.
        for pass in &s.passes[2..] {
            assert!(pass.bindings.iter().all(|b| b.texture != r.ping), "{}", pass.name);
        }
    }

    #[test]
    fn debug_panels_show_simulation_and_lighting_stages() {
        let s = setup();
        let r = s.resources;
        let shown = s
            .passes
            .iter()
            .filter(|p| p.condition == Condition::ShowTextures)
            .map(|p| p.bindings[0].texture)
            .collect::<Vec<_>>();
        assert_eq!(
            shown,
            vec![r.shadow_map, r.caustics, r.underwater_color, r.pong]
        );
    }

    #[test]
    fn caustics_reads_environment_and_height_field() {
        let s = setup();
        let caustics = &s.passes[index(&s.passes, "caustics")];
        let read = caustics.bindings.iter().map(|b| b.texture).collect::<Vec<_>>();
        assert_eq!(read, vec![s.resources.environment, s.resources.pong]);
        assert_eq!(caustics.view, ViewSource::Light);
    }

    #[test]
    fn uniform_callbacks_carry_configuration() {
        let s = setup();
        let frame = FrameContext::default();
        let mut uniforms = PassUniforms::default();
        let underwater = &s.passes[index(&s.passes, "underwater-scene")];
        (underwater.uniforms.as_ref().unwrap())(&frame, &mut uniforms);
        assert_eq!(uniforms.water[0], 2.0);
        assert_eq!(uniforms.water[1], 10.0);
        assert_eq!(uniforms.light_direction[3], 72.0);
        assert_eq!(uniforms.params[0], FOG);
        assert_eq!(uniforms.simulation[2], 1.0 / 1024.0);
    }

    #[test]
    fn perturb_uploads_the_frame_impulse() {
        let s = setup();
        let frame = FrameContext {
            impulse: Some(crate::graph::Impulse {
                uv: glam::Vec2::new(0.25, 0.75),
                radius: 0.02,
                strength: 0.05,
            }),
            ..Default::default()
        };
        let mut uniforms = PassUniforms::default();
        (s.passes[0].uniforms.as_ref().unwrap())(&frame, &mut uniforms);
        assert_eq!(uniforms.impulse, [0.25, 0.75, 0.02, 0.05]);

        (s.passes[0].uniforms.as_ref().unwrap())(&FrameContext::default(), &mut uniforms);
        assert_eq!(uniforms.impulse, [0.0; 4]);
    }
}
