//! Scene nodes: meshes placed in the world and sorted into render layers.
//!
//! Nodes are entities in a `hecs` world carrying a [`Transform`], a
//! [`Drawable`] and a [`Layer`]. They are spawned during setup and only read
//! while rendering; passes select the nodes they draw by layer.

use glam::{Mat4, Quat, Vec3};
use hecs::{Entity, World};
use tracing::info;

use crate::backend::{MeshId, RenderBackend};
use crate::camera::Light;
use crate::config::AppConfig;
use crate::error::RenderError;
use crate::geometry::ModelLoader;
use crate::mesh::Transform;
use crate::resources::TextureId;
use crate::shapes;

/// Which group of passes draws a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Opaque scene geometry: lit, shadowed, reflected.
    Solid,
    /// The water surface.
    Water,
    /// The inverted sky box.
    Sky,
    /// Glass walls around the water volume.
    Wall,
    /// The light frustum, drawn as a wireframe.
    LightVolume,
}

/// A mesh with optional albedo texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Drawable {
    pub mesh: MeshId,
    pub albedo: Option<TextureId>,
}

#[derive(Default)]
pub struct Scene {
    world: World,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, layer: Layer, drawable: Drawable, transform: Transform) -> Entity {
        self.world.spawn((layer, drawable, transform))
    }

    /// Model matrix and drawable of every node in `layer`.
    pub fn layer(&self, layer: Layer) -> impl Iterator<Item = (Mat4, Drawable)> + '_ {
        self.world
            .iter()
            .filter_map(move |entity| {
                let node_layer = entity.get::<&Layer>()?;
                if *node_layer != layer {
                    return None;
                }
                let drawable = *entity.get::<&Drawable>()?;
                let model = entity.get::<&Transform>()?.matrix();
                Some((model, drawable))
            })
    }

    pub fn count(&self, layer: Layer) -> usize {
        self.layer(layer).count()
    }
}

/// Textures the scene assigns to its nodes.
#[derive(Clone, Copy, Debug)]
pub struct SceneTextures {
    pub floor_albedo: TextureId,
}

/// Builds the demo scene: floor, ball, water surface, basin walls, sky box and
/// light volume, uploading every mesh to `backend`.
pub fn populate(
    scene: &mut Scene,
    backend: &mut impl RenderBackend,
    config: &AppConfig,
    light: &Light,
    textures: SceneTextures,
) -> Result<(), RenderError> {
    let water = &config.water;

    let floor = match &config.assets.floor_model {
        Some(path) => ModelLoader::from_file(path)
            .upright()
            .centered()
            .load()
            .map_err(|e| RenderError::creation(path.display().to_string(), e))?,
        None => shapes::quad(water.size, water.size, 1, 1)?,
    };
    let ball = match &config.assets.ball_model {
        Some(path) => ModelLoader::from_file(path)
            .upright()
            .centered()
            .normalized()
            .load()
            .map_err(|e| RenderError::creation(path.display().to_string(), e))?,
        None => shapes::sphere(48, 24, 0.5)?.flip_winding(),
    };

    let floor_mesh = backend.upload_mesh("floor", &floor)?;
    let ball_mesh = backend.upload_mesh("ball", &ball)?;
    scene.spawn(
        Layer::Solid,
        Drawable {
            mesh: floor_mesh,
            albedo: Some(textures.floor_albedo),
        },
        Transform::from_position(Vec3::new(0.0, -3.0, 0.0)),
    );
    scene.spawn(
        Layer::Solid,
        Drawable {
            mesh: ball_mesh,
            albedo: None,
        },
        Transform::from_position(Vec3::new(0.0, -1.0, 0.0)),
    );

    let surface = shapes::quad(water.size, water.size, water.resolution, water.resolution)?;
    let surface_mesh = backend.upload_mesh("water", &surface)?;
    scene.spawn(
        Layer::Water,
        Drawable {
            mesh: surface_mesh,
            albedo: None,
        },
        Transform::from_position(Vec3::new(0.0, water.sea_level, 0.0)),
    );

    spawn_walls(scene, backend, config)?;

    let cube = shapes::cube(2.0)?;
    let sky_mesh = backend.upload_mesh("sky", &cube)?;
    scene.spawn(
        Layer::Sky,
        Drawable {
            mesh: sky_mesh,
            albedo: None,
        },
        Transform::new(),
    );

    let unit_cube = shapes::cube(1.0)?;
    let volume_mesh = backend.upload_mesh("light-volume", &unit_cube)?;
    let (scale, rotation, position) = light.volume_transform().to_scale_rotation_translation();
    scene.spawn(
        Layer::LightVolume,
        Drawable {
            mesh: volume_mesh,
            albedo: None,
        },
        Transform {
            position,
            rotation,
            scale,
        },
    );

    info!(
        solids = scene.count(Layer::Solid),
        walls = scene.count(Layer::Wall),
        "Scene populated"
    );
    Ok(())
}

/// Four vertical quads enclosing the water column from sea level down to the basin floor.
fn spawn_walls(
    scene: &mut Scene,
    backend: &mut impl RenderBackend,
    config: &AppConfig,
) -> Result<(), RenderError> {
    let water = &config.water;
    let half = water.size / 2.0;
    let wall = shapes::quad(water.size, water.depth, 8, 4)?;
    let mesh = backend.upload_mesh("wall", &wall)?;
    let centre_y = water.sea_level - water.depth / 2.0;

    // Each quad starts facing +Y; tip it up to face outwards on its side.
    let sides = [
        (Vec3::new(0.0, centre_y, half), Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
        (
            Vec3::new(0.0, centre_y, -half),
            Quat::from_rotation_y(std::f32::consts::PI) * Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ),
        (
            Vec3::new(half, centre_y, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2) * Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ),
        (
            Vec3::new(-half, centre_y, 0.0),
            Quat::from_rotation_y(-std::f32::consts::FRAC_PI_2) * Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ),
    ];
    for (position, rotation) in sides {
        scene.spawn(
            Layer::Wall,
            Drawable { mesh, albedo: None },
            Transform::from_position(position).rotation(rotation),
        );
    }
    Ok(())
}
