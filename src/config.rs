//! Runtime configuration, loaded from an optional RON file.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```ron
//! (
//!     resolution: (heightmap: 512),
//!     watch_shaders: true,
//! )
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub resolution: ResolutionConfig,
    pub water: WaterConfig,
    pub simulation: SimulationConfig,
    pub light: LightConfig,
    pub camera: CameraConfig,
    pub colors: ColorConfig,
    pub waves: Vec<WaveConfig>,
    pub assets: AssetConfig,
    /// Directory the WGSL programs are read from on reload.
    pub shader_dir: PathBuf,
    /// Poll shader files for changes and reload them automatically.
    pub watch_shaders: bool,
    /// Check the pass list's read/write order at startup.
    pub validate_passes: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            resolution: ResolutionConfig::default(),
            water: WaterConfig::default(),
            simulation: SimulationConfig::default(),
            light: LightConfig::default(),
            camera: CameraConfig::default(),
            colors: ColorConfig::default(),
            waves: vec![
                WaveConfig {
                    amplitude: 0.2,
                    frequency: 40.0,
                    phase: 0.5,
                    sharpness: 2.0,
                    direction: [-1.0, 0.0],
                },
                WaveConfig {
                    amplitude: 0.1,
                    frequency: 80.0,
                    phase: 1.3,
                    sharpness: 2.0,
                    direction: [-0.7, 0.7],
                },
            ],
            assets: AssetConfig::default(),
            shader_dir: PathBuf::from("src/shaders"),
            watch_shaders: false,
            validate_passes: true,
        }
    }
}

impl AppConfig {
    /// Parses a RON document, filling missing fields with defaults.
    pub fn from_ron(source: &str) -> Result<Self> {
        let ron =
            ron::Options::default().with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME);
        let config = ron.from_str::<AppConfig>(source)?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!("No config file given, using defaults");
            return Ok(Self::default());
        };
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config = Self::from_ron(&source)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        info!("Loaded config from '{}'", path.display());
        Ok(config)
    }

    /// Only the first two waves reach the shaders.
    pub fn wave_pair(&self) -> [WaveConfig; 2] {
        let mut pair = [WaveConfig::flat(), WaveConfig::flat()];
        for (slot, wave) in pair.iter_mut().zip(&self.waves) {
            *slot = *wave;
        }
        pair
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Caustics".to_string(),
            width: 1600,
            height: 900,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Square size of the shadow, water-depth, environment and caustic maps.
    pub light: u32,
    /// Square size of both height-field textures.
    pub heightmap: u32,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            light: 2048,
            heightmap: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterConfig {
    /// Edge length of the square water surface, in metres.
    pub size: f32,
    /// Grid cells per side of the water quad.
    pub resolution: u32,
    /// Height of the water plane (metres above mean sea level).
    pub sea_level: f32,
    /// Depth of the basin walls below sea level.
    pub depth: f32,
}

impl Default for WaterConfig {
    fn default() -> Self {
        Self {
            size: 20.0,
            resolution: 256,
            sea_level: 2.0,
            depth: 5.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub damping: f32,
    pub stiffness: f32,
    /// Radius of a click impulse, in height-field UV units.
    pub impulse_radius: f32,
    pub impulse_strength: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            damping: 0.995,
            stiffness: 2.0,
            impulse_radius: 0.02,
            impulse_strength: 0.05,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    /// Half width of the orthographic light frustum.
    pub half_width: f32,
    /// Half depth of the orthographic light frustum.
    pub half_depth: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            direction: [0.0, -1.0, 0.0],
            color: [1.0, 1.0, 1.0],
            intensity: 72.0,
            half_width: 10.0,
            half_depth: 7.0,
        }
    }
}

impl LightConfig {
    pub fn direction(&self) -> Vec3 {
        Vec3::from_array(self.direction).normalize_or(Vec3::NEG_Y)
    }

    pub fn color(&self) -> Vec3 {
        Vec3::from_array(self.color)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Metres per second.
    pub speed: f32,
    /// Radians per pixel of mouse drag.
    pub sensitivity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 1.0, 1.8],
            fov_y: std::f32::consts::FRAC_PI_4,
            near: 0.01,
            far: 60.0,
            speed: 3.0,
            sensitivity: 0.003,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub underwater: [f32; 3],
    pub atmosphere: [f32; 3],
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            underwater: [0.4, 0.9, 1.0],
            atmosphere: [0.529, 0.808, 0.922],
        }
    }
}

/// One directional wave layered over the simulated height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveConfig {
    pub amplitude: f32,
    pub frequency: f32,
    pub phase: f32,
    pub sharpness: f32,
    pub direction: [f32; 2],
}

impl WaveConfig {
    pub fn flat() -> Self {
        Self {
            amplitude: 0.0,
            frequency: 0.0,
            phase: 0.0,
            sharpness: 1.0,
            direction: [1.0, 0.0],
        }
    }

    pub fn direction(&self) -> Vec2 {
        Vec2::from_array(self.direction).normalize_or(Vec2::X)
    }
}

/// Optional asset files. Missing entries fall back to parametric shapes and
/// procedural textures.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub floor_model: Option<PathBuf>,
    pub ball_model: Option<PathBuf>,
    pub floor_texture: Option<PathBuf>,
    /// Directory holding `px`, `nx`, `py`, `ny`, `pz` and `nz` face images.
    pub skybox_dir: Option<PathBuf>,
}
