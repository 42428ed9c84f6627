//! Water height-field simulation.
//!
//! Each texel stores `(height, velocity)`. A frame runs two fixed steps over
//! two physical buffers:
//!
//! 1. **perturb**: writes [`PING`] from [`PONG`], adding this frame's impulse
//! 2. **diffuse**: writes [`PONG`] from [`PING`], propagating waves
//!
//! The roles never swap, so [`PONG`] always holds the current height field
//! for every other pass in the frame, and [`PING`] is scratch space. The GPU
//! programs `height_perturb.wgsl` and `height_diffuse.wgsl` implement the same
//! kernels as [`perturb`] and [`propagate`] here, which serve as the reference
//! for tests.

use glam::Vec2;

use crate::config::SimulationConfig;
use crate::graph::Impulse;

/// Logical name of the scratch buffer written by the perturbation step.
pub const PING: &str = "heightmap-ping";
/// Logical name of the buffer holding the current height field.
pub const PONG: &str = "heightmap-pong";

/// Source and destination of one simulation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepRoles {
    pub source: &'static str,
    pub destination: &'static str,
}

/// perturb reads the previous frame's field and writes the scratch buffer.
pub const PERTURB: StepRoles = StepRoles {
    source: PONG,
    destination: PING,
};

/// diffuse reads the scratch buffer and writes the current field.
pub const DIFFUSE: StepRoles = StepRoles {
    source: PING,
    destination: PONG,
};

/// Propagation constants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaveParams {
    /// Velocity multiplier per step, below 1 so waves die out.
    pub damping: f32,
    /// How strongly a texel is pulled towards its neighbours' mean.
    pub stiffness: f32,
}

impl From<&SimulationConfig> for WaveParams {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            damping: config.damping,
            stiffness: config.stiffness,
        }
    }
}

/// A square grid of `(height, velocity)` texels.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightField {
    size: u32,
    texels: Vec<[f32; 2]>,
}

impl HeightField {
    /// A flat, still field.
    pub fn new(size: u32) -> Self {
        Self {
            size,
            texels: vec![[0.0, 0.0]; (size * size) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn height(&self, x: u32, y: u32) -> f32 {
        self.texels[self.index(x, y)][0]
    }

    pub fn texel(&self, x: u32, y: u32) -> [f32; 2] {
        self.texels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, texel: [f32; 2]) {
        let index = self.index(x, y);
        self.texels[index] = texel;
    }

    pub fn is_flat(&self) -> bool {
        self.texels.iter().all(|&[h, v]| h == 0.0 && v == 0.0)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.size + x) as usize
    }

    /// Texel lookup with clamp-to-edge addressing.
    fn clamped(&self, x: i64, y: i64) -> [f32; 2] {
        let max = self.size as i64 - 1;
        self.texel(x.clamp(0, max) as u32, y.clamp(0, max) as u32)
    }

    /// Centre of texel `(x, y)` in texture coordinates.
    fn uv(&self, x: u32, y: u32) -> Vec2 {
        (Vec2::new(x as f32, y as f32) + 0.5) / self.size as f32
    }
}

/// Raised-cosine bump of an impulse at `uv`: full strength at the centre,
/// zero at and beyond the radius.
pub fn impulse_falloff(impulse: &Impulse, uv: Vec2) -> f32 {
    let d = uv.distance(impulse.uv) / impulse.radius.max(f32::EPSILON);
    if d >= 1.0 {
        return 0.0;
    }
    impulse.strength * 0.5 * ((std::f32::consts::PI * d).cos() + 1.0)
}

/// Copies `source` into `destination`, adding the impulse to the heights.
pub fn perturb(source: &HeightField, destination: &mut HeightField, impulse: Option<&Impulse>) {
    debug_assert_eq!(source.size, destination.size);
    for y in 0..source.size {
        for x in 0..source.size {
            let [mut h, v] = source.texel(x, y);
            if let Some(impulse) = impulse {
                h += impulse_falloff(impulse, source.uv(x, y));
            }
            destination.set(x, y, [h, v]);
        }
    }
}

/// One propagation step: each texel accelerates towards the mean of its four
/// neighbours, the velocity is damped, and the height integrates it.
pub fn propagate(source: &HeightField, destination: &mut HeightField, params: WaveParams) {
    debug_assert_eq!(source.size, destination.size);
    for y in 0..source.size {
        for x in 0..source.size {
            let (xi, yi) = (x as i64, y as i64);
            let average = (source.clamped(xi - 1, yi)[0]
                + source.clamped(xi + 1, yi)[0]
                + source.clamped(xi, yi - 1)[0]
                + source.clamped(xi, yi + 1)[0])
                * 0.25;
            let [h, mut v] = source.texel(x, y);
            v += (average - h) * params.stiffness;
            v *= params.damping;
            destination.set(x, y, [h + v, v]);
        }
    }
}

/// CPU mirror of the two-buffer simulation.
#[derive(Clone, Debug)]
pub struct PingPong {
    ping: HeightField,
    pong: HeightField,
    params: WaveParams,
}

impl PingPong {
    pub fn new(size: u32, params: WaveParams) -> Self {
        Self {
            ping: HeightField::new(size),
            pong: HeightField::new(size),
            params,
        }
    }

    /// Runs one frame: perturb into ping from pong, then diffuse into pong from ping.
    pub fn step(&mut self, impulse: Option<&Impulse>) {
        perturb(&self.pong, &mut self.ping, impulse);
        propagate(&self.ping, &mut self.pong, self.params);
    }

    /// The field every other pass samples.
    pub fn current(&self) -> &HeightField {
        &self.pong
    }

    pub fn scratch(&self) -> &HeightField {
        &self.ping
    }
}
