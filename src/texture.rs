//! CPU-side image data for the floor albedo and the sky cubemap.
//!
//! Images are decoded with the `image` crate into tightly packed RGBA8 layers
//! and handed to [`RenderBackend::write_texture`](crate::RenderBackend::write_texture)
//! one layer at a time. When an asset is missing, procedural stand-ins are
//! generated instead so the demo always has something to draw.

use std::path::Path;

use glam::Vec3;
use tracing::warn;

use crate::error::RenderError;

/// Cubemap faces in layer order.
pub const CUBE_FACES: [&str; 6] = ["px", "nx", "py", "ny", "pz", "nz"];

const FACE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One or more equally sized RGBA8 layers (1 for a 2D texture, 6 for a cubemap).
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Vec<u8>>,
}

impl ImageData {
    /// A single-layer image from raw RGBA8 pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RenderError> {
        if pixels.len() != (width * height * 4) as usize {
            return Err(RenderError::InvalidParameter(format!(
                "expected {} bytes for a {width}x{height} RGBA image, got {}",
                width * height * 4,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layers: vec![pixels],
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, RenderError> {
        let img = image::open(path)
            .map_err(|e| RenderError::creation(path.display().to_string(), e))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(width, height, img.into_raw())
    }

    /// Loads six face images named after [`CUBE_FACES`] from `dir`.
    pub fn cubemap_from_dir(dir: &Path) -> Result<Self, RenderError> {
        let mut faces: Vec<ImageData> = Vec::with_capacity(6);
        for face in CUBE_FACES {
            let path = FACE_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{face}.{ext}")))
                .find(|candidate| candidate.exists())
                .ok_or_else(|| {
                    RenderError::creation(
                        format!("cubemap face '{face}'"),
                        format!("no image found in {}", dir.display()),
                    )
                })?;
            faces.push(Self::from_file(&path)?);
        }
        Self::cubemap(faces)
    }

    /// Stacks six single-layer images into one cubemap.
    pub fn cubemap(faces: Vec<ImageData>) -> Result<Self, RenderError> {
        let Some(first) = faces.first() else {
            return Err(RenderError::InvalidParameter("cubemap has no faces".into()));
        };
        let (width, height) = (first.width, first.height);
        if faces.len() != 6 || width != height {
            return Err(RenderError::InvalidParameter(format!(
                "cubemap needs 6 square faces, got {} of {width}x{height}",
                faces.len()
            )));
        }
        if faces.iter().any(|f| f.width != width || f.height != height) {
            return Err(RenderError::InvalidParameter(
                "cubemap faces differ in size".into(),
            ));
        }
        Ok(Self {
            width,
            height,
            layers: faces.into_iter().flat_map(|f| f.layers).collect(),
        })
    }

    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    /// Bytes per row of one layer.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * 4
    }

    /// Sandy seabed albedo built from hashed value noise.
    pub fn sand(size: u32, seed: u32) -> Self {
        let palette: [[u8; 3]; 4] = [
            [194, 178, 128],
            [180, 163, 115],
            [206, 190, 140],
            [170, 152, 104],
        ];
        let mut data = vec![0u8; (size * size * 4) as usize];
        for y in 0..size {
            for x in 0..size {
                let idx = ((y * size + x) * 4) as usize;
                let base = palette[(hash(x, y, seed) % palette.len() as u32) as usize];
                let variation = (hash(x + 1000, y + 1000, seed) % 16) as i32 - 8;
                for channel in 0..3 {
                    data[idx + channel] = (base[channel] as i32 + variation).clamp(0, 255) as u8;
                }
                data[idx + 3] = 255;
            }
        }
        Self {
            width: size,
            height: size,
            layers: vec![data],
        }
    }

    /// 1×1 white texture bound for drawables without albedo.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            layers: vec![vec![255; 4]],
        }
    }

    /// Vertical gradient sky: `horizon` at the equator fading to `zenith`
    /// overhead, darker below the horizon.
    pub fn gradient_sky(size: u32, horizon: Vec3, zenith: Vec3) -> Self {
        let layers = (0..6)
            .map(|face| {
                let mut data = vec![0u8; (size * size * 4) as usize];
                for y in 0..size {
                    for x in 0..size {
                        let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                        let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                        let up = face_direction(face, u, v).normalize().y;
                        let color = if up >= 0.0 {
                            horizon.lerp(zenith, up.sqrt())
                        } else {
                            horizon * (1.0 + up * 0.6)
                        };
                        let idx = ((y * size + x) * 4) as usize;
                        data[idx] = (color.x.clamp(0.0, 1.0) * 255.0) as u8;
                        data[idx + 1] = (color.y.clamp(0.0, 1.0) * 255.0) as u8;
                        data[idx + 2] = (color.z.clamp(0.0, 1.0) * 255.0) as u8;
                        data[idx + 3] = 255;
                    }
                }
                data
            })
            .collect();
        Self {
            width: size,
            height: size,
            layers,
        }
    }
}

/// Loads the sky from `dir` if given, falling back to a gradient.
pub fn load_sky(dir: Option<&Path>, horizon: Vec3, zenith: Vec3) -> ImageData {
    if let Some(dir) = dir {
        match ImageData::cubemap_from_dir(dir) {
            Ok(sky) => return sky,
            Err(e) => warn!("Falling back to gradient sky: {e}"),
        }
    }
    ImageData::gradient_sky(64, horizon, zenith)
}

/// Loads the floor albedo from `path` if given, falling back to procedural sand.
pub fn load_albedo(path: Option<&Path>) -> ImageData {
    if let Some(path) = path {
        match ImageData::from_file(path) {
            Ok(image) => return image,
            Err(e) => warn!("Falling back to procedural sand: {e}"),
        }
    }
    ImageData::sand(256, 7)
}

/// Direction through texel `(u, v)` of cube layer `face`, both in `[-1, 1]`.
fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
}

fn hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_add(x.wrapping_mul(374761393));
    h = h.wrapping_add(y.wrapping_mul(668265263));
    h = (h ^ (h >> 13)).wrapping_mul(1274126177);
    h ^ (h >> 16)
}
