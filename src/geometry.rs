//! Model loading for scene geometry that is not generated parametrically.
//!
//! Models are read into [`MeshData`] with the same attribute contract as
//! [`crate::shapes`] output, so the pass graph never knows where a mesh came
//! from.
//!
//! ```no_run
//! use caustica::ModelLoader;
//!
//! let floor = ModelLoader::from_file("assets/floor.stl")
//!     .upright()
//!     .centered()
//!     .scaled(20.0)
//!     .load()
//!     .unwrap();
//! ```
//!
//! # Supported Formats
//!
//! | Format | Extensions | Notes |
//! |--------|------------|-------|
//! | STL    | `.stl`     | Binary and ASCII; texcoords are projected from XZ |

use std::path::{Path, PathBuf};

use glam::{Quat, Vec3};
use thiserror::Error;

use crate::error::RenderError;
use crate::mesh::{MeshData, Vertex};

/// Errors that can occur when loading a model.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown geometry format: '{0}'")]
    UnknownFormat(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Mesh(#[from] RenderError),
}

/// Unindexed triangle soup with per-face normals, before conversion to
/// [`MeshData`].
#[derive(Clone, Debug, Default)]
pub struct RawGeometry {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

impl RawGeometry {
    /// Returns `(min, max)` corners of the bounding box.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.positions.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(min, max), &p| (min.min(p), max.max(p)),
        )
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.bounds();
        (min + max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        let (min, max) = self.bounds();
        max - min
    }

    pub fn translate(&mut self, offset: Vec3) {
        for p in &mut self.positions {
            *p += offset;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for p in &mut self.positions {
            *p *= factor;
        }
    }

    pub fn rotate(&mut self, rotation: Quat) {
        for p in &mut self.positions {
            *p = rotation * *p;
        }
        for n in &mut self.normals {
            *n = rotation * *n;
        }
    }

    pub fn recenter(&mut self) {
        let center = self.center();
        self.translate(-center);
    }

    /// Scales the geometry to fit within a unit cube.
    pub fn normalize(&mut self) {
        let max_dim = self.size().max_element();
        if max_dim > 0.0 {
            self.scale(1.0 / max_dim);
        }
    }

    /// Builds the vertex tangent frames and texcoords.
    ///
    /// Texcoords are the XZ position mapped over the bounding box, which suits
    /// the mostly flat floor and ground models this is used for.
    pub fn into_mesh(self) -> Result<MeshData, RenderError> {
        let (min, max) = self.bounds();
        let extent = (max - min).max(Vec3::splat(f32::EPSILON));

        let vertices = self
            .positions
            .iter()
            .zip(&self.normals)
            .map(|(&position, &normal)| {
                let normal = normal.normalize_or(Vec3::Y);
                let (tangent, binormal) = tangent_frame(normal);
                let uv = (position - min) / extent;
                Vertex::new(position, normal, tangent, binormal, [uv.x, uv.z])
            })
            .collect::<Vec<_>>();

        let triangles = (0..vertices.len() as u32 / 3)
            .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
            .collect();

        MeshData::new(vertices, triangles)
    }
}

/// Picks a tangent and binormal completing `normal` to a right-handed frame.
fn tangent_frame(normal: Vec3) -> (Vec3, Vec3) {
    let reference = if normal.x.abs() < 0.9 { Vec3::X } else { Vec3::Z };
    let binormal = normal.cross(reference).normalize();
    let tangent = binormal.cross(normal);
    (tangent, binormal)
}

/// A fluent builder for loading and transforming a model.
pub struct ModelLoader {
    source: Source,
    center: bool,
    normalize: bool,
    scale_factor: Option<f32>,
    rotation: Option<Quat>,
}

enum Source {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl ModelLoader {
    /// Loads from a file, detecting the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self::with_source(Source::File(path.as_ref().to_path_buf()))
    }

    /// Parses STL data already in memory.
    pub fn from_stl_bytes(bytes: &[u8]) -> Self {
        Self::with_source(Source::Bytes(bytes.to_vec()))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            center: false,
            normalize: false,
            scale_factor: None,
            rotation: None,
        }
    }

    pub fn centered(mut self) -> Self {
        self.center = true;
        self
    }

    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    pub fn scaled(mut self, factor: f32) -> Self {
        self.scale_factor = Some(factor);
        self
    }

    /// Reorients the geometry from Z-up to Y-up.
    pub fn upright(mut self) -> Self {
        self.rotation = Some(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2));
        self
    }

    pub fn load(self) -> Result<MeshData, GeometryError> {
        let mut geometry = match &self.source {
            Source::File(path) => load_file(path)?,
            Source::Bytes(bytes) => parse_stl(&mut std::io::Cursor::new(bytes))?,
        };

        if self.center {
            geometry.recenter();
        }
        if let Some(rotation) = self.rotation {
            geometry.rotate(rotation);
        }
        if self.normalize {
            geometry.normalize();
        }
        if let Some(scale) = self.scale_factor {
            geometry.scale(scale);
        }

        Ok(geometry.into_mesh()?)
    }
}

fn load_file(path: &Path) -> Result<RawGeometry, GeometryError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "stl" => {
            let file = std::fs::File::open(path)?;
            parse_stl(&mut std::io::BufReader::new(file))
        }
        _ => Err(GeometryError::UnknownFormat(ext)),
    }
}

fn parse_stl<R: std::io::Read + std::io::Seek>(
    reader: &mut R,
) -> Result<RawGeometry, GeometryError> {
    let stl = stl_io::read_stl(reader)
        .map_err(|e| GeometryError::Parse(format!("STL parse error: {e}")))?;

    let mut geometry = RawGeometry {
        positions: Vec::with_capacity(stl.faces.len() * 3),
        normals: Vec::with_capacity(stl.faces.len() * 3),
    };

    for face in &stl.faces {
        let normal = Vec3::from_array(face.normal.into());
        for &vertex_idx in &face.vertices {
            let vertex = stl.vertices.get(vertex_idx).ok_or_else(|| {
                GeometryError::Parse(format!("face references missing vertex {vertex_idx}"))
            })?;
            geometry.positions.push(Vec3::from_array((*vertex).into()));
            geometry.normals.push(normal);
        }
    }

    Ok(geometry)
}
