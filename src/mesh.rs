//! CPU-side mesh data, the packed vertex format, and node transforms.
//!
//! This module provides the geometry containers the rest of the crate passes around:
//!
//! - [`Vertex`]: The interleaved vertex format shared by every mesh program
//! - [`MeshData`]: Vertices plus triangle index triples, validated on construction
//! - [`Transform`]: Position, rotation, and scale for placing nodes in the scene
//!
//! Meshes are built once at scene setup (see [`crate::shapes`] and
//! [`crate::geometry`]) and handed to a [`RenderBackend`](crate::RenderBackend)
//! for upload. They are never mutated afterwards.
//!
//! # Vertex Layout
//!
//! Every attribute is three floats so the buffer can be described by a single
//! stride:
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | tangent   | Float32x3 | 24     | 2               |
//! | binormal  | Float32x3 | 36     | 3               |
//! | texcoord  | Float32x3 | 48     | 4               |
//!
//! The third texcoord component is always zero.

use glam::{Mat4, Quat, Vec3};

use crate::error::RenderError;

/// Named vertex attribute, used to query the packed layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexAttribute {
    Position,
    Normal,
    Tangent,
    Binormal,
    TexCoord,
}

/// A vertex carrying a full tangent frame and texture coordinates.
///
/// `#[repr(C)]` plus [`bytemuck::Pod`] lets a `&[Vertex]` be cast straight into
/// the bytes of a vertex buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub binormal: [f32; 3],
    pub texcoord: [f32; 3],
}

impl Vertex {
    /// Byte distance between consecutive vertices.
    pub const STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;

    /// Attribute order and byte offsets within one vertex.
    pub const ATTRIBUTES: [(VertexAttribute, u64); 5] = [
        (VertexAttribute::Position, 0),
        (VertexAttribute::Normal, 12),
        (VertexAttribute::Tangent, 24),
        (VertexAttribute::Binormal, 36),
        (VertexAttribute::TexCoord, 48),
    ];

    /// The wgpu vertex buffer layout matching [`Vertex::ATTRIBUTES`].
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: Self::STRIDE,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![
            0 => Float32x3,
            1 => Float32x3,
            2 => Float32x3,
            3 => Float32x3,
            4 => Float32x3,
        ],
    };

    pub fn new(
        position: Vec3,
        normal: Vec3,
        tangent: Vec3,
        binormal: Vec3,
        texcoord: [f32; 2],
    ) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tangent: tangent.to_array(),
            binormal: binormal.to_array(),
            texcoord: [texcoord[0], texcoord[1], 0.0],
        }
    }

    /// Byte offset of `attribute` inside a vertex.
    pub fn offset_of(attribute: VertexAttribute) -> u64 {
        Self::ATTRIBUTES
            .iter()
            .find(|(a, _)| *a == attribute)
            .map(|(_, offset)| *offset)
            .unwrap_or(0)
    }
}

/// Immutable triangle mesh ready for upload.
///
/// Invariants, checked by [`MeshData::new`]:
/// - every index is smaller than the vertex count
/// - indices come in triples (stored as `[u32; 3]`), with counter-clockwise
///   winding for front faces
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    vertices: Vec<Vertex>,
    triangles: Vec<[u32; 3]>,
}

impl MeshData {
    /// Builds a mesh, rejecting any triangle that references a missing vertex.
    pub fn new(vertices: Vec<Vertex>, triangles: Vec<[u32; 3]>) -> Result<Self, RenderError> {
        let vertex_count = vertices.len() as u64;
        if let Some(bad) = triangles
            .iter()
            .flatten()
            .find(|&&index| u64::from(index) >= vertex_count)
        {
            return Err(RenderError::InvalidParameter(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }
        Ok(Self {
            vertices,
            triangles,
        })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Number of entries in the flattened index buffer (always a multiple of 3).
    pub fn index_count(&self) -> u32 {
        (self.triangles.len() * 3) as u32
    }

    /// Reverses every triangle so front and back faces swap.
    pub fn flip_winding(mut self) -> Self {
        for triangle in &mut self.triangles {
            triangle.swap(1, 2);
        }
        self
    }

    /// Vertex buffer contents.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index buffer contents as tightly packed `u32` triples.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }
}

/// A 3D transformation representing position, rotation, and scale.
///
/// Converted into a matrix in Scale → Rotate → Translate order.
///
/// ```
/// use caustica::{Transform, Vec3};
///
/// let transform = Transform::from_position(Vec3::new(0.0, -3.0, 0.0)).uniform_scale(2.0);
/// assert_eq!(transform.scale, Vec3::splat(2.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_at(x: f32) -> Vertex {
        Vertex::new(Vec3::new(x, 0.0, 0.0), Vec3::Y, Vec3::X, Vec3::Z, [0.0, 0.0])
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(Vertex::STRIDE, 60);
        assert_eq!(Vertex::offset_of(VertexAttribute::TexCoord), 48);
        assert_eq!(Vertex::LAYOUT.attributes.len(), 5);
        assert_eq!(Vertex::LAYOUT.attributes[3].offset, 36);
    }

    #[test]
    fn mesh_rejects_out_of_range_index() {
        let vertices = vec![vertex_at(0.0), vertex_at(1.0), vertex_at(2.0)];
        assert!(MeshData::new(vertices.clone(), vec![[0, 1, 2]]).is_ok());
        let err = MeshData::new(vertices, vec![[0, 1, 3]]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidParameter(_)));
    }

    #[test]
    fn index_bytes_are_packed_triples() {
        let vertices = vec![vertex_at(0.0), vertex_at(1.0), vertex_at(2.0)];
        let mesh = MeshData::new(vertices, vec![[0, 1, 2], [2, 1, 0]]).unwrap();
        assert_eq!(mesh.index_count(), 6);
        assert_eq!(mesh.index_bytes().len(), 6 * 4);
        assert_eq!(mesh.vertex_bytes().len(), 3 * 60);
    }

    #[test]
    fn transform_applies_scale_before_translation() {
        let m = Transform::from_position(Vec3::new(0.0, 2.0, 0.0))
            .uniform_scale(3.0)
            .matrix();
        let p = m.transform_point3(Vec3::X);
        assert!((p - Vec3::new(3.0, 2.0, 0.0)).length() < 1e-6);
    }
}
