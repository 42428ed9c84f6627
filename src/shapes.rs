//! Parametric mesh generation: tessellated quads, cubes and UV spheres.
//!
//! Every generator validates its parameters before building anything and
//! returns [`RenderError::InvalidParameter`] for degenerate input, so a bad
//! scene description fails before the GPU is touched.
//!
//! All three produce the full tangent frame (normal, tangent, binormal) and
//! texture coordinates for each vertex, laid out as [`Vertex`].

use std::f32::consts::{PI, TAU};

use glam::Vec3;

use crate::error::RenderError;
use crate::mesh::{MeshData, Vertex};

/// A flat grid of `(res_w + 1) × (res_h + 1)` vertices on the XZ plane,
/// centred at the origin and facing +Y.
///
/// Vertex `(x, y)` sits at `(x·width/res_w − width/2, 0, height/2 − y·height/res_h)`
/// with texcoord `(x/res_w, y/res_h)`. The tangent is −X and the binormal +Z
/// everywhere. Each cell contributes two counter-clockwise triangles.
///
/// Both resolutions must be at least 1.
pub fn quad(width: f32, height: f32, res_w: u32, res_h: u32) -> Result<MeshData, RenderError> {
    if res_w == 0 || res_h == 0 {
        return Err(RenderError::InvalidParameter(format!(
            "quad resolution must be at least 1x1, got {res_w}x{res_h}"
        )));
    }
    if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
        return Err(RenderError::InvalidParameter(format!(
            "quad size must be positive, got {width}x{height}"
        )));
    }

    let step_x = width / res_w as f32;
    let step_y = height / res_h as f32;
    let half_width = width / 2.0;
    let half_height = height / 2.0;
    let too_fine = || {
        RenderError::InvalidParameter(format!(
            "quad resolution {res_w}x{res_h} exceeds 32-bit vertex indices"
        ))
    };
    let row = res_w.checked_add(1).ok_or_else(too_fine)?;
    let vertex_count = res_h
        .checked_add(1)
        .and_then(|rows| rows.checked_mul(row))
        .ok_or_else(too_fine)?;

    let mut vertices = Vec::with_capacity(vertex_count as usize);
    for y in 0..=res_h {
        for x in 0..=res_w {
            vertices.push(Vertex::new(
                Vec3::new(
                    x as f32 * step_x - half_width,
                    0.0,
                    half_height - y as f32 * step_y,
                ),
                Vec3::Y,
                Vec3::NEG_X,
                Vec3::Z,
                [x as f32 / res_w as f32, y as f32 / res_h as f32],
            ));
        }
    }

    let mut triangles = Vec::with_capacity(res_w as usize * res_h as usize * 2);
    for y in 0..res_h {
        for x in 0..res_w {
            let here = x + y * row;
            let below = x + (y + 1) * row;
            triangles.push([here, here + 1, below]);
            triangles.push([here + 1, below + 1, below]);
        }
    }

    MeshData::new(vertices, triangles)
}

/// Outward-facing normal, tangent and binormal for each cube face, in the
/// fixed face order front, back, left, right, top, bottom.
const CUBE_FACES: [(Vec3, Vec3, Vec3); 6] = [
    (Vec3::Z, Vec3::X, Vec3::Y),
    (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y),
    (Vec3::X, Vec3::NEG_Z, Vec3::Y),
    (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z),
];

/// Texcoords of a face's four corners, in vertex order.
const FACE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// An axis-aligned cube of edge `side` centred at the origin.
///
/// Faces do not share vertices: 4 per face, 24 in total, so each face keeps
/// its own constant outward normal and a full `[0,1]²` texcoord square.
/// Faces are emitted front (+Z), back (−Z), left (−X), right (+X), top (+Y),
/// bottom (−Y), each as two counter-clockwise triangles.
pub fn cube(side: f32) -> Result<MeshData, RenderError> {
    if !side.is_finite() || side <= 0.0 {
        return Err(RenderError::InvalidParameter(format!(
            "cube side must be positive, got {side}"
        )));
    }

    let o = side / 2.0;
    let mut vertices = Vec::with_capacity(24);
    let mut triangles = Vec::with_capacity(12);

    for (face, &(normal, tangent, binormal)) in CUBE_FACES.iter().enumerate() {
        // Corners walk the face counter-clockwise starting at the (u=0, v=0) corner.
        let origin = (normal - tangent - binormal) * o;
        for uv in FACE_UVS {
            let position = origin + tangent * (uv[0] * side) + binormal * (uv[1] * side);
            vertices.push(Vertex::new(position, normal, tangent, binormal, uv));
        }
        let base = face as u32 * 4;
        triangles.push([base, base + 1, base + 2]);
        triangles.push([base, base + 2, base + 3]);
    }

    MeshData::new(vertices, triangles)
}

/// A latitude/longitude sphere with Y as the polar axis.
///
/// `res_theta` samples cover a full turn around Y and `res_phi` samples run
/// from the south pole (phi = 0) to the north pole (phi = π). Vertices are
/// stored theta-major: vertex `(i, j)` has index `i·res_phi + j`. The first and
/// last theta columns coincide, as do all samples at a pole, so the seam and
/// pole triangles are degenerate.
///
/// Cells are split into `(i,j), (i,j+1), (i+1,j+1)` and `(i,j), (i+1,j+1), (i+1,j)`,
/// which winds clockwise when seen from outside. Use
/// [`MeshData::flip_winding`] for a sphere meant to be culled from outside.
///
/// Both resolutions must be at least 2.
pub fn sphere(res_theta: u32, res_phi: u32, radius: f32) -> Result<MeshData, RenderError> {
    if res_theta < 2 || res_phi < 2 {
        return Err(RenderError::InvalidParameter(format!(
            "sphere resolution must be at least 2x2, got {res_theta}x{res_phi}"
        )));
    }
    if !radius.is_finite() || radius <= 0.0 {
        return Err(RenderError::InvalidParameter(format!(
            "sphere radius must be positive, got {radius}"
        )));
    }

    let vertex_count = res_theta.checked_mul(res_phi).ok_or_else(|| {
        RenderError::InvalidParameter(format!(
            "sphere resolution {res_theta}x{res_phi} exceeds 32-bit vertex indices"
        ))
    })?;

    let d_theta = TAU / (res_theta - 1) as f32;
    let d_phi = PI / (res_phi - 1) as f32;

    let mut vertices = Vec::with_capacity(vertex_count as usize);
    for i in 0..res_theta {
        let (sin_theta, cos_theta) = (i as f32 * d_theta).sin_cos();
        for j in 0..res_phi {
            let (sin_phi, cos_phi) = (j as f32 * d_phi).sin_cos();

            let position = Vec3::new(
                radius * sin_theta * sin_phi,
                -radius * cos_phi,
                radius * cos_theta * sin_phi,
            );
            let tangent = Vec3::new(cos_theta, 0.0, -sin_theta).normalize();
            let binormal = Vec3::new(sin_theta * cos_phi, sin_phi, cos_theta * cos_phi).normalize();
            let normal = position.normalize();

            vertices.push(Vertex::new(
                position,
                normal,
                tangent,
                binormal,
                [
                    i as f32 / (res_theta - 1) as f32,
                    j as f32 / (res_phi - 1) as f32,
                ],
            ));
        }
    }

    let mut triangles = Vec::with_capacity(2 * (res_theta as usize - 1) * (res_phi as usize - 1));
    for i in 0..res_theta - 1 {
        for j in 0..res_phi - 1 {
            let here = res_phi * i + j;
            triangles.push([here, here + 1, here + 1 + res_phi]);
            triangles.push([here, here + res_phi + 1, here + res_phi]);
        }
    }

    MeshData::new(vertices, triangles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(mesh: &MeshData, index: usize) -> Vec3 {
        Vec3::from_array(mesh.vertices()[index].position)
    }

    fn normal(mesh: &MeshData, index: usize) -> Vec3 {
        Vec3::from_array(mesh.vertices()[index].normal)
    }

    fn geometric_normal(mesh: &MeshData, triangle: [u32; 3]) -> Vec3 {
        let [a, b, c] = triangle.map(|i| position(mesh, i as usize));
        (b - a).cross(c - a)
    }

    fn all_indices_in_range(mesh: &MeshData) -> bool {
        mesh.triangles()
            .iter()
            .flatten()
            .all(|&i| (i as usize) < mesh.vertex_count())
    }

    #[test]
    fn quad_counts_follow_resolution() {
        for (res_w, res_h) in [(1, 1), (2, 2), (3, 7), (16, 1), (10, 10)] {
            let mesh = quad(4.0, 3.0, res_w, res_h).unwrap();
            assert_eq!(mesh.vertex_count(), ((res_w + 1) * (res_h + 1)) as usize);
            assert_eq!(mesh.triangle_count(), (res_w * res_h * 2) as usize);
            assert!(all_indices_in_range(&mesh));
        }
    }

    #[test]
    fn quad_corner_and_frame() {
        let mesh = quad(20.0, 20.0, 2, 2).unwrap();
        assert_eq!(mesh.vertex_count(), 9);
        assert_eq!(mesh.triangle_count(), 8);
        assert_eq!(position(&mesh, 0), Vec3::new(-10.0, 0.0, 10.0));
        assert_eq!(position(&mesh, 8), Vec3::new(10.0, 0.0, -10.0));

        let corner = mesh.vertices()[0];
        assert_eq!(corner.normal, [0.0, 1.0, 0.0]);
        assert_eq!(corner.tangent, [-1.0, 0.0, 0.0]);
        assert_eq!(corner.binormal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices()[8].texcoord, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn quad_non_square_grid_uses_row_width() {
        let mesh = quad(4.0, 2.0, 4, 1).unwrap();
        // Second row starts right after the five vertices of the first.
        assert_eq!(position(&mesh, 5), Vec3::new(-2.0, 0.0, -1.0));
        assert_eq!(mesh.triangles()[0], [0, 1, 5]);
    }

    #[test]
    fn quad_triangles_face_up() {
        let mesh = quad(2.0, 2.0, 3, 2).unwrap();
        for &triangle in mesh.triangles() {
            assert!(geometric_normal(&mesh, triangle).y > 0.0);
        }
    }

    #[test]
    fn quad_rejects_zero_resolution() {
        assert!(matches!(
            quad(1.0, 1.0, 0, 4),
            Err(RenderError::InvalidParameter(_))
        ));
        assert!(matches!(
            quad(1.0, 1.0, 4, 0),
            Err(RenderError::InvalidParameter(_))
        ));
    }

    #[test]
    fn cube_front_face_starts_at_lower_left() {
        let mesh = cube(2.0).unwrap();
        assert_eq!(position(&mesh, 0), Vec3::new(-1.0, -1.0, 1.0));
        assert_eq!(normal(&mesh, 0), Vec3::Z);
    }

    #[test]
    fn cube_faces_have_constant_outward_normals() {
        for side in [0.5, 1.0, 2.0, 7.25] {
            let mesh = cube(side).unwrap();
            assert_eq!(mesh.vertex_count(), 24);
            assert_eq!(mesh.triangle_count(), 12);
            assert!(all_indices_in_range(&mesh));

            for face in 0..6 {
                let n = normal(&mesh, face * 4);
                for corner in 1..4 {
                    assert_eq!(normal(&mesh, face * 4 + corner), n);
                }
                // Every corner of a face lies on the plane the normal points at.
                for corner in 0..4 {
                    let p = position(&mesh, face * 4 + corner);
                    assert!((p.dot(n) - side / 2.0).abs() < 1e-5);
                }
            }
            // front/back, left/right, top/bottom
            for pair in [(0, 1), (2, 3), (4, 5)] {
                assert_eq!(normal(&mesh, pair.0 * 4), -normal(&mesh, pair.1 * 4));
            }
        }
    }

    #[test]
    fn cube_winding_matches_normals() {
        let mesh = cube(1.0).unwrap();
        for (t, &triangle) in mesh.triangles().iter().enumerate() {
            let face_normal = normal(&mesh, (t / 2) * 4);
            assert!(geometric_normal(&mesh, triangle).dot(face_normal) > 0.0);
        }
    }

    #[test]
    fn cube_tangent_frame_is_orthonormal() {
        let mesh = cube(3.0).unwrap();
        for v in mesh.vertices() {
            let (n, t, b) = (
                Vec3::from_array(v.normal),
                Vec3::from_array(v.tangent),
                Vec3::from_array(v.binormal),
            );
            assert!(n.dot(t).abs() < 1e-6 && n.dot(b).abs() < 1e-6 && t.dot(b).abs() < 1e-6);
        }
    }

    #[test]
    fn sphere_vertices_lie_on_radius() {
        for (res_theta, res_phi, radius) in [(2, 2, 1.0), (3, 5, 0.5), (16, 8, 2.0), (33, 17, 10.0)] {
            let mesh = sphere(res_theta, res_phi, radius).unwrap();
            assert_eq!(mesh.vertex_count(), (res_theta * res_phi) as usize);
            assert_eq!(
                mesh.triangle_count(),
                (2 * (res_theta - 1) * (res_phi - 1)) as usize
            );
            assert!(all_indices_in_range(&mesh));
            for v in mesh.vertices() {
                let p = Vec3::from_array(v.position);
                assert!((p.length() - radius).abs() < 1e-4 * radius.max(1.0));
                assert!((Vec3::from_array(v.normal).length() - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn sphere_poles_are_on_y_axis() {
        let mesh = sphere(8, 5, 2.0).unwrap();
        let south = position(&mesh, 0);
        let north = position(&mesh, 4);
        assert!((south - Vec3::new(0.0, -2.0, 0.0)).length() < 1e-5);
        assert!((north - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
        assert_eq!(mesh.vertices()[4].texcoord, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn sphere_index_pattern_uses_phi_stride() {
        let mesh = sphere(3, 4, 1.0).unwrap();
        assert_eq!(mesh.triangles()[0], [0, 1, 5]);
        assert_eq!(mesh.triangles()[1], [0, 5, 4]);
    }

    #[test]
    fn flipped_sphere_faces_outward() {
        let mesh = sphere(24, 12, 1.0).unwrap().flip_winding();
        for &triangle in mesh.triangles() {
            let n = geometric_normal(&mesh, triangle);
            if n.length() < 1e-6 {
                continue;
            }
            let centroid = triangle
                .iter()
                .map(|&i| position(&mesh, i as usize))
                .sum::<Vec3>()
                / 3.0;
            assert!(n.dot(centroid) > 0.0);
        }
    }

    #[test]
    fn resolutions_beyond_index_range_are_rejected() {
        for (res_w, res_h) in [(u32::MAX, 1), (1, u32::MAX), (70_000, 70_000)] {
            assert!(matches!(
                quad(1.0, 1.0, res_w, res_h),
                Err(RenderError::InvalidParameter(_))
            ));
        }
        for (res_theta, res_phi) in [(u32::MAX, 2), (70_000, 70_000)] {
            assert!(matches!(
                sphere(res_theta, res_phi, 1.0),
                Err(RenderError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn sphere_rejects_low_resolution() {
        for (res_theta, res_phi) in [(1, 4), (4, 1), (0, 0)] {
            assert!(matches!(
                sphere(res_theta, res_phi, 1.0),
                Err(RenderError::InvalidParameter(_))
            ));
        }
    }
}
