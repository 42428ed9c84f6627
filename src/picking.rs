//! Mouse picking against the water surface.
//!
//! A click is turned into a world-space [`Ray`] through the camera, which is
//! intersected with the horizontal water plane. The hit point is then mapped
//! into height-field texture coordinates so it can drive the perturbation pass.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// A ray in 3D space with an origin and a normalized direction.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// The direction is normalized automatically.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Creates a ray through pixel `screen` of a `screen_size` viewport.
    ///
    /// Pixel coordinates start at the top-left corner; the projection is
    /// expected to map depth to `[0, 1]`.
    pub fn from_screen(screen: Vec2, screen_size: Vec2, view_matrix: Mat4, projection_matrix: Mat4) -> Self {
        let ndc_x = (2.0 * screen.x / screen_size.x) - 1.0;
        let ndc_y = 1.0 - (2.0 * screen.y / screen_size.y);

        let inv_view_proj = (projection_matrix * view_matrix).inverse();
        let near_world = inv_view_proj * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
        let far_world = inv_view_proj * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);

        let near_point = near_world.truncate() / near_world.w;
        let far_point = far_world.truncate() / far_world.w;

        Self::new(near_point, far_point - near_point)
    }

    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Distance along the ray to the plane `y = height`, if it is ahead of the origin.
    pub fn intersect_horizontal_plane(&self, height: f32) -> Option<f32> {
        if self.direction.y.abs() < f32::EPSILON {
            return None;
        }
        let t = (height - self.origin.y) / self.direction.y;
        (t >= 0.0).then_some(t)
    }
}

/// The square water surface: centred on the origin at `height`, `size` metres wide.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaterPlane {
    pub height: f32,
    pub size: f32,
}

impl WaterPlane {
    /// Height-field texture coordinate of the point where `ray` hits the water.
    ///
    /// Matches the water quad's texcoords: u grows with +X, v grows with −Z.
    pub fn pick(&self, ray: &Ray) -> Option<Vec2> {
        let t = ray.intersect_horizontal_plane(self.height)?;
        let hit = ray.point_at(t);
        let half = self.size / 2.0;
        let uv = Vec2::new((hit.x + half) / self.size, (half - hit.z) / self.size);
        (uv.cmpge(Vec2::ZERO).all() && uv.cmple(Vec2::ONE).all()).then_some(uv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATER: WaterPlane = WaterPlane {
        height: 2.0,
        size: 20.0,
    };

    #[test]
    fn ray_straight_down_hits_centre() {
        let ray = Ray::new(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y);
        assert_eq!(ray.intersect_horizontal_plane(2.0), Some(3.0));
        assert_eq!(WATER.pick(&ray), Some(Vec2::splat(0.5)));
    }

    #[test]
    fn uv_follows_quad_orientation() {
        let ray = Ray::new(Vec3::new(-10.0, 5.0, 10.0), Vec3::NEG_Y);
        assert_eq!(WATER.pick(&ray), Some(Vec2::ZERO));
        let ray = Ray::new(Vec3::new(5.0, 5.0, -5.0), Vec3::NEG_Y);
        assert_eq!(WATER.pick(&ray), Some(Vec2::new(0.75, 0.75)));
    }

    #[test]
    fn misses_are_none() {
        let away = Ray::new(Vec3::new(0.0, 5.0, 0.0), Vec3::Y);
        assert_eq!(WATER.pick(&away), None);
        let outside = Ray::new(Vec3::new(50.0, 5.0, 0.0), Vec3::NEG_Y);
        assert_eq!(WATER.pick(&outside), None);
        let parallel = Ray::new(Vec3::new(0.0, 5.0, 0.0), Vec3::X);
        assert_eq!(WATER.pick(&parallel), None);
    }

    #[test]
    fn screen_centre_ray_follows_view_direction() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, 0.0, -0.001), Vec3::Z);
        let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let ray = Ray::from_screen(Vec2::splat(50.0), Vec2::splat(100.0), view, projection);
        assert!(ray.direction.dot(Vec3::NEG_Y) > 0.999);
        let uv = WATER.pick(&ray).unwrap();
        assert!((uv - Vec2::splat(0.5)).length() < 1e-3);
    }
}
