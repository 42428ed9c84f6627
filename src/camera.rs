//! The first-person viewer camera, the directional sun, and the mirrored
//! camera used for water reflections.

use glam::{Mat4, Vec3};

use crate::config::{CameraConfig, LightConfig};
use crate::graph::ViewMatrices;
use crate::input::FrameInput;

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// A free-flying first-person camera.
///
/// Yaw is measured from -Z towards +X, pitch upwards from the horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct FpsCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Metres per second.
    pub speed: f32,
    /// Radians per pixel.
    pub sensitivity: f32,
}

impl Default for FpsCamera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

impl FpsCamera {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            position: Vec3::from_array(config.position),
            yaw: 0.0,
            pitch: 0.0,
            fov_y: config.fov_y,
            near: config.near,
            far: config.far,
            speed: config.speed,
            sensitivity: config.sensitivity,
        }
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
        .normalize_or_zero()
    }

    pub fn right(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), 0.0, self.yaw.sin()).normalize_or_zero()
    }

    /// Applies mouse look, scroll-wheel speed changes and WASD/QE movement.
    pub fn update(&mut self, input: &FrameInput) {
        self.yaw += input.look.x * self.sensitivity;
        self.pitch = (self.pitch - input.look.y * self.sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);

        if input.scroll != 0.0 {
            self.speed = (self.speed * 1.1f32.powf(input.scroll)).clamp(0.1, 100.0);
        }

        let velocity = self.right() * input.movement.x
            + Vec3::Y * input.movement.y
            + self.forward() * input.movement.z;
        if velocity.length_squared() > 0.0 {
            self.position += velocity.normalize() * self.speed * input.dt;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    pub fn matrices(&self, aspect: f32) -> ViewMatrices {
        ViewMatrices {
            view: self.view_matrix(),
            projection: self.projection_matrix(aspect),
            position: self.position,
        }
    }
}

/// Reflection about the horizontal plane `y = height`.
pub fn mirror_matrix(height: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, height, 0.0))
        * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        * Mat4::from_translation(Vec3::new(0.0, -height, 0.0))
}

/// `view` as seen from its mirror image below (or above) the water plane.
///
/// The mirror flips handedness, so front faces wind clockwise in this view.
pub fn mirrored(view: &ViewMatrices, height: f32) -> ViewMatrices {
    let mirror = mirror_matrix(height);
    ViewMatrices {
        view: view.view * mirror,
        projection: view.projection,
        position: mirror.transform_point3(view.position),
    }
}

/// A directional light with an orthographic shadow frustum centred on the origin.
#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    /// Direction the light travels in.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub half_width: f32,
    pub half_depth: f32,
}

impl Light {
    pub fn from_config(config: &LightConfig) -> Self {
        Self {
            direction: config.direction(),
            color: config.color(),
            intensity: config.intensity,
            half_width: config.half_width,
            half_depth: config.half_depth,
        }
    }

    /// World transform of the light: placed at `-direction`, looking at the origin.
    pub fn world_matrix(&self) -> Mat4 {
        let eye = -self.direction;
        // A light pointing straight down would make Y a degenerate up vector.
        let up = if eye.normalize().dot(Vec3::Y) > 0.99 {
            Vec3::new(0.0, 1.0, 1.0).normalize()
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(eye, Vec3::ZERO, up).inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::orthographic_rh(
            -self.half_width,
            self.half_width,
            -self.half_width,
            self.half_width,
            -self.half_depth,
            self.half_depth,
        )
    }

    pub fn matrices(&self) -> ViewMatrices {
        let world = self.world_matrix();
        ViewMatrices {
            view: world.inverse(),
            projection: self.projection_matrix(),
            position: world.transform_point3(Vec3::ZERO),
        }
    }

    /// Transform taking a unit cube onto the light's frustum box.
    pub fn volume_transform(&self) -> Mat4 {
        self.world_matrix()
            * Mat4::from_scale(Vec3::new(
                2.0 * self.half_width,
                2.0 * self.half_width,
                2.0 * self.half_depth,
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn camera_moves_along_forward() {
        let mut camera = FpsCamera::default();
        let start = camera.position;
        camera.update(&FrameInput {
            dt: 1.0,
            movement: Vec3::Z,
            ..Default::default()
        });
        assert!(approx(camera.position, start + Vec3::new(0.0, 0.0, -3.0)));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = FpsCamera::default();
        camera.update(&FrameInput {
            look: glam::Vec2::new(0.0, -1.0e6),
            ..Default::default()
        });
        assert!(camera.pitch <= PITCH_LIMIT);
        assert!(camera.forward().y > 0.99);
    }

    #[test]
    fn mirror_reflects_about_sea_level() {
        let mirror = mirror_matrix(2.0);
        assert!(approx(mirror.transform_point3(Vec3::new(1.0, 3.0, -1.0)), Vec3::new(1.0, 1.0, -1.0)));

        let camera = FpsCamera::default().matrices(1.0);
        let reflected = mirrored(&camera, 2.0);
        assert!(approx(reflected.position, Vec3::new(0.0, 3.0, 1.8)));
        // A point on the water plane lands on the same pixel in both views.
        let p = Vec3::new(0.5, 2.0, -3.0);
        let a = camera.view_projection().project_point3(p);
        let b = reflected.view_projection().project_point3(p);
        assert!(approx(a, b));
    }

    #[test]
    fn vertical_light_uses_safe_up() {
        let light = Light::from_config(&LightConfig::default());
        let matrices = light.matrices();
        assert!(matrices.view.is_finite());
        assert!(approx(matrices.position, Vec3::Y));
        // The origin is one unit in front of the light, inside its ±7 m depth range.
        let centre = matrices.view_projection().project_point3(Vec3::ZERO);
        assert!(centre.x.abs() < 1e-5 && centre.y.abs() < 1e-5);
        assert!((centre.z - 8.0 / 14.0).abs() < 1e-4);
    }

    #[test]
    fn light_volume_covers_frustum() {
        let light = Light::from_config(&LightConfig::default());
        let corner = light.volume_transform().transform_point3(Vec3::splat(0.5));
        let in_light = light.matrices().view.transform_point3(corner);
        assert!(approx(in_light.abs(), Vec3::new(10.0, 10.0, 7.0)));
    }
}
