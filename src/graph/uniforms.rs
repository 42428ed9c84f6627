//! Per-frame values and the GPU uniform blocks filled from them.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// View and projection matrices for one point of view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl ViewMatrices {
    pub const IDENTITY: Self = Self {
        view: Mat4::IDENTITY,
        projection: Mat4::IDENTITY,
        position: Vec3::ZERO,
    };

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Same view with the translation removed, for geometry centred on the eye.
    pub fn rotation_only(&self) -> Self {
        let mut view = self.view;
        view.w_axis = Vec4::W;
        Self {
            view,
            projection: self.projection,
            position: Vec3::ZERO,
        }
    }
}

/// Display toggles driven by the keyboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Toggles {
    pub show_textures: bool,
    pub show_light_volume: bool,
}

/// A radial disturbance injected into the height field this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Impulse {
    /// Centre in height-field texture coordinates.
    pub uv: Vec2,
    /// Radius in texture coordinates.
    pub radius: f32,
    pub strength: f32,
}

/// Everything that changes from one frame to the next, computed by the
/// frame driver before the pass graph runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameContext {
    /// Simulation time in seconds; frozen while paused.
    pub time: f32,
    pub camera: ViewMatrices,
    /// Camera mirrored about the water plane.
    pub mirrored_camera: ViewMatrices,
    pub light: ViewMatrices,
    pub toggles: Toggles,
    pub impulse: Option<Impulse>,
    /// Clear colour for passes that clear to the ambient colour.
    pub ambient: Vec4,
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            time: 0.0,
            camera: ViewMatrices::IDENTITY,
            mirrored_camera: ViewMatrices::IDENTITY,
            light: ViewMatrices::IDENTITY,
            toggles: Toggles::default(),
            impulse: None,
            ambient: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

/// Uniform block shared by every program at `@group(0) @binding(0)`.
///
/// The executor fills the view-dependent fields; each pass's uniform callback
/// adds the values specific to its program.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub view_proj_inverse: [[f32; 4]; 4],
    pub light_view_proj: [[f32; 4]; 4],
    /// xyz: eye position, w: time in seconds.
    pub camera_position: [f32; 4],
    /// xyz: direction light travels in, w: intensity.
    pub light_direction: [f32; 4],
    pub light_color: [f32; 4],
    pub atmosphere_color: [f32; 4],
    pub underwater_color: [f32; 4],
    /// xy: 1 / target size, zw: 1 / light map size.
    pub inv_resolution: [f32; 4],
    /// x: sea level, y: half the water size, z: near plane, w: far plane.
    pub water: [f32; 4],
    /// xy: centre uv, z: radius, w: strength (zero when idle).
    pub impulse: [f32; 4],
    /// x: damping, y: stiffness, z: 1 / height-field size, w: unused.
    pub simulation: [f32; 4],
    /// amplitude, frequency, phase, sharpness
    pub wave1: [f32; 4],
    pub wave2: [f32; 4],
    /// xy: first wave direction, zw: second wave direction.
    pub wave_directions: [f32; 4],
    /// Free per-pass parameters.
    pub params: [f32; 4],
}

impl Default for PassUniforms {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

impl PassUniforms {
    /// Fills the view-dependent fields from `view`.
    pub fn for_view(frame: &FrameContext, view: &ViewMatrices, target_size: Vec2) -> Self {
        let view_proj = view.view_projection();
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            view_proj_inverse: view_proj.inverse().to_cols_array_2d(),
            light_view_proj: frame.light.view_projection().to_cols_array_2d(),
            camera_position: view.position.extend(frame.time).to_array(),
            inv_resolution: [1.0 / target_size.x, 1.0 / target_size.y, 0.0, 0.0],
            ..Default::default()
        }
    }
}

/// Per-draw block at `@group(1) @binding(0)`, bound with a dynamic offset.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    pub model: [[f32; 4]; 4],
    pub model_view_proj: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
}

impl DrawUniforms {
    pub fn new(model: Mat4, view_proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            model_view_proj: (view_proj * model).to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<PassUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 192);
    }

    #[test]
    fn rotation_only_drops_translation() {
        let view = ViewMatrices {
            view: Mat4::look_at_rh(Vec3::new(3.0, 2.0, 1.0), Vec3::ZERO, Vec3::Y),
            projection: Mat4::IDENTITY,
            position: Vec3::new(3.0, 2.0, 1.0),
        };
        let sky = view.rotation_only();
        assert_eq!(sky.view.transform_point3(Vec3::ZERO), Vec3::ZERO);
        assert_eq!(sky.view.x_axis, view.view.x_axis);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let draw = DrawUniforms::new(model, Mat4::IDENTITY);
        assert_eq!(Mat4::from_cols_array_2d(&draw.normal_matrix).x_axis.x, 0.5);
    }
}
