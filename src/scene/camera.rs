use glam::{Mat4, Vec2, Vec3};

/// Camera as seen by the renderer.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Camera {
    pub view: Mat4,
    pub projection: Mat4,
    pub near: f32,
    pub far: f32,
    /// Exposure multiplier derived from aperture / shutter / ISO upstream.
    pub exposure: f32,
}

impl Camera {
    /// Right-handed perspective camera looking from `eye` to `target`.
    #[must_use]
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            near,
            far,
            exposure: 1.0,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 45f32.to_radians(), 1.0, 0.1, 100.0)
    }
}

/// Shader-visible camera data for one frame.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct CameraAttributes {
    pub view: Mat4,
    pub projection: Mat4,
    pub inverse_view: Mat4,
    pub inverse_projection: Mat4,
    pub view_projection: Mat4,
    pub prev_view_projection: Mat4,
    pub viewport_size: Vec2,
    pub near: f32,
    pub far: f32,
    pub exposure: f32,
    pub position: Vec3,
}

impl CameraAttributes {
    #[must_use]
    pub fn new(camera: &Camera, viewport_size: Vec2, prev_view_projection: Option<Mat4>) -> Self {
        let view_projection = camera.projection * camera.view;
        let inverse_view = camera.view.inverse();
        Self {
            view: camera.view,
            projection: camera.projection,
            inverse_view,
            inverse_projection: camera.projection.inverse(),
            view_projection,
            prev_view_projection: prev_view_projection.unwrap_or(view_projection),
            viewport_size,
            near: camera.near,
            far: camera.far,
            exposure: camera.exposure,
            position: inverse_view.w_axis.truncate(),
        }
    }
}
