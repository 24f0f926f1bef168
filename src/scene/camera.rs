// Orbit camera around a target point

use glam::{Mat4, Vec3};

const MAX_PITCH: f32 = 89.0 * std::f32::consts::PI / 180.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    /// Radians around +Y, 0 looks down -Z
    pub yaw: f32,
    /// Radians, positive looks from above
    pub pitch: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 3.0,
            yaw: 0.0,
            pitch: 0.0,
            fov: 60.0,
            near: 0.01,
            far: 256.0,
        }
    }
}

impl Camera {
    pub fn new(fov: f32) -> Self {
        Self {
            fov,
            ..Default::default()
        }
    }

    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let offset = Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch);
        self.target + offset * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    /// Vulkan clip space: Y down, depth 0..1
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut projection =
            Mat4::perspective_rh(self.fov.to_radians(), aspect.max(1e-3), self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = (self.yaw + delta_yaw) % std::f32::consts::TAU;
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Scale the distance; factors < 1 move closer
    pub fn zoom(&mut self, factor: f32) {
        if factor > 0.0 && factor.is_finite() {
            self.distance = (self.distance * factor).max(self.near * 2.0);
        }
    }

    /// Aim at the centre of a bounding box and back off so it fits in view
    pub fn frame_bounds(&mut self, min: Vec3, max: Vec3) {
        let radius = ((max - min).length() * 0.5).max(1e-3);
        self.target = (min + max) * 0.5;
        self.distance = radius * 2.5;
        self.near = (radius * 0.01).max(1e-3);
        self.far = radius * 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), 1e-6));

        let target_in_view = camera.view().transform_point3(camera.target);
        assert!(target_in_view.abs_diff_eq(Vec3::new(0.0, 0.0, -3.0), 1e-5));
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::default();
        let clip = camera.projection(1.0) * Vec4::new(0.0, 1.0, -3.0, 1.0);
        assert!(clip.y < 0.0);

        // Depth lands in 0..1
        let ndc_near = camera.projection(1.0) * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        assert!((ndc_near.z / ndc_near.w).abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped_short_of_the_poles() {
        let mut camera = Camera::default();
        camera.orbit(0.0, 10.0);
        assert!(camera.pitch < std::f32::consts::FRAC_PI_2);
        assert!((camera.pitch - MAX_PITCH).abs() < 1e-6);

        camera.orbit(0.0, -20.0);
        assert!((camera.pitch + MAX_PITCH).abs() < 1e-6);
    }

    #[test]
    fn zoom_keeps_distance_positive() {
        let mut camera = Camera::default();
        camera.zoom(0.5);
        assert!((camera.distance - 1.5).abs() < 1e-6);

        camera.zoom(0.0);
        camera.zoom(-2.0);
        assert!((camera.distance - 1.5).abs() < 1e-6);

        for _ in 0..100 {
            camera.zoom(0.1);
        }
        assert!(camera.distance > 0.0);
    }

    #[test]
    fn frame_bounds_centres_on_the_box() {
        let mut camera = Camera::default();
        camera.frame_bounds(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(3.0, 1.0, 1.0));

        assert!(camera.target.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-6));
        let radius = Vec3::new(4.0, 2.0, 2.0).length() * 0.5;
        assert!((camera.distance - radius * 2.5).abs() < 1e-5);
        assert!(camera.near < camera.distance && camera.far > camera.distance);
    }
}
