// SPDX-License-Identifier: MPL-2.0

use crate::{
    linear::{deg_to_rad, Matrix4, Vector3},
    transform,
};

/// The kind of projection a [`Camera`] applies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Ortho,
    Perspective,
}

impl Default for Perspective {
    fn default() -> Self {
        Self {
            vertical_angle: 45.,
            aspect_ratio: 4. / 3.,
            near_plane: 0.1,
            far_plane: 1000.,
        }
    }
}

/// Parameters of a perspective projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Perspective {
    /// The vertical opening of the frustum in degrees.
    pub vertical_angle: f32,
    /// Width divided by height.
    pub aspect_ratio: f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl Default for Ortho {
    fn default() -> Self {
        Self {
            left: -0.5,
            right: 0.5,
            bottom: -0.5,
            top: 0.5,
            z_near: -1000.,
            z_far: 1000.,
        }
    }
}

/// Parameters of a parallel projection: the planes bounding the visible box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ortho {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub z_near: f32,
    pub z_far: f32,
}

/// The point of view a scene is rendered from.
///
/// The camera looks down its local -Z axis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    /// The location of this camera in world space.
    pub position: Vector3,
    /// Heading, pitch and roll in degrees.
    pub attitude: Vector3,
    pub mode: Mode,
    /// Used when [`mode`](Self::mode) is [`Mode::Perspective`].
    pub perspective: Perspective,
    /// Used when [`mode`](Self::mode) is [`Mode::Ortho`].
    pub ortho: Ortho,
}

impl Camera {
    /// Creates a perspective camera at `position`.
    pub fn perspective(position: Vector3, perspective: Perspective) -> Self {
        Self {
            position,
            mode: Mode::Perspective,
            perspective,
            ..Default::default()
        }
    }

    pub fn heading(&self) -> f32 {
        self.attitude.heading()
    }

    pub fn pitch(&self) -> f32 {
        self.attitude.pitch()
    }

    pub fn roll(&self) -> f32 {
        self.attitude.roll()
    }

    /// The projection for the current [`mode`](Self::mode).
    pub fn projection_matrix(&self) -> Matrix4 {
        match self.mode {
            Mode::Perspective => {
                let p = &self.perspective;

                Matrix4::perspective(
                    deg_to_rad(p.vertical_angle),
                    p.aspect_ratio,
                    p.near_plane,
                    p.far_plane,
                )
            }
            Mode::Ortho => {
                let o = &self.ortho;

                Matrix4::ortho(o.left, o.right, o.bottom, o.top, o.z_near, o.z_far)
            }
        }
    }

    /// The rotation of this camera, built the same way as a drawable's.
    pub fn attitude_matrix(&self) -> Matrix4 {
        transform::attitude_matrix(self.attitude)
    }

    /// Maps world space into camera space.
    pub fn view_matrix(&self) -> Matrix4 {
        let mut view = self.attitude_matrix();
        view.translate(-self.position);

        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::tests::assert_close;

    #[test]
    fn defaults_to_a_unit_parallel_projection() {
        let camera = Camera::default();
        assert_eq!(camera.mode, Mode::Ortho);
        assert_eq!(camera.perspective.vertical_angle, 45.);
        assert_eq!(camera.ortho.z_near, -1000.);

        let expected = Matrix4::ortho(-0.5, 0.5, -0.5, 0.5, -1000., 1000.);
        assert_eq!(camera.projection_matrix(), expected);
    }

    #[test]
    fn perspective_mode_converts_the_angle_to_radians() {
        let camera = Camera::perspective(Vector3::ZERO, Perspective::default());
        let data = camera
            .projection_matrix()
            .cast::<f64>()
            .data_from_perspective()
            .expect("a perspective camera produces a perspective matrix");
        assert_close(data.fov_y, std::f64::consts::FRAC_PI_4, 1e-5);
        assert_close(data.aspect_ratio, 4. / 3., 1e-5);
    }

    #[test]
    fn view_matrix_moves_the_camera_to_the_origin() {
        let camera = Camera {
            position: Vector3::new(3., -2., 7.),
            attitude: Vector3::new(25., 10., 0.),
            ..Default::default()
        };
        let eye = Vector3::<f32>::new(3., -2., 7.) * camera.view_matrix();
        assert_close(eye.length() as f64, 0., 1e-5);
    }

    #[test]
    fn unrotated_view_only_translates() {
        let camera = Camera {
            position: Vector3::new(0., 0., 5.),
            ..Default::default()
        };
        let origin = Vector3::<f32>::ZERO * camera.view_matrix();
        assert_eq!(origin, Vector3::new(0., 0., -5.));
    }
}
