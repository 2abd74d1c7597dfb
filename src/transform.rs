// SPDX-License-Identifier: MPL-2.0

//! World placement of drawables.

use std::cell::Cell;

use crate::linear::{deg_to_rad, Matrix4, Vector3};

/// Builds the rotation described by `attitude`, whose components are the heading, pitch and
/// roll in degrees.
///
/// The heading is applied first, about the Y axis, followed by the pitch about X and the roll
/// about Z. Pitch and roll enter the rotations negated.
pub fn attitude_matrix(attitude: Vector3) -> Matrix4 {
    let mut matrix = Matrix4::identity();
    matrix
        .rotate_oy(deg_to_rad(attitude.heading()))
        .rotate_ox(-deg_to_rad(attitude.pitch()))
        .rotate_oz(-deg_to_rad(attitude.roll()));

    matrix
}

/// Builds the world matrix of something at `position` with the given `attitude`.
///
/// The position is applied through [`Matrix4::translate`] after the rotations, so it is
/// expressed in the rotated basis.
pub fn world_matrix(position: Vector3, attitude: Vector3) -> Matrix4 {
    let mut matrix = attitude_matrix(attitude);
    matrix.translate(position);

    matrix
}

impl Default for Placement {
    fn default() -> Self {
        Self::new(Vector3::ZERO, Vector3::ZERO)
    }
}

/// The position and attitude of a drawable.
#[derive(Clone, Debug)]
pub struct Placement {
    position: Vector3,
    /// Heading, pitch and roll in degrees.
    attitude: Vector3,
    /// The world matrix from a previous call to [`world_matrix`](Self::world_matrix), if it is
    /// still valid.
    cached_world_matrix: Cell<Option<Matrix4>>,
}

impl Placement {
    pub fn new(position: Vector3, attitude: Vector3) -> Self {
        Self {
            position,
            attitude,
            cached_world_matrix: Cell::new(None),
        }
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn position_mut(&mut self) -> &mut Vector3 {
        self.invalidate_cache();

        &mut self.position
    }

    pub fn attitude(&self) -> Vector3 {
        self.attitude
    }

    pub fn attitude_mut(&mut self) -> &mut Vector3 {
        self.invalidate_cache();

        &mut self.attitude
    }

    pub fn invalidate_cache(&self) {
        self.cached_world_matrix.set(None);
    }

    /// The world matrix for this placement.
    ///
    /// This will return a cached copy if one is available.
    pub fn world_matrix(&self) -> Matrix4 {
        if let Some(matrix) = self.cached_world_matrix.get() {
            return matrix;
        }

        let matrix = world_matrix(self.position, self.attitude);
        self.cached_world_matrix.set(Some(matrix));

        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::tests::assert_close;

    #[test]
    fn rotations_apply_in_a_fixed_order() {
        let attitude = Vector3::new(30., 20., 10.);

        let mut expected = Matrix4::<f32>::identity();
        expected
            .rotate_oy(deg_to_rad(30.))
            .rotate_ox(deg_to_rad(-20.))
            .rotate_oz(deg_to_rad(-10.));
        assert_eq!(attitude_matrix(attitude), expected);

        let mut reversed = Matrix4::<f32>::identity();
        reversed
            .rotate_oz(deg_to_rad(-10.))
            .rotate_ox(deg_to_rad(-20.))
            .rotate_oy(deg_to_rad(30.));
        assert_ne!(attitude_matrix(attitude), reversed);
    }

    #[test]
    fn unrotated_placement_only_translates() {
        let placement = Placement::new(Vector3::new(1., 2., 3.), Vector3::ZERO);
        let moved = Vector3::<f32>::new(1., 1., 1.) * placement.world_matrix();
        assert_close(moved.x as f64, 2., 1e-6);
        assert_close(moved.y as f64, 3., 1e-6);
        assert_close(moved.z as f64, 4., 1e-6);
    }

    #[test]
    fn heading_rotates_the_offset() {
        let placement = Placement::new(Vector3::new(0., 0., -1.), Vector3::new(90., 0., 0.));
        let origin = Vector3::<f32>::ZERO * placement.world_matrix();
        assert_close(origin.x as f64, -1., 1e-6);
        assert_close(origin.z as f64, 0., 1e-6);
    }

    #[test]
    fn mutation_invalidates_the_cached_matrix() {
        let mut placement = Placement::default();
        assert_eq!(placement.world_matrix(), Matrix4::identity());

        placement.position_mut().x = 5.;
        assert_close(placement.world_matrix().get(3, 0) as f64, 5., 1e-6);

        *placement.attitude_mut().heading_mut() = 180.;
        assert_close(placement.world_matrix().get(3, 0) as f64, -5., 1e-5);
        assert_close(placement.world_matrix().get(0, 0) as f64, -1., 1e-6);
    }
}
