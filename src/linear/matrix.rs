// SPDX-License-Identifier: MPL-2.0

use std::ops::{Add, AddAssign, Index, IndexMut, Mul, MulAssign};

use super::{Scalar, Vector3};

/// Tolerance of [`Matrix4`] equality, applied to every element.
pub const EQUALITY_EPSILON: f64 = 1e-4;

impl<T: Scalar> Matrix4<T> {
    #[allow(clippy::too_many_arguments)]
    #[rustfmt::skip]
    pub const fn new(
        r0c0: T, r0c1: T, r0c2: T, r0c3: T,
        r1c0: T, r1c1: T, r1c2: T, r1c3: T,
        r2c0: T, r2c1: T, r2c2: T, r2c3: T,
        r3c0: T, r3c1: T, r3c2: T, r3c3: T,
    ) -> Self {
        Self([
            [r0c0, r0c1, r0c2, r0c3],
            [r1c0, r1c1, r1c2, r1c3],
            [r2c0, r2c1, r2c2, r2c3],
            [r3c0, r3c1, r3c2, r3c3],
        ])
    }
}

/// A 4x4 square matrix, stored row by row.
///
/// Matrices transform *row* vectors: a point `v` becomes `v * M`, so the translation of a
/// transform lives in the last row and `A * B` applies `A` first. The default value is the
/// identity.
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct Matrix4<T = f32>([[T; 4]; 4]);

unsafe impl bytemuck::Pod for Matrix4<f32> {}
unsafe impl bytemuck::Zeroable for Matrix4<f32> {}

impl<T: Scalar> Default for Matrix4<T> {
    fn default() -> Self {
        Self::identity()
    }
}

#[rustfmt::skip]
impl<T: Scalar> Matrix4<T> {
    pub const ZERO: Self = Self::new(
        T::ZERO, T::ZERO, T::ZERO, T::ZERO,
        T::ZERO, T::ZERO, T::ZERO, T::ZERO,
        T::ZERO, T::ZERO, T::ZERO, T::ZERO,
        T::ZERO, T::ZERO, T::ZERO, T::ZERO,
    );

    pub const IDENTITY: Self = Self::new(
        T::ONE, T::ZERO, T::ZERO, T::ZERO,
        T::ZERO, T::ONE, T::ZERO, T::ZERO,
        T::ZERO, T::ZERO, T::ONE, T::ZERO,
        T::ZERO, T::ZERO, T::ZERO, T::ONE,
    );
}

impl<T: Scalar> Matrix4<T> {
    pub const fn identity() -> Self {
        Self::IDENTITY
    }

    /// Builds a matrix from 16 elements in row-major order.
    pub fn from_slice(elements: &[T; 16]) -> Self {
        let mut rows = [[T::ZERO; 4]; 4];
        for (i, element) in elements.iter().enumerate() {
            rows[i / 4][i % 4] = *element;
        }

        Self(rows)
    }

    /// Borrows the 16 elements in row-major order.
    ///
    /// This is the layout uploaded to the GPU, where it is read column by column; the shaders
    /// therefore see the transpose, which is the same transform in column-vector convention.
    pub fn as_slice(&self) -> &[T; 16] {
        // SAFETY: `[[T; 4]; 4]` and `[T; 16]` have identical layouts, and `Matrix4` is
        // `repr(transparent)`.
        unsafe { &*(self as *const Self as *const [T; 16]) }
    }

    /// Copies the 16 elements out in row-major order.
    pub fn to_slice(&self) -> [T; 16] {
        *self.as_slice()
    }

    pub fn rows(&self) -> &[[T; 4]; 4] {
        &self.0
    }

    pub fn get(&self, row: usize, column: usize) -> T {
        self.0[row][column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: T) -> &mut Self {
        self.0[row][column] = value;

        self
    }

    /// Converts this matrix to another element type.
    pub fn cast<U: Scalar>(&self) -> Matrix4<U> {
        Matrix4(self.0.map(|row| row.map(|element| U::from_f64(element.to_f64()))))
    }

    /// The determinant of the 3x3 matrix made of rows `r0, r1, r2` and columns `c0, c1, c2`.
    pub fn minor(&self, r0: usize, r1: usize, r2: usize, c0: usize, c1: usize, c2: usize) -> T {
        let m = &self.0;

        m[r0][c0] * (m[r1][c1] * m[r2][c2] - m[r2][c1] * m[r1][c2])
            - m[r0][c1] * (m[r1][c0] * m[r2][c2] - m[r2][c0] * m[r1][c2])
            + m[r0][c2] * (m[r1][c0] * m[r2][c1] - m[r2][c0] * m[r1][c1])
    }

    /// The transpose of the cofactor matrix.
    #[rustfmt::skip]
    pub fn adjugate(&self) -> Self {
        Self::new(
             self.minor(1, 2, 3, 1, 2, 3),
            -self.minor(0, 2, 3, 1, 2, 3),
             self.minor(0, 1, 3, 1, 2, 3),
            -self.minor(0, 1, 2, 1, 2, 3),

            -self.minor(1, 2, 3, 0, 2, 3),
             self.minor(0, 2, 3, 0, 2, 3),
            -self.minor(0, 1, 3, 0, 2, 3),
             self.minor(0, 1, 2, 0, 2, 3),

             self.minor(1, 2, 3, 0, 1, 3),
            -self.minor(0, 2, 3, 0, 1, 3),
             self.minor(0, 1, 3, 0, 1, 3),
            -self.minor(0, 1, 2, 0, 1, 3),

            -self.minor(1, 2, 3, 0, 1, 2),
             self.minor(0, 2, 3, 0, 1, 2),
            -self.minor(0, 1, 3, 0, 1, 2),
             self.minor(0, 1, 2, 0, 1, 2),
        )
    }

    /// The determinant, expanded along the first row.
    pub fn determinant(&self) -> T {
        let m = &self.0;

        m[0][0] * self.minor(1, 2, 3, 1, 2, 3) - m[0][1] * self.minor(1, 2, 3, 0, 2, 3)
            + m[0][2] * self.minor(1, 2, 3, 0, 1, 3)
            - m[0][3] * self.minor(1, 2, 3, 0, 1, 2)
    }

    /// The inverse of this matrix, or `None` if it is singular.
    pub fn inverse(&self) -> Option<Self> {
        let determinant = self.determinant();
        if determinant == T::ZERO {
            return None;
        }

        Some(self.adjugate() * (T::ONE / determinant))
    }

    pub fn transpose(&self) -> Self {
        let m = &self.0;

        Self(std::array::from_fn(|row| std::array::from_fn(|column| m[column][row])))
    }

    pub fn trace(&self) -> T {
        self.0[0][0] + self.0[1][1] + self.0[2][2] + self.0[3][3]
    }

    /// Rotates this transform about the X axis by `angle` radians.
    #[rustfmt::skip]
    pub fn rotate_ox(&mut self, angle: T) -> &mut Self {
        let SinCos { sin: s, cos: c } = SinCos::new(angle);
        let (o, l) = (T::ZERO, T::ONE);

        *self *= Self::new(
            l, o,  o, o,
            o, c,  s, o,
            o, -s, c, o,
            o, o,  o, l,
        );

        self
    }

    /// Rotates this transform about the Y axis by `angle` radians.
    #[rustfmt::skip]
    pub fn rotate_oy(&mut self, angle: T) -> &mut Self {
        let SinCos { sin: s, cos: c } = SinCos::new(angle);
        let (o, l) = (T::ZERO, T::ONE);

        *self *= Self::new(
            c, o, -s, o,
            o, l,  o, o,
            s, o,  c, o,
            o, o,  o, l,
        );

        self
    }

    /// Rotates this transform about the Z axis by `angle` radians.
    ///
    /// Unlike [`rotate_ox`](Self::rotate_ox) and [`rotate_oy`](Self::rotate_oy), the sine
    /// terms are placed for the opposite sense of rotation.
    #[rustfmt::skip]
    pub fn rotate_oz(&mut self, angle: T) -> &mut Self {
        let SinCos { sin: s, cos: c } = SinCos::new(angle);
        let (o, l) = (T::ZERO, T::ONE);

        *self *= Self::new(
            c, -s, o, o,
            s,  c, o, o,
            o,  o, l, o,
            o,  o, o, l,
        );

        self
    }

    /// Rotates this transform by `angle` radians about `axis`, which must be of unit length.
    #[rustfmt::skip]
    pub fn rotate_axis(&mut self, angle: T, axis: Vector3<T>) -> &mut Self {
        let SinCos { sin: s, cos: c } = SinCos::new(angle);
        let (o, l) = (T::ZERO, T::ONE);
        let t = l - c;
        let Vector3 { x, y, z } = axis;

        *self *= Self::new(
            c + t * x * x,     t * x * y - z * s, t * x * z + y * s, o,
            t * x * y + z * s, c + t * y * y,     t * y * z - x * s, o,
            t * x * z - y * s, t * y * z + x * s, c + t * z * z,     o,
            o,                 o,                 o,                 l,
        );

        self
    }

    /// Moves the origin of this transform by `offset`, expressed in the current basis.
    ///
    /// Following rotations with a translation therefore rotates the offset too.
    pub fn translate(&mut self, offset: Vector3<T>) -> &mut Self {
        self.translate_xyz(offset.x, offset.y, offset.z)
    }

    pub fn translate_xyz(&mut self, x: T, y: T, z: T) -> &mut Self {
        let m = &mut self.0;
        for column in 0..3 {
            m[3][column] = m[0][column] * x + m[1][column] * y + m[2][column] * z + m[3][column];
        }

        self
    }

    /// Transforms the point `v` in place, treating it as a row vector with `w = 1`.
    ///
    /// The resulting `w` is discarded without a perspective divide.
    pub fn transform(&self, v: &mut Vector3<T>) {
        self.transform_xyz(&mut v.x, &mut v.y, &mut v.z);
    }

    pub fn transform_xyz(&self, x: &mut T, y: &mut T, z: &mut T) {
        let [tx, ty, tz, _] = self.transform_homogeneous([*x, *y, *z, T::ONE]);
        *x = tx;
        *y = ty;
        *z = tz;
    }

    /// Transforms a homogeneous row vector.
    pub fn transform_homogeneous(&self, v: [T; 4]) -> [T; 4] {
        let m = &self.0;

        std::array::from_fn(|column| {
            v[0] * m[0][column] + v[1] * m[1][column] + v[2] * m[2][column] + v[3] * m[3][column]
        })
    }

    /// Builds a perspective projection.
    ///
    /// `fov_y` is the vertical opening of the frustum in radians and `aspect_ratio` its width
    /// divided by its height. The camera looks down -Z and depth maps to `[-1, 1]`.
    #[rustfmt::skip]
    pub fn perspective(fov_y: T, aspect_ratio: T, z_near: T, z_far: T) -> Self {
        let f = T::ONE / (fov_y / T::TWO).tan();
        let o = T::ZERO;

        Self::new(
            f / aspect_ratio, o, o,                                       o,
            o,                f, o,                                       o,
            o,                o, (z_far + z_near) / (z_near - z_far),     -T::ONE,
            o,                o, (T::TWO * z_far * z_near) / (z_near - z_far), o,
        )
    }

    /// Recovers the parameters [`perspective`](Self::perspective) was called with.
    ///
    /// Returns `None` if any of the coefficients the parameters are divided by is zero, which
    /// is the case for any affine transform.
    pub fn data_from_perspective(&self) -> Option<PerspectiveData<T>> {
        let m = &self.0;

        if m[1][1] == T::ZERO {
            return None;
        }
        let fov_y = T::TWO * (T::ONE / m[1][1]).atan();

        if m[0][0] == T::ZERO {
            return None;
        }
        let aspect_ratio = m[1][1] / m[0][0];

        if m[2][2] - T::ONE == T::ZERO {
            return None;
        }
        let z_near = m[3][2] / (m[2][2] - T::ONE);

        if m[2][2] + T::ONE == T::ZERO {
            return None;
        }
        let z_far = m[3][2] / (m[2][2] + T::ONE);

        Some(PerspectiveData {
            fov_y,
            aspect_ratio,
            z_near,
            z_far,
        })
    }

    /// Builds a parallel projection of the box bounded by the given planes.
    #[rustfmt::skip]
    pub fn ortho(left: T, right: T, bottom: T, top: T, z_near: T, z_far: T) -> Self {
        let tx = -(right + left) / (right - left);
        let ty = -(top + bottom) / (top - bottom);
        let tz = -(z_far + z_near) / (z_far - z_near);
        let o = T::ZERO;

        Self::new(
            T::TWO / (right - left), o,                       o,                         o,
            o,                       T::TWO / (top - bottom), o,                         o,
            o,                       o,                       -T::TWO / (z_far - z_near), o,
            tx,                      ty,                      tz,                        T::ONE,
        )
    }

    /// Compares every element with a tolerance of [`EQUALITY_EPSILON`].
    pub fn approx_eq(&self, rhs: &Self) -> bool {
        let epsilon = T::from_f64(EQUALITY_EPSILON);

        self.as_slice()
            .iter()
            .zip(rhs.as_slice())
            .all(|(a, b)| (*a - *b).abs() < epsilon)
    }
}

/// The parameters of a perspective projection; see [`Matrix4::data_from_perspective`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveData<T> {
    /// The vertical opening in radians.
    pub fov_y: T,
    pub aspect_ratio: T,
    pub z_near: T,
    pub z_far: T,
}

impl<T: Scalar> PartialEq for Matrix4<T> {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other)
    }
}

impl<T: Scalar> Index<(usize, usize)> for Matrix4<T> {
    type Output = T;

    fn index(&self, (row, column): (usize, usize)) -> &Self::Output {
        &self.0[row][column]
    }
}

impl<T: Scalar> IndexMut<(usize, usize)> for Matrix4<T> {
    fn index_mut(&mut self, (row, column): (usize, usize)) -> &mut Self::Output {
        &mut self.0[row][column]
    }
}

impl<T: Scalar> Add for Matrix4<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(std::array::from_fn(|row| {
            std::array::from_fn(|column| self.0[row][column] + rhs.0[row][column])
        }))
    }
}

impl<T: Scalar> AddAssign for Matrix4<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: Scalar> Mul<T> for Matrix4<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self::Output {
        Self(self.0.map(|row| row.map(|element| element * rhs)))
    }
}

impl<T: Scalar> MulAssign<T> for Matrix4<T> {
    fn mul_assign(&mut self, rhs: T) {
        *self = *self * rhs;
    }
}

/// Composition: `a * b` applies `a`, then `b`.
impl<T: Scalar> Mul for Matrix4<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        let (a, b) = (&self.0, &rhs.0);

        Self(std::array::from_fn(|row| {
            std::array::from_fn(|column| {
                a[row][0] * b[0][column]
                    + a[row][1] * b[1][column]
                    + a[row][2] * b[2][column]
                    + a[row][3] * b[3][column]
            })
        }))
    }
}

impl<T: Scalar> MulAssign for Matrix4<T> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

/// Transforms a point; see [`Matrix4::transform`].
impl<T: Scalar> Mul<Matrix4<T>> for Vector3<T> {
    type Output = Self;

    fn mul(mut self, rhs: Matrix4<T>) -> Self::Output {
        rhs.transform(&mut self);

        self
    }
}

impl<T: Scalar> SinCos<T> {
    fn new(radians: T) -> Self {
        Self {
            sin: radians.sin(),
            cos: radians.cos(),
        }
    }
}

struct SinCos<T> {
    sin: T,
    cos: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::{deg_to_rad, tests::assert_close};

    fn assert_matrix_close(actual: &Matrix4<f64>, expected: &Matrix4<f64>, tolerance: f64) {
        for (a, e) in actual.as_slice().iter().zip(expected.as_slice()) {
            assert!(
                (a - e).abs() <= tolerance,
                "expected {expected:?}, got {actual:?}",
            );
        }
    }

    #[rustfmt::skip]
    fn samples() -> Vec<Matrix4<f64>> {
        let mut rigid = Matrix4::<f64>::identity();
        rigid
            .rotate_oy(0.7)
            .rotate_ox(-0.3)
            .rotate_oz(1.9)
            .translate(Vector3::new(4., -2., 10.));

        vec![
            rigid,
            Matrix4::new(
                2., 0., 1., 0.,
                1., 3., 0., 0.,
                0., 1., 4., 0.,
                5., 6., 7., 1.,
            ),
            Matrix4::new(
                 1.,  2., 0., -1.,
                 0.,  1., 3.,  2.,
                -2.,  0., 1.,  1.,
                 1., -1., 2.,  3.,
            ),
            Matrix4::perspective(deg_to_rad(60.), 16. / 9., 0.5, 250.),
        ]
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        for m in samples() {
            let inverse = m.inverse().expect("sample matrices are invertible");
            assert_matrix_close(&(m * inverse), &Matrix4::IDENTITY, 1e-5);
            assert_matrix_close(&(inverse * m), &Matrix4::IDENTITY, 1e-5);
        }
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        assert!(Matrix4::<f32>::ZERO.inverse().is_none());

        let mut projection = Matrix4::<f64>::identity();
        projection[(2, 2)] = 0.;
        assert!(projection.inverse().is_none());
    }

    #[test]
    fn adjugate_scales_to_the_determinant() {
        for m in samples() {
            let det = m.determinant();
            assert_matrix_close(&(m * m.adjugate()), &(Matrix4::IDENTITY * det), 1e-6 * det.abs().max(1.));
        }
    }

    #[test]
    #[rustfmt::skip]
    fn determinant_and_trace_of_a_known_matrix() {
        let m = Matrix4::new(
            2., 0., 1., 0.,
            1., 3., 0., 0.,
            0., 1., 4., 0.,
            5., 6., 7., 1.,
        );
        // 2 * 12 + 1 * 1
        assert_close(m.determinant(), 25., 1e-12);
        assert_close(m.trace(), 10., 1e-12);
    }

    #[test]
    fn transpose_is_an_involution() {
        for m in samples() {
            assert_eq!(m.transpose().transpose().as_slice(), m.as_slice());
        }
        let m = samples()[1];
        assert_eq!(m.transpose().get(3, 0), m.get(0, 3));
        assert_eq!(m.transpose().get(0, 3), 5.);
    }

    #[test]
    fn perspective_parameters_round_trip() {
        for (fov, aspect, near, far) in [
            (deg_to_rad(45.0_f64), 4. / 3., 0.1, 1000.),
            (deg_to_rad(90.), 1., 1., 10.),
            (deg_to_rad(30.), 0.5, 0.01, 50.),
        ] {
            let data = Matrix4::perspective(fov, aspect, near, far)
                .data_from_perspective()
                .expect("perspective matrices carry their parameters");
            assert_close(data.fov_y, fov, 1e-9);
            assert_close(data.aspect_ratio, aspect, 1e-9);
            assert_close(data.z_near, near, 1e-9 * far);
            assert_close(data.z_far, far, 1e-9 * far);
        }
    }

    #[test]
    fn perspective_extraction_fails_on_zero_denominators() {
        // m22 - 1 is zero.
        assert!(Matrix4::<f64>::identity().data_from_perspective().is_none());

        let mut m = Matrix4::<f64>::perspective(1., 1., 1., 10.);
        m[(1, 1)] = 0.;
        assert!(m.data_from_perspective().is_none());

        let mut m = Matrix4::<f64>::perspective(1., 1., 1., 10.);
        m[(0, 0)] = 0.;
        assert!(m.data_from_perspective().is_none());

        let mut m = Matrix4::<f64>::perspective(1., 1., 1., 10.);
        m[(2, 2)] = -1.;
        assert!(m.data_from_perspective().is_none());
    }

    #[test]
    fn yaw_of_ninety_degrees_turns_forward_into_left() {
        let mut yaw = Matrix4::<f64>::identity();
        yaw.rotate_oy(deg_to_rad(90.));

        let mut forward = Vector3::new(0., 0., -1.);
        yaw.transform(&mut forward);
        assert_close(forward.x, -1., 1e-12);
        assert_close(forward.y, 0., 1e-12);
        assert_close(forward.z, 0., 1e-12);
    }

    #[test]
    fn axis_rotation_about_y_turns_the_other_way() {
        let angle = 0.4;
        let mut about_axis = Matrix4::<f64>::identity();
        about_axis.rotate_axis(angle, Vector3::new(0., 1., 0.));
        let mut about_oy = Matrix4::<f64>::identity();
        about_oy.rotate_oy(-angle);
        assert_matrix_close(&about_axis, &about_oy, 1e-12);
    }

    #[test]
    fn translation_is_expressed_in_the_rotated_basis() {
        let mut m = Matrix4::<f64>::identity();
        m.rotate_oy(deg_to_rad(90.)).translate(Vector3::new(0., 0., -1.));

        // The offset is rotated along with the geometry: translate, then rotate.
        let origin = Vector3::<f64>::new(0., 0., 0.) * m;
        assert_close(origin.x, -1., 1e-12);
        assert_close(origin.z, 0., 1e-12);

        let mut x = 1.;
        let mut y = 2.;
        let mut z = 0.;
        m.transform_xyz(&mut x, &mut y, &mut z);
        assert_close(x, -1., 1e-12);
        assert_close(y, 2., 1e-12);
        assert_close(z, -1., 1e-12);
    }

    #[test]
    fn ortho_maps_the_box_onto_the_unit_cube() {
        let m = Matrix4::<f64>::ortho(-2., 6., -1., 3., 1., 11.);
        let [x, y, z, w] = m.transform_homogeneous([6., -1., -11., 1.]);
        assert_close(x, 1., 1e-12);
        assert_close(y, -1., 1e-12);
        assert_close(z, 1., 1e-12);
        assert_close(w, 1., 1e-12);

        let [_, _, z, _] = m.transform_homogeneous([0., 0., -1., 1.]);
        assert_close(z, -1., 1e-12);
    }

    #[test]
    fn perspective_divides_by_depth() {
        let m = Matrix4::<f64>::perspective(deg_to_rad(90.), 1., 1., 100.);
        let [_, _, z, w] = m.transform_homogeneous([0., 0., -1., 1.]);
        assert_close(z / w, -1., 1e-12);
        let [_, y, z, w] = m.transform_homogeneous([0., 100., -100., 1.]);
        assert_close(z / w, 1., 1e-9);
        assert_close(y / w, 1., 1e-9);
    }

    #[test]
    fn equality_requires_every_element() {
        let a = Matrix4::<f32>::identity();
        let mut b = a;
        b[(3, 1)] += 0.00005;
        assert_eq!(a, b);
        b[(3, 1)] += 0.001;
        assert_ne!(a, b);
    }

    #[test]
    fn composition_is_not_commutative() {
        let mut rotate = Matrix4::<f64>::identity();
        rotate.rotate_oz(1.);
        let mut translate = Matrix4::<f64>::identity();
        translate.translate_xyz(1., 0., 0.);
        assert_ne!(rotate * translate, translate * rotate);

        let mut accumulated = rotate;
        accumulated *= translate;
        assert_eq!(accumulated, rotate * translate);
    }

    #[test]
    fn cast_and_slice_views() {
        let m = samples()[1].cast::<f32>();
        assert_eq!(m.as_slice()[12..], [5., 6., 7., 1.]);
        assert_eq!(Matrix4::from_slice(m.as_slice()).as_slice(), m.as_slice());
        assert_eq!((m + m).get(3, 2), 14.);
        assert_eq!((m * 0.5).get(1, 1), 1.5);
        let bytes: &[u8] = bytemuck::bytes_of(&m);
        assert_eq!(bytes.len(), 64);
    }
}
