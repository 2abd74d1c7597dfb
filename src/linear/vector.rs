// SPDX-License-Identifier: MPL-2.0

use std::ops::{
    Add, AddAssign, BitAnd, BitAndAssign, BitXor, BitXorAssign, Mul, MulAssign, Neg, Sub,
    SubAssign,
};

use super::Scalar;

/// Tolerance of [`Vector3::approx_eq`].
pub const EQUALITY_EPSILON: f64 = 1e-3;

impl<T: Scalar> Vector3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

/// The humble 3D vector.
///
/// The same type serves as a point, a direction, an attitude (heading, pitch and roll, in
/// degrees) and an RGB color. The components are always `x`, `y` and `z`; the named accessors
/// such as [`heading`](Self::heading) or [`red`](Self::red) are merely views of them.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Vector3<T = f32> {
    pub x: T,
    pub y: T,
    pub z: T,
}

unsafe impl bytemuck::Pod for Vector3<f32> {}
unsafe impl bytemuck::Zeroable for Vector3<f32> {}

impl<T: Scalar> Vector3<T> {
    pub const ZERO: Self = Self::new(T::ZERO, T::ZERO, T::ZERO);

    pub fn set(&mut self, x: T, y: T, z: T) {
        *self = Self::new(x, y, z);
    }

    /// Borrows the components as a contiguous array.
    pub fn as_slice(&self) -> &[T; 3] {
        // SAFETY: `Vector3` is `repr(C)` with three fields of the same type, so it has the same
        // layout as `[T; 3]`.
        unsafe { &*(self as *const Self as *const [T; 3]) }
    }

    pub fn to_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }

    /// Converts this vector to another element type.
    pub fn cast<U: Scalar>(self) -> Vector3<U> {
        Vector3::new(
            U::from_f64(self.x.to_f64()),
            U::from_f64(self.y.to_f64()),
            U::from_f64(self.z.to_f64()),
        )
    }

    /// Negates this vector in place.
    pub fn negate(&mut self) -> &mut Self {
        *self = -*self;

        self
    }

    pub fn dot(self, rhs: Self) -> T {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    /// The projection of this vector along `rhs`.
    ///
    /// Projecting onto a zero-length vector yields the zero vector.
    pub fn project_onto(self, rhs: Self) -> Self {
        let length = rhs.length();
        if length > T::ZERO {
            rhs * (self.dot(rhs) / (length * length))
        } else {
            Self::ZERO
        }
    }

    /// The Euclidean norm.
    pub fn length(self) -> T {
        self.dot(self).sqrt()
    }

    /// Scales this vector to unit length.
    ///
    /// A vector of zero length is left untouched.
    pub fn normalize(&mut self) -> &mut Self {
        let length = self.length();
        if length > T::ZERO {
            *self *= T::ONE / length;
        }

        self
    }

    /// A unit-length copy of this vector; see [`normalize`](Self::normalize).
    pub fn normalized(mut self) -> Self {
        self.normalize();

        self
    }

    /// The cosines of the angles this vector makes with the X, Y and Z axes.
    ///
    /// All three are zero for a zero-length vector.
    pub fn direction_cosines(self) -> (T, T, T) {
        let length = self.length();
        if length > T::ZERO {
            (self.x / length, self.y / length, self.z / length)
        } else {
            (T::ZERO, T::ZERO, T::ZERO)
        }
    }

    /// The angles, in radians, this vector makes with the X, Y and Z axes.
    pub fn direction_angles(self) -> (T, T, T) {
        let (alpha, beta, gamma) = self.direction_cosines();

        (alpha.acos(), beta.acos(), gamma.acos())
    }

    /// The cosine of the angle between this vector and `rhs`.
    ///
    /// Returns zero when either vector has zero length.
    pub fn cos_angle_with(self, rhs: Self) -> T {
        let lengths = self.length() * rhs.length();
        if lengths > T::ZERO {
            self.dot(rhs) / lengths
        } else {
            T::ZERO
        }
    }

    /// The sine of the angle between this vector and `rhs`.
    ///
    /// Returns *one* when either vector has zero length. Note that this differs from the zero
    /// returned by [`cos_angle_with`](Self::cos_angle_with) in the same situation.
    pub fn sin_angle_with(self, rhs: Self) -> T {
        let lengths = self.length() * rhs.length();
        if lengths > T::ZERO {
            self.cross(rhs).length() / lengths
        } else {
            T::ONE
        }
    }

    /// Projects this vector onto the plane with normal `normal`.
    ///
    /// The result is scaled by the squared length of `normal`, so pass a unit normal to obtain
    /// the plain projection.
    pub fn project_to_plane(&mut self, normal: Self) -> &mut Self {
        *self = normal.cross(self.cross(normal));

        self
    }

    /// Compares two vectors with a tolerance of [`EQUALITY_EPSILON`].
    ///
    /// Only the largest *signed* component difference is checked, so a vector that is smaller
    /// along one axis and equal along the others compares equal. This is a deviation check, not
    /// a distance.
    pub fn approx_eq(&self, rhs: &Self) -> bool {
        let dx = self.x - rhs.x;
        let dy = self.y - rhs.y;
        let dz = self.z - rhs.z;
        let d = max(dx, max(dy, dz));
        let epsilon = T::from_f64(EQUALITY_EPSILON);

        !(d > epsilon || d < -epsilon)
    }
}

fn max<T: PartialOrd>(a: T, b: T) -> T {
    if a > b {
        a
    } else {
        b
    }
}

macro_rules! component_views {
    ($($name:ident, $name_mut:ident => $field:ident;)*) => {
        impl<T: Scalar> Vector3<T> {
            $(
                pub fn $name(&self) -> T {
                    self.$field
                }

                pub fn $name_mut(&mut self) -> &mut T {
                    &mut self.$field
                }
            )*
        }
    };
}

// Attitudes are stored as (heading, pitch, roll), geographic coordinates as (longitude,
// latitude, altitude) and colors as (red, green, blue).
component_views! {
    heading, heading_mut => x;
    pitch, pitch_mut => y;
    roll, roll_mut => z;
    longitude, longitude_mut => x;
    latitude, latitude_mut => y;
    altitude, altitude_mut => z;
    red, red_mut => x;
    green, green_mut => y;
    blue, blue_mut => z;
}

impl<T: Scalar> PartialEq for Vector3<T> {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other)
    }
}

impl<T: Scalar> From<[T; 3]> for Vector3<T> {
    fn from([x, y, z]: [T; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl<T: Scalar> From<Vector3<T>> for [T; 3] {
    fn from(v: Vector3<T>) -> Self {
        v.to_array()
    }
}

impl<T: Scalar> Add for Vector3<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl<T: Scalar> AddAssign for Vector3<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: Scalar> Sub for Vector3<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl<T: Scalar> SubAssign for Vector3<T> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<T: Scalar> Neg for Vector3<T> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl<T: Scalar> Mul<T> for Vector3<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl<T: Scalar> MulAssign<T> for Vector3<T> {
    fn mul_assign(&mut self, rhs: T) {
        *self = *self * rhs;
    }
}

macro_rules! impl_scalar_times_vector {
    ($($ty:ty),*) => {
        $(
            impl Mul<Vector3<$ty>> for $ty {
                type Output = Vector3<$ty>;

                fn mul(self, rhs: Vector3<$ty>) -> Self::Output {
                    // Multiplication with a scalar is commutative.
                    rhs * self
                }
            }
        )*
    };
}

impl_scalar_times_vector!(f32, f64);

/// The dot product.
impl<T: Scalar> Mul for Vector3<T> {
    type Output = T;

    fn mul(self, rhs: Self) -> Self::Output {
        self.dot(rhs)
    }
}

/// The cross product.
impl<T: Scalar> BitXor for Vector3<T> {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self::Output {
        self.cross(rhs)
    }
}

impl<T: Scalar> BitXorAssign for Vector3<T> {
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = self.cross(rhs);
    }
}

/// The projection of the left operand along the right one.
impl<T: Scalar> BitAnd for Vector3<T> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.project_onto(rhs)
    }
}

impl<T: Scalar> BitAndAssign for Vector3<T> {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = self.project_onto(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::tests::assert_close;

    #[test]
    fn normalizing_yields_unit_length() {
        for v in [
            Vector3::new(3.0_f32, 4., 0.),
            Vector3::new(-0.001, 0.002, 0.0005),
            Vector3::new(120., -75., 33.),
        ] {
            let mut n = v;
            n.normalize();
            assert_close(n.length() as f64, 1., 1e-6);
            // The direction is kept.
            assert_close(n.cos_angle_with(v) as f64, 1., 1e-6);
        }
    }

    #[test]
    fn normalizing_zero_is_a_no_op() {
        let mut v = Vector3::<f64>::ZERO;
        v.normalize();
        assert_eq!(v.to_array(), [0., 0., 0.]);
    }

    #[test]
    fn cross_product_follows_the_right_hand_rule() {
        let x = Vector3::new(1.0_f64, 0., 0.);
        let y = Vector3::new(0., 1., 0.);
        assert_eq!((x ^ y).to_array(), [0., 0., 1.]);

        let mut v = y;
        v ^= x;
        assert_eq!(v.to_array(), [0., 0., -1.]);
    }

    #[test]
    fn projection_onto_zero_vector_is_zero() {
        let v = Vector3::new(1.0_f32, 2., 3.);
        assert_eq!((v & Vector3::ZERO).to_array(), [0., 0., 0.]);

        let onto_x = v & Vector3::new(5., 0., 0.);
        assert_eq!(onto_x.to_array(), [1., 0., 0.]);
    }

    #[test]
    fn angle_fallbacks_for_zero_length() {
        let v = Vector3::new(1.0_f64, 1., 0.);
        assert_eq!(v.cos_angle_with(Vector3::ZERO), 0.);
        assert_eq!(v.sin_angle_with(Vector3::ZERO), 1.);
        assert_eq!(Vector3::<f64>::ZERO.direction_cosines(), (0., 0., 0.));
    }

    #[test]
    fn angles_between_axes() {
        let x = Vector3::new(2.0_f64, 0., 0.);
        let y = Vector3::new(0., 3., 0.);
        assert_close(x.cos_angle_with(y), 0., 1e-12);
        assert_close(x.sin_angle_with(y), 1., 1e-12);

        let (alpha, beta, gamma) = Vector3::new(0.0_f64, 0., 7.).direction_angles();
        assert_close(alpha, std::f64::consts::FRAC_PI_2, 1e-12);
        assert_close(beta, std::f64::consts::FRAC_PI_2, 1e-12);
        assert_close(gamma, 0., 1e-12);
    }

    #[test]
    fn plane_projection_drops_the_normal_component() {
        let mut v = Vector3::new(3.0_f64, 4., 5.);
        v.project_to_plane(Vector3::new(0., 1., 0.));
        assert_eq!(v.to_array(), [3., 0., 5.]);
    }

    #[test]
    fn equality_checks_only_the_largest_signed_deviation() {
        let v = Vector3::new(1.0_f32, 1., 1.);
        assert_eq!(v, Vector3::new(1.0005, 1., 1.));
        assert_ne!(v, Vector3::new(1., 1.01, 1.));
        // Only the maximum signed difference is compared: being far *below* on one axis while
        // exactly equal on another still compares equal.
        assert_eq!(v, Vector3::new(6., 1., 1.));
        assert_ne!(v, Vector3::new(-4., -4., -4.));
    }

    #[test]
    fn named_views_alias_the_components() {
        let mut attitude = Vector3::new(10.0_f32, 20., 30.);
        *attitude.pitch_mut() += 5.;
        assert_eq!(attitude.heading(), 10.);
        assert_eq!(attitude.y, 25.);
        assert_eq!(attitude.blue(), attitude.roll());
    }

    #[test]
    fn cast_changes_precision() {
        let v = Vector3::new(0.1_f64, 0.2, 0.3).cast::<f32>();
        assert_eq!(v.to_array(), [0.1_f32, 0.2, 0.3]);
        assert_eq!(v.as_slice(), &[0.1_f32, 0.2, 0.3]);
    }
}
