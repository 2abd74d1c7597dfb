// SPDX-License-Identifier: MPL-2.0

//! Linear algebra definitions.
//!
//! Both [`Vector3`] and [`Matrix4`] are generic over their element type so that the same code
//! serves single-precision rendering and double-precision bookkeeping. Conversions between
//! element types are always explicit; see [`Vector3::cast`] and [`Matrix4::cast`].

use std::{
    fmt::Debug,
    ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign},
};

mod matrix;
mod vector;

pub use matrix::{Matrix4, PerspectiveData};
pub use vector::Vector3;

/// The element type of vectors and matrices.
pub trait Scalar:
    Copy
    + Debug
    + Default
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    const ZERO: Self;
    const ONE: Self;
    const TWO: Self;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;

    fn sqrt(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn atan(self) -> Self;
    fn acos(self) -> Self;
    fn abs(self) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const ZERO: Self = 0.;
                const ONE: Self = 1.;
                const TWO: Self = 2.;

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn sqrt(self) -> Self {
                    <$ty>::sqrt(self)
                }

                fn sin(self) -> Self {
                    <$ty>::sin(self)
                }

                fn cos(self) -> Self {
                    <$ty>::cos(self)
                }

                fn tan(self) -> Self {
                    <$ty>::tan(self)
                }

                fn atan(self) -> Self {
                    <$ty>::atan(self)
                }

                fn acos(self) -> Self {
                    <$ty>::acos(self)
                }

                fn abs(self) -> Self {
                    <$ty>::abs(self)
                }
            }
        )*
    };
}

impl_scalar!(f32, f64);

/// Converts an angle in degrees to radians.
pub fn deg_to_rad<T: Scalar>(degrees: T) -> T {
    degrees * T::from_f64(std::f64::consts::PI / 180.)
}

/// Converts an angle in radians to degrees.
pub fn rad_to_deg<T: Scalar>(radians: T) -> T {
    radians * T::from_f64(180. / std::f64::consts::PI)
}

/// Wraps an angle in radians into `[0, 2π)`.
pub fn wrap_radians(angle: f64) -> f64 {
    wrap(angle, std::f64::consts::TAU)
}

/// Wraps an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    wrap(angle, 360.)
}

fn wrap(angle: f64, period: f64) -> f64 {
    let angle = angle % period;
    if angle < 0. {
        angle + period
    } else {
        angle
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected}, got {actual} (tolerance {tolerance})",
        );
    }

    #[test]
    fn degrees_and_radians_round_trip() {
        assert_close(deg_to_rad(180.0_f64), std::f64::consts::PI, 1e-12);
        assert_close(rad_to_deg(std::f64::consts::FRAC_PI_2), 90., 1e-12);
        assert_close(rad_to_deg(deg_to_rad(37.5_f32)) as f64, 37.5, 1e-4);
    }

    #[test]
    fn wrapping_lands_in_the_half_open_period() {
        assert_close(wrap_degrees(-90.), 270., 1e-12);
        assert_close(wrap_degrees(720.), 0., 1e-12);
        assert_close(wrap_radians(-std::f64::consts::FRAC_PI_2), 1.5 * std::f64::consts::PI, 1e-12);
    }
}
