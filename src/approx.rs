//! Utilities to approximate equality of floating point values.

use crate::tensors::Tensor;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-12;

/// Grades the distance between two values.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self` and `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

/// The approximated equality, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`F64_MIN_ERROR`].
    Precise = 0,

    /// Within [`F64_AVG_ERROR`].
    Partial = 1,

    /// Within [`F64_MAX_ERROR`].
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();

        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq<[f64]> for [f64] {
    /// The worst grade of any pair; slices of different lengths are `Scarce`.
    fn approx_eq(&self, rhs: &[f64]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        let mut eq = ApproxEquality::Precise;
        for (a, b) in self.iter().zip(rhs) {
            eq = eq.max(a.approx_eq(b));
            if eq == ApproxEquality::Scarce {
                break;
            }
        }
        eq
    }
}

impl RelativeEq<Tensor> for Tensor {
    fn approx_eq(&self, rhs: &Tensor) -> ApproxEquality {
        if !self.same_shape(rhs) {
            return ApproxEquality::Scarce;
        }
        self.to_vec()[..].approx_eq(&rhs.to_vec()[..])
    }
}

/// Approximates equality based off the absolute difference.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// True when `a` and `b` are graded `level` or better.
pub fn within<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B, level: ApproxEquality) -> bool {
    a.approx_eq(b) <= level
}
