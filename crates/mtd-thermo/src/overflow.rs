// crates/mtd-thermo/src/overflow.rs

//! Exponent-scaled scalars and the precision ladder.
//!
//! Partition functions overflow ordinary floats quickly (a handful of
//! clamped pairs is enough to leave `f32` range). The ladder runs a dynamic
//! program in `f32`, retries in `f64` on overflow, and finally falls back
//! to an exponent-scaled pair `(mantissa, exp2)` whose mantissa is
//! renormalized after every combine. The tier applies to a whole matrix,
//! never per element.

use serde::{Deserialize, Serialize};

/// Precision tiers, cheapest first.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Plain `f32` arithmetic.
    F32,
    /// Plain `f64` arithmetic.
    F64,
    /// `(f32, i64)` exponent-scaled arithmetic.
    Scaled32,
    /// `(f64, i64)` exponent-scaled arithmetic.
    Scaled64,
}

impl Tier {
    /// The promotion ladder, in evaluation order.
    pub const LADDER: [Self; 4] = [Self::F32, Self::F64, Self::Scaled32, Self::Scaled64];
}

/// Scalar operations a partition-function dynamic program needs. All tiers
/// implement it so the same program text runs at every rung.
pub trait PfScalar: Copy {
    /// Additive identity.
    fn zero() -> Self;
    /// Multiplicative identity.
    fn one() -> Self;
    /// `exp(x)` as a scalar.
    fn from_ln(x: f64) -> Self;
    /// Sum.
    fn add(self, other: Self) -> Self;
    /// Product.
    fn mul(self, other: Self) -> Self;
    /// Natural log of the scalar (−∞ for zero).
    fn ln(self) -> f64;
    /// `self / denominator` as an `f64` (used for probabilities; the
    /// result is always in unit range).
    fn ratio(self, denominator: Self) -> f64;
    /// False once the scalar has left representable range.
    fn finite(self) -> bool;
}

impl PfScalar for f32 {
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_ln(x: f64) -> Self {
        x.exp() as f32
    }
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn mul(self, other: Self) -> Self {
        self * other
    }
    fn ln(self) -> f64 {
        f64::from(self).ln()
    }
    fn ratio(self, denominator: Self) -> f64 {
        f64::from(self) / f64::from(denominator)
    }
    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl PfScalar for f64 {
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_ln(x: f64) -> Self {
        x.exp()
    }
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn mul(self, other: Self) -> Self {
        self * other
    }
    fn ln(self) -> f64 {
        f64::ln(self)
    }
    fn ratio(self, denominator: Self) -> f64 {
        self / denominator
    }
    fn finite(self) -> bool {
        self.is_finite()
    }
}

/// Exponent-scaled scalar: `mantissa · 2^exp`, mantissa renormalized into
/// `[1, 2)` (or zero) after every combine.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExpFloat<T> {
    /// Normalized mantissa.
    pub mantissa: T,
    /// Base-2 exponent.
    pub exp: i64,
}

macro_rules! impl_expfloat {
    ($t:ty) => {
        impl ExpFloat<$t> {
            const LN2: f64 = std::f64::consts::LN_2;

            fn renormalized(mantissa: $t, exp: i64) -> Self {
                if mantissa == 0.0 {
                    return Self { mantissa: 0.0, exp: 0 };
                }
                let shift = mantissa.abs().log2().floor() as i64;
                let mantissa = mantissa * (2.0 as $t).powi(-shift as i32);
                Self { mantissa, exp: exp + shift }
            }
        }

        impl PfScalar for ExpFloat<$t> {
            fn zero() -> Self {
                Self { mantissa: 0.0, exp: 0 }
            }
            fn one() -> Self {
                Self { mantissa: 1.0, exp: 0 }
            }
            fn from_ln(x: f64) -> Self {
                let exp = (x / Self::LN2).floor();
                let mantissa = ((x - exp * Self::LN2).exp()) as $t;
                Self::renormalized(mantissa, exp as i64)
            }
            fn add(self, other: Self) -> Self {
                if self.mantissa == 0.0 {
                    return other;
                }
                if other.mantissa == 0.0 {
                    return self;
                }
                let (hi, lo) = if self.exp >= other.exp { (self, other) } else { (other, self) };
                let shift = (hi.exp - lo.exp).min(128) as i32;
                let m = hi.mantissa + lo.mantissa * (2.0 as $t).powi(-shift);
                Self::renormalized(m, hi.exp)
            }
            fn mul(self, other: Self) -> Self {
                Self::renormalized(self.mantissa * other.mantissa, self.exp + other.exp)
            }
            fn ln(self) -> f64 {
                if self.mantissa == 0.0 {
                    f64::NEG_INFINITY
                } else {
                    f64::from(self.mantissa).ln() + self.exp as f64 * Self::LN2
                }
            }
            fn ratio(self, denominator: Self) -> f64 {
                if self.mantissa == 0.0 {
                    return 0.0;
                }
                let shift = (self.exp - denominator.exp) as i32;
                f64::from(self.mantissa) / f64::from(denominator.mantissa)
                    * 2.0_f64.powi(shift)
            }
            fn finite(self) -> bool {
                self.mantissa.is_finite()
            }
        }
    };
}

impl_expfloat!(f32);
impl_expfloat!(f64);

/// `log(exp(a) + exp(b))` without leaving log space.
#[must_use]
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scaled_survives_huge_products() {
        let big = ExpFloat::<f64>::from_ln(500.0);
        let product = big.mul(big).mul(big);
        assert!(product.finite());
        assert!((product.ln() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn add_matches_log_sum_exp() {
        let a = ExpFloat::<f64>::from_ln(3.0);
        let b = ExpFloat::<f64>::from_ln(1.0);
        assert!((a.add(b).ln() - log_sum_exp(3.0, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn tiers_agree_in_range() {
        let x = 7.25_f64;
        let ys = [
            <f32 as PfScalar>::from_ln(x).ln() as f64,
            <f64 as PfScalar>::from_ln(x).ln(),
            ExpFloat::<f32>::from_ln(x).ln() as f64,
            ExpFloat::<f64>::from_ln(x).ln(),
        ];
        for y in ys {
            assert!((y - x).abs() < 1e-5, "{y} vs {x}");
        }
    }

    proptest! {
        #[test]
        fn scaled_ratio_matches_plain(a in -40.0f64..40.0, b in -40.0f64..40.0) {
            let ea = ExpFloat::<f64>::from_ln(a);
            let eb = ExpFloat::<f64>::from_ln(b);
            let want = (a - b).exp();
            prop_assert!((ea.ratio(eb) - want).abs() <= want * 1e-12 + 1e-300);
        }
    }
}
