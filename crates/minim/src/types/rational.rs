//! Rational numbers for the exact side of the numeric tower.
//!
//! Rationals are always stored in normalized form: the denominator is
//! positive and gcd(numerator, denominator) = 1. A rational whose
//! denominator normalizes to 1 never survives as a rational; the
//! [`Number`](crate::types::Number) constructors collapse it to an integer.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::error::{RunError, RunResult};

/// An exact rational with arbitrary-precision numerator and denominator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rational {
    numerator: BigInt,
    denominator: BigInt,
}

impl Rational {
    /// Creates a normalized rational. A zero denominator is a numeric error.
    pub fn new(numerator: BigInt, denominator: BigInt) -> RunResult<Self> {
        if denominator.is_zero() {
            return Err(RunError::numeric("division by exact zero"));
        }
        let (n, d) = Self::normalize(numerator, denominator);
        Ok(Self {
            numerator: n,
            denominator: d,
        })
    }

    /// Ensures a positive denominator and reduced form.
    fn normalize(mut numerator: BigInt, mut denominator: BigInt) -> (BigInt, BigInt) {
        if denominator.is_negative() {
            numerator = -numerator;
            denominator = -denominator;
        }
        let g = numerator.gcd(&denominator);
        if !g.is_one() && !g.is_zero() {
            numerator /= &g;
            denominator /= &g;
        }
        if numerator.is_zero() {
            denominator = BigInt::one();
        }
        (numerator, denominator)
    }

    pub fn from_int(value: BigInt) -> Self {
        Self {
            numerator: value,
            denominator: BigInt::one(),
        }
    }

    pub fn numerator(&self) -> &BigInt {
        &self.numerator
    }

    pub fn denominator(&self) -> &BigInt {
        &self.denominator
    }

    /// True when the denominator is 1, i.e. the value is an integer.
    pub fn is_integer(&self) -> bool {
        self.denominator.is_one()
    }

    /// Splits into numerator and denominator, consuming self.
    pub fn into_parts(self) -> (BigInt, BigInt) {
        (self.numerator, self.denominator)
    }

    pub fn add(&self, other: &Self) -> Self {
        let n = &self.numerator * &other.denominator + &other.numerator * &self.denominator;
        let d = &self.denominator * &other.denominator;
        let (n, d) = Self::normalize(n, d);
        Self {
            numerator: n,
            denominator: d,
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        let n = &self.numerator * &other.denominator - &other.numerator * &self.denominator;
        let d = &self.denominator * &other.denominator;
        let (n, d) = Self::normalize(n, d);
        Self {
            numerator: n,
            denominator: d,
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        let n = &self.numerator * &other.numerator;
        let d = &self.denominator * &other.denominator;
        let (n, d) = Self::normalize(n, d);
        Self {
            numerator: n,
            denominator: d,
        }
    }

    pub fn div(&self, other: &Self) -> RunResult<Self> {
        if other.numerator.is_zero() {
            return Err(RunError::numeric("division by exact zero"));
        }
        Self::new(
            &self.numerator * &other.denominator,
            &self.denominator * &other.numerator,
        )
    }

    pub fn abs(&self) -> Self {
        Self {
            numerator: self.numerator.abs(),
            denominator: self.denominator.clone(),
        }
    }

    pub fn neg(&self) -> Self {
        Self {
            numerator: -self.numerator.clone(),
            denominator: self.denominator.clone(),
        }
    }

    /// Total order via cross-multiplication; denominators are positive so no
    /// sign flip is needed.
    pub fn cmp_value(&self, other: &Self) -> Ordering {
        let lhs = &self.numerator * &other.denominator;
        let rhs = &other.numerator * &self.denominator;
        lhs.cmp(&rhs)
    }

    /// Lossy conversion for promotion to the inexact side of the tower.
    pub fn to_f64(&self) -> f64 {
        let n = self.numerator.to_f64().unwrap_or(f64::NAN);
        let d = self.denominator.to_f64().unwrap_or(f64::NAN);
        n / d
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    fn rat(n: i64, d: i64) -> Rational {
        Rational::new(BigInt::from(n), BigInt::from(d)).unwrap()
    }

    #[test]
    fn construction_normalizes() {
        assert_eq!(rat(2, 4), rat(1, 2));
        assert_eq!(rat(1, -3), rat(-1, 3));
        assert_eq!(rat(-2, -4), rat(1, 2));
        assert_eq!(rat(0, 7), rat(0, 1));
        assert!(rat(3, 1).is_integer());
        assert!(!rat(3, 2).is_integer());
    }

    #[test]
    fn zero_denominator_is_an_error() {
        assert!(Rational::new(BigInt::one(), BigInt::zero()).is_err());
    }

    #[test]
    fn arithmetic_stays_reduced() {
        assert_eq!(rat(1, 3).add(&rat(1, 6)), rat(1, 2));
        assert_eq!(rat(1, 2).sub(&rat(1, 3)), rat(1, 6));
        assert_eq!(rat(2, 3).mul(&rat(3, 4)), rat(1, 2));
        assert_eq!(rat(1, 2).div(&rat(3, 2)).unwrap(), rat(1, 3));
        assert!(rat(1, 2).div(&rat(0, 1)).is_err());
    }

    #[test]
    fn comparison_uses_cross_multiplication() {
        assert_eq!(rat(1, 3).cmp_value(&rat(1, 2)), Ordering::Less);
        assert_eq!(rat(-1, 2).cmp_value(&rat(-1, 3)), Ordering::Less);
        assert_eq!(rat(2, 4).cmp_value(&rat(1, 2)), Ordering::Equal);
    }

    #[test]
    fn huge_components_survive() {
        let big = BigInt::from_str("123456789012345678901234567890").unwrap();
        let r = Rational::new(big.clone(), BigInt::from(3)).unwrap();
        assert_eq!(r.numerator(), &big);
        assert_eq!(r.denominator(), &BigInt::from(3));
    }
}
