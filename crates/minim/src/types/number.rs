//! The numeric tower: exact integers and rationals, inexact reals and
//! complex numbers.
//!
//! Binary operations promote both operands to the numerically broader
//! variant (integer < rational < real < complex) before applying. Exactness
//! is preserved when both operands are exact; any inexact operand makes the
//! result inexact. Division of two exact integers that does not divide
//! evenly yields a rational.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::str::FromStr;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::{RunError, RunResult};
use crate::types::rational::Rational;

/// A number in the tower. Exactness is a function of the variant:
/// `Int` and `Rational` are exact, `Real` and `Complex` are inexact.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Number {
    Int(BigInt),
    Rational(Rational),
    Real(f64),
    Complex { re: f64, im: f64 },
}

/// Promotion rank: the smaller the rank, the broader the variant.
/// Mirrors integer < rational < real < complex.
fn rank(n: &Number) -> u8 {
    match n {
        Number::Int(_) => 3,
        Number::Rational(_) => 2,
        Number::Real(_) => 1,
        Number::Complex { .. } => 0,
    }
}

impl Number {
    pub fn from_i64(value: i64) -> Self {
        Self::Int(BigInt::from(value))
    }

    /// Builds an exact rational, collapsing denominator 1 to an integer.
    /// A zero denominator is a numeric error.
    pub fn rational(numerator: BigInt, denominator: BigInt) -> RunResult<Self> {
        let r = Rational::new(numerator, denominator)?;
        Ok(Self::from_rational(r))
    }

    fn from_rational(r: Rational) -> Self {
        if r.is_integer() {
            let (n, _) = r.into_parts();
            Self::Int(n)
        } else {
            Self::Rational(r)
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Rational(_))
    }

    /// Converts to the given rank. Only broadening conversions occur.
    fn to_rank(&self, target: u8) -> Self {
        match (self, target) {
            (Self::Int(i), 2) => Self::Rational(Rational::from_int(i.clone())),
            (Self::Int(i), 1) => Self::Real(i.to_f64().unwrap_or(f64::NAN)),
            (Self::Int(i), 0) => Self::Complex {
                re: i.to_f64().unwrap_or(f64::NAN),
                im: 0.0,
            },
            (Self::Rational(r), 1) => Self::Real(r.to_f64()),
            (Self::Rational(r), 0) => Self::Complex {
                re: r.to_f64(),
                im: 0.0,
            },
            (Self::Real(x), 0) => Self::Complex { re: *x, im: 0.0 },
            _ => self.clone(),
        }
    }

    /// Promotes both operands to the broader of the two variants.
    fn promote(&self, other: &Self) -> (Self, Self) {
        let target = rank(self).min(rank(other));
        (self.to_rank(target), other.to_rank(target))
    }

    pub fn add(&self, other: &Self) -> Self {
        match self.promote(other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a + b),
            (Self::Rational(a), Self::Rational(b)) => Self::from_rational(a.add(&b)),
            (Self::Real(a), Self::Real(b)) => Self::Real(a + b),
            (Self::Complex { re: ar, im: ai }, Self::Complex { re: br, im: bi }) => Self::Complex {
                re: ar + br,
                im: ai + bi,
            },
            _ => unreachable!("operands share a rank after promotion"),
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        match self.promote(other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a - b),
            (Self::Rational(a), Self::Rational(b)) => Self::from_rational(a.sub(&b)),
            (Self::Real(a), Self::Real(b)) => Self::Real(a - b),
            (Self::Complex { re: ar, im: ai }, Self::Complex { re: br, im: bi }) => Self::Complex {
                re: ar - br,
                im: ai - bi,
            },
            _ => unreachable!("operands share a rank after promotion"),
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        match self.promote(other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a * b),
            (Self::Rational(a), Self::Rational(b)) => Self::from_rational(a.mul(&b)),
            (Self::Real(a), Self::Real(b)) => Self::Real(a * b),
            (Self::Complex { re: ar, im: ai }, Self::Complex { re: br, im: bi }) => Self::Complex {
                re: ar * br - ai * bi,
                im: ar * bi + ai * br,
            },
            _ => unreachable!("operands share a rank after promotion"),
        }
    }

    /// Division. Exact zero divisors are a numeric error; inexact zero
    /// divisors produce the IEEE infinity/nan result.
    pub fn div(&self, other: &Self) -> RunResult<Self> {
        match self.promote(other) {
            (Self::Int(a), Self::Int(b)) => {
                if b.is_zero() {
                    return Err(RunError::numeric("division by exact zero"));
                }
                let (q, r) = a.div_rem(&b);
                if r.is_zero() {
                    Ok(Self::Int(q))
                } else {
                    Self::rational(a, b)
                }
            }
            (Self::Rational(a), Self::Rational(b)) => Ok(Self::from_rational(a.div(&b)?)),
            (Self::Real(a), Self::Real(b)) => Ok(Self::Real(a / b)),
            (Self::Complex { re: ar, im: ai }, Self::Complex { re: br, im: bi }) => {
                let denom = br * br + bi * bi;
                Ok(Self::Complex {
                    re: (ar * br + ai * bi) / denom,
                    im: (ai * br - ar * bi) / denom,
                })
            }
            _ => unreachable!("operands share a rank after promotion"),
        }
    }

    pub fn neg(&self) -> Self {
        match self {
            Self::Int(i) => Self::Int(-i.clone()),
            Self::Rational(r) => Self::Rational(r.neg()),
            Self::Real(x) => Self::Real(-x),
            Self::Complex { re, im } => Self::Complex { re: -re, im: -im },
        }
    }

    /// Absolute value; for complex numbers the magnitude, which is real.
    pub fn abs(&self) -> Self {
        match self {
            Self::Int(i) => Self::Int(i.abs()),
            Self::Rational(r) => Self::Rational(r.abs()),
            Self::Real(x) => Self::Real(x.abs()),
            Self::Complex { re, im } => Self::Real(re.hypot(*im)),
        }
    }

    /// Numeric equality across the tower (the `=` builtin). Complex numbers
    /// participate; `1 = 1.0` holds.
    pub fn num_eq(&self, other: &Self) -> bool {
        match self.promote(other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Rational(a), Self::Rational(b)) => a.cmp_value(&b) == Ordering::Equal,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Complex { re: ar, im: ai }, Self::Complex { re: br, im: bi }) => ar == br && ai == bi,
            _ => unreachable!("operands share a rank after promotion"),
        }
    }

    /// Ordering for `<` / `<=` / `>` / `>=`. Complex numbers have no order.
    pub fn cmp_value(&self, other: &Self) -> RunResult<Ordering> {
        match self.promote(other) {
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(&b)),
            (Self::Rational(a), Self::Rational(b)) => Ok(a.cmp_value(&b)),
            (Self::Real(a), Self::Real(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| RunError::numeric("comparison with nan")),
            _ => Err(RunError::numeric("complex numbers are not ordered")),
        }
    }

    /// Identity under `eqv?`: same exactness and the same numeric value.
    pub fn eqv(&self, other: &Self) -> bool {
        self.is_exact() == other.is_exact() && self.num_eq(other)
    }

    fn expect_int<'a>(&'a self, op: &str) -> RunResult<&'a BigInt> {
        match self {
            Self::Int(i) => Ok(i),
            _ => Err(RunError::numeric(format!("{op}: integer required"))),
        }
    }

    /// Floor-division modulus: the result takes the sign of the divisor.
    pub fn modulo(&self, other: &Self) -> RunResult<Self> {
        let a = self.expect_int("modulo")?;
        let b = other.expect_int("modulo")?;
        if b.is_zero() {
            return Err(RunError::numeric("modulus by zero"));
        }
        Ok(Self::Int(a.mod_floor(b)))
    }

    /// Truncating remainder: the result takes the sign of the dividend.
    pub fn remainder(&self, other: &Self) -> RunResult<Self> {
        let a = self.expect_int("remainder")?;
        let b = other.expect_int("remainder")?;
        if b.is_zero() {
            return Err(RunError::numeric("modulus by zero"));
        }
        Ok(Self::Int(a % b))
    }

    /// Truncating integer quotient.
    pub fn quotient(&self, other: &Self) -> RunResult<Self> {
        let a = self.expect_int("quotient")?;
        let b = other.expect_int("quotient")?;
        if b.is_zero() {
            return Err(RunError::numeric("division by exact zero"));
        }
        Ok(Self::Int(a / b))
    }

    pub fn gcd(&self, other: &Self) -> RunResult<Self> {
        let a = self.expect_int("gcd")?;
        let b = other.expect_int("gcd")?;
        Ok(Self::Int(a.gcd(b)))
    }

    pub fn lcm(&self, other: &Self) -> RunResult<Self> {
        let a = self.expect_int("lcm")?;
        let b = other.expect_int("lcm")?;
        Ok(Self::Int(a.lcm(b)))
    }

    pub fn is_integer_valued(&self) -> bool {
        match self {
            Self::Int(_) => true,
            Self::Rational(_) => false,
            Self::Real(x) => x.is_finite() && x.fract() == 0.0,
            Self::Complex { .. } => false,
        }
    }

    /// Non-negative integer extraction for index arguments.
    pub fn to_index(&self) -> Option<usize> {
        match self {
            Self::Int(i) => i.to_usize(),
            _ => None,
        }
    }

    /// Writes the external representation.
    pub fn write_repr(&self, out: &mut String) {
        match self {
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Rational(r) => {
                let _ = write!(out, "{}/{}", r.numerator(), r.denominator());
            }
            Self::Real(x) => write_real(out, *x),
            Self::Complex { re, im } => {
                write_real(out, *re);
                if !(im.is_nan() || im.is_sign_negative() || im.is_infinite()) {
                    out.push('+');
                }
                write_real(out, *im);
                out.push('i');
            }
        }
    }

    /// Parses the most specific variant that accepts the input:
    /// integer, then rational, then real, then complex.
    pub fn parse(s: &str) -> Option<Self> {
        parse_int(s)
            .or_else(|| parse_rational(s))
            .or_else(|| parse_real(s).map(Self::Real))
            .or_else(|| parse_complex(s))
    }
}

fn write_real(out: &mut String, x: f64) {
    if x.is_nan() {
        out.push_str("+nan.0");
    } else if x.is_infinite() {
        out.push_str(if x > 0.0 { "+inf.0" } else { "-inf.0" });
    } else {
        let mut buffer = ryu::Buffer::new();
        out.push_str(buffer.format(x));
    }
}

fn parse_int(s: &str) -> Option<Number> {
    BigInt::from_str(s).ok().map(Number::Int)
}

fn parse_rational(s: &str) -> Option<Number> {
    let (num, den) = s.split_once('/')?;
    let num = BigInt::from_str(num).ok()?;
    let den = BigInt::from_str(den).ok()?;
    Number::rational(num, den).ok()
}

fn parse_real(s: &str) -> Option<f64> {
    match s {
        "+inf.0" => return Some(f64::INFINITY),
        "-inf.0" => return Some(f64::NEG_INFINITY),
        "+nan.0" | "-nan.0" => return Some(f64::NAN),
        _ => {}
    }
    // Only plain decimal/exponent notation; bare "inf"/"nan" must stay symbols.
    if !s.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
        return None;
    }
    if !s.contains('.') && !s.contains(['e', 'E']) {
        return None;
    }
    f64::from_str(s).ok()
}

fn parse_complex(s: &str) -> Option<Number> {
    let body = s.strip_suffix('i')?;
    // A bare "i" stays a symbol.
    if body.is_empty() {
        return None;
    }
    // Split at the sign introducing the imaginary part: the last '+' or '-'
    // that is neither the leading sign nor part of an exponent.
    let split = body
        .char_indices()
        .rev()
        .find(|&(i, c)| matches!(c, '+' | '-') && i > 0 && !matches!(body.as_bytes()[i - 1], b'e' | b'E'))
        .map(|(i, _)| i);
    let (re_part, im_part) = match split {
        Some(i) => (&body[..i], &body[i..]),
        None => ("", body),
    };
    let re = if re_part.is_empty() {
        0.0
    } else {
        parse_real_or_int(re_part)?
    };
    let im = match im_part {
        "" | "+" => 1.0,
        "-" => -1.0,
        _ => parse_real_or_int(im_part)?,
    };
    Some(Number::Complex { re, im })
}

fn parse_real_or_int(s: &str) -> Option<f64> {
    parse_real(s).or_else(|| {
        BigInt::from_str(s)
            .ok()
            .map(|i| i.to_f64().unwrap_or(f64::NAN))
    })
}
