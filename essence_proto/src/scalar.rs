use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Milliseconds in one accrual day. Rates are expressed per day; elapsed
/// time arrives in milliseconds.
pub const MS_PER_DAY: u64 = 86_400_000;

/// Fixed-point scalar with 6 decimal places of precision.
///
/// Amounts, rates, multipliers and costs all use this representation so the
/// checkpoint math on the server and the extrapolation math on the client
/// produce bit-identical results.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Scalar(pub i64);

impl Scalar {
    pub const SCALE: i64 = 1_000_000;

    pub fn from_f32(value: f32) -> Self {
        Self((value * Self::SCALE as f32).round() as i64)
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value * Self::SCALE)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn one() -> Self {
        Self(Self::SCALE)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        match self.cmp(&min) {
            Ordering::Less => min,
            Ordering::Equal | Ordering::Greater => {
                if self > max {
                    max
                } else {
                    self
                }
            }
        }
    }
}

/// Essence earned by accruing at `rate_per_day` for `elapsed_ms`.
///
/// Computed in i128 on raw units: a 50 ms animation tick at a 0.1/day rate is
/// far below one raw unit, and folding through a fixed-point day count would
/// truncate it to zero. The absolute form `base + accrue_over_ms(rate, total
/// elapsed)` stays exact for day-multiple elapsed times.
pub fn accrue_over_ms(rate_per_day: Scalar, elapsed_ms: u64) -> Scalar {
    let earned = (rate_per_day.0 as i128 * elapsed_ms as i128) / MS_PER_DAY as i128;
    Scalar(earned as i64)
}

impl Add for Scalar {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Scalar {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Scalar {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Scalar {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul for Scalar {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self((self.0 * rhs.0) / Self::SCALE)
    }
}

impl MulAssign for Scalar {
    fn mul_assign(&mut self, rhs: Self) {
        self.0 = (self.0 * rhs.0) / Self::SCALE;
    }
}

impl Div for Scalar {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self((self.0 * Self::SCALE) / rhs.0)
    }
}

impl Neg for Scalar {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Scalar {
    // Rendered from the raw integer, not via f32: display strings are part
    // of the tested surface and must be exact.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:06}",
            sign,
            magnitude / Self::SCALE as u64,
            magnitude % Self::SCALE as u64
        )
    }
}

pub fn scalar_from_f32(value: f32) -> Scalar {
    Scalar::from_f32(value)
}

pub fn scalar_zero() -> Scalar {
    Scalar::zero()
}

pub fn scalar_one() -> Scalar {
    Scalar::one()
}
