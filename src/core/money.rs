//! Fixed-point money stored as integer cents.
//!
//! Every amount that touches a balance, ledger or charge goes through [`Money`]. Values
//! are held as `i64` cents so sums across thousands of rows never drift, and the
//! database columns that back them are plain integers. Untrusted input (strings, floats,
//! decimals) is only accepted through the checked constructors, which reject anything
//! with more than two decimal places or outside [`Money::MAX`].

use crate::errors::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// A monetary amount in cents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero dollars
    pub const ZERO: Self = Self(0);
    /// Largest magnitude accepted from untrusted input: $1,000,000.00
    pub const MAX: Self = Self(100_000_000);

    /// Creates an amount from cents. Trusted input only (database columns, constants).
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates an amount from whole dollars.
    #[must_use]
    pub const fn from_major(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    /// The amount in cents, as persisted.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Parses an untrusted decimal string such as `"12.50"`.
    pub fn parse(input: &str) -> Result<Self> {
        let decimal = Decimal::from_str_exact(input.trim()).map_err(|e| Error::InvalidAmount {
            reason: format!("'{input}' is not a decimal amount: {e}"),
        })?;
        Self::from_decimal(decimal)
    }

    /// Converts an untrusted float, rounding to the nearest cent.
    pub fn try_from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::InvalidAmount {
                reason: format!("{value} is not a finite number"),
            });
        }
        let decimal = Decimal::try_from(value).map_err(|e| Error::InvalidAmount {
            reason: format!("{value} cannot be represented: {e}"),
        })?;
        Self::from_decimal(decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Converts an exact decimal. More than two significant decimal places is rejected.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.normalize().scale() > 2 {
            return Err(Error::InvalidAmount {
                reason: format!("{value} has more than 2 decimal places"),
            });
        }
        let cents = value
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.to_i64())
            .ok_or_else(|| Error::InvalidAmount {
                reason: format!("{value} is out of range"),
            })?;
        let money = Self(cents);
        if money.abs() > Self::MAX {
            return Err(Error::InvalidAmount {
                reason: format!("{money} exceeds the maximum of {}", Self::MAX),
            });
        }
        Ok(money)
    }

    /// Validates an amount that must be strictly positive and within bounds.
    pub fn ensure_positive(self) -> Result<Self> {
        if self.0 <= 0 {
            return Err(Error::InvalidAmount {
                reason: format!("{self} must be greater than zero"),
            });
        }
        if self > Self::MAX {
            return Err(Error::InvalidAmount {
                reason: format!("{self} exceeds the maximum of {}", Self::MAX),
            });
        }
        Ok(self)
    }

    /// The amount as a decimal with two places.
    #[must_use]
    pub fn as_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Multiplies by a scalar (fee or credit multiplier), rounding half away from zero.
    pub fn mul_decimal(self, factor: Decimal) -> Result<Self> {
        let cents = Decimal::from(self.0)
            .checked_mul(factor)
            .map(|product| product.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|rounded| rounded.to_i64())
            .ok_or_else(|| Error::InvalidAmount {
                reason: format!("{self} x {factor} is out of range"),
            })?;
        Ok(Self(cents))
    }

    /// Splits into `parts` shares that sum exactly to `self`; leftover cents go to the
    /// first shares.
    pub fn split_evenly(self, parts: usize) -> Result<Vec<Self>> {
        let count = i64::try_from(parts)?;
        if count == 0 {
            return Err(Error::InvalidAmount {
                reason: "cannot split an amount into zero shares".to_string(),
            });
        }
        let base = self.0 / count;
        let remainder = self.0 % count;
        Ok((0..count)
            .map(|i| Self(base + i64::from(i < remainder)))
            .collect())
    }

    /// Formats with exactly two decimal places, no currency symbol (`"-12.05"`).
    #[must_use]
    pub fn to_fixed_string(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }

    /// Whether the amount is exactly zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether the amount is greater than zero
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Whether the amount is below zero
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Absolute value
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-${}", self.abs().to_fixed_string())
        } else {
            write!(f, "${}", self.to_fixed_string())
        }
    }
}

impl FromStr for Money {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Self> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
