//! Exact Money Arithmetic
//!
//! Balances, stakes and payouts are arbitrary-precision integers of minor
//! currency units. Floats appear only as multipliers and display ratios;
//! they never round-trip into a balance.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Denominator for basis-point fees (100 bps = 1%).
pub const BASIS_POINTS: u32 = 10_000;

/// House rake taken from winnings.
pub const RAKE_BPS: u32 = 200;

/// Share of burned stakes diverted into the jackpot.
pub const JACKPOT_BPS: u32 = 100;

/// Money conversion errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// NaN or infinite input.
    #[error("amount is not a finite number")]
    NotFinite,
    /// Negative input where only non-negative amounts make sense.
    #[error("amount is negative")]
    Negative,
}

/// An amount of minor currency units.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigInt);

impl Amount {
    /// The zero amount.
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// Build from a machine integer.
    pub fn from_minor(units: i64) -> Self {
        Self(BigInt::from(units))
    }

    /// Convert a client-supplied number into whole units, truncating the
    /// fractional part.
    pub fn from_whole_units(value: f64) -> Result<Self, MoneyError> {
        if !value.is_finite() {
            return Err(MoneyError::NotFinite);
        }
        if value < 0.0 {
            return Err(MoneyError::Negative);
        }
        BigInt::from_f64(value.floor())
            .map(Self)
            .ok_or(MoneyError::NotFinite)
    }

    /// True for exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True for strictly negative amounts.
    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// True for strictly positive amounts.
    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    /// Lossy conversion for display, metrics and histograms.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::MAX)
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// `self * numerator / denominator`, truncating toward zero.
    ///
    /// A zero denominator yields zero.
    pub fn mul_div(&self, numerator: &Amount, denominator: &Amount) -> Amount {
        if denominator.is_zero() {
            return Amount::zero();
        }
        Amount((&self.0 * &numerator.0) / &denominator.0)
    }
}

impl From<BigInt> for Amount {
    fn from(value: BigInt) -> Self {
        Self(value)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self::from_minor(value)
    }
}

impl From<i32> for Amount {
    fn from(value: i32) -> Self {
        Self(BigInt::from(value))
    }
}

impl From<u32> for Amount {
    fn from(value: u32) -> Self {
        Self(BigInt::from(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Amount> for &'a Amount {
    type Output = Amount;

    fn add(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl<'a> Sub<&'a Amount> for &'a Amount {
    type Output = Amount;

    fn sub(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 - &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl SubAssign<&Amount> for Amount {
    fn sub_assign(&mut self, rhs: &Amount) {
        self.0 -= &rhs.0;
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), |acc, a| &acc + a)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), |acc, a| acc + a)
    }
}

// Amounts travel as JSON numbers while they fit in an i64 and as decimal
// strings beyond that, so clients never see a silently rounded balance.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.to_i64() {
            Some(v) => serializer.serialize_i64(v),
            None => serializer.serialize_str(&self.0.to_string()),
        }
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a decimal integer string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Ok(Amount::from_minor(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount(BigInt::from(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse::<BigInt>()
            .map(Amount)
            .map_err(|_| E::custom(format!("invalid amount string: {v}")))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

// =============================================================================
// FEES AND MULTIPLIERS
// =============================================================================

/// `amount * bps / 10000`, truncating toward zero.
///
/// Truncation always favors the house when the result is a fee.
pub fn apply_basis_points(amount: &Amount, bps: u32) -> Amount {
    if amount.is_zero() || bps == 0 {
        return Amount::zero();
    }
    Amount((&amount.0 * BigInt::from(bps)) / BigInt::from(BASIS_POINTS))
}

/// `amount - apply_basis_points(amount, bps)`.
pub fn subtract_basis_points(amount: &Amount, bps: u32) -> Amount {
    amount - &apply_basis_points(amount, bps)
}

/// Multiply an amount by a float multiplier without binary-float error.
///
/// The multiplier is taken through its shortest decimal representation and
/// applied as an exact rational; the product is truncated toward zero.
/// Non-finite or non-positive multipliers yield zero.
pub fn multiply_by_multiplier(amount: &Amount, multiplier: f64) -> Amount {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Amount::zero();
    }
    let (numerator, denominator) = decimal_fraction(multiplier);
    Amount((&amount.0 * numerator) / denominator)
}

/// `part / whole * 100` for display only.
pub fn percentage_of(part: &Amount, whole: &Amount) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    // Six decimal digits of the ratio, computed exactly before going to f64.
    let scaled = (&part.0 * BigInt::from(100_000_000u64)) / &whole.0;
    scaled.to_f64().unwrap_or(0.0) / 1_000_000.0
}

/// Split a positive finite float into `numerator / 10^k`.
///
/// `Display` for `f64` prints the shortest round-tripping decimal and never
/// switches to exponent notation.
fn decimal_fraction(value: f64) -> (BigInt, BigInt) {
    let repr = format!("{value}");
    let (int_part, frac_part) = match repr.split_once('.') {
        Some((i, f)) => (i, f),
        None => (repr.as_str(), ""),
    };
    let digits = format!("{int_part}{frac_part}");
    let numerator = digits.parse::<BigInt>().unwrap_or_else(|_| BigInt::zero());
    let denominator = num_traits::pow(BigInt::from(10u32), frac_part.len());
    (numerator, denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_points_truncate() {
        assert_eq!(apply_basis_points(&Amount::from(300), RAKE_BPS), Amount::from(6));
        assert_eq!(apply_basis_points(&Amount::from(49), RAKE_BPS), Amount::from(0));
        assert_eq!(apply_basis_points(&Amount::from(99), 150), Amount::from(1));
        assert_eq!(subtract_basis_points(&Amount::from(300), RAKE_BPS), Amount::from(294));
    }

    #[test]
    fn test_multiplier_is_decimal_exact() {
        // 0.1 * 3 style drift must not leak into money
        assert_eq!(multiply_by_multiplier(&Amount::from(100), 1.1), Amount::from(110));
        assert_eq!(multiply_by_multiplier(&Amount::from(1000), 2.01), Amount::from(2010));
        assert_eq!(multiply_by_multiplier(&Amount::from(3), 1.29), Amount::from(3));
        assert_eq!(multiply_by_multiplier(&Amount::from(7), 1.5), Amount::from(10));
        assert_eq!(multiply_by_multiplier(&Amount::from(50), f64::NAN), Amount::zero());
        assert_eq!(multiply_by_multiplier(&Amount::from(50), -2.0), Amount::zero());
    }

    #[test]
    fn test_large_amounts_stay_exact() {
        let huge: Amount = "123456789012345678901234567890".parse::<BigInt>().unwrap().into();
        let doubled = multiply_by_multiplier(&huge, 2.0);
        assert_eq!(doubled.to_string(), "246913578024691357802469135780");

        let json = serde_json::to_string(&huge).unwrap();
        assert_eq!(json, "\"123456789012345678901234567890\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, huge);
    }

    #[test]
    fn test_small_amounts_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&Amount::from(950)).unwrap(), "950");
        let parsed: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, Amount::from(42));
    }

    #[test]
    fn test_whole_units() {
        assert_eq!(Amount::from_whole_units(12.9).unwrap(), Amount::from(12));
        assert_eq!(Amount::from_whole_units(f64::INFINITY), Err(MoneyError::NotFinite));
        assert_eq!(Amount::from_whole_units(-1.0), Err(MoneyError::Negative));
    }

    #[test]
    fn test_percentage_of() {
        assert_eq!(percentage_of(&Amount::from(294), &Amount::from(300)), 98.0);
        assert_eq!(percentage_of(&Amount::from(1), &Amount::zero()), 0.0);
    }
}
