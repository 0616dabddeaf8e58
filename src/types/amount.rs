//! $STRD token amounts with checked arithmetic.
//!
//! 18 decimal places, stored as `u128` base units. The ledger only ever uses
//! the checked operations; no floating point is involved anywhere.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Number of decimal places for STRD (10^18 units = 1 STRD)
pub const DECIMALS: u32 = 18;

/// One STRD in base units
pub const ONE_STRD: u128 = 10_u128.pow(DECIMALS);

/// Hard ceiling on any single account balance: 10 billion STRD
pub const MAX_SUPPLY: u128 = 10_000_000_000 * ONE_STRD;

/// A token amount in base units.
///
/// Human-readable formats (TOML, JSON) carry the decimal string, e.g.
/// `"1.25"`; binary formats carry the raw `u128`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StrideAmount(u128);

impl StrideAmount {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Create from raw base units
    #[must_use]
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Create from whole STRD
    #[must_use]
    pub const fn from_strd(strd: u64) -> Self {
        Self(strd as u128 * ONE_STRD)
    }

    /// Parse a decimal string such as `"1.25"`
    ///
    /// # Errors
    /// Returns error if the format is invalid or the value overflows
    pub fn from_decimal_str(s: &str) -> Result<Self, AmountError> {
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if frac.len() > DECIMALS as usize || frac.contains('.') {
            return Err(AmountError::TooManyDecimals);
        }

        let whole: u128 = whole.parse().map_err(|_| AmountError::InvalidFormat)?;
        let fractional: u128 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<width$}", width = DECIMALS as usize)
                .parse()
                .map_err(|_| AmountError::InvalidFormat)?
        };

        whole
            .checked_mul(ONE_STRD)
            .and_then(|w| w.checked_add(fractional))
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Get the raw base unit value
    #[must_use]
    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Whole STRD (truncated)
    #[must_use]
    pub const fn whole_strd(&self) -> u128 {
        self.0 / ONE_STRD
    }

    /// Decimal string representation
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        let whole = self.0 / ONE_STRD;
        let frac = self.0 % ONE_STRD;

        if frac == 0 {
            format!("{whole}.0")
        } else {
            let frac_str = format!("{frac:018}");
            format!("{whole}.{}", frac_str.trim_end_matches('0'))
        }
    }

    /// Checked addition
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked addition that also refuses to pass [`MAX_SUPPLY`]
    #[must_use]
    pub fn checked_credit(self, other: Self) -> Option<Self> {
        self.checked_add(other).filter(|sum| sum.0 <= MAX_SUPPLY)
    }

    /// Checked subtraction
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Checked multiplication by an integer factor
    #[must_use]
    pub fn checked_mul(self, factor: u128) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    /// Saturating subtraction (floors at 0)
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Check if amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Serialize for StrideAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_decimal_string())
        } else {
            serializer.serialize_u128(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for StrideAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_decimal_str(&s).map_err(serde::de::Error::custom)
        } else {
            u128::deserialize(deserializer).map(Self)
        }
    }
}

impl fmt::Debug for StrideAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrideAmount({})", self.to_decimal_string())
    }
}

impl fmt::Display for StrideAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} STRD", self.to_decimal_string())
    }
}

/// Amount parsing errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AmountError {
    /// Invalid number format
    #[error("invalid amount format")]
    InvalidFormat,
    /// Too many decimal places
    #[error("too many decimal places (max {DECIMALS})")]
    TooManyDecimals,
    /// Arithmetic overflow
    #[error("amount overflow")]
    Overflow,
}
