//! Fixed-precision token amounts.
//!
//! Every amount that reaches the chain is an integer number of base units
//! scaled by the token's decimals. User-facing decimal strings are parsed
//! with `rust_decimal` and converted exactly at this boundary; no floating
//! point is involved anywhere in amount handling.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// An exact token amount: raw base units plus the scale they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    raw: u128,
    decimals: u8,
}

/// JSON shape for [`TokenAmount`]. `raw` travels as a decimal string since
/// 128-bit values do not survive JSON number handling.
#[derive(Serialize, Deserialize)]
struct TokenAmountRepr {
    raw: String,
    decimals: u8,
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TokenAmountRepr {
            raw: self.raw.to_string(),
            decimals: self.decimals,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TokenAmountRepr::deserialize(deserializer)?;
        let raw = repr
            .raw
            .parse::<u128>()
            .map_err(|_| D::Error::custom(format!("invalid raw amount '{}'", repr.raw)))?;
        Ok(Self {
            raw,
            decimals: repr.decimals,
        })
    }
}

impl TokenAmount {
    pub const fn from_raw(raw: u128, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub const fn raw(&self) -> u128 {
        self.raw
    }

    pub const fn decimals(&self) -> u8 {
        self.decimals
    }

    pub const fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Parse a user-supplied decimal string into base units.
    ///
    /// Rejects non-positive values, amounts with more fractional digits
    /// than the token supports, and values that overflow 128 bits.
    pub fn parse(text: &str, symbol: &str, decimals: u8) -> Result<Self, ValidationError> {
        let trimmed = text.trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|_| ValidationError::UnparseableAmount(trimmed.to_string()))?;

        if value <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(trimmed.to_string()));
        }

        let normalized = value.normalize();
        if normalized.scale() > decimals as u32 {
            return Err(ValidationError::PrecisionExceeded {
                value: trimmed.to_string(),
                symbol: symbol.to_string(),
                max: decimals,
            });
        }

        let mantissa = normalized.mantissa();
        debug_assert!(mantissa > 0);
        let shift = (decimals as u32) - normalized.scale();
        let factor = 10u128
            .checked_pow(shift)
            .ok_or_else(|| ValidationError::AmountTooLarge(trimmed.to_string()))?;
        let raw = (mantissa as u128)
            .checked_mul(factor)
            .ok_or_else(|| ValidationError::AmountTooLarge(trimmed.to_string()))?;

        Ok(Self { raw, decimals })
    }

    /// Render as a decimal string with trailing fractional zeros trimmed.
    pub fn format_units(&self) -> String {
        let base = 10u128.pow(self.decimals as u32);
        let whole = self.raw / base;
        let frac = self.raw % base;
        if frac == 0 {
            return whole.to_string();
        }
        let padded = format!("{:0width$}", frac, width = self.decimals as usize);
        let trimmed = padded.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }

    /// Scale down by `bps` basis points, rounding toward zero. Used for
    /// slippage floors: `amount.mul_bps_floor(10_000 - slippage_bps)`.
    pub fn mul_bps_floor(&self, bps: u16) -> Self {
        let raw = match self.raw.checked_mul(bps as u128) {
            Some(product) => product / 10_000,
            // Overflow is only reachable for amounts near u128::MAX; divide
            // first and accept the coarser floor.
            None => (self.raw / 10_000) * bps as u128,
        };
        Self {
            raw,
            decimals: self.decimals,
        }
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        if self.decimals != other.decimals {
            return None;
        }
        Some(Self {
            raw: self.raw.checked_add(other.raw)?,
            decimals: self.decimals,
        })
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_units())
    }
}
