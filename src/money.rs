//! Token Unit Conversion
//!
//! Chain amounts are raw integers (e.g. 5_000_000 for 5 USDT at 6 decimals);
//! the ledger stores `Decimal` token amounts. All conversions go through
//! [`TokenUnits`], which is built from the configured token decimals so that a
//! token with different precision only needs a config change.
//!
//! ```rust
//! use custody_settlement::money::TokenUnits;
//! use rust_decimal::Decimal;
//!
//! let units = TokenUnits::new(6).unwrap();
//! assert_eq!(units.parse_raw("5000000").unwrap(), Decimal::from(5));
//! assert_eq!(units.to_raw(Decimal::new(15, 1)).unwrap(), 1_500_000);
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Largest scale `rust_decimal` can represent
pub const MAX_DECIMALS: u32 = 28;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Scale factor between raw chain units and ledger amounts for one token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUnits {
    decimals: u32,
}

impl TokenUnits {
    pub fn new(decimals: u32) -> Result<Self, MoneyError> {
        if decimals > MAX_DECIMALS {
            return Err(MoneyError::PrecisionOverflow {
                provided: decimals,
                max: MAX_DECIMALS,
            });
        }
        Ok(Self { decimals })
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Raw integer units -> ledger amount (`raw / 10^decimals`)
    pub fn to_ledger(&self, raw: u128) -> Result<Decimal, MoneyError> {
        let raw = i128::try_from(raw).map_err(|_| MoneyError::Overflow)?;
        Decimal::try_from_i128_with_scale(raw, self.decimals)
            .map(|d| d.normalize())
            .map_err(|_| MoneyError::Overflow)
    }

    /// Parse a raw value string as returned by the chain API
    ///
    /// Only plain decimal digits are accepted; the chain never reports
    /// fractional or signed raw values.
    pub fn parse_raw(&self, raw: &str) -> Result<Decimal, MoneyError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MoneyError::InvalidFormat("empty string".into()));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MoneyError::InvalidFormat(format!(
                "raw value is not an unsigned integer: {}",
                raw
            )));
        }
        let value: u128 = raw.parse().map_err(|_| MoneyError::Overflow)?;
        self.to_ledger(value)
    }

    /// Ledger amount -> raw integer units, rejecting anything that would truncate
    pub fn to_raw(&self, amount: Decimal) -> Result<u128, MoneyError> {
        if amount.is_sign_negative() || amount.is_zero() {
            return Err(MoneyError::InvalidAmount);
        }

        let amount = amount.normalize();
        if amount.scale() > self.decimals {
            return Err(MoneyError::PrecisionOverflow {
                provided: amount.scale(),
                max: self.decimals,
            });
        }

        let multiplier = Decimal::from_i128_with_scale(10i128.pow(self.decimals), 0);
        let scaled = amount
            .checked_mul(multiplier)
            .ok_or(MoneyError::Overflow)?;

        if !scaled.fract().is_zero() {
            return Err(MoneyError::PrecisionOverflow {
                provided: amount.scale(),
                max: self.decimals,
            });
        }

        scaled.to_u128().ok_or(MoneyError::Overflow)
    }
}
