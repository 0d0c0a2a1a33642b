//! Amount type for Starmarket
//!
//! Amounts are i128 values in the smallest unit of their currency. All
//! arithmetic is checked; currencies are never mixed silently.

use crate::{Currency, MarketError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An amount of a single currency in smallest units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    /// Raw value in smallest units (stars, nanotons, micro-USDT)
    pub value: i128,
    /// The currency
    pub currency: Currency,
}

impl Amount {
    /// Create a new amount
    pub fn new(value: i128, currency: Currency) -> Self {
        Self { value, currency }
    }

    /// Create a zero amount
    pub fn zero(currency: Currency) -> Self {
        Self { value: 0, currency }
    }

    /// Convenience constructor for Telegram Stars
    pub fn stars(value: i128) -> Self {
        Self::new(value, Currency::Stars)
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Check if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.value > 0
    }

    /// Checked addition (currencies must match)
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.require_same_currency(&other)?;
        let value = self
            .value
            .checked_add(other.value)
            .ok_or(MarketError::AmountOverflow)?;
        Ok(Self { value, ..self })
    }

    /// Checked subtraction (currencies must match)
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.require_same_currency(&other)?;
        let value = self
            .value
            .checked_sub(other.value)
            .ok_or(MarketError::AmountOverflow)?;
        Ok(Self { value, ..self })
    }

    /// Fail unless both amounts share a currency
    pub fn require_same_currency(&self, other: &Self) -> Result<()> {
        if self.currency != other.currency {
            return Err(MarketError::CurrencyMismatch {
                expected: self.currency.code().to_string(),
                actual: other.currency.code().to_string(),
            });
        }
        Ok(())
    }
}

impl PartialOrd for Amount {
    /// Amounts of different currencies are not comparable
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.value.partial_cmp(&other.value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency.code())
    }
}
