//! Currency types for Starmarket
//!
//! The marketplace settles in Telegram Stars and in the crypto currencies
//! the attached wallets hold. Each currency fixes its own smallest-unit
//! precision; amounts are always stored in those smallest units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Currencies the settlement engine can move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Telegram Stars (indivisible)
    Stars,
    /// Toncoin
    Ton,
    /// Tether on TON
    Usdt,
}

impl Currency {
    /// Smallest-unit decimal places for this currency
    pub fn decimals(&self) -> u8 {
        match self {
            Self::Stars => 0,
            Self::Ton => 9,
            Self::Usdt => 6,
        }
    }

    /// Get the currency code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Stars => "STARS",
            Self::Ton => "TON",
            Self::Usdt => "USDT",
        }
    }

    /// Parse a currency code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "STARS" => Some(Self::Stars),
            "TON" => Some(Self::Ton),
            "USDT" => Some(Self::Usdt),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::Stars.code(), "STARS");
        assert_eq!(Currency::from_code("USDT"), Some(Currency::Usdt));
        assert_eq!(Currency::from_code("DOGE"), None);
    }

    #[test]
    fn test_stars_are_indivisible() {
        assert_eq!(Currency::Stars.decimals(), 0);
        assert_eq!(Currency::Usdt.decimals(), 6);
    }
}
