//! Starmarket Commission - the single source of truth for the sale split
//!
//! Pure calculation, no state, no side effects. The same function backs
//! both the authoritative settlement split and any read-only frontend
//! preview; display code is never trusted for settlement.
//!
//! # Split rule
//!
//! - `platform_fee = floor(gross * platform_rate)`
//! - `royalty = floor(gross * royalty_rate)`
//! - `referral = floor(platform_fee * referral_rate)` when the buyer has a
//!   referrer, carved OUT of the platform fee - it never reduces the
//!   seller's share or raises the buyer's cost
//! - `net_seller = gross - platform_fee - royalty` (before the carve-out),
//!   which folds every flooring remainder into the seller's side
//!
//! The four components always sum exactly to `gross`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use starmarket_types::{MarketError, Result};

/// Rate configuration, snapshotted once per settlement
///
/// Rates are decimals in `[0, 1]`. The referral rate applies to the
/// platform fee, not to the gross price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Platform commission on the gross price
    pub platform_rate: Decimal,
    /// Creator royalty on the gross price (per collection)
    pub royalty_rate: Decimal,
    /// Referrer's share of the platform fee
    pub referral_rate: Decimal,
}

impl RateConfig {
    pub fn new(platform_rate: Decimal, royalty_rate: Decimal, referral_rate: Decimal) -> Self {
        Self {
            platform_rate,
            royalty_rate,
            referral_rate,
        }
    }

    /// Validate all rates are in `[0, 1]` and the gross-price rates do
    /// not jointly exceed 100%
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("platform_rate", self.platform_rate),
            ("royalty_rate", self.royalty_rate),
            ("referral_rate", self.referral_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(MarketError::InvalidRateConfiguration {
                    reason: format!("{name} {rate} is outside [0, 1]"),
                });
            }
        }
        if self.platform_rate + self.royalty_rate > Decimal::ONE {
            return Err(MarketError::InvalidRateConfiguration {
                reason: format!(
                    "platform_rate {} + royalty_rate {} exceeds 1",
                    self.platform_rate, self.royalty_rate
                ),
            });
        }
        Ok(())
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            platform_rate: dec!(0.02),
            royalty_rate: dec!(0.05),
            referral_rate: dec!(0.10),
        }
    }
}

/// The four-way split of one gross sale amount, in smallest units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// Platform's retained commission (after the referral carve-out)
    pub platform_fee: i128,
    /// Creator royalty
    pub royalty: i128,
    /// Referrer's cut (zero without a referrer)
    pub referral: i128,
    /// Seller proceeds, absorbs all flooring remainder
    pub net_seller: i128,
}

impl Split {
    /// Sum of all components; equals the gross amount by construction
    pub fn total(&self) -> i128 {
        self.platform_fee + self.royalty + self.referral + self.net_seller
    }
}

/// Compute the commission split for one sale
///
/// Fails with `InvalidAmount` for `gross <= 0` and with
/// `InvalidRateConfiguration` for out-of-range rates.
pub fn compute(gross: i128, rates: &RateConfig, has_referrer: bool) -> Result<Split> {
    if gross <= 0 {
        return Err(MarketError::InvalidAmount { amount: gross });
    }
    rates.validate()?;

    let mut platform_fee = floor_share(gross, rates.platform_rate)?;
    let royalty = floor_share(gross, rates.royalty_rate)?;
    let net_seller = gross - platform_fee - royalty;

    // Referral comes out of the platform's commission, never on top.
    let referral = if has_referrer {
        floor_share(platform_fee, rates.referral_rate)?
    } else {
        0
    };
    platform_fee -= referral;

    Ok(Split {
        platform_fee,
        royalty,
        referral,
        net_seller,
    })
}

/// `floor(amount * rate)` with exact decimal arithmetic
///
/// Amounts at or beyond `Decimal`'s 96-bit range are an overflow error,
/// not a panic - the gross amount arrives from caller input.
fn floor_share(amount: i128, rate: Decimal) -> Result<i128> {
    let amount_dec = Decimal::try_from_i128_with_scale(amount, 0)
        .map_err(|_| MarketError::AmountOverflow)?;
    let product = amount_dec
        .checked_mul(rate)
        .ok_or(MarketError::AmountOverflow)?;
    product
        .floor()
        .to_i128()
        .ok_or(MarketError::AmountOverflow)
}
