//! Starmarket Types - Canonical domain types for the gift marketplace
//!
//! This crate contains all foundational types for the Starmarket settlement
//! engine with zero dependencies on other starmarket crates. It defines:
//!
//! - Identity types (UserId, ListingId, OfferId, OrderId, EscrowId, ...)
//! - Currency and amount types (integer smallest-unit money)
//! - Listing, offer, order and escrow records with their state machines
//! - Account addressing (user / platform / collection creator)
//! - Domain events emitted on settlement transitions
//!
//! # Architectural Invariants
//!
//! 1. Money is integer smallest units - no floats anywhere in settlement
//! 2. Every fund movement flows through a ledger reservation
//! 3. An item has at most one ACTIVE listing and is locked while a
//!    settlement is in flight
//! 4. For every completed order the commission split sums exactly to the
//!    gross amount

pub mod account;
pub mod amount;
pub mod currency;
pub mod error;
pub mod event;
pub mod identity;
pub mod market;

pub use account::*;
pub use amount::*;
pub use currency::*;
pub use error::*;
pub use event::*;
pub use identity::*;
pub use market::*;

/// Version of the starmarket types schema
pub const TYPES_VERSION: &str = "0.1.0";
