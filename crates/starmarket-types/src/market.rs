//! Marketplace records and their state machines
//!
//! Listing and Offer are created by external user actions; Order and
//! Escrow are created and exclusively owned by the settlement engine for
//! the lifetime of one settlement attempt.

use crate::{
    Amount, CollectionId, Currency, EscrowId, ItemId, ListingId, OfferId, OrderId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListingState {
    /// Open for offers
    Active,
    /// An offer was accepted, settlement in flight
    Accepted,
    /// Settlement finished, item sold
    Completed,
    /// Seller cancelled before acceptance
    Cancelled,
    /// Listing expired before acceptance
    Expired,
}

impl ListingState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Short name used in error context
    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

/// A listing of one item at an asking price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Unique listing ID
    pub id: ListingId,
    /// The item being sold
    pub item_id: ItemId,
    /// Collection the item belongs to (royalty destination)
    pub collection_id: CollectionId,
    /// Seller
    pub seller_id: UserId,
    /// Asking price
    pub price: Amount,
    /// Current state
    pub state: ListingState,
    /// When created
    pub created_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Check if the listing has passed its expiry timestamp
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Utc::now() >= t)
    }
}

/// State of an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferState {
    /// Awaiting seller decision
    Pending,
    /// Accepted by the seller, settlement owns it now
    Accepted,
    /// Rejected (see rejection reason)
    Rejected,
    /// Expired before acceptance
    Expired,
    /// Withdrawn by the buyer
    Withdrawn,
}

impl OfferState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Short name used in error context
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

/// Why an offer was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// A sibling offer on the same listing was accepted
    ListingNoLongerAvailable,
    /// The accepted offer's settlement failed
    SettlementFailed,
    /// Seller explicitly rejected it
    SellerRejected,
}

/// A buyer's offer on a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Unique offer ID
    pub id: OfferId,
    /// The listing this offer targets
    pub listing_id: ListingId,
    /// Buyer
    pub buyer_id: UserId,
    /// Offered amount (same currency as the listing price)
    pub amount: Amount,
    /// Current state
    pub state: OfferState,
    /// Rejection reason, set when state is Rejected
    pub rejection_reason: Option<RejectionReason>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl Offer {
    /// Check if the offer has passed its expiry timestamp
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Utc::now() >= t)
    }
}

/// State of a settlement order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// Created, no funds moved yet
    Pending,
    /// Escrow held, settlement in flight
    Settling,
    /// Funds released, item transferred
    Completed,
    /// Settlement failed (funds refunded unless flagged for reconciliation)
    Failed,
    /// Cancelled before escrow, reservation returned
    Refunded,
}

impl OrderState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Refunded)
    }

    /// Short name used in error context
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Settling => "SETTLING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

/// One settlement attempt for one accepted offer
///
/// The commission split is recorded on the order before any fund movement
/// so a recovery pass always knows what was supposed to happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID (doubles as the ledger reservation id)
    pub id: OrderId,
    /// The listing being settled
    pub listing_id: ListingId,
    /// The accepted offer
    pub offer_id: OfferId,
    /// Buyer
    pub buyer_id: UserId,
    /// Seller
    pub seller_id: UserId,
    /// Royalty destination collection
    pub collection_id: CollectionId,
    /// Buyer's referrer, if any (referral cut destination)
    pub referrer_id: Option<UserId>,
    /// Gross amount in smallest units
    pub gross_amount: i128,
    /// Platform's retained fee (after the referral carve-out)
    pub platform_fee: i128,
    /// Creator royalty
    pub royalty_amount: i128,
    /// Referral cut (carved out of the platform fee)
    pub referral_amount: i128,
    /// Seller proceeds, absorbs all flooring remainder
    pub net_seller_amount: i128,
    /// Settlement currency
    pub currency: Currency,
    /// Current state
    pub state: OrderState,
    /// Set when the item transferred but the release could not be applied;
    /// the ledger must NOT be reverted and the case goes to out-of-band
    /// reconciliation.
    pub needs_reconciliation: bool,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When the order reached COMPLETED
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Conservation check: the four split components sum to gross exactly
    pub fn split_is_conserved(&self) -> bool {
        self.platform_fee + self.royalty_amount + self.referral_amount + self.net_seller_amount
            == self.gross_amount
    }

    /// The gross amount as a typed Amount
    pub fn gross(&self) -> Amount {
        Amount::new(self.gross_amount, self.currency)
    }
}

/// State of an escrow record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowState {
    /// Funds are held for the order
    Held,
    /// Funds were paid out to the split destinations
    Released,
    /// Funds were returned to the buyer
    Refunded,
}

impl EscrowState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    /// Short name used in error context
    pub fn name(&self) -> &'static str {
        match self {
            Self::Held => "HELD",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
        }
    }
}

/// The durability boundary of a settlement: once an escrow exists the
/// order must end in RELEASED or REFUNDED, never HELD forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    /// Unique escrow ID
    pub id: EscrowId,
    /// Order this escrow belongs to (one escrow per order)
    pub order_id: OrderId,
    /// Amount held; equals the order's gross amount while HELD
    pub held_amount: Amount,
    /// Current state
    pub state: EscrowState,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When released or refunded
    pub released_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_state_terminality() {
        assert!(!ListingState::Active.is_terminal());
        assert!(!ListingState::Accepted.is_terminal());
        assert!(ListingState::Completed.is_terminal());
    }

    #[test]
    fn test_order_conservation_helper() {
        let order = Order {
            id: OrderId::new(),
            listing_id: ListingId::new(),
            offer_id: OfferId::new(),
            buyer_id: UserId::new(),
            seller_id: UserId::new(),
            collection_id: CollectionId::new(),
            referrer_id: None,
            gross_amount: 1000,
            platform_fee: 18,
            royalty_amount: 0,
            referral_amount: 2,
            net_seller_amount: 980,
            currency: Currency::Stars,
            state: OrderState::Pending,
            needs_reconciliation: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        assert!(order.split_is_conserved());
    }

    #[test]
    fn test_listing_expiry() {
        let listing = Listing {
            id: ListingId::new(),
            item_id: ItemId::new(),
            collection_id: CollectionId::new(),
            seller_id: UserId::new(),
            price: Amount::stars(500),
            state: ListingState::Active,
            created_at: Utc::now(),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
        };
        assert!(listing.is_expired());
    }
}
