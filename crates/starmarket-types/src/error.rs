//! Error types for Starmarket
//!
//! All failures are explicit. Validation errors surface directly to the
//! caller; post-escrow failures are routed through the settlement
//! recovery path and never swallowed.

use thiserror::Error;

/// Result type for starmarket operations
pub type Result<T> = std::result::Result<T, MarketError>;

/// Starmarket error types
#[derive(Debug, Clone, Error)]
pub enum MarketError {
    // ========================================================================
    // Amount Errors
    // ========================================================================

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Amount must be strictly positive
    #[error("Invalid amount: {amount} (must be > 0)")]
    InvalidAmount { amount: i128 },

    /// Currency mismatch
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    // ========================================================================
    // Ledger Errors
    // ========================================================================

    /// Insufficient available balance for a reservation
    #[error("Insufficient funds in account {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: i128,
        available: i128,
    },

    /// A reservation already exists under this id with a different amount
    #[error("Reservation {reservation_id} already held for {held}, retried with {requested}")]
    ReservationConflict {
        reservation_id: String,
        held: i128,
        requested: i128,
    },

    /// Reservation not found
    #[error("Reservation {reservation_id} not found")]
    ReservationNotFound { reservation_id: String },

    /// Release transfers do not sum to the reserved amount
    #[error("Split mismatch for reservation {reservation_id}: reserved {reserved}, transfers sum to {transfer_sum}")]
    SplitMismatch {
        reservation_id: String,
        reserved: i128,
        transfer_sum: i128,
    },

    // ========================================================================
    // Commission Errors
    // ========================================================================

    /// Rates out of range or jointly exceeding 100%
    #[error("Invalid rate configuration: {reason}")]
    InvalidRateConfiguration { reason: String },

    // ========================================================================
    // Escrow Errors
    // ========================================================================

    /// An escrow already exists for this order
    #[error("Escrow already exists for order {order_id}")]
    DuplicateEscrow { order_id: String },

    /// Escrow state transition not allowed
    #[error("Invalid escrow transition for {escrow_id}: {from} -> {to}")]
    InvalidTransition {
        escrow_id: String,
        from: String,
        to: String,
    },

    // ========================================================================
    // Listing & Offer Errors
    // ========================================================================

    /// Listing is not in ACTIVE state
    #[error("Listing {listing_id} is not active (state: {state})")]
    ListingNotActive { listing_id: String, state: String },

    /// Offer is not in PENDING state
    #[error("Offer {offer_id} is not pending (state: {state})")]
    OfferNotPending { offer_id: String, state: String },

    /// Offer does not belong to the named listing
    #[error("Offer {offer_id} is for listing {actual_listing}, not {expected_listing}")]
    OfferListingMismatch {
        offer_id: String,
        expected_listing: String,
        actual_listing: String,
    },

    /// Buyer and seller must differ
    #[error("Buyer {buyer_id} cannot offer on their own listing")]
    SelfPurchase { buyer_id: String },

    /// Item already carries an active listing
    #[error("Item {item_id} already has an active listing")]
    ItemAlreadyListed { item_id: String },

    /// Item is locked by an in-flight settlement
    #[error("Item {item_id} is locked")]
    ItemLocked { item_id: String },

    // ========================================================================
    // Settlement Errors
    // ========================================================================

    /// Entity lookup failed
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    /// External item ownership transfer failed
    #[error("Item transfer failed for order {order_id}: {reason}")]
    ItemTransferFailed { order_id: String, reason: String },

    /// External collaborator did not answer within the configured timeout
    #[error("Settlement step timed out for order {order_id} after {timeout_ms}ms")]
    SettlementTimeout { order_id: String, timeout_ms: u64 },

    /// Order is past the point where this action is allowed
    #[error("Order {order_id} cannot be cancelled (state: {state})")]
    CancellationTooLate { order_id: String, state: String },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MarketError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Check if this is a retriable error
    ///
    /// Only collaborator failures are worth retrying; every validation
    /// error is deterministic and retrying it blindly is a bug.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ItemTransferFailed { .. }
                | Self::SettlementTimeout { .. }
                | Self::Internal { .. }
        )
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::ReservationConflict { .. } => "RESERVATION_CONFLICT",
            Self::ReservationNotFound { .. } => "RESERVATION_NOT_FOUND",
            Self::SplitMismatch { .. } => "SPLIT_MISMATCH",
            Self::InvalidRateConfiguration { .. } => "INVALID_RATE_CONFIGURATION",
            Self::DuplicateEscrow { .. } => "DUPLICATE_ESCROW",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ListingNotActive { .. } => "LISTING_NOT_ACTIVE",
            Self::OfferNotPending { .. } => "OFFER_NOT_PENDING",
            Self::OfferListingMismatch { .. } => "OFFER_LISTING_MISMATCH",
            Self::SelfPurchase { .. } => "SELF_PURCHASE",
            Self::ItemAlreadyListed { .. } => "ITEM_ALREADY_LISTED",
            Self::ItemLocked { .. } => "ITEM_LOCKED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ItemTransferFailed { .. } => "ITEM_TRANSFER_FAILED",
            Self::SettlementTimeout { .. } => "SETTLEMENT_TIMEOUT",
            Self::CancellationTooLate { .. } => "CANCELLATION_TOO_LATE",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MarketError::InsufficientFunds {
            account: "test".to_string(),
            requested: 500,
            available: 100,
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(MarketError::internal("transient").is_retriable());
        assert!(!MarketError::InvalidAmount { amount: 0 }.is_retriable());
        assert!(MarketError::ItemTransferFailed {
            order_id: "o".to_string(),
            reason: "rpc".to_string(),
        }
        .is_retriable());
    }
}
