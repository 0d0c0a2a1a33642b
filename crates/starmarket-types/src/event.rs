//! Domain events emitted on settlement state transitions
//!
//! Consumed by notification and UI layers through the `NotificationSink`
//! collaborator. Delivery is fire-and-forget and never blocks settlement.

use crate::{ListingId, OfferId, OrderId, RejectionReason};
use serde::{Deserialize, Serialize};

/// A domain event produced by the settlement engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    /// An order finished settlement; funds moved, item transferred
    OrderCompleted { order_id: OrderId },
    /// An order terminally failed; error code describes why
    OrderFailed {
        order_id: OrderId,
        error_code: String,
    },
    /// A listing went back to ACTIVE after a failed settlement
    ListingReverted { listing_id: ListingId },
    /// An offer was rejected (sibling acceptance, seller action, or failure)
    OfferRejected {
        offer_id: OfferId,
        reason: RejectionReason,
    },
}

impl MarketEvent {
    /// Short event name for logging and wire envelopes
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderCompleted { .. } => "order_completed",
            Self::OrderFailed { .. } => "order_failed",
            Self::ListingReverted { .. } => "listing_reverted",
            Self::OfferRejected { .. } => "offer_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = MarketEvent::OrderCompleted {
            order_id: OrderId::new(),
        };
        assert_eq!(event.name(), "order_completed");
    }

    #[test]
    fn test_event_serializes() {
        let event = MarketEvent::OfferRejected {
            offer_id: OfferId::new(),
            reason: RejectionReason::ListingNoLongerAvailable,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("OfferRejected"));
    }
}
