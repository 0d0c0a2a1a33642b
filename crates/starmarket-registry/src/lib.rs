//! Starmarket Registry - listing/offer state transitions and item locking
//!
//! All transitions for one listing go through a single write lock, which
//! makes [`ListingRegistry::accept_offer`] the serialization point for
//! concurrent settlement attempts: of two racing calls on the same
//! listing, exactly one wins and the loser observes `ListingNotActive`.
//!
//! # State machines
//!
//! ```text
//! Listing: ACTIVE --(offer accepted)--> ACCEPTED --(settled)--> COMPLETED
//!          ACTIVE --(cancelled/expired)--> CANCELLED/EXPIRED
//!          ACCEPTED --(settlement failed)--> ACTIVE    // item re-listable
//!
//! Offer:   PENDING --(seller accepts)--> ACCEPTED
//!          PENDING --(reject | expire | withdraw)--> REJECTED/EXPIRED/WITHDRAWN
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use starmarket_types::{
    Amount, CollectionId, ItemId, Listing, ListingId, ListingState, MarketError, Offer, OfferId,
    OfferState, RejectionReason, Result, UserId,
};

/// Outcome of a successful acceptance, for the caller to act on
#[derive(Debug, Clone)]
pub struct AcceptedOffer {
    /// The listing, now ACCEPTED
    pub listing: Listing,
    /// The winning offer, now ACCEPTED
    pub offer: Offer,
    /// Sibling offers rejected as `ListingNoLongerAvailable`
    pub rejected: Vec<Offer>,
}

#[derive(Default)]
struct RegistryState {
    listings: HashMap<ListingId, Listing>,
    offers: HashMap<OfferId, Offer>,
    offers_by_listing: HashMap<ListingId, Vec<OfferId>>,
    /// Items carrying a non-terminal listing; such items are locked
    /// against transfer outside the settlement flow.
    listed_items: HashMap<ItemId, ListingId>,
}

/// The listing registry
#[derive(Clone)]
pub struct ListingRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ListingRegistry {
    /// Create a new in-memory registry
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// List an item for sale
    ///
    /// An item can have at most one ACTIVE listing at a time.
    pub async fn create_listing(
        &self,
        item_id: ItemId,
        collection_id: CollectionId,
        seller_id: UserId,
        price: Amount,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Listing> {
        if !price.is_positive() {
            return Err(MarketError::InvalidAmount {
                amount: price.value,
            });
        }

        let mut state = self.state.write().await;
        if state.listed_items.contains_key(&item_id) {
            return Err(MarketError::ItemAlreadyListed {
                item_id: item_id.to_string(),
            });
        }

        let listing = Listing {
            id: ListingId::new(),
            item_id,
            collection_id,
            seller_id,
            price,
            state: ListingState::Active,
            created_at: Utc::now(),
            expires_at,
        };
        state.listed_items.insert(item_id, listing.id);
        state.listings.insert(listing.id, listing.clone());
        info!(listing = %listing.id, item = %item_id, price = %price, "listing created");
        Ok(listing)
    }

    /// Place a buyer offer on a listing
    pub async fn place_offer(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
        amount: Amount,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Offer> {
        if !amount.is_positive() {
            return Err(MarketError::InvalidAmount {
                amount: amount.value,
            });
        }

        let mut state = self.state.write().await;
        let listing = state
            .listings
            .get(&listing_id)
            .ok_or_else(|| MarketError::not_found("Listing", listing_id))?;

        if listing.state != ListingState::Active || listing.is_expired() {
            return Err(MarketError::ListingNotActive {
                listing_id: listing_id.to_string(),
                state: listing.state.name().to_string(),
            });
        }
        if listing.seller_id == buyer_id {
            return Err(MarketError::SelfPurchase {
                buyer_id: buyer_id.to_string(),
            });
        }
        listing.price.require_same_currency(&amount)?;

        let offer = Offer {
            id: OfferId::new(),
            listing_id,
            buyer_id,
            amount,
            state: OfferState::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            expires_at,
        };
        state
            .offers_by_listing
            .entry(listing_id)
            .or_default()
            .push(offer.id);
        state.offers.insert(offer.id, offer.clone());
        info!(offer = %offer.id, listing = %listing_id, amount = %amount, "offer placed");
        Ok(offer)
    }

    /// Accept one offer on a listing
    ///
    /// Atomically: listing ACTIVE -> ACCEPTED, offer PENDING -> ACCEPTED,
    /// every sibling PENDING offer rejected with
    /// `ListingNoLongerAvailable`. Only the named offer is processed;
    /// sellers choose which offer to accept, there is no auto-best-offer
    /// selection.
    pub async fn accept_offer(
        &self,
        listing_id: ListingId,
        offer_id: OfferId,
    ) -> Result<AcceptedOffer> {
        let mut state = self.state.write().await;

        let listing = state
            .listings
            .get(&listing_id)
            .ok_or_else(|| MarketError::not_found("Listing", listing_id))?;
        if listing.state != ListingState::Active || listing.is_expired() {
            return Err(MarketError::ListingNotActive {
                listing_id: listing_id.to_string(),
                state: listing.state.name().to_string(),
            });
        }

        let offer = state
            .offers
            .get(&offer_id)
            .ok_or_else(|| MarketError::not_found("Offer", offer_id))?;
        if offer.listing_id != listing_id {
            return Err(MarketError::OfferListingMismatch {
                offer_id: offer_id.to_string(),
                expected_listing: listing_id.to_string(),
                actual_listing: offer.listing_id.to_string(),
            });
        }
        if offer.state != OfferState::Pending || offer.is_expired() {
            return Err(MarketError::OfferNotPending {
                offer_id: offer_id.to_string(),
                state: offer.state.name().to_string(),
            });
        }

        // All checks passed; apply the transition atomically.
        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| MarketError::not_found("Listing", listing_id))?;
        listing.state = ListingState::Accepted;
        let listing = listing.clone();

        let sibling_ids: Vec<OfferId> = state
            .offers_by_listing
            .get(&listing_id)
            .cloned()
            .unwrap_or_default();
        let mut rejected = Vec::new();
        for sibling_id in sibling_ids {
            let Some(sibling) = state.offers.get_mut(&sibling_id) else {
                continue;
            };
            if sibling_id == offer_id {
                sibling.state = OfferState::Accepted;
            } else if sibling.state == OfferState::Pending {
                sibling.state = OfferState::Rejected;
                sibling.rejection_reason = Some(RejectionReason::ListingNoLongerAvailable);
                rejected.push(sibling.clone());
            }
        }
        let offer = state.offers[&offer_id].clone();

        info!(
            listing = %listing_id,
            offer = %offer_id,
            rejected = rejected.len(),
            "offer accepted"
        );
        Ok(AcceptedOffer {
            listing,
            offer,
            rejected,
        })
    }

    /// Finish the listing after a completed settlement
    ///
    /// ACCEPTED -> COMPLETED, item unlisted. Idempotent if already
    /// COMPLETED.
    pub async fn finalize_completed(&self, listing_id: ListingId) -> Result<Listing> {
        let mut state = self.state.write().await;
        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| MarketError::not_found("Listing", listing_id))?;

        match listing.state {
            ListingState::Completed => Ok(listing.clone()),
            ListingState::Accepted => {
                listing.state = ListingState::Completed;
                let listing = listing.clone();
                state.listed_items.remove(&listing.item_id);
                info!(listing = %listing_id, "listing completed");
                Ok(listing)
            }
            other => Err(MarketError::ListingNotActive {
                listing_id: listing_id.to_string(),
                state: other.name().to_string(),
            }),
        }
    }

    /// Put a listing back on the market after an unrecoverable settlement
    /// failure
    ///
    /// ACCEPTED -> ACTIVE; the accepted offer is left REJECTED with reason
    /// `SettlementFailed` so a new offer cycle can begin.
    pub async fn revert_to_active(&self, listing_id: ListingId) -> Result<Listing> {
        let mut state = self.state.write().await;
        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| MarketError::not_found("Listing", listing_id))?;

        if listing.state != ListingState::Accepted {
            return Err(MarketError::ListingNotActive {
                listing_id: listing_id.to_string(),
                state: listing.state.name().to_string(),
            });
        }
        listing.state = ListingState::Active;
        let listing = listing.clone();

        let sibling_ids: Vec<OfferId> = state
            .offers_by_listing
            .get(&listing_id)
            .cloned()
            .unwrap_or_default();
        for sibling_id in sibling_ids {
            if let Some(offer) = state.offers.get_mut(&sibling_id) {
                if offer.state == OfferState::Accepted {
                    offer.state = OfferState::Rejected;
                    offer.rejection_reason = Some(RejectionReason::SettlementFailed);
                }
            }
        }

        warn!(listing = %listing_id, "listing reverted to active");
        Ok(listing)
    }

    /// Seller rejects a pending offer
    pub async fn reject_offer(&self, offer_id: OfferId) -> Result<Offer> {
        self.close_offer(offer_id, OfferState::Rejected, Some(RejectionReason::SellerRejected))
            .await
    }

    /// Buyer withdraws a pending offer
    pub async fn withdraw_offer(&self, offer_id: OfferId) -> Result<Offer> {
        self.close_offer(offer_id, OfferState::Withdrawn, None).await
    }

    /// Mark a pending offer expired
    pub async fn expire_offer(&self, offer_id: OfferId) -> Result<Offer> {
        self.close_offer(offer_id, OfferState::Expired, None).await
    }

    /// Seller cancels an ACTIVE listing
    pub async fn cancel_listing(&self, listing_id: ListingId) -> Result<Listing> {
        self.close_listing(listing_id, ListingState::Cancelled).await
    }

    /// Mark an ACTIVE listing expired
    pub async fn expire_listing(&self, listing_id: ListingId) -> Result<Listing> {
        self.close_listing(listing_id, ListingState::Expired).await
    }

    /// Look up a listing
    pub async fn listing(&self, listing_id: &ListingId) -> Option<Listing> {
        self.state.read().await.listings.get(listing_id).cloned()
    }

    /// Look up an offer
    pub async fn offer(&self, offer_id: &OfferId) -> Option<Offer> {
        self.state.read().await.offers.get(offer_id).cloned()
    }

    /// All offers placed on a listing
    pub async fn offers_for_listing(&self, listing_id: &ListingId) -> Vec<Offer> {
        let state = self.state.read().await;
        state
            .offers_by_listing
            .get(listing_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.offers.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether an item is locked by a non-terminal listing
    pub async fn item_locked(&self, item_id: &ItemId) -> bool {
        self.state.read().await.listed_items.contains_key(item_id)
    }

    async fn close_offer(
        &self,
        offer_id: OfferId,
        to: OfferState,
        reason: Option<RejectionReason>,
    ) -> Result<Offer> {
        let mut state = self.state.write().await;
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or_else(|| MarketError::not_found("Offer", offer_id))?;

        if offer.state != OfferState::Pending {
            return Err(MarketError::OfferNotPending {
                offer_id: offer_id.to_string(),
                state: offer.state.name().to_string(),
            });
        }
        offer.state = to;
        offer.rejection_reason = reason;
        info!(offer = %offer_id, state = to.name(), "offer closed");
        Ok(offer.clone())
    }

    async fn close_listing(&self, listing_id: ListingId, to: ListingState) -> Result<Listing> {
        let mut state = self.state.write().await;
        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| MarketError::not_found("Listing", listing_id))?;

        if listing.state != ListingState::Active {
            return Err(MarketError::ListingNotActive {
                listing_id: listing_id.to_string(),
                state: listing.state.name().to_string(),
            });
        }
        listing.state = to;
        let listing = listing.clone();
        state.listed_items.remove(&listing.item_id);
        info!(listing = %listing_id, state = to.name(), "listing closed");
        Ok(listing)
    }
}

impl Default for ListingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starmarket_types::Currency;

    async fn listed(registry: &ListingRegistry) -> Listing {
        registry
            .create_listing(
                ItemId::new(),
                CollectionId::new(),
                UserId::new(),
                Amount::stars(500),
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_one_active_listing_per_item() {
        let registry = ListingRegistry::new();
        let item = ItemId::new();
        registry
            .create_listing(item, CollectionId::new(), UserId::new(), Amount::stars(1), None)
            .await
            .unwrap();

        let result = registry
            .create_listing(item, CollectionId::new(), UserId::new(), Amount::stars(2), None)
            .await;
        assert!(matches!(result, Err(MarketError::ItemAlreadyListed { .. })));
    }

    #[tokio::test]
    async fn test_seller_cannot_offer_on_own_listing() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let result = registry
            .place_offer(listing.id, listing.seller_id, Amount::stars(500), None)
            .await;
        assert!(matches!(result, Err(MarketError::SelfPurchase { .. })));
    }

    #[tokio::test]
    async fn test_offer_currency_must_match_listing() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let result = registry
            .place_offer(
                listing.id,
                UserId::new(),
                Amount::new(500, Currency::Usdt),
                None,
            )
            .await;
        assert!(matches!(result, Err(MarketError::CurrencyMismatch { .. })));
    }

    #[tokio::test]
    async fn test_accept_rejects_sibling_offers() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let winner = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();
        let loser = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(480), None)
            .await
            .unwrap();

        let accepted = registry.accept_offer(listing.id, winner.id).await.unwrap();
        assert_eq!(accepted.listing.state, ListingState::Accepted);
        assert_eq!(accepted.offer.state, OfferState::Accepted);
        assert_eq!(accepted.rejected.len(), 1);
        assert_eq!(accepted.rejected[0].id, loser.id);
        assert_eq!(
            accepted.rejected[0].rejection_reason,
            Some(RejectionReason::ListingNoLongerAvailable)
        );
    }

    #[tokio::test]
    async fn test_second_accept_sees_listing_not_active() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let a = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();
        let b = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();

        registry.accept_offer(listing.id, a.id).await.unwrap();
        let result = registry.accept_offer(listing.id, b.id).await;
        assert!(matches!(result, Err(MarketError::ListingNotActive { .. })));
    }

    #[tokio::test]
    async fn test_accept_checks_offer_listing_pairing() {
        let registry = ListingRegistry::new();
        let listing_a = listed(&registry).await;
        let listing_b = listed(&registry).await;
        let offer_on_b = registry
            .place_offer(listing_b.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();

        let result = registry.accept_offer(listing_a.id, offer_on_b.id).await;
        assert!(matches!(
            result,
            Err(MarketError::OfferListingMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let offer = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();
        registry.accept_offer(listing.id, offer.id).await.unwrap();

        registry.finalize_completed(listing.id).await.unwrap();
        let again = registry.finalize_completed(listing.id).await.unwrap();
        assert_eq!(again.state, ListingState::Completed);
        assert!(!registry.item_locked(&listing.item_id).await);
    }

    #[tokio::test]
    async fn test_revert_reopens_listing_and_fails_offer() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let offer = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();
        registry.accept_offer(listing.id, offer.id).await.unwrap();

        let reverted = registry.revert_to_active(listing.id).await.unwrap();
        assert_eq!(reverted.state, ListingState::Active);
        assert!(registry.item_locked(&listing.item_id).await);

        let offer = registry.offer(&offer.id).await.unwrap();
        assert_eq!(offer.state, OfferState::Rejected);
        assert_eq!(
            offer.rejection_reason,
            Some(RejectionReason::SettlementFailed)
        );

        // New offer cycle can begin.
        registry
            .place_offer(listing.id, UserId::new(), Amount::stars(450), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_listing_unlocks_item() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        assert!(registry.item_locked(&listing.item_id).await);

        registry.cancel_listing(listing.id).await.unwrap();
        assert!(!registry.item_locked(&listing.item_id).await);
    }

    #[tokio::test]
    async fn test_withdraw_and_reject() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let offer = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();

        let withdrawn = registry.withdraw_offer(offer.id).await.unwrap();
        assert_eq!(withdrawn.state, OfferState::Withdrawn);

        // A closed offer cannot be rejected again.
        let result = registry.reject_offer(offer.id).await;
        assert!(matches!(result, Err(MarketError::OfferNotPending { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_exactly_one_wins() {
        let registry = ListingRegistry::new();
        let listing = listed(&registry).await;
        let a = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();
        let b = registry
            .place_offer(listing.id, UserId::new(), Amount::stars(500), None)
            .await
            .unwrap();

        let r1 = registry.accept_offer(listing.id, a.id);
        let r2 = registry.accept_offer(listing.id, b.id);
        let (r1, r2) = tokio::join!(r1, r2);

        let wins = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loss = if r1.is_err() { r1 } else { r2 };
        assert!(matches!(loss, Err(MarketError::ListingNotActive { .. })));
    }
}
