//! Starmarket Settlement - the orchestrator for accepted offers
//!
//! One entry point mutates state: [`SettlementEngine::accept_offer`]. It
//! drives the full flow:
//!
//! ```text
//! validate -> accept listing/offer -> compute split -> create order
//!   -> reserve buyer funds -> hold escrow -> transfer item
//!   -> release funds to seller/platform/creator/referrer -> finalize
//! ```
//!
//! Failure semantics:
//! - Before the escrow exists, errors surface directly and the listing
//!   reverts to ACTIVE - nothing external was committed.
//! - After the escrow exists, the failed step is retried a bounded number
//!   of times with backoff; if it still fails, a compensating refund
//!   returns the full gross amount to the buyer and the escrow ends
//!   REFUNDED.
//! - The one exception: if the item transfer already committed and the
//!   fund release cannot be applied, the ledger is NOT reverted; the order
//!   is marked FAILED with `needs_reconciliation` and the escrow stays
//!   HELD for the reconciliation sweep to resolve out of band.

mod traits;

pub use traits::{
    InMemoryItemVault, InMemoryReferrals, ItemTransfer, NoopNotifier, NotificationSink,
    RateProvider, ReferrerLookup, StaticRateProvider,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use starmarket_commission as commission;
use starmarket_escrow::EscrowStore;
use starmarket_ledger::{Ledger, Transfer};
use starmarket_registry::ListingRegistry;
use starmarket_types::{
    AccountId, Listing, MarketError, MarketEvent, OfferId, Order, OrderId, OrderState,
    RejectionReason, Result,
};

/// Settlement engine tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Attempts for each externally-dependent step (item transfer, release)
    pub max_step_attempts: u32,
    /// Base backoff between attempts, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Per-attempt timeout for the item transfer collaborator
    pub transfer_timeout_ms: u64,
}

impl SettlementConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms * u64::from(attempt))
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_step_attempts: 3,
            retry_backoff_ms: 100,
            transfer_timeout_ms: 5_000,
        }
    }
}

/// The settlement engine
///
/// Safe to share and call concurrently; cross-entity invariants are
/// enforced by the ledger's atomic reserve/release and the registry's
/// serialized per-listing transitions. Settlements of different listings
/// proceed fully in parallel.
#[derive(Clone)]
pub struct SettlementEngine {
    ledger: Ledger,
    escrow: EscrowStore,
    registry: ListingRegistry,
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    orders_by_offer: Arc<RwLock<HashMap<OfferId, OrderId>>>,
    item_transfer: Arc<dyn ItemTransfer>,
    rates: Arc<dyn RateProvider>,
    referrers: Arc<dyn ReferrerLookup>,
    notifier: Arc<dyn NotificationSink>,
    config: SettlementConfig,
}

impl SettlementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Ledger,
        escrow: EscrowStore,
        registry: ListingRegistry,
        item_transfer: Arc<dyn ItemTransfer>,
        rates: Arc<dyn RateProvider>,
        referrers: Arc<dyn ReferrerLookup>,
        notifier: Arc<dyn NotificationSink>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            escrow,
            registry,
            orders: Arc::new(RwLock::new(HashMap::new())),
            orders_by_offer: Arc::new(RwLock::new(HashMap::new())),
            item_transfer,
            rates,
            referrers,
            notifier,
            config,
        }
    }

    /// Settle an accepted offer end to end
    ///
    /// The sole mutating entry point. Calling it again for an offer whose
    /// settlement is in flight or complete returns the existing order
    /// without moving funds twice.
    pub async fn accept_offer(&self, offer_id: OfferId) -> Result<Order> {
        if let Some(existing) = self.order_for_offer(&offer_id).await {
            if !matches!(existing.state, OrderState::Failed | OrderState::Refunded) {
                return Ok(existing);
            }
        }

        let offer = self
            .registry
            .offer(&offer_id)
            .await
            .ok_or_else(|| MarketError::not_found("Offer", offer_id))?;
        let listing = self
            .registry
            .listing(&offer.listing_id)
            .await
            .ok_or_else(|| MarketError::not_found("Listing", offer.listing_id))?;

        // Serialization point: of two racing settlements on one listing,
        // exactly one passes this call.
        let accepted = match self.registry.accept_offer(listing.id, offer_id).await {
            Ok(accepted) => accepted,
            Err(e) => {
                // A duplicate call for the same offer can lose this race
                // after passing the idempotency check but before the
                // winner has recorded its order. Wait briefly for that
                // order to appear so the caller still gets the idempotent
                // result instead of a listing-state error.
                let mut attempt = 0;
                loop {
                    if let Some(existing) = self.order_for_offer(&offer_id).await {
                        if !matches!(existing.state, OrderState::Failed | OrderState::Refunded) {
                            return Ok(existing);
                        }
                    }
                    attempt += 1;
                    if attempt >= self.config.max_step_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
            }
        };
        for rejected in &accepted.rejected {
            self.notifier
                .notify(
                    rejected.buyer_id,
                    MarketEvent::OfferRejected {
                        offer_id: rejected.id,
                        reason: RejectionReason::ListingNoLongerAvailable,
                    },
                )
                .await;
        }
        let listing = accepted.listing;
        let offer = accepted.offer;

        // Rates are snapshotted here and never re-read mid-settlement.
        let rates = match self.rates.rates(listing.collection_id).await {
            Ok(rates) => rates,
            Err(e) => return Err(self.abort_without_order(&listing, e).await),
        };
        let referrer_id = self.referrers.referrer_of(offer.buyer_id).await;
        let split = match commission::compute(offer.amount.value, &rates, referrer_id.is_some()) {
            Ok(split) => split,
            Err(e) => return Err(self.abort_without_order(&listing, e).await),
        };

        // Durability point: the split is on record before any fund moves.
        let order = Order {
            id: OrderId::new(),
            listing_id: listing.id,
            offer_id,
            buyer_id: offer.buyer_id,
            seller_id: listing.seller_id,
            collection_id: listing.collection_id,
            referrer_id,
            gross_amount: offer.amount.value,
            platform_fee: split.platform_fee,
            royalty_amount: split.royalty,
            referral_amount: split.referral,
            net_seller_amount: split.net_seller,
            currency: offer.amount.currency,
            state: OrderState::Pending,
            needs_reconciliation: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.insert_order(order.clone()).await;
        info!(order = %order.id, offer = %offer_id, gross = order.gross_amount, "settlement started");

        let buyer_account = AccountId::user(order.buyer_id, order.currency);
        if let Err(e) = self
            .ledger
            .reserve(&buyer_account, offer.amount, order.id)
            .await
        {
            return Err(self.fail_before_escrow(&order, e).await);
        }

        if let Err(e) = self.escrow.create_escrow(order.id, offer.amount).await {
            // No escrow was created, so the reservation is the only thing
            // to unwind besides the listing state.
            let _ = self.ledger.cancel_reservation(order.id).await;
            return Err(self.fail_before_escrow(&order, e).await);
        }
        self.update_order(order.id, |o| o.state = OrderState::Settling)
            .await?;

        if let Err(e) = self.transfer_item(&listing, &order).await {
            return Err(self.compensate_refund(&order, e).await);
        }

        let transfers = Self::build_transfers(&order);
        if let Err(e) = self.release_funds(&order, &transfers).await {
            // The item already changed hands; refunding the buyer now
            // would double-spend the item. Flag for out-of-band
            // reconciliation and leave the escrow HELD for the sweep.
            warn!(order = %order.id, error = %e, "release failed after item transfer");
            self.update_order(order.id, |o| {
                o.state = OrderState::Failed;
                o.needs_reconciliation = true;
            })
            .await?;
            self.notify_parties(
                &order,
                MarketEvent::OrderFailed {
                    order_id: order.id,
                    error_code: e.error_code().to_string(),
                },
            )
            .await;
            return Err(e);
        }

        self.escrow.mark_released(&order.id).await?;
        self.registry.finalize_completed(order.listing_id).await?;
        let order = self
            .update_order(order.id, |o| {
                o.state = OrderState::Completed;
                o.completed_at = Some(Utc::now());
            })
            .await?;

        self.notify_parties(&order, MarketEvent::OrderCompleted { order_id: order.id })
            .await;
        info!(order = %order.id, "settlement completed");
        Ok(order)
    }

    /// Read-only order lookup for polling and UI
    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("Order", order_id))
    }

    /// Cancel a settlement that has not yet reached the escrow
    ///
    /// Allowed only while the order is PENDING. Once an escrow exists the
    /// settlement runs to COMPLETED or a terminal FAILED/REFUNDED state -
    /// partial cancellation mid-flight would leave money held with no
    /// recovery commitment.
    pub async fn cancel_pending(&self, order_id: &OrderId) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if order.state != OrderState::Pending {
            return Err(MarketError::CancellationTooLate {
                order_id: order_id.to_string(),
                state: order.state.name().to_string(),
            });
        }

        self.ledger.cancel_reservation(order.id).await?;
        self.registry.revert_to_active(order.listing_id).await?;
        let order = self
            .update_order(order.id, |o| o.state = OrderState::Refunded)
            .await?;

        self.notifier
            .notify(
                order.seller_id,
                MarketEvent::ListingReverted {
                    listing_id: order.listing_id,
                },
            )
            .await;
        info!(order = %order.id, "pending settlement cancelled");
        Ok(order)
    }

    /// The transfer list for a release; zero-amount parties are omitted
    fn build_transfers(order: &Order) -> Vec<Transfer> {
        let currency = order.currency;
        let mut transfers = Vec::with_capacity(4);
        if order.net_seller_amount > 0 {
            transfers.push(Transfer::new(
                AccountId::user(order.seller_id, currency),
                order.net_seller_amount,
            ));
        }
        if order.platform_fee > 0 {
            transfers.push(Transfer::new(
                AccountId::platform(currency),
                order.platform_fee,
            ));
        }
        if order.royalty_amount > 0 {
            transfers.push(Transfer::new(
                AccountId::creator(order.collection_id, currency),
                order.royalty_amount,
            ));
        }
        if let Some(referrer_id) = order.referrer_id {
            if order.referral_amount > 0 {
                transfers.push(Transfer::new(
                    AccountId::user(referrer_id, currency),
                    order.referral_amount,
                ));
            }
        }
        transfers
    }

    /// Run the item-ownership collaborator with per-attempt timeout and
    /// bounded retries
    async fn transfer_item(&self, listing: &Listing, order: &Order) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = self.item_transfer.transfer(
                listing.item_id,
                order.seller_id,
                order.buyer_id,
                order.id,
            );
            let outcome = match tokio::time::timeout(self.config.transfer_timeout(), call).await {
                Ok(result) => result,
                Err(_) => Err(MarketError::SettlementTimeout {
                    order_id: order.id.to_string(),
                    timeout_ms: self.config.transfer_timeout_ms,
                }),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retriable() && attempt < self.config.max_step_attempts => {
                    warn!(order = %order.id, attempt, error = %e, "item transfer retry");
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply the ledger release with bounded retries
    ///
    /// The release is idempotent on the order id, so retrying after a
    /// transient failure cannot double-credit anyone.
    async fn release_funds(&self, order: &Order, transfers: &[Transfer]) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.ledger.release(order.id, transfers).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retriable() && attempt < self.config.max_step_attempts => {
                    warn!(order = %order.id, attempt, error = %e, "release retry");
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Abort after the registry acceptance but before an order exists
    async fn abort_without_order(&self, listing: &Listing, cause: MarketError) -> MarketError {
        warn!(listing = %listing.id, error = %cause, "settlement aborted before order");
        if let Err(e) = self.registry.revert_to_active(listing.id).await {
            warn!(listing = %listing.id, error = %e, "listing revert failed");
        }
        self.notifier
            .notify(
                listing.seller_id,
                MarketEvent::ListingReverted {
                    listing_id: listing.id,
                },
            )
            .await;
        cause
    }

    /// Fail an order before any escrow was created
    ///
    /// No escrow means nothing to unwind beyond the listing state.
    async fn fail_before_escrow(&self, order: &Order, cause: MarketError) -> MarketError {
        warn!(order = %order.id, error = %cause, "settlement failed before escrow");
        if let Err(e) = self.registry.revert_to_active(order.listing_id).await {
            warn!(order = %order.id, error = %e, "listing revert failed");
        }
        if let Err(e) = self.update_order(order.id, |o| o.state = OrderState::Failed).await {
            warn!(order = %order.id, error = %e, "order update failed");
        }
        self.notify_parties(
            order,
            MarketEvent::OrderFailed {
                order_id: order.id,
                error_code: cause.error_code().to_string(),
            },
        )
        .await;
        self.notifier
            .notify(
                order.seller_id,
                MarketEvent::ListingReverted {
                    listing_id: order.listing_id,
                },
            )
            .await;
        cause
    }

    /// Compensating refund after the escrow exists
    ///
    /// Ends with the escrow REFUNDED - never HELD forever - and the full
    /// gross amount back in the buyer's availability.
    async fn compensate_refund(&self, order: &Order, cause: MarketError) -> MarketError {
        warn!(order = %order.id, error = %cause, "compensating refund");
        if let Err(e) = self.escrow.mark_refunded(&order.id).await {
            warn!(order = %order.id, error = %e, "escrow refund mark failed");
        }
        if let Err(e) = self.ledger.cancel_reservation(order.id).await {
            warn!(order = %order.id, error = %e, "reservation cancel failed");
        }
        if let Err(e) = self.registry.revert_to_active(order.listing_id).await {
            warn!(order = %order.id, error = %e, "listing revert failed");
        }
        if let Err(e) = self.update_order(order.id, |o| o.state = OrderState::Failed).await {
            warn!(order = %order.id, error = %e, "order update failed");
        }
        self.notify_parties(
            order,
            MarketEvent::OrderFailed {
                order_id: order.id,
                error_code: cause.error_code().to_string(),
            },
        )
        .await;
        self.notifier
            .notify(
                order.seller_id,
                MarketEvent::ListingReverted {
                    listing_id: order.listing_id,
                },
            )
            .await;
        cause
    }

    async fn notify_parties(&self, order: &Order, event: MarketEvent) {
        self.notifier.notify(order.buyer_id, event.clone()).await;
        self.notifier.notify(order.seller_id, event).await;
    }

    async fn order_for_offer(&self, offer_id: &OfferId) -> Option<Order> {
        // Copy the id out and drop the map guard before touching the
        // orders lock; holding both here would invert the acquisition
        // order used by insert_order.
        let order_id = self.orders_by_offer.read().await.get(offer_id).copied()?;
        self.orders.read().await.get(&order_id).cloned()
    }

    async fn insert_order(&self, order: Order) {
        let mut orders = self.orders.write().await;
        let mut by_offer = self.orders_by_offer.write().await;
        by_offer.insert(order.offer_id, order.id);
        orders.insert(order.id, order);
    }

    async fn update_order<F: FnOnce(&mut Order)>(&self, order_id: OrderId, f: F) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| MarketError::not_found("Order", order_id))?;
        f(order);
        Ok(order.clone())
    }
}
