//! Collaborator seams consumed by the settlement engine
//!
//! Item custody, notification delivery, rate configuration and referral
//! attribution all live outside the engine. Each seam ships with a simple
//! in-memory implementation used by tests and demos.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use starmarket_commission::RateConfig;
use starmarket_types::{
    CollectionId, ItemId, MarketError, MarketEvent, OrderId, Result, UserId,
};

/// External item-ownership collaborator
///
/// Invoked once per successful settlement. Implementations must be
/// effectively idempotent on the order id, which the engine passes as the
/// idempotency key - the engine may retry the call after timeouts.
#[async_trait]
pub trait ItemTransfer: Send + Sync {
    async fn transfer(
        &self,
        item_id: ItemId,
        from: UserId,
        to: UserId,
        idempotency_key: OrderId,
    ) -> Result<()>;
}

/// Fire-and-forget event delivery; failure never blocks settlement
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: UserId, event: MarketEvent);
}

/// Source of the commission rate snapshot
///
/// Read once at split time; rates are a snapshot, never re-read
/// mid-settlement. The royalty rate may vary per collection.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rates(&self, collection_id: CollectionId) -> Result<RateConfig>;
}

/// Referral attribution for buyers
#[async_trait]
pub trait ReferrerLookup: Send + Sync {
    async fn referrer_of(&self, user_id: UserId) -> Option<UserId>;
}

/// In-memory item custody, idempotent on the order id
#[derive(Clone, Default)]
pub struct InMemoryItemVault {
    owners: Arc<RwLock<HashMap<ItemId, UserId>>>,
    applied: Arc<RwLock<HashSet<OrderId>>>,
}

impl InMemoryItemVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_owner(&self, item_id: ItemId, owner: UserId) {
        self.owners.write().await.insert(item_id, owner);
    }

    pub async fn owner_of(&self, item_id: &ItemId) -> Option<UserId> {
        self.owners.read().await.get(item_id).copied()
    }
}

#[async_trait]
impl ItemTransfer for InMemoryItemVault {
    async fn transfer(
        &self,
        item_id: ItemId,
        from: UserId,
        to: UserId,
        idempotency_key: OrderId,
    ) -> Result<()> {
        let mut owners = self.owners.write().await;
        let mut applied = self.applied.write().await;

        if applied.contains(&idempotency_key) {
            return Ok(());
        }

        let current = owners.get(&item_id).copied();
        if current != Some(from) {
            return Err(MarketError::ItemTransferFailed {
                order_id: idempotency_key.to_string(),
                reason: format!("item {item_id} is not owned by {from}"),
            });
        }
        owners.insert(item_id, to);
        applied.insert(idempotency_key);
        Ok(())
    }
}

/// Notification sink that drops every event
#[derive(Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, _user_id: UserId, _event: MarketEvent) {}
}

/// Rate provider backed by one fixed configuration for all collections
#[derive(Clone, Copy)]
pub struct StaticRateProvider {
    config: RateConfig,
}

impl StaticRateProvider {
    pub fn new(config: RateConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn rates(&self, _collection_id: CollectionId) -> Result<RateConfig> {
        Ok(self.config)
    }
}

/// In-memory referral directory
#[derive(Clone, Default)]
pub struct InMemoryReferrals {
    referrers: Arc<RwLock<HashMap<UserId, UserId>>>,
}

impl InMemoryReferrals {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_referrer(&self, user_id: UserId, referrer: UserId) {
        self.referrers.write().await.insert(user_id, referrer);
    }
}

#[async_trait]
impl ReferrerLookup for InMemoryReferrals {
    async fn referrer_of(&self, user_id: UserId) -> Option<UserId> {
        self.referrers.read().await.get(&user_id).copied()
    }
}
