//! Starmarket Escrow - in-flight settlement holds keyed by order id
//!
//! Creating an escrow is the durability boundary: once it exists the
//! settlement is "started" and must eventually reach RELEASED or
//! REFUNDED. An escrow found still HELD after the configured timeout is
//! picked up by the reconciliation sweep via [`EscrowStore::held_older_than`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use starmarket_types::{
    Amount, Escrow, EscrowId, EscrowState, MarketError, OrderId, Result,
};

/// Store of escrow records, one per order
#[derive(Clone)]
pub struct EscrowStore {
    /// Escrows keyed by order id (the idempotency guard)
    by_order: Arc<RwLock<HashMap<OrderId, Escrow>>>,
}

impl EscrowStore {
    /// Create a new in-memory escrow store
    pub fn new() -> Self {
        Self {
            by_order: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a new hold for an order
    ///
    /// Fails with `DuplicateEscrow` if one already exists for the order,
    /// regardless of its state - an order gets exactly one escrow.
    pub async fn create_escrow(&self, order_id: OrderId, amount: Amount) -> Result<Escrow> {
        if !amount.is_positive() {
            return Err(MarketError::InvalidAmount {
                amount: amount.value,
            });
        }

        let mut by_order = self.by_order.write().await;
        if by_order.contains_key(&order_id) {
            return Err(MarketError::DuplicateEscrow {
                order_id: order_id.to_string(),
            });
        }

        let escrow = Escrow {
            id: EscrowId::new(),
            order_id,
            held_amount: amount,
            state: EscrowState::Held,
            created_at: Utc::now(),
            released_at: None,
        };
        by_order.insert(order_id, escrow.clone());
        info!(order = %order_id, escrow = %escrow.id, amount = %amount, "escrow held");
        Ok(escrow)
    }

    /// Transition HELD -> RELEASED
    pub async fn mark_released(&self, order_id: &OrderId) -> Result<Escrow> {
        self.transition(order_id, EscrowState::Released).await
    }

    /// Transition HELD -> REFUNDED
    pub async fn mark_refunded(&self, order_id: &OrderId) -> Result<Escrow> {
        self.transition(order_id, EscrowState::Refunded).await
    }

    /// Look up the escrow for an order
    pub async fn for_order(&self, order_id: &OrderId) -> Option<Escrow> {
        self.by_order.read().await.get(order_id).cloned()
    }

    /// Look up an escrow by its own id
    pub async fn get(&self, escrow_id: &EscrowId) -> Option<Escrow> {
        self.by_order
            .read()
            .await
            .values()
            .find(|e| &e.id == escrow_id)
            .cloned()
    }

    /// Escrows still HELD since before `cutoff`
    ///
    /// The reconciliation sweep resolves each of these to RELEASED or
    /// REFUNDED; none may stay HELD indefinitely.
    pub async fn held_older_than(&self, cutoff: DateTime<Utc>) -> Vec<Escrow> {
        self.by_order
            .read()
            .await
            .values()
            .filter(|e| e.state == EscrowState::Held && e.created_at < cutoff)
            .cloned()
            .collect()
    }

    async fn transition(&self, order_id: &OrderId, to: EscrowState) -> Result<Escrow> {
        let mut by_order = self.by_order.write().await;
        let escrow = by_order.get_mut(order_id).ok_or_else(|| {
            MarketError::not_found("Escrow for order", order_id)
        })?;

        if escrow.state != EscrowState::Held {
            return Err(MarketError::InvalidTransition {
                escrow_id: escrow.id.to_string(),
                from: escrow.state.name().to_string(),
                to: to.name().to_string(),
            });
        }

        escrow.state = to;
        escrow.released_at = Some(Utc::now());
        info!(order = %order_id, escrow = %escrow.id, state = to.name(), "escrow resolved");
        Ok(escrow.clone())
    }
}

impl Default for EscrowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_release() {
        let store = EscrowStore::new();
        let order = OrderId::new();

        let escrow = store
            .create_escrow(order, Amount::stars(500))
            .await
            .unwrap();
        assert_eq!(escrow.state, EscrowState::Held);
        assert_eq!(escrow.held_amount, Amount::stars(500));

        let released = store.mark_released(&order).await.unwrap();
        assert_eq!(released.state, EscrowState::Released);
        assert!(released.released_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_escrow_rejected() {
        let store = EscrowStore::new();
        let order = OrderId::new();

        store
            .create_escrow(order, Amount::stars(500))
            .await
            .unwrap();
        let result = store.create_escrow(order, Amount::stars(500)).await;
        assert!(matches!(result, Err(MarketError::DuplicateEscrow { .. })));
    }

    #[tokio::test]
    async fn test_double_resolution_rejected() {
        let store = EscrowStore::new();
        let order = OrderId::new();
        store
            .create_escrow(order, Amount::stars(100))
            .await
            .unwrap();

        store.mark_refunded(&order).await.unwrap();
        let result = store.mark_released(&order).await;
        assert!(matches!(
            result,
            Err(MarketError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let store = EscrowStore::new();
        let result = store.create_escrow(OrderId::new(), Amount::stars(0)).await;
        assert!(matches!(result, Err(MarketError::InvalidAmount { .. })));
    }

    #[tokio::test]
    async fn test_held_older_than_finds_stale_holds() {
        let store = EscrowStore::new();
        let stale = OrderId::new();
        let resolved = OrderId::new();
        store
            .create_escrow(stale, Amount::stars(100))
            .await
            .unwrap();
        store
            .create_escrow(resolved, Amount::stars(100))
            .await
            .unwrap();
        store.mark_released(&resolved).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let held = store.held_older_than(cutoff).await;
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].order_id, stale);
    }
}
