//! Starmarket Ledger - Append-only balance store with reservations
//!
//! The ledger is:
//! - Currency-scoped (an account is one holder in one currency)
//! - Append-only (entries are never mutated or deleted)
//! - Reservation-based (funds are held against an account before they move)
//! - Idempotent on reservation ids (reserve and release are retry-safe)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Available balance = total balance - sum of active reservations
//! 3. A release pays out exactly the reserved amount, applied once
//! 4. Atomic operations only - no intermediate state is observable

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use starmarket_types::{
    AccountId, Amount, EntryId, MarketError, OrderId, ReservationId, Result,
};

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Credit (increase) to an account
    Credit,
    /// Debit (decrease) from an account
    Debit,
}

/// Reason for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// Funding from an external wallet collaborator
    Deposit { reference: String },
    /// Withdrawal to an external wallet collaborator
    Withdrawal { reference: String },
    /// Buyer-side debit when a settlement release is applied
    SettlementDebit { order_id: OrderId },
    /// Destination-side credit when a settlement release is applied
    SettlementCredit { order_id: OrderId },
}

/// A single ledger entry (one side of a movement)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: AccountId,
    pub entry_type: EntryType,
    pub amount: i128,
    pub balance_after: i128,
    pub reason: EntryReason,
    pub created_at: DateTime<Utc>,
}

/// Account state in the ledger
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: i128,
    pub entry_count: u64,
}

/// An active hold of funds against an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub account: AccountId,
    pub amount: i128,
    pub created_at: DateTime<Utc>,
}

/// One destination of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub to: AccountId,
    pub amount: i128,
}

impl Transfer {
    pub fn new(to: AccountId, amount: i128) -> Self {
        Self { to, amount }
    }
}

/// Record of a release that was applied, kept for idempotent replay
#[derive(Debug, Clone)]
struct AppliedRelease {
    transfers: Vec<Transfer>,
    entry_ids: Vec<EntryId>,
}

/// The Starmarket Ledger
///
/// Thread-safe and designed for concurrent access. Every mutating
/// operation takes all of its write locks up front, so no intermediate
/// state is externally observable.
#[derive(Clone)]
pub struct Ledger {
    /// Account states
    accounts: Arc<RwLock<HashMap<AccountId, AccountState>>>,
    /// All entries (append-only)
    entries: Arc<RwLock<Vec<LedgerEntry>>>,
    /// Active reservations by id
    reservations: Arc<RwLock<HashMap<ReservationId, Reservation>>>,
    /// Applied releases by reservation id (idempotency record)
    applied: Arc<RwLock<HashMap<ReservationId, AppliedRelease>>>,
}

impl Ledger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            entries: Arc::new(RwLock::new(Vec::new())),
            reservations: Arc::new(RwLock::new(HashMap::new())),
            applied: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Total balance of an account (reserved funds included)
    pub async fn balance(&self, account: &AccountId) -> i128 {
        let accounts = self.accounts.read().await;
        accounts.get(account).map(|a| a.balance).unwrap_or(0)
    }

    /// Available balance: total minus active reservations. Never negative.
    pub async fn available_balance(&self, account: &AccountId) -> i128 {
        let accounts = self.accounts.read().await;
        let reservations = self.reservations.read().await;
        let total = accounts.get(account).map(|a| a.balance).unwrap_or(0);
        let held: i128 = reservations
            .values()
            .filter(|r| &r.account == account)
            .map(|r| r.amount)
            .sum();
        (total - held).max(0)
    }

    /// Credit an account from an external funding source
    ///
    /// Accounts are created on first reference. Returns the new balance
    /// and the entry ID.
    pub async fn deposit(
        &self,
        account: &AccountId,
        amount: Amount,
        reference: impl Into<String>,
    ) -> Result<(i128, EntryId)> {
        Self::validate_amount(account, amount)?;

        let mut accounts = self.accounts.write().await;
        let mut entries = self.entries.write().await;

        let reason = EntryReason::Deposit {
            reference: reference.into(),
        };
        let entry_id = Self::apply_credit(&mut accounts, &mut entries, account, amount.value, reason)?;
        let balance = accounts[account].balance;
        Ok((balance, entry_id))
    }

    /// Debit an account to an external wallet
    ///
    /// Fails with `InsufficientFunds` if the *available* balance is too
    /// low - reserved funds cannot be withdrawn out from under an open
    /// settlement.
    pub async fn withdraw(
        &self,
        account: &AccountId,
        amount: Amount,
        reference: impl Into<String>,
    ) -> Result<(i128, EntryId)> {
        Self::validate_amount(account, amount)?;

        let mut accounts = self.accounts.write().await;
        let mut entries = self.entries.write().await;
        let reservations = self.reservations.read().await;

        let total = accounts.get(account).map(|a| a.balance).unwrap_or(0);
        let held: i128 = reservations
            .values()
            .filter(|r| &r.account == account)
            .map(|r| r.amount)
            .sum();
        let available = (total - held).max(0);
        if available < amount.value {
            return Err(MarketError::InsufficientFunds {
                account: account.to_string(),
                requested: amount.value,
                available,
            });
        }

        let reason = EntryReason::Withdrawal {
            reference: reference.into(),
        };
        let entry_id = Self::apply_debit(&mut accounts, &mut entries, account, amount.value, reason)?;
        let balance = accounts[account].balance;
        Ok((balance, entry_id))
    }

    /// Place a hold of `amount` against an account
    ///
    /// Idempotent on the reservation id: retrying with the same id and
    /// amount is a no-op success; retrying with a different amount fails
    /// with `ReservationConflict`.
    pub async fn reserve(
        &self,
        account: &AccountId,
        amount: Amount,
        reservation_id: ReservationId,
    ) -> Result<()> {
        Self::validate_amount(account, amount)?;

        let accounts = self.accounts.read().await;
        let mut reservations = self.reservations.write().await;

        if let Some(existing) = reservations.get(&reservation_id) {
            if existing.account == *account && existing.amount == amount.value {
                return Ok(());
            }
            return Err(MarketError::ReservationConflict {
                reservation_id: reservation_id.to_string(),
                held: existing.amount,
                requested: amount.value,
            });
        }

        let total = accounts.get(account).map(|a| a.balance).unwrap_or(0);
        let held: i128 = reservations
            .values()
            .filter(|r| &r.account == account)
            .map(|r| r.amount)
            .sum();
        let available = (total - held).max(0);
        if available < amount.value {
            return Err(MarketError::InsufficientFunds {
                account: account.to_string(),
                requested: amount.value,
                available,
            });
        }

        reservations.insert(
            reservation_id,
            Reservation {
                id: reservation_id,
                account: *account,
                amount: amount.value,
                created_at: Utc::now(),
            },
        );
        info!(reservation = %reservation_id, account = %account, amount = amount.value, "funds reserved");
        Ok(())
    }

    /// Pay a reservation out to its destinations
    ///
    /// The transfer amounts MUST sum to the reserved amount, else fails
    /// with `SplitMismatch` and the reservation stays intact. On success
    /// the reservation is removed, the source account is debited, each
    /// destination is credited, and the whole operation is recorded as
    /// applied under the reservation id - replaying the same call
    /// afterwards returns the prior entry ids without double-crediting.
    pub async fn release(
        &self,
        reservation_id: ReservationId,
        transfers: &[Transfer],
    ) -> Result<Vec<EntryId>> {
        let mut accounts = self.accounts.write().await;
        let mut entries = self.entries.write().await;
        let mut reservations = self.reservations.write().await;
        let mut applied = self.applied.write().await;

        if let Some(prior) = applied.get(&reservation_id) {
            if prior.transfers == transfers {
                return Ok(prior.entry_ids.clone());
            }
            return Err(MarketError::ReservationConflict {
                reservation_id: reservation_id.to_string(),
                held: prior.transfers.iter().map(|t| t.amount).sum(),
                requested: transfers.iter().map(|t| t.amount).sum(),
            });
        }

        let reservation = reservations.get(&reservation_id).ok_or_else(|| {
            MarketError::ReservationNotFound {
                reservation_id: reservation_id.to_string(),
            }
        })?;
        let source = reservation.account;
        let reserved = reservation.amount;

        let mut transfer_sum: i128 = 0;
        for transfer in transfers {
            if transfer.amount <= 0 {
                return Err(MarketError::InvalidAmount {
                    amount: transfer.amount,
                });
            }
            if transfer.to.currency != source.currency {
                return Err(MarketError::CurrencyMismatch {
                    expected: source.currency.code().to_string(),
                    actual: transfer.to.currency.code().to_string(),
                });
            }
            transfer_sum = transfer_sum
                .checked_add(transfer.amount)
                .ok_or(MarketError::AmountOverflow)?;
        }
        if transfer_sum != reserved {
            return Err(MarketError::SplitMismatch {
                reservation_id: reservation_id.to_string(),
                reserved,
                transfer_sum,
            });
        }

        // All checks passed; apply the whole movement under the held locks.
        let order_id: OrderId = reservation_id;
        let mut entry_ids = Vec::with_capacity(transfers.len() + 1);

        let debit_id = Self::apply_debit(
            &mut accounts,
            &mut entries,
            &source,
            reserved,
            EntryReason::SettlementDebit { order_id },
        )?;
        entry_ids.push(debit_id);

        for transfer in transfers {
            let credit_id = Self::apply_credit(
                &mut accounts,
                &mut entries,
                &transfer.to,
                transfer.amount,
                EntryReason::SettlementCredit { order_id },
            )?;
            entry_ids.push(credit_id);
        }

        reservations.remove(&reservation_id);
        applied.insert(
            reservation_id,
            AppliedRelease {
                transfers: transfers.to_vec(),
                entry_ids: entry_ids.clone(),
            },
        );
        info!(reservation = %reservation_id, destinations = transfers.len(), "reservation released");
        Ok(entry_ids)
    }

    /// Remove a reservation without crediting anyone
    ///
    /// Fully refunds availability to the source account. Idempotent:
    /// cancelling an already-cancelled reservation is a no-op success.
    /// Cancelling a *released* reservation is a conflict.
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        let mut reservations = self.reservations.write().await;
        let applied = self.applied.read().await;

        if reservations.remove(&reservation_id).is_some() {
            info!(reservation = %reservation_id, "reservation cancelled");
            return Ok(());
        }
        if let Some(prior) = applied.get(&reservation_id) {
            return Err(MarketError::ReservationConflict {
                reservation_id: reservation_id.to_string(),
                held: prior.transfers.iter().map(|t| t.amount).sum(),
                requested: 0,
            });
        }
        Ok(())
    }

    /// Look up an active reservation
    pub async fn reservation(&self, reservation_id: &ReservationId) -> Option<Reservation> {
        self.reservations.read().await.get(reservation_id).cloned()
    }

    /// Get all entries for an account
    pub async fn account_entries(&self, account: &AccountId) -> Vec<LedgerEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get the total number of entries
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Get recent entries (newest first)
    pub async fn recent_entries(&self, limit: usize) -> Vec<LedgerEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    fn validate_amount(account: &AccountId, amount: Amount) -> Result<()> {
        if !amount.is_positive() {
            return Err(MarketError::InvalidAmount {
                amount: amount.value,
            });
        }
        if amount.currency != account.currency {
            return Err(MarketError::CurrencyMismatch {
                expected: account.currency.code().to_string(),
                actual: amount.currency.code().to_string(),
            });
        }
        Ok(())
    }

    fn apply_credit(
        accounts: &mut HashMap<AccountId, AccountState>,
        entries: &mut Vec<LedgerEntry>,
        account: &AccountId,
        amount: i128,
        reason: EntryReason,
    ) -> Result<EntryId> {
        let state = accounts.entry(*account).or_default();
        let new_balance = state
            .balance
            .checked_add(amount)
            .ok_or(MarketError::AmountOverflow)?;

        let entry = LedgerEntry {
            entry_id: EntryId::new(),
            account: *account,
            entry_type: EntryType::Credit,
            amount,
            balance_after: new_balance,
            reason,
            created_at: Utc::now(),
        };

        state.balance = new_balance;
        state.entry_count += 1;
        let entry_id = entry.entry_id;
        entries.push(entry);
        Ok(entry_id)
    }

    fn apply_debit(
        accounts: &mut HashMap<AccountId, AccountState>,
        entries: &mut Vec<LedgerEntry>,
        account: &AccountId,
        amount: i128,
        reason: EntryReason,
    ) -> Result<EntryId> {
        let state = accounts.entry(*account).or_default();
        let new_balance = state.balance - amount;
        // No negative balances. A release debit is always covered by its
        // reservation, so hitting this means corrupted state.
        if new_balance < 0 {
            return Err(MarketError::InsufficientFunds {
                account: account.to_string(),
                requested: amount,
                available: state.balance,
            });
        }

        let entry = LedgerEntry {
            entry_id: EntryId::new(),
            account: *account,
            entry_type: EntryType::Debit,
            amount,
            balance_after: new_balance,
            reason,
            created_at: Utc::now(),
        };

        state.balance = new_balance;
        state.entry_count += 1;
        let entry_id = entry.entry_id;
        entries.push(entry);
        Ok(entry_id)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
