//! Account addressing for the ledger
//!
//! An account is a holder plus a currency. Holders are users, the shared
//! platform commission wallet, or a per-collection creator wallet.
//! On-chain address resolution for the reserved holders is an external
//! collaborator's concern; here they are just stable ledger keys.

use crate::{CollectionId, Currency, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The holder side of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountHolder {
    /// A marketplace user (buyer, seller, or referrer)
    User(UserId),
    /// The shared platform commission wallet
    Platform,
    /// The royalty wallet of a gift collection's creator
    Creator(CollectionId),
}

impl fmt::Display for AccountHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::Platform => write!(f, "platform"),
            Self::Creator(id) => write!(f, "creator_{}", id.0),
        }
    }
}

/// A ledger account: one holder in one currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    pub holder: AccountHolder,
    pub currency: Currency,
}

impl AccountId {
    pub fn new(holder: AccountHolder, currency: Currency) -> Self {
        Self { holder, currency }
    }

    /// A user's account in a currency
    pub fn user(id: UserId, currency: Currency) -> Self {
        Self::new(AccountHolder::User(id), currency)
    }

    /// The platform commission account in a currency
    pub fn platform(currency: Currency) -> Self {
        Self::new(AccountHolder::Platform, currency)
    }

    /// A collection creator's royalty account in a currency
    pub fn creator(id: CollectionId, currency: Currency) -> Self {
        Self::new(AccountHolder::Creator(id), currency)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.holder, self.currency.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_holders_are_distinct_accounts() {
        let platform = AccountId::platform(Currency::Stars);
        let creator = AccountId::creator(CollectionId::new(), Currency::Stars);
        assert_ne!(platform, creator);
    }

    #[test]
    fn test_same_holder_different_currency() {
        let user = UserId::new();
        assert_ne!(
            AccountId::user(user, Currency::Stars),
            AccountId::user(user, Currency::Usdt)
        );
    }
}
