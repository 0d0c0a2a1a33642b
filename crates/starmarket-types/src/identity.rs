//! Identity types for Starmarket
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

// Party identity types
define_id_type!(UserId, "user", "Unique identifier for a marketplace user");
define_id_type!(CollectionId, "collection", "Unique identifier for a gift collection");

// Inventory identity types
define_id_type!(ItemId, "item", "Unique identifier for a marketplace item (gift NFT)");
define_id_type!(ListingId, "listing", "Unique identifier for a marketplace listing");
define_id_type!(OfferId, "offer", "Unique identifier for a buyer offer");

// Settlement identity types
define_id_type!(OrderId, "order", "Unique identifier for a settlement order");
define_id_type!(EscrowId, "escrow", "Unique identifier for an escrow record");
define_id_type!(EntryId, "entry", "Unique identifier for a ledger entry");

/// A ledger reservation is keyed by the order that placed it, which is
/// what makes reserve/release retries idempotent per settlement attempt.
pub type ReservationId = OrderId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_is_prefixed() {
        let id = OrderId::new();
        assert!(id.to_string().starts_with("order_"));
    }

    #[test]
    fn test_id_parsing_roundtrip() {
        let id = ListingId::new();
        let parsed = ListingId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parsing_without_prefix() {
        let uuid = Uuid::new_v4();
        let parsed = OfferId::parse(&uuid.to_string()).unwrap();
        assert_eq!(parsed, OfferId::from_uuid(uuid));
    }
}
