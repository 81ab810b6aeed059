//! Identifier types shared across the order lifecycle engine.
//!
//! Every opaque id in this system is a 128-bit token rendered as an
//! uppercase-hex string behind a fixed ASCII prefix (`bkt_`, `ord_`,
//! `pay_`). Addresses are canonical 20-byte EVM addresses rendered
//! lowercase. Keeping these as newtypes (rather than bare `String`) means a
//! basket id can never be handed to a function expecting a payment
//! reference.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ApiError, ErrorKind};

fn random_hex32() -> String {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    format!("{:032X}", (u128::from_be_bytes(*a.as_bytes())) ^ (u128::from_be_bytes(*b.as_bytes())))
        .chars()
        .take(32)
        .collect()
}

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(try_from = "String", into = "String")]
        #[sqlx(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mints a fresh, random id with the correct prefix.
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, random_hex32()))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Validates and wraps an externally supplied id string.
            pub fn parse(raw: &str) -> Result<Self, ApiError> {
                if Self::is_valid(raw) {
                    Ok(Self(raw.to_string()))
                } else {
                    Err(ErrorKind::InvalidInput(format!(
                        "malformed id, expected `{}[0-9A-F]{{32}}`: {raw}",
                        $prefix
                    ))
                    .into())
                }
            }

            #[must_use]
            pub fn is_valid(raw: &str) -> bool {
                let Some(tail) = raw.strip_prefix($prefix) else { return false };
                tail.len() == 32 && tail.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ApiError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(&raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

prefixed_id!(BasketId, "bkt_");
prefixed_id!(OrderId, "ord_");
prefixed_id!(PaymentReference, "pay_");

/// A positive EVM chain id, e.g. `100` for Gnosis Chain.
pub type ChainId = u64;

/// A canonical, lowercase, `0x`-prefixed 20-byte EVM address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "String", into = "String")]
#[sqlx(transparent)]
pub struct Address(String);

impl Address {
    /// Trims, validates shape (`0x` + 40 hex nybbles) and lowercases.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let trimmed = raw.trim();
        let Some(tail) = trimmed.strip_prefix("0x") else {
            return Err(ErrorKind::InvalidInput(format!("address missing 0x prefix: {raw}")).into());
        };
        if tail.len() != 40 || !tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ErrorKind::InvalidInput(format!("address must be 40 hex nybbles: {raw}")).into());
        }
        Ok(Self(format!("0x{}", tail.to_lowercase())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = ApiError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> String {
        addr.0
    }
}

/// A seller/sku pair is normalized (lowercased) before being used as a map
/// key anywhere in the system; this helper centralizes that so canonical
/// form is computed identically in `RouteStore`, `BasketCanonicalizer` and
/// `OneOffSalesLedger`.
#[must_use]
pub fn normalize_sku(sku: &str) -> String {
    sku.trim().to_lowercase()
}

/// `eip155:{chain}:{addr}` seller identity used on the wire (JSON-LD
/// `seller.@id`, `Order.acceptedOffer[*].seller.@id`).
#[must_use]
pub fn eip155_seller_id(chain: ChainId, seller: &Address) -> String {
    format!("eip155:{chain}:{seller}")
}

/// Parses an `eip155:{chain}:{addr}` seller identity back into its parts.
pub fn parse_eip155_seller_id(id: &str) -> Result<(ChainId, Address), ApiError> {
    let mut parts = id.splitn(3, ':');
    let (Some("eip155"), Some(chain_s), Some(addr_s)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ErrorKind::InvalidInput(format!("malformed seller id: {id}")).into());
    };
    let chain = chain_s
        .parse::<ChainId>()
        .map_err(|_| ErrorKind::InvalidInput(format!("malformed chain id in seller id: {id}")))?;
    let addr = Address::parse(addr_s)?;
    Ok((chain, addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_ids_with_correct_prefix_and_shape() {
        let id = BasketId::new();
        assert!(id.as_str().starts_with("bkt_"));
        assert_eq!(id.as_str().len(), 4 + 32);
        assert!(BasketId::is_valid(id.as_str()));
    }

    #[test]
    fn rejects_lowercase_hex_tail() {
        assert!(!OrderId::is_valid("ord_00000000000000000000000000000aaa"));
        assert!(OrderId::is_valid("ord_00000000000000000000000000000AAA"));
    }

    #[test]
    fn address_round_trips_and_lowercases() {
        let addr = Address::parse("0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC").unwrap();
        assert_eq!(addr.as_str(), "0xcccccccccccccccccccccccccccccccccccccccc");
    }

    #[test]
    fn address_rejects_bad_shape() {
        assert!(Address::parse("0xabc").is_err());
        assert!(Address::parse("abcd").is_err());
    }

    #[test]
    fn eip155_round_trip() {
        let addr = Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap();
        let id = eip155_seller_id(100, &addr);
        assert_eq!(id, "eip155:100:0xcccccccccccccccccccccccccccccccccccccccc");
        let (chain, parsed) = parse_eip155_seller_id(&id).unwrap();
        assert_eq!(chain, 100);
        assert_eq!(parsed, addr);
    }
}
