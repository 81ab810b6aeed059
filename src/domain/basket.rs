//! Basket types (spec §3 "Basket", "OfferSnapshot").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::money::Price,
    ids::{Address, BasketId, ChainId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BasketStatus {
    Draft,
    Validating,
    Valid,
    CheckedOut,
    Expired,
}

impl Default for BasketStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// A shipping/billing postal address slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostalAddress {
    pub street_address: Option<String>,
    pub address_locality: Option<String>,
    pub postal_code: Option<String>,
    pub address_country: Option<String>,
}

impl PostalAddress {
    #[must_use]
    pub fn has_all_required_fields(&self) -> bool {
        [&self.street_address, &self.address_locality, &self.postal_code, &self.address_country]
            .into_iter()
            .all(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// A named customer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonName {
    pub name: Option<String>,
}

/// Age-proof slot: a person plus a claimed birth date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeProof {
    pub name: Option<String>,
    pub birth_date: Option<String>,
}

/// Contact point slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPoint {
    pub email: Option<String>,
    pub telephone: Option<String>,
}

/// Server-authoritative offer data stamped onto a basket line by
/// `BasketCanonicalizer` (spec §3 "OfferSnapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferSnapshot {
    pub price: Price,
    /// `eip155:{chain}:{addr}`, always derived from the resolver's inputs,
    /// never from the upstream product payload (spec §4.5 step 3).
    pub seller_id: String,
    pub delivery_methods: Option<Vec<String>>,
    pub required_slots: Option<Vec<String>>,
    pub is_one_off: bool,
    pub fulfillment_trigger: Option<String>,
    /// Never populated on a persisted/returned snapshot — fulfillment
    /// endpoints are resolved at fulfillment time from `RouteStore`, not
    /// carried on the snapshot (spec §3, §4.11).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment_endpoint: Option<String>,
}

/// One basket line. `product_cid`/`offer_snapshot` are server-owned:
/// clients may send them, but the server always overwrites both during
/// canonicalization (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketItem {
    pub seller: Address,
    pub sku: String,
    pub order_quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_snapshot: Option<OfferSnapshot>,
}

pub const MAX_BASKET_ITEMS: usize = 500;
pub const MIN_ORDER_QUANTITY: u32 = 1;
pub const MAX_ORDER_QUANTITY: u32 = 1_000_000;

/// Mutable pre-checkout shopping container (spec §3 "Basket").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Basket {
    pub id: BasketId,
    pub buyer: Option<Address>,
    pub operator: Option<Address>,
    pub chain_id: ChainId,
    pub status: BasketStatus,
    pub version: u64,
    pub ttl_seconds: u64,
    pub items: Vec<BasketItem>,
    pub shipping_address: Option<PostalAddress>,
    pub billing_address: Option<PostalAddress>,
    pub customer: Option<PersonName>,
    pub age_proof: Option<AgeProof>,
    pub contact_point: Option<ContactPoint>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Basket {
    /// Fresh `Draft` basket, version 0, TTL counted from now (spec §4.6
    /// `Create`).
    #[must_use]
    pub fn new(operator: Option<Address>, buyer: Option<Address>, chain_id: ChainId, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            id: BasketId::new(),
            buyer,
            operator,
            chain_id,
            status: BasketStatus::Draft,
            version: 0,
            ttl_seconds,
            items: Vec::new(),
            shipping_address: None,
            billing_address: None,
            customer: None,
            age_proof: None,
            contact_point: None,
            created_at: now,
            modified_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
        }
    }

    /// A basket is expired if now >= expiresAt OR status is already
    /// `Expired` (spec §4.6 `Get`).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BasketStatus::Expired || now >= self.expires_at
    }

    /// Refreshes `modifiedAt`/`expiresAt` and bumps `version`. Called by
    /// `BasketStore::Patch` and `TryFreezeAndRead` (spec §4.6, §5).
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modified_at = now;
        self.expires_at = now + chrono::Duration::seconds(self.ttl_seconds as i64);
        self.version += 1;
    }
}
