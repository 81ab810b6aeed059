//! Signed product data as resolved by C2 (`ProductResolver`). The object
//! store, name registry and signature verification that actually produce
//! this are out of scope (spec §1); this module only models the value
//! they hand back.

use serde::{Deserialize, Serialize};

use crate::{domain::money::Price, ids::Address};

/// A canonical, signed product payload plus its content digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Canonical sku as published by the seller (resolver's canonical
    /// form, not necessarily what the client typed).
    pub sku: String,
    pub name: String,
    pub price: Price,
    pub seller: Address,
    pub delivery_methods: Option<Vec<String>>,
    pub required_slots: Option<Vec<String>>,
    pub is_one_off: Option<bool>,
    pub fulfillment_trigger: Option<String>,
}

/// `Product` + the content-addressed digest it was fetched at, as
/// `ProductResolver::Resolve` returns (spec §4.2).
#[derive(Debug, Clone)]
pub struct ResolvedProduct {
    pub product: Product,
    pub content_digest: String,
}
