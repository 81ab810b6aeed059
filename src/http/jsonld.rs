//! Wire-level JSON-LD shapes (spec §6.2) for `Basket` and `Order`, kept
//! separate from the domain types in `domain::*` so the internal model
//! stays a plain Rust struct and only this module knows about `@context`/
//! `@type`/nested `seller.@id` framing.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    domain::{
        basket::{AgeProof, Basket, BasketItem, BasketStatus, ContactPoint, OfferSnapshot, PersonName, PostalAddress},
        money::Price,
        order::{Order, OrderedItem, OutboxItem},
    },
    ids::{BasketId, ChainId, OrderId, PaymentReference},
};

const SCHEMA_ORG_CONTEXT: &str = "https://schema.org";
const MARKET_CONTEXT: &str = "https://circles.market/context/cart/v1";

/// `seller.@id` framing used by both `Basket.items[*].offerSnapshot` and
/// `Order.acceptedOffer[*]` (spec §6.2).
#[derive(Debug, Clone, Serialize)]
pub struct SellerRef {
    #[serde(rename = "@id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferSnapshotWire {
    pub price: Price,
    pub seller: SellerRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_slots: Option<Vec<String>>,
    pub is_one_off: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment_trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment_endpoint: Option<String>,
}

impl From<&OfferSnapshot> for OfferSnapshotWire {
    fn from(s: &OfferSnapshot) -> Self {
        Self {
            price: s.price.clone(),
            seller: SellerRef { id: s.seller_id.clone() },
            delivery_methods: s.delivery_methods.clone(),
            required_slots: s.required_slots.clone(),
            is_one_off: s.is_one_off,
            fulfillment_trigger: s.fulfillment_trigger.clone(),
            fulfillment_endpoint: s.fulfillment_endpoint.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketItemWire {
    pub seller: String,
    pub sku: String,
    pub order_quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_snapshot: Option<OfferSnapshotWire>,
}

impl From<&BasketItem> for BasketItemWire {
    fn from(item: &BasketItem) -> Self {
        Self {
            seller: item.seller.as_str().to_string(),
            sku: item.sku.clone(),
            order_quantity: item.order_quantity,
            image_url: item.image_url.clone(),
            product_cid: item.product_cid.clone(),
            offer_snapshot: item.offer_snapshot.as_ref().map(OfferSnapshotWire::from),
        }
    }
}

/// `circles:Basket` JSON-LD document (spec §6.2).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketDocument {
    #[serde(rename = "@context")]
    pub context: [&'static str; 2],
    #[serde(rename = "@type")]
    pub type_: &'static str,
    pub id: BasketId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub chain_id: ChainId,
    pub status: BasketStatus,
    pub version: u64,
    pub ttl_seconds: u64,
    pub items: Vec<BasketItemWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<PostalAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<PostalAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<PersonName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_proof: Option<AgeProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_point: Option<ContactPoint>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Basket> for BasketDocument {
    fn from(b: &Basket) -> Self {
        Self {
            context: [SCHEMA_ORG_CONTEXT, MARKET_CONTEXT],
            type_: "circles:Basket",
            id: b.id.clone(),
            buyer: b.buyer.as_ref().map(|a| a.as_str().to_string()),
            operator: b.operator.as_ref().map(|a| a.as_str().to_string()),
            chain_id: b.chain_id,
            status: b.status,
            version: b.version,
            ttl_seconds: b.ttl_seconds,
            items: b.items.iter().map(BasketItemWire::from).collect(),
            shipping_address: b.shipping_address.clone(),
            billing_address: b.billing_address.clone(),
            customer: b.customer.clone(),
            age_proof: b.age_proof.clone(),
            contact_point: b.contact_point.clone(),
            created_at: b.created_at,
            modified_at: b.modified_at,
            expires_at: b.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedItemWire {
    pub seller: String,
    pub sku: String,
    pub order_quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_cid: Option<String>,
}

impl From<&OrderedItem> for OrderedItemWire {
    fn from(item: &OrderedItem) -> Self {
        Self {
            seller: item.seller.as_str().to_string(),
            sku: item.sku.clone(),
            order_quantity: item.order_quantity,
            image_url: item.image_url.clone(),
            product_cid: item.product_cid.clone(),
        }
    }
}

/// An `Order` JSON-LD document (spec §6.2): `acceptedOffer[]` and
/// `orderedItem[]` parity preserved; `status` renders as the opaque URI
/// form, never the internal enum name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDocument {
    #[serde(rename = "@context")]
    pub context: [&'static str; 2],
    #[serde(rename = "@type")]
    pub type_: &'static str,
    pub order_id: OrderId,
    pub payment_reference: PaymentReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    pub order_status: &'static str,
    pub accepted_offer: Vec<OfferSnapshotWire>,
    pub ordered_item: Vec<OrderedItemWire>,
    pub order_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox: Option<Vec<OutboxItem>>,
}

impl From<&Order> for OrderDocument {
    fn from(o: &Order) -> Self {
        Self {
            context: [SCHEMA_ORG_CONTEXT, MARKET_CONTEXT],
            type_: "Order",
            order_id: o.id.clone(),
            payment_reference: o.payment_reference.clone(),
            broker: o.broker.as_ref().map(|a| a.as_str().to_string()),
            order_status: o.status.as_uri(),
            accepted_offer: o.accepted_offer.iter().map(OfferSnapshotWire::from).collect(),
            ordered_item: o.ordered_item.iter().map(OrderedItemWire::from).collect(),
            order_date: o.order_date,
            paid_at: o.paid_at,
            confirmed_at: o.confirmed_at,
            finalized_at: o.finalized_at,
            outbox: o.outbox.clone(),
        }
    }
}

/// `SellerOrderDto` JSON-LD document — the seller-filtered view built by
/// `AccessProjections::GetOrderForSeller` (spec §4.13).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOrderDocument {
    #[serde(rename = "@context")]
    pub context: [&'static str; 2],
    #[serde(rename = "@type")]
    pub type_: &'static str,
    pub order_id: OrderId,
    pub order_status: &'static str,
    pub accepted_offer: Vec<OfferSnapshotWire>,
    pub ordered_item: Vec<OrderedItemWire>,
    pub total_payment_due: Price,
}

impl From<&crate::access_projections::SellerOrderDto> for SellerOrderDocument {
    fn from(dto: &crate::access_projections::SellerOrderDto) -> Self {
        Self {
            context: [SCHEMA_ORG_CONTEXT, MARKET_CONTEXT],
            type_: "Order",
            order_id: dto.order_id.clone(),
            order_status: dto.status.as_uri(),
            accepted_offer: dto.accepted_offer.iter().map(OfferSnapshotWire::from).collect(),
            ordered_item: dto.ordered_item.iter().map(OrderedItemWire::from).collect(),
            total_payment_due: dto.total_payment_due.clone(),
        }
    }
}
