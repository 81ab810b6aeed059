//! Order types (spec §3 "Order").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::basket::OfferSnapshot,
    ids::{Address, BasketId, ChainId, OrderId, PaymentReference},
};

/// Status domain from spec §3: `PaymentDue -> PaymentProcessing ->
/// PaymentComplete`, with `Cancelled`/`Fulfilled` as terminal auxiliary
/// states. The exact URIs on the wire are opaque strings (spec §6.2); this
/// enum is the engine's internal vocabulary and maps 1:1 to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    PaymentDue,
    PaymentProcessing,
    PaymentComplete,
    Cancelled,
    Fulfilled,
}

impl OrderStatus {
    /// The opaque status URI produced on the wire (spec §6.2).
    #[must_use]
    pub fn as_uri(&self) -> &'static str {
        match self {
            Self::PaymentDue => "https://circles.market/status/paymentDue",
            Self::PaymentProcessing => "https://circles.market/status/paymentProcessing",
            Self::PaymentComplete => "https://circles.market/status/paymentComplete",
            Self::Cancelled => "https://circles.market/status/cancelled",
            Self::Fulfilled => "https://circles.market/status/fulfilled",
        }
    }
}

/// One ordered line, mirroring the basket item it was frozen from
/// (spec §3 invariant: `|acceptedOffer| == |orderedItem|`, line indices
/// correspond).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedItem {
    pub seller: Address,
    pub sku: String,
    pub order_quantity: u32,
    pub image_url: Option<String>,
    pub product_cid: Option<String>,
}

/// An immutable order snapshot (spec §3 "Order"). Only the lifecycle
/// columns and the outbox change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub payment_reference: PaymentReference,
    pub basket_id: BasketId,
    pub buyer_address: Option<Address>,
    pub buyer_chain_id: Option<ChainId>,
    pub broker: Option<Address>,
    pub status: OrderStatus,
    pub accepted_offer: Vec<OfferSnapshot>,
    pub ordered_item: Vec<OrderedItem>,
    pub order_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub paid_tx_hash: Option<String>,
    pub paid_log_index: Option<i64>,
    pub paid_chain_id: Option<ChainId>,
    pub paid_gateway: Option<String>,
    pub paid_amount_wei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox: Option<Vec<OutboxItem>>,
}

impl Order {
    /// Distinct seller `eip155` ids across `accepted_offer` (spec §3
    /// "Derived projections: sellers (distinct)").
    #[must_use]
    pub fn distinct_seller_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> =
            self.accepted_offer.iter().map(|o| o.seller_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// One append-only row of `orders_status_history` (spec §3, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub order_id: OrderId,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

/// One row of `order_outbox` (spec §3, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxItem {
    pub id: i64,
    pub order_id: OrderId,
    pub payload: serde_json::Value,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input to `OrderStore::Create` — the frozen basket's content, already
/// canonicalized and validated (spec §4.8).
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub payment_reference: PaymentReference,
    pub basket_id: BasketId,
    pub buyer_address: Option<Address>,
    pub buyer_chain_id: Option<ChainId>,
    pub broker: Option<Address>,
    pub accepted_offer: Vec<OfferSnapshot>,
    pub ordered_item: Vec<OrderedItem>,
}
