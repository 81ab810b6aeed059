//! Order read handlers (spec §4.13, §4.14, §6.1): buyer-scoped and
//! seller-scoped projections over `OrderStore`, all routed through
//! `AccessProjections` so ownership/line-filtering is enforced in one
//! place rather than re-implemented per handler.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    errors::{ApiError, ErrorKind},
    http::{
        auth::IdentityClaims,
        jsonld::{OrderDocument, SellerOrderDocument},
        AppState, JsonLd,
    },
    ids::OrderId,
};

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
    Path(id): Path<String>,
) -> Result<JsonLd<OrderDocument>, ApiError> {
    let id = OrderId::parse(&id)?;
    let order = state
        .access
        .get_order_for_buyer(&id, &claims.address, claims.chain_id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound(format!("order {id} not found")))?;
    Ok(JsonLd::ok((&order).into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGetOrdersBody {
    pub order_ids: Vec<String>,
}

pub async fn batch_get_orders(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
    Json(body): Json<BatchGetOrdersBody>,
) -> Result<JsonLd<Vec<OrderDocument>>, ApiError> {
    let ids = body.order_ids.iter().map(|s| OrderId::parse(s)).collect::<Result<Vec<_>, _>>()?;
    let orders = state.access.get_orders_for_buyer_by_ids(&ids, &claims.address, claims.chain_id).await?;
    Ok(JsonLd::ok(orders.iter().map(OrderDocument::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_orders_by_buyer(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
    Query(page): Query<PageQuery>,
) -> Result<JsonLd<Vec<OrderDocument>>, ApiError> {
    let orders = state
        .access
        .get_orders_for_buyer(&claims.address, claims.chain_id, page.page.unwrap_or(1), page.page_size.unwrap_or(20))
        .await?;
    Ok(JsonLd::ok(orders.iter().map(OrderDocument::from).collect()))
}

const MAX_SELLER_PAGE_SIZE: u32 = 100;

/// `GET /orders/by-seller` (spec §4.13 `GetOrderForSeller` applied across
/// every order id the seller participates in). `OrderStore` only exposes a
/// flat id list per seller (spec §4.8), so pagination over the seller's
/// line-filtered projections happens here rather than in SQL.
pub async fn list_orders_by_seller(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
    Query(page): Query<PageQuery>,
) -> Result<JsonLd<Vec<SellerOrderDocument>>, ApiError> {
    let page_number = page.page.unwrap_or(1).max(1) as usize;
    let page_size = page.page_size.unwrap_or(20).max(1).min(MAX_SELLER_PAGE_SIZE) as usize;

    let order_ids = state.orders.get_order_ids_by_seller(claims.chain_id, &claims.address).await?;

    let mut projected = Vec::with_capacity(order_ids.len());
    for id in &order_ids {
        if let Some(dto) = state.access.get_order_for_seller(id, &claims.address, claims.chain_id).await? {
            projected.push(dto);
        }
    }

    let start = (page_number - 1) * page_size;
    let page_items = projected.into_iter().skip(start).take(page_size);
    Ok(JsonLd::ok(page_items.map(|dto| SellerOrderDocument::from(&dto)).collect()))
}

pub async fn get_order_as_seller(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
    Path(id): Path<String>,
) -> Result<JsonLd<SellerOrderDocument>, ApiError> {
    let id = OrderId::parse(&id)?;
    let dto = state
        .access
        .get_order_for_seller(&id, &claims.address, claims.chain_id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound(format!("order {id} not found")))?;
    Ok(JsonLd::ok((&dto).into()))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntryWire {
    pub order_id: OrderId,
    pub old_status: Option<&'static str>,
    pub new_status: &'static str,
    pub changed_at: chrono::DateTime<chrono::Utc>,
}

pub async fn get_status_history(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
    Path(id): Path<String>,
) -> Result<JsonLd<Vec<StatusHistoryEntryWire>>, ApiError> {
    let id = OrderId::parse(&id)?;
    let history = state
        .access
        .get_status_history_for_buyer(&id, &claims.address, claims.chain_id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound(format!("order {id} not found")))?;
    Ok(JsonLd::ok(
        history
            .into_iter()
            .map(|entry| StatusHistoryEntryWire {
                order_id: entry.order_id,
                old_status: entry.old_status.map(|s| s.as_uri()),
                new_status: entry.new_status.as_uri(),
                changed_at: entry.changed_at,
            })
            .collect(),
    ))
}
