//! C8 — `OrderStore`: the durable, append-mostly order ledger (spec
//! §4.8). Immutable order content (accepted offers, ordered items,
//! broker) is persisted once as a JSON document; everything that changes
//! after creation — status, payment timestamps, outbox — lives in its own
//! column or table so reads never need to rewrite the JSON blob.
//!
//! Every query here uses the runtime-checked `sqlx::query` API, for the
//! same reason as `route_store.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    domain::{
        basket::OfferSnapshot,
        order::{NewOrder, Order, OrderStatus, OrderedItem, OutboxItem, StatusHistoryEntry},
    },
    errors::{ApiError, ErrorKind},
    ids::{parse_eip155_seller_id, Address, BasketId, ChainId, OrderId, PaymentReference},
    one_off_ledger::{OneOffKey, OneOffSalesLedger},
};

/// The part of an `Order` that never changes after creation, persisted as
/// one JSON document (spec §6.3 `orders.order_json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImmutableOrderPayload {
    broker: Option<Address>,
    accepted_offer: Vec<OfferSnapshot>,
    ordered_item: Vec<OrderedItem>,
}

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
    ledger: OneOffSalesLedger,
}

const MAX_PAGE_SIZE: i64 = 100;

impl OrderStore {
    #[must_use]
    pub fn new(pool: PgPool, ledger: OneOffSalesLedger) -> Self {
        Self { pool, ledger }
    }

    /// Transactional, idempotent-on-`orderId` order creation (spec §4.8
    /// steps 1-6). Returns `Ok(false)` — not an error — on an `orderId`
    /// collision; the caller surfaces that as 409.
    pub async fn create(&self, new_order: &NewOrder) -> Result<bool, ApiError> {
        if new_order.accepted_offer.len() != new_order.ordered_item.len() {
            return Err(ErrorKind::InvalidInput(
                "acceptedOffer and orderedItem must have the same length".to_string(),
            )
            .into());
        }
        let mut line_sellers: Vec<(ChainId, Address)> = Vec::with_capacity(new_order.accepted_offer.len());
        for offer in &new_order.accepted_offer {
            line_sellers.push(parse_eip155_seller_id(&offer.seller_id)?);
        }

        let mut tx = self.pool.begin().await?;

        let payload = ImmutableOrderPayload {
            broker: new_order.broker.clone(),
            accepted_offer: new_order.accepted_offer.clone(),
            ordered_item: new_order.ordered_item.clone(),
        };
        let order_json = serde_json::to_value(&payload)
            .map_err(|e| ErrorKind::Unprocessable(format!("order payload is not serializable: {e}")))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders
                (order_id, basket_id, order_json, status, created_at,
                 buyer_address, buyer_chain_id, payment_reference)
            VALUES ($1, $2, $3, 'payment_due', now(), $4, $5, $6)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(new_order.id.as_str())
        .bind(new_order.basket_id.as_str())
        .bind(&order_json)
        .bind(new_order.buyer_address.as_ref().map(Address::as_str))
        .bind(new_order.buyer_chain_id.map(|c| c as i64))
        .bind(new_order.payment_reference.as_str())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let mut distinct_sellers: Vec<(ChainId, Address)> = line_sellers.clone();
        distinct_sellers.sort_by(|a, b| (a.0, a.1.as_str()).cmp(&(b.0, b.1.as_str())));
        distinct_sellers.dedup();

        for (chain, seller) in &distinct_sellers {
            sqlx::query(
                "INSERT INTO order_sellers (order_id, seller_address, seller_chain_id, created_at) \
                 VALUES ($1, $2, $3, now()) ON CONFLICT DO NOTHING",
            )
            .bind(new_order.id.as_str())
            .bind(seller.as_str())
            .bind(*chain as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (index, (chain, seller)) in line_sellers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_line_sellers (order_id, line_index, seller_address, seller_chain_id, created_at) \
                 VALUES ($1, $2, $3, $4, now())",
            )
            .bind(new_order.id.as_str())
            .bind(index as i64)
            .bind(seller.as_str())
            .bind(*chain as i64)
            .execute(&mut *tx)
            .await?;
        }

        let mut one_off_keys = Vec::new();
        for (index, offer) in new_order.accepted_offer.iter().enumerate() {
            if !offer.is_one_off {
                continue;
            }
            let item = &new_order.ordered_item[index];
            if item.order_quantity != 1 {
                tx.rollback().await?;
                return Err(ErrorKind::InvalidInput(format!(
                    "one-off line {index} ({}/{}) must have quantity 1",
                    item.seller, item.sku
                ))
                .into());
            }
            let (chain_id, _) = line_sellers[index].clone();
            one_off_keys.push(OneOffKey { chain_id, seller: item.seller.clone(), sku: item.sku.clone() });
        }
        if !one_off_keys.is_empty() {
            self.ledger.claim_many_in_tx(&mut tx, &one_off_keys, &new_order.id).await?;
        }

        record_status_change(&mut tx, &new_order.id, None, OrderStatus::PaymentDue).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// `Get(orderId)`: full snapshot including outbox (spec §4.8).
    pub async fn get(&self, order_id: &OrderId) -> Result<Option<Order>, ApiError> {
        let Some(mut order) = self.get_internal(order_id).await? else { return Ok(None) };
        order.outbox = Some(self.get_outbox_items(order_id).await?);
        Ok(Some(order))
    }

    /// `GetInternal(orderId)`: same as `Get` without outbox (spec §4.8).
    pub async fn get_internal(&self, order_id: &OrderId) -> Result<Option<Order>, ApiError> {
        let row = sqlx::query(&format!("{ORDER_SELECT_COLUMNS_FROM} WHERE order_id = $1"))
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    /// `GetByBuyer(buyer, chain, page, pageSize)`: newest-first, paginated;
    /// includes outbox; page size clamped to `[1, 100]` (spec §4.8).
    pub async fn get_by_buyer(
        &self,
        buyer: &Address,
        chain_id: ChainId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Order>, ApiError> {
        let page = page.max(1) as i64;
        let page_size = (page_size.max(1) as i64).min(MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let rows = sqlx::query(&format!(
            "{ORDER_SELECT_COLUMNS_FROM} WHERE buyer_address = $1 AND buyer_chain_id = $2 \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(buyer.as_str())
        .bind(chain_id as i64)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut order = row_to_order(row)?;
            order.outbox = Some(self.get_outbox_items(&order.id).await?);
            orders.push(order);
        }
        Ok(orders)
    }

    /// Projection read: every order id a seller appears on (spec §4.8).
    pub async fn get_order_ids_by_seller(
        &self,
        chain_id: ChainId,
        seller: &Address,
    ) -> Result<Vec<OrderId>, ApiError> {
        let rows = sqlx::query("SELECT order_id FROM order_sellers WHERE seller_chain_id = $1 AND seller_address = $2")
            .bind(chain_id as i64)
            .bind(seller.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| OrderId::parse(&r.try_get::<String, _>("order_id")?)).collect()
    }

    /// Projection read: which line indices on `order_id` belong to
    /// `seller` (spec §4.8).
    pub async fn get_order_line_indices_for_seller(
        &self,
        order_id: &OrderId,
        seller: &Address,
    ) -> Result<Vec<i64>, ApiError> {
        let rows = sqlx::query(
            "SELECT line_index FROM order_line_sellers WHERE order_id = $1 AND seller_address = $2 \
             ORDER BY line_index",
        )
        .bind(order_id.as_str())
        .bind(seller.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<i64, _>("line_index").map_err(ApiError::from)).collect()
    }

    /// `OrderContainsSeller` projection read (spec §4.8).
    pub async fn order_contains_seller(&self, order_id: &OrderId, seller: &Address) -> Result<bool, ApiError> {
        let row = sqlx::query("SELECT 1 FROM order_sellers WHERE order_id = $1 AND seller_address = $2")
            .bind(order_id.as_str())
            .bind(seller.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// `GetOwnerByOrderId` (spec §4.8).
    pub async fn get_owner_by_order_id(&self, order_id: &OrderId) -> Result<Option<Address>, ApiError> {
        let row = sqlx::query("SELECT buyer_address FROM orders WHERE order_id = $1")
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let addr: Option<String> = r.try_get("buyer_address")?;
            addr.map(|a| Address::parse(&a)).transpose()
        })
        .transpose()
        .map(Option::flatten)
    }

    /// `GetByPaymentReference` (spec §4.8).
    pub async fn get_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Order>, ApiError> {
        let row = sqlx::query(&format!("{ORDER_SELECT_COLUMNS_FROM} WHERE payment_reference = $1"))
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    /// `GetStatusHistory`: ascending by `changedAt` (spec §4.8).
    pub async fn get_status_history(&self, order_id: &OrderId) -> Result<Vec<StatusHistoryEntry>, ApiError> {
        let rows = sqlx::query(
            "SELECT order_id, old_status, new_status, changed_at FROM orders_status_history \
             WHERE order_id = $1 ORDER BY changed_at ASC",
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(StatusHistoryEntry {
                    order_id: OrderId::parse(&r.try_get::<String, _>("order_id")?)?,
                    old_status: r.try_get::<Option<OrderStatus>, _>("old_status")?,
                    new_status: r.try_get("new_status")?,
                    changed_at: r.try_get("changed_at")?,
                })
            })
            .collect()
    }

    /// `TryMarkPaidByReference` (spec §4.8): aggregates this payment event
    /// into the `payments` table, then transitions `PaymentDue ->
    /// PaymentProcessing` only when `paidAt` is currently null and the
    /// aggregated total meets any expected amount. Idempotent: replaying
    /// the same event after a transition already happened is a no-op
    /// (spec §8).
    #[allow(clippy::too_many_arguments)]
    pub async fn try_mark_paid_by_reference(
        &self,
        reference: &PaymentReference,
        chain_id: ChainId,
        tx_hash: &str,
        log_index: i64,
        gateway: &str,
        amount_wei: Option<u128>,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let mut tx = self.pool.begin().await?;

        let total = upsert_payment_aggregate(&mut tx, reference, chain_id, tx_hash, log_index, gateway, amount_wei)
            .await?;

        let row = sqlx::query(
            "SELECT order_id, status, order_json, paid_at FROM orders WHERE payment_reference = $1 FOR UPDATE",
        )
        .bind(reference.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Err(ErrorKind::NotFound(format!("no order for payment reference {reference}")).into());
        };

        let already_paid: Option<DateTime<Utc>> = row.try_get("paid_at")?;
        if already_paid.is_some() {
            tx.commit().await?;
            return Ok(false);
        }

        let payload: serde_json::Value = row.try_get("order_json")?;
        let payload: ImmutableOrderPayload = serde_json::from_value(payload)
            .map_err(|e| ErrorKind::Unprocessable(format!("stored order payload is malformed: {e}")))?;
        let mut expected_wei: u128 = 0;
        for offer in &payload.accepted_offer {
            expected_wei = expected_wei.saturating_add(offer.price.to_wei()?);
        }

        if expected_wei > 0 && total < expected_wei {
            tx.commit().await?;
            return Ok(false);
        }

        let order_id: String = row.try_get("order_id")?;
        sqlx::query(
            "UPDATE orders SET paid_at = $1, paid_tx_hash = $2, paid_log_index = $3, paid_chain_id = $4, \
             paid_gateway = $5, paid_amount_wei = $6, status = 'payment_processing' \
             WHERE order_id = $7 AND paid_at IS NULL",
        )
        .bind(paid_at)
        .bind(tx_hash)
        .bind(log_index)
        .bind(chain_id as i64)
        .bind(gateway)
        .bind(total.to_string())
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

        record_status_change(&mut tx, &OrderId::parse(&order_id)?, Some(OrderStatus::PaymentDue), OrderStatus::PaymentProcessing)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// `TryMarkConfirmedByReference`: gate, no status change (spec §4.8).
    pub async fn try_mark_confirmed_by_reference(
        &self,
        reference: &PaymentReference,
        at: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE orders SET confirmed_at = $1 \
             WHERE payment_reference = $2 AND paid_at IS NOT NULL AND confirmed_at IS NULL",
        )
        .bind(at)
        .bind(reference.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `TryMarkFinalizedByReference`: transitions to `PaymentComplete`
    /// (spec §4.8).
    pub async fn try_mark_finalized_by_reference(
        &self,
        reference: &PaymentReference,
        at: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT order_id, status FROM orders \
             WHERE payment_reference = $1 AND paid_at IS NOT NULL AND finalized_at IS NULL FOR UPDATE",
        )
        .bind(reference.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(false);
        };
        let order_id: String = row.try_get("order_id")?;
        let previous_status: OrderStatus = row.try_get("status")?;

        sqlx::query("UPDATE orders SET finalized_at = $1, status = 'payment_complete' WHERE order_id = $2")
            .bind(at)
            .bind(&order_id)
            .execute(&mut *tx)
            .await?;

        record_status_change(&mut tx, &OrderId::parse(&order_id)?, Some(previous_status), OrderStatus::PaymentComplete)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// `AddOutboxItem(orderId, source?, payload)` (spec §4.8).
    pub async fn add_outbox_item(
        &self,
        order_id: &OrderId,
        source: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<(), ApiError> {
        sqlx::query("INSERT INTO order_outbox (order_id, payload, source, created_at) VALUES ($1, $2, $3, now())")
            .bind(order_id.as_str())
            .bind(payload)
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `GetOutboxItems(orderId)`: ascending (spec §4.8).
    pub async fn get_outbox_items(&self, order_id: &OrderId) -> Result<Vec<OutboxItem>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, order_id, payload, source, created_at FROM order_outbox \
             WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(OutboxItem {
                    id: r.try_get("id")?,
                    order_id: OrderId::parse(&r.try_get::<String, _>("order_id")?)?,
                    payload: r.try_get("payload")?,
                    source: r.try_get("source")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect()
    }
}

const ORDER_SELECT_COLUMNS_FROM: &str = "SELECT order_id, basket_id, order_json, status, created_at, \
     buyer_address, buyer_chain_id, payment_reference, paid_at, confirmed_at, finalized_at, \
     paid_tx_hash, paid_log_index, paid_chain_id, paid_gateway, paid_amount_wei FROM orders";

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, ApiError> {
    let payload: serde_json::Value = row.try_get("order_json")?;
    let payload: ImmutableOrderPayload = serde_json::from_value(payload)
        .map_err(|e| ErrorKind::Unprocessable(format!("stored order payload is malformed: {e}")))?;

    let buyer_address: Option<String> = row.try_get("buyer_address")?;
    let buyer_chain_id: Option<i64> = row.try_get("buyer_chain_id")?;
    let paid_chain_id: Option<i64> = row.try_get("paid_chain_id")?;

    Ok(Order {
        id: OrderId::parse(&row.try_get::<String, _>("order_id")?)?,
        payment_reference: PaymentReference::parse(&row.try_get::<String, _>("payment_reference")?)?,
        basket_id: BasketId::parse(&row.try_get::<String, _>("basket_id")?)?,
        buyer_address: buyer_address.map(|a| Address::parse(&a)).transpose()?,
        buyer_chain_id: buyer_chain_id.map(|c| c as u64),
        broker: payload.broker,
        status: row.try_get("status")?,
        accepted_offer: payload.accepted_offer,
        ordered_item: payload.ordered_item,
        order_date: row.try_get("created_at")?,
        paid_at: row.try_get("paid_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        finalized_at: row.try_get("finalized_at")?,
        paid_tx_hash: row.try_get("paid_tx_hash")?,
        paid_log_index: row.try_get("paid_log_index")?,
        paid_chain_id: paid_chain_id.map(|c| c as u64),
        paid_gateway: row.try_get("paid_gateway")?,
        paid_amount_wei: row.try_get("paid_amount_wei")?,
        outbox: None,
    })
}

/// Appends one `orders_status_history` row, standing in for the DB
/// trigger described in spec §4.8 — done explicitly in the caller's
/// transaction instead, so every status mutation and its history entry
/// commit or roll back together.
async fn record_status_change(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &OrderId,
    old_status: Option<OrderStatus>,
    new_status: OrderStatus,
) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO orders_status_history (order_id, old_status, new_status, changed_at) \
         VALUES ($1, $2, $3, now())",
    )
    .bind(order_id.as_str())
    .bind(old_status)
    .bind(new_status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Adds `amount_wei` (if any) to the running total for `reference` in the
/// `payments` aggregation table and returns the new total (spec §4.8,
/// §6.3 `payments`). Amounts are kept as decimal strings since Postgres
/// has no native unsigned 128-bit type; the addition happens in Rust
/// under `FOR UPDATE` to avoid a lost update.
async fn upsert_payment_aggregate(
    tx: &mut Transaction<'_, Postgres>,
    reference: &PaymentReference,
    chain_id: ChainId,
    tx_hash: &str,
    log_index: i64,
    gateway: &str,
    amount_wei: Option<u128>,
) -> Result<u128, ApiError> {
    let existing = sqlx::query("SELECT total_amount_wei FROM payments WHERE payment_reference = $1 FOR UPDATE")
        .bind(reference.as_str())
        .fetch_optional(&mut **tx)
        .await?;

    let increment = amount_wei.unwrap_or(0);
    match existing {
        Some(row) => {
            let current: String = row.try_get("total_amount_wei")?;
            let total = current
                .parse::<u128>()
                .map_err(|_| ErrorKind::Unprocessable(format!("corrupt payments aggregate for {reference}")))?
                .saturating_add(increment);
            sqlx::query("UPDATE payments SET total_amount_wei = $1 WHERE payment_reference = $2")
                .bind(total.to_string())
                .bind(reference.as_str())
                .execute(&mut **tx)
                .await?;
            Ok(total)
        },
        None => {
            sqlx::query(
                "INSERT INTO payments \
                 (payment_reference, chain_id, total_amount_wei, gateway_address, first_tx_hash, first_log_index) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(reference.as_str())
            .bind(chain_id as i64)
            .bind(increment.to_string())
            .bind(gateway)
            .bind(tx_hash)
            .bind(log_index)
            .execute(&mut **tx)
            .await?;
            Ok(increment)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_payload_round_trips_through_json() {
        let payload = ImmutableOrderPayload { broker: None, accepted_offer: vec![], ordered_item: vec![] };
        let value = serde_json::to_value(&payload).unwrap();
        let back: ImmutableOrderPayload = serde_json::from_value(value).unwrap();
        assert!(back.accepted_offer.is_empty());
    }

    #[test]
    fn page_size_clamps_within_bounds() {
        let clamp = |n: u32| (n.max(1) as i64).min(MAX_PAGE_SIZE).max(1);
        assert_eq!(clamp(0), 1);
        assert_eq!(clamp(500), MAX_PAGE_SIZE);
        assert_eq!(clamp(10), 10);
    }
}
