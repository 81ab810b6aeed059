//! C13 — `AccessProjections`: buyer-scoped and seller-scoped reads over
//! `OrderStore`, with strict filtering (spec §4.13).

use serde::Serialize;

use crate::{
    domain::order::{Order, OrderedItem, StatusHistoryEntry},
    domain::{basket::OfferSnapshot, money::Price},
    errors::{ApiError, ErrorKind},
    ids::{Address, ChainId, OrderId},
    order_store::OrderStore,
};

pub struct AccessProjections {
    orders: OrderStore,
}

impl AccessProjections {
    #[must_use]
    pub fn new(orders: OrderStore) -> Self {
        Self { orders }
    }

    /// `GetOrderForBuyer`: owner lookup first; `None` if the stored owner
    /// tuple doesn't match (case-insensitive address — `Address` is
    /// already canonicalized lowercase on parse — exact chain)
    /// (spec §4.13).
    pub async fn get_order_for_buyer(
        &self,
        order_id: &OrderId,
        buyer: &Address,
        chain_id: ChainId,
    ) -> Result<Option<Order>, ApiError> {
        let Some(order) = self.orders.get(order_id).await? else { return Ok(None) };
        if order.buyer_address.as_ref() != Some(buyer) || order.buyer_chain_id != Some(chain_id) {
            return Ok(None);
        }
        Ok(Some(sanitize_for_buyer(order)))
    }

    /// `GetOrdersForBuyer`: delegates to `OrderStore`, clamped page size,
    /// sanitized (spec §4.13).
    pub async fn get_orders_for_buyer(
        &self,
        buyer: &Address,
        chain_id: ChainId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Order>, ApiError> {
        let orders = self.orders.get_by_buyer(buyer, chain_id, page, page_size).await?;
        Ok(orders.into_iter().map(sanitize_for_buyer).collect())
    }

    /// Filters a batch of ids down to those actually owned by `buyer`
    /// (spec §6.1 `POST /orders/batch`).
    pub async fn get_orders_for_buyer_by_ids(
        &self,
        order_ids: &[OrderId],
        buyer: &Address,
        chain_id: ChainId,
    ) -> Result<Vec<Order>, ApiError> {
        let mut out = Vec::new();
        for id in order_ids {
            if let Some(order) = self.get_order_for_buyer(id, buyer, chain_id).await? {
                out.push(order);
            }
        }
        Ok(out)
    }

    /// `GetStatusHistoryForBuyer`: same ownership gate as `GetOrderForBuyer`
    /// (spec §4.13).
    pub async fn get_status_history_for_buyer(
        &self,
        order_id: &OrderId,
        buyer: &Address,
        chain_id: ChainId,
    ) -> Result<Option<Vec<StatusHistoryEntry>>, ApiError> {
        if self.get_order_for_buyer(order_id, buyer, chain_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.orders.get_status_history(order_id).await?))
    }

    /// `GetOrderForSeller`: line-filtered view (spec §4.13). Verifies
    /// participation via `order_sellers`, then selects only the seller's
    /// own indices from both `acceptedOffer` and `orderedItem`, recomputing
    /// totals over that subset.
    pub async fn get_order_for_seller(
        &self,
        order_id: &OrderId,
        seller: &Address,
        chain_id: ChainId,
    ) -> Result<Option<SellerOrderDto>, ApiError> {
        if !self.orders.order_contains_seller(order_id, seller).await? {
            return Ok(None);
        }
        let Some(order) = self.orders.get_internal(order_id).await? else { return Ok(None) };
        if order.accepted_offer.len() != order.ordered_item.len() {
            return Err(ErrorKind::Unprocessable(format!(
                "order {order_id} has mismatched acceptedOffer/orderedItem lengths"
            ))
            .into());
        }

        // `order_line_sellers` is keyed on seller address alone for this
        // lookup; narrow to the lines whose offer actually carries the
        // requested chain, since the same address could in principle
        // appear on different chains within one order.
        let candidate_indices = self.orders.get_order_line_indices_for_seller(order_id, seller).await?;
        let indices: Vec<i64> = candidate_indices
            .into_iter()
            .filter(|&i| {
                usize::try_from(i)
                    .ok()
                    .and_then(|idx| order.accepted_offer.get(idx))
                    .and_then(|offer| crate::ids::parse_eip155_seller_id(&offer.seller_id).ok())
                    .is_some_and(|(chain, _)| chain == chain_id)
            })
            .collect();
        build_seller_dto(&order, &indices)
    }
}

/// Buyer-facing sanitization: never leak `fulfillmentEndpoint`
/// (spec §4.13).
fn sanitize_for_buyer(mut order: Order) -> Order {
    for offer in &mut order.accepted_offer {
        offer.fulfillment_endpoint = None;
    }
    order
}

/// Seller-scoped projection of an order: only the lines that seller owns
/// (spec §4.13).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOrderDto {
    pub order_id: OrderId,
    pub status: crate::domain::order::OrderStatus,
    pub accepted_offer: Vec<OfferSnapshot>,
    pub ordered_item: Vec<OrderedItem>,
    pub total_payment_due: Price,
}

fn build_seller_dto(order: &Order, indices: &[i64]) -> Result<Option<SellerOrderDto>, ApiError> {
    if indices.is_empty() {
        return Ok(None);
    }

    let mut accepted_offer = Vec::with_capacity(indices.len());
    let mut ordered_item = Vec::with_capacity(indices.len());
    let mut total_minor_units: u128 = 0;
    let mut currency: Option<String> = None;

    for &index in indices {
        let idx = usize::try_from(index)
            .map_err(|_| ErrorKind::Unprocessable(format!("negative line index on order {}", order.id)))?;
        let offer = order
            .accepted_offer
            .get(idx)
            .ok_or_else(|| ErrorKind::Unprocessable(format!("line index {idx} out of range on order {}", order.id)))?;
        let item = order
            .ordered_item
            .get(idx)
            .ok_or_else(|| ErrorKind::Unprocessable(format!("line index {idx} out of range on order {}", order.id)))?;

        let unit_wei = offer.price.to_wei()?;
        total_minor_units = total_minor_units.saturating_add(unit_wei.saturating_mul(u128::from(item.order_quantity)));
        currency.get_or_insert_with(|| offer.price.currency.clone());

        accepted_offer.push(offer.clone());
        ordered_item.push(item.clone());
    }

    // Recompute a display amount back out of the wei total at the same
    // 18-decimal scale used for matching (spec §4.8 Open Question #1);
    // this is a *display* total, not used for payment matching itself.
    let whole = total_minor_units / 1_000_000_000_000_000_000;
    let frac = total_minor_units % 1_000_000_000_000_000_000;
    let amount = if frac == 0 { whole.to_string() } else { format!("{whole}.{frac:018}").trim_end_matches('0').trim_end_matches('.').to_string() };

    Ok(Some(SellerOrderDto {
        order_id: order.id.clone(),
        status: order.status,
        accepted_offer,
        ordered_item,
        total_payment_due: Price::new(amount, currency.unwrap_or_default()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            basket::OfferSnapshot,
            order::{Order, OrderStatus, OrderedItem},
        },
        ids::{BasketId, OrderId, PaymentReference},
    };

    fn seller(tail: &str) -> Address {
        Address::parse(&format!("0x{}", tail.repeat(40))).unwrap()
    }

    fn offer(seller_id: String, amount: &str) -> OfferSnapshot {
        OfferSnapshot {
            price: Price::new(amount, "EUR"),
            seller_id,
            delivery_methods: None,
            required_slots: None,
            is_one_off: false,
            fulfillment_trigger: None,
            fulfillment_endpoint: Some("https://leak.example/should-not-appear".into()),
        }
    }

    fn item(seller: Address, qty: u32) -> OrderedItem {
        OrderedItem { seller, sku: "abc".into(), order_quantity: qty, image_url: None, product_cid: None }
    }

    fn sample_order() -> Order {
        let x = seller("c");
        let y = seller("d");
        let x_id = crate::ids::eip155_seller_id(100, &x);
        let y_id = crate::ids::eip155_seller_id(100, &y);
        Order {
            id: OrderId::new(),
            payment_reference: PaymentReference::new(),
            basket_id: BasketId::new(),
            buyer_address: None,
            buyer_chain_id: None,
            broker: None,
            status: OrderStatus::PaymentDue,
            accepted_offer: vec![offer(x_id.clone(), "1.5"), offer(y_id, "3.0"), offer(x_id, "1.5")],
            ordered_item: vec![item(x.clone(), 2), item(y.clone(), 3), item(x, 1)],
            order_date: chrono::Utc::now(),
            paid_at: None,
            confirmed_at: None,
            finalized_at: None,
            paid_tx_hash: None,
            paid_log_index: None,
            paid_chain_id: None,
            paid_gateway: None,
            paid_amount_wei: None,
            outbox: None,
        }
    }

    #[test]
    fn sanitize_clears_fulfillment_endpoint() {
        let order = sanitize_for_buyer(sample_order());
        assert!(order.accepted_offer.iter().all(|o| o.fulfillment_endpoint.is_none()));
    }

    #[test]
    fn seller_dto_filters_lines_and_sums_total() {
        // Mirrors spec §8 scenario 6: lines [A seller=X price=1.5 qty=2,
        // B seller=Y, C seller=X price=3.0 qty=3] -> seller X's total is
        // 1.5*2 + 3.0*3 = 12.0.
        let x = seller("c");
        let y = seller("d");
        let x_id = crate::ids::eip155_seller_id(100, &x);
        let y_id = crate::ids::eip155_seller_id(100, &y);
        let mut order = sample_order();
        order.accepted_offer = vec![offer(x_id.clone(), "1.5"), offer(y_id, "2.0"), offer(x_id, "3.0")];
        order.ordered_item = vec![item(x.clone(), 2), item(y, 1), item(x, 3)];

        let dto = build_seller_dto(&order, &[0, 2]).unwrap().unwrap();
        assert_eq!(dto.accepted_offer.len(), 2);
        assert_eq!(dto.ordered_item.len(), 2);
        assert_eq!(dto.total_payment_due.amount, "12");
    }

    #[test]
    fn empty_indices_yields_none() {
        let order = sample_order();
        assert!(build_seller_dto(&order, &[]).unwrap().is_none());
    }
}
