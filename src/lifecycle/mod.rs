//! C11 — `LifecycleHooks` & `EventBus`: in-process publish of status
//! changes to live subscribers, and fulfillment dispatch at configured
//! trigger points (spec §4.11).

pub mod event_bus;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        order::{Order, OrderStatus},
        route::UpstreamKind,
    },
    errors::ApiError,
    fulfillment_client::{FulfillmentClient, FulfillmentRequest, OutboundServiceAuthProvider},
    ids::{Address, OrderId, PaymentReference},
    order_store::OrderStore,
    route_store::RouteStore,
};

pub use event_bus::{EventBus, OrderStatusEvent};

/// The trigger name a hook invocation corresponds to (spec §4.11, GLOSSARY
/// "Trigger"). `OfferSnapshot.fulfillment_trigger` defaults to `Finalized`
/// when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Paid,
    Confirmed,
    Finalized,
}

impl Trigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }

    /// An offer's trigger name, defaulting to `finalized` when unset
    /// (spec §4.11).
    fn matches(self, offer_trigger: Option<&str>) -> bool {
        match offer_trigger {
            Some(name) => name == self.as_str(),
            None => self == Self::Finalized,
        }
    }
}

/// Guards "at most once per (order, trigger)" fulfillment dispatch
/// (spec §4.11). In-memory: a single gateway process owns dispatch for a
/// given order's lifecycle; a horizontally scaled deployment would back
/// this with a unique constraint on `(order_id, trigger)` the same way
/// `one_off_sales` enforces its own at-most-once guarantee (spec §5).
#[derive(Default)]
struct DispatchGuard {
    dispatched: Mutex<HashSet<(OrderId, &'static str)>>,
}

impl DispatchGuard {
    /// Returns `true` the first time this `(order, trigger)` pair is seen.
    fn claim(&self, order_id: &OrderId, trigger: Trigger) -> bool {
        self.dispatched.lock().unwrap().insert((order_id.clone(), trigger.as_str()))
    }
}

pub struct LifecycleHooks {
    event_bus: Arc<EventBus>,
    order_store: OrderStore,
    route_store: RouteStore,
    fulfillment: FulfillmentClient,
    auth: Arc<dyn OutboundServiceAuthProvider>,
    dispatch_guard: DispatchGuard,
    max_redirects: u8,
}

impl LifecycleHooks {
    #[must_use]
    pub fn new(
        event_bus: Arc<EventBus>,
        order_store: OrderStore,
        route_store: RouteStore,
        fulfillment: FulfillmentClient,
        auth: Arc<dyn OutboundServiceAuthProvider>,
        max_redirects: u8,
    ) -> Self {
        Self {
            event_bus,
            order_store,
            route_store,
            fulfillment,
            auth,
            dispatch_guard: DispatchGuard::default(),
            max_redirects,
        }
    }

    /// Invoked after `OrderStore::TryMarkPaidByReference` returns `true`
    /// (spec §4.10).
    pub async fn on_paid(&self, reference: &PaymentReference) -> Result<(), ApiError> {
        self.handle(reference, OrderStatus::PaymentDue, OrderStatus::PaymentProcessing, Trigger::Paid).await
    }

    /// Invoked after `OrderStore::TryMarkConfirmedByReference` returns
    /// `true` (spec §4.10). Confirmation doesn't change `status` on its
    /// own (spec §4.8), so the published event carries the order's
    /// current status as both old and new.
    pub async fn on_confirmed(&self, reference: &PaymentReference) -> Result<(), ApiError> {
        let Some(order) = self.order_store.get_by_payment_reference(reference).await? else { return Ok(()) };
        self.publish_and_dispatch(&order, order.status, order.status, Trigger::Confirmed).await
    }

    /// Invoked after `OrderStore::TryMarkFinalizedByReference` returns
    /// `true` (spec §4.10).
    pub async fn on_finalized(&self, reference: &PaymentReference) -> Result<(), ApiError> {
        self.handle(reference, OrderStatus::PaymentProcessing, OrderStatus::PaymentComplete, Trigger::Finalized).await
    }

    async fn handle(
        &self,
        reference: &PaymentReference,
        old_status: OrderStatus,
        new_status: OrderStatus,
        trigger: Trigger,
    ) -> Result<(), ApiError> {
        let Some(order) = self.order_store.get_by_payment_reference(reference).await? else { return Ok(()) };
        self.publish_and_dispatch(&order, old_status, new_status, trigger).await
    }

    /// Step 1: publish to buyer and seller queues. Step 2: dispatch
    /// fulfillment at most once per `(order, trigger)` for every offer
    /// whose trigger matches (spec §4.11).
    async fn publish_and_dispatch(
        &self,
        order: &Order,
        old_status: OrderStatus,
        new_status: OrderStatus,
        trigger: Trigger,
    ) -> Result<(), ApiError> {
        let changed_at: DateTime<Utc> = Utc::now();
        let event = OrderStatusEvent {
            order_id: order.id.clone(),
            payment_reference: order.payment_reference.clone(),
            old_status: Some(old_status),
            new_status,
            changed_at,
        };

        if let Some(buyer) = &order.buyer_address {
            if let Some(chain) = order.buyer_chain_id {
                self.event_bus.publish(buyer, chain, &event);
            }
        }
        for seller_id in order.distinct_seller_ids() {
            if let Ok((chain, seller)) = crate::ids::parse_eip155_seller_id(&seller_id) {
                self.event_bus.publish(&seller, chain, &event);
            }
        }

        self.dispatch_fulfillment(order, trigger).await
    }

    async fn dispatch_fulfillment(&self, order: &Order, trigger: Trigger) -> Result<(), ApiError> {
        if !self.dispatch_guard.claim(&order.id, trigger) {
            return Ok(());
        }

        let items_json = serde_json::to_value(&order.ordered_item).unwrap_or(serde_json::Value::Null);

        for offer in &order.accepted_offer {
            if !trigger.matches(offer.fulfillment_trigger.as_deref()) {
                continue;
            }
            let Ok((chain, seller)) = crate::ids::parse_eip155_seller_id(&offer.seller_id) else { continue };

            let endpoint = self
                .route_store
                .try_resolve_upstream(
                    chain,
                    &seller,
                    &order_sku_for_seller(order, &seller),
                    UpstreamKind::Fulfillment,
                    &Default::default(),
                )
                .await;
            let endpoint = match endpoint {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, seller = %seller, error = %e, "fulfillment endpoint resolution failed");
                    continue;
                },
            };

            let route = self.route_store.try_get(chain, &seller, &order_sku_for_seller(order, &seller)).await?;
            let service_kind =
                route.as_ref().and_then(|r| r.offer_type.as_ref()).map(|t| t.as_str()).unwrap_or("unknown");

            let request = FulfillmentRequest {
                endpoint: &endpoint,
                service_kind,
                chain_id: chain,
                seller: &seller,
                order_id: &order.id,
                payment_reference: &order.payment_reference,
                items: &items_json,
                trigger: trigger.as_str(),
            };
            if let Err(e) = self.fulfillment.dispatch(&request, self.auth.as_ref(), self.max_redirects).await {
                tracing::warn!(order_id = %order.id, seller = %seller, error = %e, "fulfillment dispatch failed");
            }
        }
        Ok(())
    }
}

/// The sku of the first ordered line belonging to `seller`, used to
/// resolve that seller's fulfillment endpoint template. An order may have
/// several lines from the same seller with different skus; the template
/// itself only ever needs `{seller}`/`{chain_id}` in practice, but we
/// still thread a concrete sku through for templates that use it.
fn order_sku_for_seller(order: &Order, seller: &Address) -> String {
    order
        .ordered_item
        .iter()
        .find(|item| &item.seller == seller)
        .map(|item| item.sku.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_defaults_to_finalized_when_unset() {
        assert!(Trigger::Finalized.matches(None));
        assert!(!Trigger::Paid.matches(None));
        assert!(Trigger::Paid.matches(Some("paid")));
        assert!(!Trigger::Paid.matches(Some("finalized")));
    }

    #[test]
    fn dispatch_guard_claims_once_per_order_and_trigger() {
        let guard = DispatchGuard::default();
        let order_id = OrderId::new();
        assert!(guard.claim(&order_id, Trigger::Paid));
        assert!(!guard.claim(&order_id, Trigger::Paid));
        assert!(guard.claim(&order_id, Trigger::Finalized));
    }
}
