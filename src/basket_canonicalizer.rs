//! C5 — `BasketCanonicalizer`: makes a basket server-authoritative so
//! checkout and validation are reproducible from stored state alone
//! (spec §4.5).
//!
//! Uses a per-key cache guarding an expensive recompute: a two-tier
//! fresh/stale snapshot cache keyed by `(basketId, fingerprint)`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::{
    domain::basket::{BasketItem, OfferSnapshot},
    domain::route::UpstreamKind,
    errors::{ApiError, ErrorKind},
    ids::{eip155_seller_id, normalize_sku, Address, BasketId, ChainId},
    inventory_client::LiveInventoryClient,
    product_resolver::{NameRegistry, ObjectStore, ProductResolver},
    route_store::RouteStore,
};

#[derive(Clone)]
struct CacheEntry {
    items: Vec<BasketItem>,
    fetched_at: DateTime<Utc>,
}

/// Per-line inventory accumulator keyed by `(seller, canonical sku)`
/// (spec §4.5 step 3).
#[derive(Default)]
struct InventoryAccumulator {
    available: Option<i64>,
    requested: i64,
}

/// Stable fingerprint of a basket's logical content: sorted
/// `(seller, canonical sku, quantity)` tuples (spec §4.5 step 1). A free
/// function so it can be used without pinning a concrete resolver/store
/// type.
#[must_use]
pub fn fingerprint(items: &[BasketItem]) -> String {
    let mut keys: Vec<(String, String, u32)> = items
        .iter()
        .map(|i| (i.seller.as_str().to_string(), normalize_sku(&i.sku), i.order_quantity))
        .collect();
    keys.sort();
    keys.into_iter().map(|(s, k, q)| format!("{s}|{k}|{q}")).collect::<Vec<_>>().join(";")
}

pub struct BasketCanonicalizer<R: NameRegistry, O: ObjectStore> {
    resolver: Arc<ProductResolver<R, O>>,
    routes: RouteStore,
    inventory: LiveInventoryClient,
    cache: Arc<Mutex<HashMap<(BasketId, String), CacheEntry>>>,
    fresh_window: chrono::Duration,
    stale_window: chrono::Duration,
}

impl<R: NameRegistry, O: ObjectStore> Clone for BasketCanonicalizer<R, O> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            routes: self.routes.clone(),
            inventory: self.inventory.clone(),
            cache: Arc::clone(&self.cache),
            fresh_window: self.fresh_window,
            stale_window: self.stale_window,
        }
    }
}

impl<R: NameRegistry + 'static, O: ObjectStore + 'static> BasketCanonicalizer<R, O> {
    pub fn new(
        resolver: ProductResolver<R, O>,
        routes: RouteStore,
        inventory: LiveInventoryClient,
        fresh_window: std::time::Duration,
        stale_window: std::time::Duration,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            routes,
            inventory,
            cache: Arc::new(Mutex::new(HashMap::new())),
            fresh_window: chrono::Duration::from_std(fresh_window).unwrap_or(chrono::Duration::seconds(60)),
            stale_window: chrono::Duration::from_std(stale_window).unwrap_or(chrono::Duration::seconds(300)),
        }
    }

    /// Stable fingerprint of a basket's logical content: sorted
    /// `(seller, canonical sku, quantity)` tuples (spec §4.5 step 1).
    #[must_use]
    pub fn fingerprint(items: &[BasketItem]) -> String {
        fingerprint(items)
    }

    /// Returns canonical items for `items`, consulting the snapshot cache
    /// first (spec §4.5 step 2).
    pub async fn canonicalize(
        &self,
        basket_id: &BasketId,
        chain_id: ChainId,
        operator: Option<&Address>,
        items: &[BasketItem],
    ) -> Result<Vec<BasketItem>, ApiError> {
        let fingerprint = Self::fingerprint(items);
        let key = (basket_id.clone(), fingerprint);
        let now = Utc::now();

        let cached = self.cache.lock().unwrap().get(&key).cloned();
        if let Some(entry) = cached {
            let age = now - entry.fetched_at;
            if age <= self.fresh_window {
                return Ok(entry.items);
            }
            if age <= self.stale_window {
                let refresher = self.clone();
                let basket_id = basket_id.clone();
                let operator = operator.cloned();
                let items = items.to_vec();
                let key_for_refresh = key.clone();
                tokio::spawn(async move {
                    match refresher.recompute(chain_id, operator.as_ref(), &items).await {
                        Ok(fresh) => {
                            refresher.store(key_for_refresh, fresh);
                        },
                        Err(e) => tracing::debug!(basket_id = %basket_id, error = %e, "background snapshot refresh failed"),
                    }
                });
                return Ok(entry.items);
            }
        }

        let fresh = self.recompute(chain_id, operator, items).await?;
        self.store(key, fresh.clone());
        Ok(fresh)
    }

    fn store(&self, key: (BasketId, String), items: Vec<BasketItem>) {
        self.cache.lock().unwrap().insert(key, CacheEntry { items, fetched_at: Utc::now() });
    }

    /// Synchronous recompute of every line (spec §4.5 step 3).
    async fn recompute(
        &self,
        chain_id: ChainId,
        operator: Option<&Address>,
        items: &[BasketItem],
    ) -> Result<Vec<BasketItem>, ApiError> {
        // Without an explicit operator context, the basket's own first
        // seller stands in for it; a registry that actually requires a
        // distinct operator identity will reject the resulting lookup.
        let Some(first) = items.first() else { return Ok(Vec::new()) };
        let operator = operator.cloned().unwrap_or_else(|| first.seller.clone());

        let mut accumulators: HashMap<(String, String), InventoryAccumulator> = HashMap::new();
        let mut out = Vec::with_capacity(items.len());

        for item in items {
            let canonical_sku_input = normalize_sku(&item.sku);
            let order_quantity = item.order_quantity.max(1);

            let resolved = self
                .resolver
                .resolve(chain_id, &item.seller, &operator, &canonical_sku_input)
                .await
                .map_err(|e| match e.kind {
                    ErrorKind::NotFound(_) => ErrorKind::Unprocessable(format!(
                        "Product not found for {}/{}",
                        item.seller, item.sku
                    ))
                    .into(),
                    _ => e,
                })?;

            let route = self
                .routes
                .try_get(chain_id, &item.seller, &canonical_sku_input)
                .await?
                .filter(|r| r.is_configured())
                .ok_or_else(|| {
                    ErrorKind::Unprocessable(format!("no configured route for {}/{}", item.seller, item.sku))
                })?;

            let canonical_sku = resolved.product.sku.clone();
            let accumulator_key = (item.seller.as_str().to_string(), canonical_sku.clone());

            let available = {
                let entry = accumulators.entry(accumulator_key.clone()).or_default();
                if entry.requested == 0 && entry.available.is_none() {
                    entry.available = if route.inventory_url_template.is_some() {
                        let url = self
                            .routes
                            .try_resolve_upstream(
                                chain_id,
                                &item.seller,
                                &canonical_sku_input,
                                UpstreamKind::Inventory,
                                &HashMap::new(),
                            )
                            .await?;
                        let (value, err) = self.inventory.fetch_quantity(&url).await;
                        if let Some(msg) = &err {
                            tracing::debug!(seller = %item.seller, sku = %canonical_sku, error = %msg, "inventory feed unavailable");
                        }
                        value
                    } else {
                        route.total_inventory
                    };
                }
                entry.requested += i64::from(order_quantity);
                entry.available
            };

            if let Some(available) = available {
                let requested = accumulators.get(&accumulator_key).map(|a| a.requested).unwrap_or(0);
                if requested > available {
                    return Err(ErrorKind::Unprocessable(format!(
                        "Requested quantity {requested} exceeds inventory {available} for {}/{canonical_sku}",
                        item.seller
                    ))
                    .into());
                }
            }

            if route.is_one_off {
                let requested = accumulators.get(&accumulator_key).map(|a| a.requested).unwrap_or(0);
                if requested > 1 {
                    return Err(ErrorKind::Unprocessable(format!(
                        "One-off item {}/{canonical_sku} quantity > 1",
                        item.seller
                    ))
                    .into());
                }
            }

            let offer_snapshot = OfferSnapshot {
                price: resolved.product.price.clone(),
                seller_id: eip155_seller_id(chain_id, &resolved.product.seller),
                delivery_methods: resolved.product.delivery_methods.clone(),
                required_slots: resolved.product.required_slots.clone(),
                is_one_off: route.is_one_off,
                fulfillment_trigger: resolved.product.fulfillment_trigger.clone(),
                fulfillment_endpoint: None,
            };

            out.push(BasketItem {
                seller: resolved.product.seller.clone(),
                sku: canonical_sku,
                order_quantity,
                image_url: item.image_url.clone(),
                product_cid: Some(resolved.content_digest.clone()),
                offer_snapshot: Some(offer_snapshot),
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::basket::BasketItem;

    fn item(seller: &str, sku: &str, qty: u32) -> BasketItem {
        BasketItem {
            seller: Address::parse(seller).unwrap(),
            sku: sku.to_string(),
            order_quantity: qty,
            image_url: None,
            product_cid: None,
            offer_snapshot: None,
        }
    }

    #[test]
    fn fingerprint_is_stable_under_reordering() {
        let a = vec![
            item("0xcccccccccccccccccccccccccccccccccccccccc", "Tee-1", 2),
            item("0xdddddddddddddddddddddddddddddddddddddddd", "mug-1", 1),
        ];
        let b = vec![
            item("0xdddddddddddddddddddddddddddddddddddddddd", "MUG-1", 1),
            item("0xcccccccccccccccccccccccccccccccccccccccc", "tee-1", 2),
        ];
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
