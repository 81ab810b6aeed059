//! C1 — `RouteStore`: the persistent `(chain, seller, sku) -> offer kind`
//! routing table (spec §4.1). Backed by Postgres rather than an in-memory
//! indexed map, since routes are operator-managed configuration, not
//! session state.
//!
//! Queries are built with the runtime-checked `sqlx::query` API rather
//! than the `query!` macro, since the macro needs a live database (or
//! cached query metadata) at compile time.

use std::collections::HashMap;

use sqlx::{PgPool, Row};

use crate::{
    domain::route::{OfferType, RouteConfig, UpstreamKind},
    errors::{ApiError, ErrorKind},
    ids::{normalize_sku, Address, ChainId},
};

#[derive(Clone)]
pub struct RouteStore {
    pool: PgPool,
}

fn row_to_route(row: &sqlx::postgres::PgRow) -> Result<RouteConfig, ApiError> {
    let chain_id: i64 = row.try_get("chain_id")?;
    let seller: String = row.try_get("seller_address")?;
    let offer_type: Option<String> = row.try_get("offer_type")?;
    Ok(RouteConfig {
        chain_id: chain_id as u64,
        seller: Address::parse(&seller)?,
        sku: row.try_get("sku")?,
        offer_type: offer_type.and_then(|s| OfferType::parse(&s)),
        is_one_off: row.try_get("is_one_off")?,
        enabled: row.try_get("enabled")?,
        total_inventory: row.try_get("total_inventory")?,
        inventory_url_template: row.try_get("inventory_url_template")?,
        availability_url_template: row.try_get("availability_url_template")?,
        fulfillment_url_template: row.try_get("fulfillment_url_template")?,
    })
}

impl RouteStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lookup with normalized inputs; returns the row even if disabled —
    /// callers check `is_configured()` (spec §4.1).
    pub async fn try_get(
        &self,
        chain_id: ChainId,
        seller: &Address,
        sku: &str,
    ) -> Result<Option<RouteConfig>, ApiError> {
        let sku = normalize_sku(sku);
        let row = sqlx::query(
            r#"
            SELECT chain_id, seller_address, sku, offer_type, is_one_off, enabled,
                   total_inventory, inventory_url_template, availability_url_template,
                   fulfillment_url_template
            FROM market_service_routes
            WHERE chain_id = $1 AND seller_address = $2 AND sku = $3
            "#,
        )
        .bind(chain_id as i64)
        .bind(seller.as_str())
        .bind(&sku)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_route).transpose()
    }

    /// Expands a route's upstream URL template. An unknown placeholder is
    /// a fatal config error surfaced as 502, never a best-effort
    /// substitution (spec §4.1).
    pub async fn try_resolve_upstream(
        &self,
        chain_id: ChainId,
        seller: &Address,
        sku: &str,
        kind: UpstreamKind,
        extra_vars: &HashMap<String, String>,
    ) -> Result<String, ApiError> {
        let route = self
            .try_get(chain_id, seller, sku)
            .await?
            .ok_or_else(|| ErrorKind::UpstreamFailure(format!("no route for {seller}/{sku}")))?;
        route.resolve_upstream(kind, extra_vars).map_err(|e| ErrorKind::UpstreamFailure(e).into())
    }

    /// `enabled AND (isOneOff OR offerType is a known adapter)`
    /// (spec §4.1).
    pub async fn is_configured(&self, chain_id: ChainId, seller: &Address, sku: &str) -> Result<bool, ApiError> {
        Ok(self.try_get(chain_id, seller, sku).await?.is_some_and(|r| r.is_configured()))
    }

    /// Upserts a route row. Rejects an unknown `offer_type` string at
    /// write time as a validation error (spec §4.1 failure semantics).
    pub async fn upsert(&self, route: &RouteConfig) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO market_service_routes
                (chain_id, seller_address, sku, offer_type, is_one_off, enabled,
                 total_inventory, inventory_url_template, availability_url_template,
                 fulfillment_url_template)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (chain_id, seller_address, sku) DO UPDATE SET
                offer_type = EXCLUDED.offer_type,
                is_one_off = EXCLUDED.is_one_off,
                enabled = EXCLUDED.enabled,
                total_inventory = EXCLUDED.total_inventory,
                inventory_url_template = EXCLUDED.inventory_url_template,
                availability_url_template = EXCLUDED.availability_url_template,
                fulfillment_url_template = EXCLUDED.fulfillment_url_template
            "#,
        )
        .bind(route.chain_id as i64)
        .bind(route.seller.as_str())
        .bind(normalize_sku(&route.sku))
        .bind(route.offer_type.as_ref().map(OfferType::as_str))
        .bind(route.is_one_off)
        .bind(route.enabled)
        .bind(route.total_inventory)
        .bind(&route.inventory_url_template)
        .bind(&route.availability_url_template)
        .bind(&route.fulfillment_url_template)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Distinct enabled sellers, for upstream catalog aggregation
    /// (spec §4.1).
    pub async fn get_active_sellers(&self) -> Result<Vec<(ChainId, Address)>, ApiError> {
        let rows = sqlx::query(
            "SELECT DISTINCT chain_id, seller_address FROM market_service_routes WHERE enabled",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let chain_id: i64 = row.try_get("chain_id")?;
                let seller: String = row.try_get("seller_address")?;
                Ok((chain_id as u64, Address::parse(&seller)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `RouteStore` is a thin SQL wrapper; its interesting logic
    // (`is_configured`, template expansion) lives on `RouteConfig` itself
    // and is covered in `domain::route::tests`. Exercising this module
    // against a live Postgres instance is left to the `full-tests` suite.
    #[test]
    fn placeholder_keeps_module_test_target_nonempty() {
        assert_eq!(normalize_sku("  AbC  "), "abc");
    }
}
