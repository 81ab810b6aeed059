//! C4 — `OneOffSalesLedger`: atomic claim of one-off `(chain, seller,
//! sku)` entries (spec §4.4). Primary-key contention on
//! `one_off_sales(chain_id, seller_address, sku)` is the correctness
//! mechanism, not an application-level lock (spec §5).

use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    errors::{ApiError, ErrorKind},
    ids::{normalize_sku, Address, ChainId, OrderId},
};

/// One `(chain, seller, sku)` key to claim at checkout.
#[derive(Debug, Clone)]
pub struct OneOffKey {
    pub chain_id: ChainId,
    pub seller: Address,
    pub sku: String,
}

#[derive(Clone)]
pub struct OneOffSalesLedger {
    pool: PgPool,
}

impl OneOffSalesLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pre-checkout read: has this one-off already been sold? (spec §4.4)
    pub async fn is_sold(&self, chain_id: ChainId, seller: &Address, sku: &str) -> Result<bool, ApiError> {
        let sku = normalize_sku(sku);
        let row = sqlx::query("SELECT 1 FROM one_off_sales WHERE chain_id = $1 AND seller_address = $2 AND sku = $3")
            .bind(chain_id as i64)
            .bind(seller.as_str())
            .bind(&sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Atomically claims every key for `order_id` inside a caller-supplied
    /// transaction (so the claim commits or rolls back together with the
    /// rest of `OrderStore::Create`). Any duplicate existing key aborts
    /// the whole transaction with `OneOffAlreadySold` (spec §4.4, §5).
    pub async fn claim_many_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        keys: &[OneOffKey],
        order_id: &OrderId,
    ) -> Result<(), ApiError> {
        for key in keys {
            let sku = normalize_sku(&key.sku);
            let inserted = sqlx::query(
                r#"
                INSERT INTO one_off_sales (chain_id, seller_address, sku, order_id, ordered_at)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (chain_id, seller_address, sku) DO NOTHING
                "#,
            )
            .bind(key.chain_id as i64)
            .bind(key.seller.as_str())
            .bind(&sku)
            .bind(order_id.as_str())
            .execute(&mut **tx)
            .await?;

            if inserted.rows_affected() == 0 {
                return Err(ErrorKind::OneOffAlreadySold {
                    chain: key.chain_id,
                    seller: key.seller.as_str().to_string(),
                    sku,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Which order owns a one-off sale, if any (used by seller-facing
    /// diagnostics; not on the hot checkout path).
    pub async fn owner_of(
        &self,
        chain_id: ChainId,
        seller: &Address,
        sku: &str,
    ) -> Result<Option<OrderId>, ApiError> {
        let sku = normalize_sku(sku);
        let row = sqlx::query("SELECT order_id FROM one_off_sales WHERE chain_id = $1 AND seller_address = $2 AND sku = $3")
            .bind(chain_id as i64)
            .bind(seller.as_str())
            .bind(&sku)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| OrderId::parse(&r.try_get::<String, _>("order_id")?)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_sku_before_claiming() {
        let key = OneOffKey {
            chain_id: 100,
            seller: Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap(),
            sku: "AbC".into(),
        };
        assert_eq!(normalize_sku(&key.sku), "abc");
    }
}
