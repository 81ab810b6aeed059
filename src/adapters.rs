//! Concrete adapters over the external collaborators that `spec.md`
//! declares out of scope: the name registry + signed-link index (C2's
//! `NameRegistry`), the content-addressed object store (C2's
//! `ObjectStore`), and the on-chain payment event indexer (C9's
//! `PaymentIndexer`). Each is a thin `reqwest` client against a
//! configured base URL — the same "outbound collaborator over HTTP" shape
//! `LiveInventoryClient` already uses for the inventory feed.
//!
//! `CursorStore` is the one exception: persisting the poller's cursor is
//! this engine's own job (spec §4.9 step 3), not an external
//! responsibility, so it is backed directly by Postgres.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{
    errors::{ApiError, ErrorKind},
    ids::{Address, ChainId},
    payment_poller::{PaymentIndexer, PollCursor, RawPaymentEvent},
    product_resolver::{NameRegistry, ObjectStore, SignedProductLink},
};

/// `NameRegistry` backed by an HTTP registry service (spec §1, §4.2).
#[derive(Clone)]
pub struct HttpNameRegistry {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNameRegistry {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(serde::Deserialize)]
struct ProfileDigestResponse {
    profile_digest: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProductLinkResponse {
    content_digest: Option<String>,
}

#[async_trait]
impl NameRegistry for HttpNameRegistry {
    async fn resolve_profile_digest(
        &self,
        chain: ChainId,
        operator: &Address,
        seller: &Address,
    ) -> Result<Option<String>, ApiError> {
        let url = format!("{}/profiles/{chain}/{operator}/{seller}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ErrorKind::UpstreamFailure(format!(
                "registry profile lookup returned status {}",
                response.status()
            ))
            .into());
        }
        let body: ProfileDigestResponse = response.json().await?;
        Ok(body.profile_digest)
    }

    async fn resolve_product_link(
        &self,
        profile_digest: &str,
        sku: &str,
    ) -> Result<Option<SignedProductLink>, ApiError> {
        let url = format!("{}/profiles/{profile_digest}/products/{sku}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ErrorKind::Unprocessable(format!(
                "product link signature chain did not verify for sku {sku}"
            ))
            .into());
        }
        if !response.status().is_success() {
            return Err(ErrorKind::UpstreamFailure(format!(
                "registry product link lookup returned status {}",
                response.status()
            ))
            .into());
        }
        let body: ProductLinkResponse = response.json().await?;
        Ok(body.content_digest.map(|content_digest| SignedProductLink { content_digest }))
    }
}

/// `ObjectStore` backed by a content-addressed HTTP object service
/// (spec §1, §4.2).
#[derive(Clone)]
pub struct HttpObjectStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, digest: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/objects/{digest}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ErrorKind::NotFound(format!("object {digest} not found")).into());
        }
        if !response.status().is_success() {
            return Err(ErrorKind::UpstreamFailure(format!("object fetch returned status {}", response.status())).into());
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// `PaymentIndexer` backed by an HTTP indexer service (spec §1, §4.9).
#[derive(Clone)]
pub struct HttpPaymentIndexer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPaymentIndexer {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(serde::Deserialize)]
struct RawPaymentEventWire {
    /// Hex (`0x…`, case-insensitive) or bare decimal, per the indexer's own
    /// JSON-RPC-flavored wire format (spec §4.9 edge cases).
    block_number: String,
    transaction_index: u32,
    log_index: u32,
    chain_id: ChainId,
    payment_reference: String,
    tx_hash: String,
    gateway: String,
    amount_wei: Option<String>,
    observed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(serde::Deserialize)]
struct PollBatchResponse {
    events: Vec<RawPaymentEventWire>,
}

#[async_trait]
impl PaymentIndexer for HttpPaymentIndexer {
    async fn poll_batch(&self, cursor: Option<PollCursor>) -> Result<Vec<RawPaymentEvent>, ApiError> {
        let mut request = self.http.get(format!("{}/payment-events", self.base_url));
        if let Some(c) = cursor {
            request = request.query(&[
                ("after_block", c.block_number.to_string()),
                ("after_tx_index", c.transaction_index.to_string()),
                ("after_log_index", c.log_index.to_string()),
            ]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ErrorKind::UpstreamFailure(format!("indexer poll returned status {}", response.status())).into());
        }
        let body: PollBatchResponse = response.json().await?;
        body.events
            .into_iter()
            .map(|e| {
                let block_number = crate::payment_poller::parse_block_number(&e.block_number)?;
                let amount_wei = e.amount_wei.map(|a| a.parse::<u128>()).transpose().map_err(|_| {
                    ErrorKind::UpstreamFailure(format!("indexer returned malformed amount_wei for tx {}", e.tx_hash))
                })?;
                Ok(RawPaymentEvent {
                    cursor: PollCursor {
                        block_number,
                        transaction_index: e.transaction_index,
                        log_index: e.log_index,
                    },
                    chain_id: e.chain_id,
                    raw_payment_reference: e.payment_reference,
                    tx_hash: e.tx_hash,
                    log_index: i64::from(e.log_index),
                    gateway: e.gateway,
                    amount_wei,
                    observed_at: e.observed_at,
                })
            })
            .collect()
    }
}

/// `CursorStore` backed by a single-row Postgres table (spec §4.9 step 3,
/// §5 "single-writer cursor").
#[derive(Clone)]
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl crate::payment_poller::CursorStore for PostgresCursorStore {
    async fn load(&self) -> Result<Option<PollCursor>, ApiError> {
        let row = sqlx::query(
            "SELECT block_number, transaction_index, log_index FROM payment_poller_cursor WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(PollCursor {
                block_number: r.try_get::<i64, _>("block_number")? as u64,
                transaction_index: r.try_get::<i64, _>("transaction_index")? as u32,
                log_index: r.try_get::<i64, _>("log_index")? as u32,
            })
        })
        .transpose()
    }

    async fn save(&self, cursor: PollCursor) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO payment_poller_cursor (id, block_number, transaction_index, log_index) \
             VALUES (1, $1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET \
                block_number = EXCLUDED.block_number, \
                transaction_index = EXCLUDED.transaction_index, \
                log_index = EXCLUDED.log_index",
        )
        .bind(cursor.block_number as i64)
        .bind(cursor.transaction_index as i64)
        .bind(cursor.log_index as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
