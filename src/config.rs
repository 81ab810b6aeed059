//! Startup configuration, centralized in one struct per Design Note
//! "Global mutable state" (spec §9): nothing in this crate reads
//! `std::env::var` directly outside this module.

use std::time::Duration;

/// Process-wide configuration, populated once at startup and handed down
/// as `Arc<AppConfig>`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string for `OrderStore`/`RouteStore`/ledger.
    pub database_url: String,
    /// Bind address for the HTTP surface.
    pub listen_addr: String,
    /// The chain used when a basket's `chainId` is not supplied.
    pub default_chain_id: u64,
    /// Basket TTL default, clamped to [1s, 7d] on patch (spec §3).
    pub basket_ttl_default: Duration,
    pub basket_ttl_min: Duration,
    pub basket_ttl_max: Duration,
    /// Snapshot cache freshness windows (spec §4.5).
    pub snapshot_fresh_window: Duration,
    pub snapshot_stale_window: Duration,
    /// Outbound HTTP timeout and redirect hop limit (spec §5, §4.12).
    pub outbound_timeout: Duration,
    pub outbound_max_redirects: u8,
    /// Response body cap for outbound calls (bytes).
    pub outbound_body_cap_bytes: usize,
    /// Default per-subscriber SSE channel capacity (spec §4.11).
    pub sse_channel_capacity: usize,
    /// Max subscribers per (addressKey, chainId) (spec §4.11).
    pub sse_max_subscribers_per_key: usize,
    /// Default fulfillment header name, overridable per credential row.
    pub default_fulfillment_header: String,
    /// Interval between `PaymentPoller` batches.
    pub poller_interval: Duration,
    /// Base URL of the external name-registry/signed-link service consulted
    /// by `ProductResolver` (spec §1, §4.2 — an out-of-scope collaborator
    /// reached over HTTP).
    pub registry_base_url: String,
    /// Base URL of the external content-addressed object store.
    pub object_store_base_url: String,
    /// Base URL of the external on-chain payment event indexer.
    pub indexer_base_url: String,
}

impl AppConfig {
    /// Loads configuration from environment variables, falling back to
    /// sane local-dev defaults. This is the single place in the crate that
    /// touches `std::env`.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        fn var(key: &str, default: &str) -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        }
        fn var_u64(key: &str, default: u64) -> Result<u64, anyhow::Error> {
            match std::env::var(key) {
                Ok(v) => Ok(v.parse()?),
                Err(_) => Ok(default),
            }
        }

        Ok(Self {
            database_url: var("MARKET_API_DATABASE_URL", "postgres://localhost/market_api"),
            listen_addr: var("MARKET_API_LISTEN_ADDR", "0.0.0.0:8080"),
            default_chain_id: var_u64("MARKET_API_DEFAULT_CHAIN_ID", 100)?,
            basket_ttl_default: Duration::from_secs(var_u64("MARKET_API_BASKET_TTL_DEFAULT_SECS", 86_400)?),
            basket_ttl_min: Duration::from_secs(1),
            basket_ttl_max: Duration::from_secs(604_800),
            snapshot_fresh_window: Duration::from_secs(60),
            snapshot_stale_window: Duration::from_secs(300),
            outbound_timeout: Duration::from_secs(var_u64("MARKET_API_OUTBOUND_TIMEOUT_SECS", 10)?),
            outbound_max_redirects: 5,
            outbound_body_cap_bytes: 2 * 1024 * 1024,
            sse_channel_capacity: 1,
            sse_max_subscribers_per_key: 2,
            default_fulfillment_header: var("MARKET_API_DEFAULT_FULFILLMENT_HEADER", "X-Circles-Service-Key"),
            poller_interval: Duration::from_secs(var_u64("MARKET_API_POLLER_INTERVAL_SECS", 5)?),
            registry_base_url: var("MARKET_API_REGISTRY_BASE_URL", "http://localhost:9001"),
            object_store_base_url: var("MARKET_API_OBJECT_STORE_BASE_URL", "http://localhost:9002"),
            indexer_base_url: var("MARKET_API_INDEXER_BASE_URL", "http://localhost:9003"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_bounds_match_spec() {
        let cfg = AppConfig {
            database_url: String::new(),
            listen_addr: String::new(),
            default_chain_id: 1,
            basket_ttl_default: Duration::from_secs(86_400),
            basket_ttl_min: Duration::from_secs(1),
            basket_ttl_max: Duration::from_secs(604_800),
            snapshot_fresh_window: Duration::from_secs(60),
            snapshot_stale_window: Duration::from_secs(300),
            outbound_timeout: Duration::from_secs(10),
            outbound_max_redirects: 5,
            outbound_body_cap_bytes: 1024,
            sse_channel_capacity: 1,
            sse_max_subscribers_per_key: 2,
            default_fulfillment_header: "X-Circles-Service-Key".into(),
            poller_interval: Duration::from_secs(5),
            registry_base_url: "http://localhost:9001".into(),
            object_store_base_url: "http://localhost:9002".into(),
            indexer_base_url: "http://localhost:9003".into(),
        };
        assert_eq!(cfg.basket_ttl_min.as_secs(), 1);
        assert_eq!(cfg.basket_ttl_max.as_secs(), 604_800);
    }
}
