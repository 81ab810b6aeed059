//! Binary entrypoint: loads configuration, wires every component together,
//! runs pending migrations, and serves the HTTP surface alongside the
//! background payment poller until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use market_api::{
    access_projections::AccessProjections,
    adapters::{HttpNameRegistry, HttpObjectStore, HttpPaymentIndexer, PostgresCursorStore},
    basket_canonicalizer::BasketCanonicalizer,
    basket_store::BasketStore,
    config::AppConfig,
    fulfillment_client::{FulfillmentClient, StaticCredentialTable},
    http::{router, AppState},
    inventory_client::LiveInventoryClient,
    lifecycle::{EventBus, LifecycleHooks},
    one_off_ledger::OneOffSalesLedger,
    order_payment_flow::OrderPaymentFlow,
    order_store::OrderStore,
    payment_poller::PaymentPoller,
    product_resolver::ProductResolver,
    route_store::RouteStore,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(listen_addr = %config.listen_addr, "starting market-api");

    let pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let route_store = RouteStore::new(pool.clone());
    let ledger = OneOffSalesLedger::new(pool.clone());
    let order_store = OrderStore::new(pool.clone(), ledger.clone());

    let outbound_http = reqwest::Client::builder().timeout(config.outbound_timeout).build()?;
    let name_registry = HttpNameRegistry::new(outbound_http.clone(), config.registry_base_url.clone());
    let object_store = HttpObjectStore::new(outbound_http.clone(), config.object_store_base_url.clone());
    let resolver = ProductResolver::new(name_registry, object_store);
    let inventory_client = LiveInventoryClient::new(&config);

    let canonicalizer = BasketCanonicalizer::new(
        resolver,
        route_store.clone(),
        inventory_client,
        config.snapshot_fresh_window,
        config.snapshot_stale_window,
    );
    let basket_store = BasketStore::new(config.basket_ttl_default.as_secs());

    let event_bus = Arc::new(EventBus::new(config.sse_channel_capacity, config.sse_max_subscribers_per_key));
    let fulfillment_client = FulfillmentClient::new(&config);
    // The admin surface that would populate per-seller outbound credentials is
    // out of scope (spec §1); requests go out unsigned until one is wired in.
    let auth_provider: Arc<dyn market_api::fulfillment_client::OutboundServiceAuthProvider> =
        Arc::new(StaticCredentialTable::new());

    let hooks = LifecycleHooks::new(
        Arc::clone(&event_bus),
        order_store.clone(),
        route_store.clone(),
        fulfillment_client,
        auth_provider,
        config.outbound_max_redirects,
    );
    let payment_flow = OrderPaymentFlow::new(order_store.clone(), hooks);

    let access = AccessProjections::new(order_store.clone());

    let cancel = CancellationToken::new();
    let poller_cancel = cancel.clone();
    let payment_indexer = HttpPaymentIndexer::new(outbound_http, config.indexer_base_url.clone());
    let cursor_store = PostgresCursorStore::new(pool.clone());
    let poller = PaymentPoller::new(payment_indexer, cursor_store, payment_flow, config.poller_interval);
    let poller_handle = tokio::spawn(async move {
        poller.run(poller_cancel).await;
    });

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        baskets: basket_store,
        canonicalizer,
        orders: order_store,
        access,
        event_bus,
    });
    let app = axum::Router::new().nest("/api/cart/v1", router(state));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await?;

    cancel.cancel();
    if let Err(e) = poller_handle.await {
        tracing::warn!(error = %e, "payment poller task did not shut down cleanly");
    }
    // Give the poller's final in-flight batch a moment to settle before the
    // process pool connections are dropped.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}
