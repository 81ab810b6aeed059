//! C14 — the HTTP surface: `AppState`, the `Router`, and the JSON-LD
//! response wrapper every handler returns through (spec §4.14, §6.1).

pub mod auth;
pub mod baskets;
pub mod jsonld;
pub mod orders;
pub mod sse;

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    access_projections::AccessProjections,
    adapters::{HttpNameRegistry, HttpObjectStore},
    basket_canonicalizer::BasketCanonicalizer,
    basket_store::BasketStore,
    config::AppConfig,
    lifecycle::EventBus,
    order_store::OrderStore,
};

/// The concrete canonicalizer type the HTTP layer is wired against — the
/// generic `BasketCanonicalizer<R, O>` resolved to its HTTP-backed
/// collaborators (spec §1, §4.5).
pub type Canonicalizer = BasketCanonicalizer<HttpNameRegistry, HttpObjectStore>;

/// Process-wide shared state, handed to every handler behind `Arc` so
/// nothing here needs its own `Clone` impl.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub baskets: BasketStore,
    pub canonicalizer: Canonicalizer,
    pub orders: OrderStore,
    pub access: AccessProjections,
    pub event_bus: Arc<EventBus>,
}

/// Wraps any `Serialize` response body with the JSON-LD content type and
/// the `nosniff` guard every response on this surface carries (spec §6.1).
pub struct JsonLd<T>(pub T, pub StatusCode);

impl<T: Serialize> JsonLd<T> {
    #[must_use]
    pub fn ok(body: T) -> Self {
        Self(body, StatusCode::OK)
    }

    #[must_use]
    pub fn created(body: T) -> Self {
        Self(body, StatusCode::CREATED)
    }
}

impl<T: Serialize> IntoResponse for JsonLd<T> {
    fn into_response(self) -> Response {
        let mut response = (self.1, Json(self.0)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/ld+json; charset=utf-8"));
        headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
        response
    }
}

/// Builds the router for every endpoint in spec §4.14, unprefixed — the
/// caller nests this under `/api/cart/v1` (spec §6.1).
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/baskets", post(baskets::create_basket))
        .route("/baskets/:id", get(baskets::get_basket).patch(baskets::patch_basket))
        .route("/baskets/:id/validate", post(baskets::validate_basket))
        .route("/baskets/:id/preview", post(baskets::preview_basket))
        .route("/baskets/:id/checkout", post(baskets::checkout_basket))
        .route("/orders/batch", post(orders::batch_get_orders))
        .route("/orders/by-buyer", get(orders::list_orders_by_buyer))
        .route("/orders/by-seller", get(orders::list_orders_by_seller))
        .route("/orders/events", get(sse::buyer_events))
        .route("/orders/sales/events", get(sse::seller_events))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/as-seller", get(orders::get_order_as_seller))
        .route("/orders/:id/status-history", get(orders::get_status_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
