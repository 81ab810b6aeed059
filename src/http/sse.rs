//! Server-sent events over `EventBus` (spec §4.11, §6.4). Each handler
//! subscribes under the caller's own `(address, chainId)` key; a cap
//! overflow (spec §4.11 "registration beyond cap") yields an immediately
//! closed stream rather than an error, since the client already
//! authenticated successfully and SSE has no good way to carry a 429 mid
//! stream.

use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{
    stream::{self, Stream},
    StreamExt,
};

use crate::http::{auth::IdentityClaims, AppState};

fn subscription_stream(
    state: Arc<AppState>,
    address: crate::ids::Address,
    chain_id: crate::ids::ChainId,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let Some(subscription) = state.event_bus.subscribe(&address, chain_id) else {
        return stream::empty().boxed();
    };

    stream::unfold(subscription, |subscription| async move {
        let event = subscription.recv().await?;
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        let sse_event = Event::default().event("order-status").data(payload);
        Some((Ok(sse_event), subscription))
    })
    .boxed()
}

/// `GET /orders/events` (spec §6.4): buyer-scoped order status stream.
pub async fn buyer_events(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = subscription_stream(state, claims.address, claims.chain_id);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /orders/sales/events` (spec §6.4): seller-scoped order status
/// stream — the same event shape, keyed by the seller's own address rather
/// than the buyer's (spec §4.11 publishes to both keys per status change).
pub async fn seller_events(
    State(state): State<Arc<AppState>>,
    claims: IdentityClaims,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = subscription_stream(state, claims.address, claims.chain_id);
    Sse::new(stream).keep_alive(KeepAlive::default())
}
