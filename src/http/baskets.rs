//! Basket handlers (spec §4.14, §6.1): create/get/patch/validate/preview/
//! checkout. `Patch`, `Validate`, `Preview` and `Checkout` all run the
//! canonicalizer first; only `Patch` and `Checkout` persist the result,
//! since `Validate`/`Preview` are read-only previews over in-memory state
//! (spec §4.6, §4.14).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::{
    domain::basket::{
        AgeProof, BasketItem, ContactPoint, PersonName, PostalAddress, MAX_BASKET_ITEMS, MAX_ORDER_QUANTITY,
        MIN_ORDER_QUANTITY,
    },
    domain::order::{NewOrder, OrderedItem},
    errors::{ApiError, ErrorKind},
    http::{
        auth::IdentityClaims,
        jsonld::{BasketDocument, OrderDocument},
        AppState, JsonLd,
    },
    ids::{BasketId, ChainId, OrderId, PaymentReference},
};

/// Request body for `POST /baskets` (spec §4.6 `Create`). Every field is
/// optional — an unauthenticated shopper may start a basket before any
/// identity is known; `operator`/`buyer` are filled in from claims when a
/// caller is authenticated via middleware further up the gateway, but this
/// surface also accepts them directly for service-to-service callers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateBasketBody {
    pub buyer: Option<String>,
    pub operator: Option<String>,
    pub chain_id: Option<ChainId>,
}

pub async fn create_basket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBasketBody>,
) -> Result<JsonLd<BasketDocument>, ApiError> {
    let buyer = body.buyer.as_deref().map(crate::ids::Address::parse).transpose()?;
    let operator = body.operator.as_deref().map(crate::ids::Address::parse).transpose()?;
    let chain_id = body.chain_id.unwrap_or(state.config.default_chain_id);

    let basket = state.baskets.create(operator, buyer, chain_id);
    Ok(JsonLd::created((&basket).into()))
}

pub async fn get_basket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<JsonLd<BasketDocument>, ApiError> {
    let id = BasketId::parse(&id)?;
    let (basket, expired) = state
        .baskets
        .get(&id)
        .ok_or_else(|| ErrorKind::NotFound(format!("basket {id} not found")))?;
    if expired {
        return Err(ErrorKind::Gone(format!("basket {id} has expired")).into());
    }
    Ok(JsonLd::ok((&basket).into()))
}

/// The whitelisted subset of `Basket` a client may overwrite via `Patch`.
/// `items`, if present, replaces the whole line list; partial line edits
/// aren't supported.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatchBasketBody {
    pub items: Option<Vec<PatchBasketItem>>,
    pub shipping_address: Option<PostalAddress>,
    pub billing_address: Option<PostalAddress>,
    pub customer: Option<PersonName>,
    pub age_proof: Option<AgeProof>,
    pub contact_point: Option<ContactPoint>,
    pub ttl_seconds: Option<u64>,
}

/// Clients may only set the fields below; `productCid`/`offerSnapshot` are
/// server-owned (spec §3) and have no field here for a client to populate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatchBasketItem {
    pub seller: String,
    pub sku: String,
    pub order_quantity: u32,
    pub image_url: Option<String>,
}

pub async fn patch_basket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PatchBasketBody>,
) -> Result<JsonLd<BasketDocument>, ApiError> {
    let id = BasketId::parse(&id)?;
    let (current, expired) = state
        .baskets
        .get(&id)
        .ok_or_else(|| ErrorKind::NotFound(format!("basket {id} not found")))?;
    if expired {
        return Err(ErrorKind::Gone(format!("basket {id} has expired")).into());
    }

    if let Some(ttl) = body.ttl_seconds {
        let min = state.config.basket_ttl_min.as_secs();
        let max = state.config.basket_ttl_max.as_secs();
        if ttl < min || ttl > max {
            return Err(ErrorKind::InvalidInput(format!("ttlSeconds must be in [{min}, {max}], got {ttl}")).into());
        }
    }

    let raw_items = match body.items {
        Some(items) => {
            if items.len() > MAX_BASKET_ITEMS {
                return Err(ErrorKind::InvalidInput(format!(
                    "basket cannot exceed {MAX_BASKET_ITEMS} items"
                ))
                .into());
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if item.order_quantity < MIN_ORDER_QUANTITY || item.order_quantity > MAX_ORDER_QUANTITY {
                    return Err(ErrorKind::InvalidInput(format!(
                        "orderQuantity must be in [{MIN_ORDER_QUANTITY}, {MAX_ORDER_QUANTITY}], got {}",
                        item.order_quantity
                    ))
                    .into());
                }
                out.push(BasketItem {
                    seller: crate::ids::Address::parse(&item.seller)?,
                    sku: item.sku,
                    order_quantity: item.order_quantity,
                    image_url: item.image_url,
                    product_cid: None,
                    offer_snapshot: None,
                });
            }
            out
        },
        None => current.items.clone(),
    };

    // Canonicalize *before* the single store mutation below, so the PATCH
    // produces exactly one version bump covering both the whitelist merge
    // and the server-authoritative rewrite (spec §4.5, §4.6).
    let canonical_items =
        state.canonicalizer.canonicalize(&id, current.chain_id, current.operator.as_ref(), &raw_items).await?;

    let patched = state.baskets.patch(&id, |b| {
        b.items = canonical_items;
        if let Some(addr) = body.shipping_address {
            b.shipping_address = Some(addr);
        }
        if let Some(addr) = body.billing_address {
            b.billing_address = Some(addr);
        }
        if let Some(customer) = body.customer {
            b.customer = Some(customer);
        }
        if let Some(age_proof) = body.age_proof {
            b.age_proof = Some(age_proof);
        }
        if let Some(contact_point) = body.contact_point {
            b.contact_point = Some(contact_point);
        }
        if let Some(ttl) = body.ttl_seconds {
            b.ttl_seconds = ttl;
        }
        Ok(())
    })?;

    Ok(JsonLd::ok((&patched).into()))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    basket: BasketDocument,
    validation: crate::cart_validator::ValidationResult,
}

/// `POST /baskets/:id/validate` (spec §4.7, §4.14): re-canonicalizes
/// in-memory (no persistence) and runs `CartValidator` over the result.
pub async fn validate_basket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<JsonLd<ValidateResponse>, ApiError> {
    let id = BasketId::parse(&id)?;
    let (basket, preview) = canonicalize_preview(&state, &id).await?;
    let validation = crate::cart_validator::CartValidator::validate(&preview);
    Ok(JsonLd::ok(ValidateResponse { basket: (&basket).into(), validation }))
}

/// `POST /baskets/:id/preview` (spec §4.14): same canonicalization as
/// `Validate`, without running the rule set — used by a client that only
/// wants the server-authoritative line rewrite (prices, inventory checks)
/// without the slot-requirement analysis.
pub async fn preview_basket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<JsonLd<BasketDocument>, ApiError> {
    let id = BasketId::parse(&id)?;
    let (_, preview) = canonicalize_preview(&state, &id).await?;
    Ok(JsonLd::ok((&preview).into()))
}

async fn canonicalize_preview(
    state: &AppState,
    id: &BasketId,
) -> Result<(crate::domain::basket::Basket, crate::domain::basket::Basket), ApiError> {
    let (basket, expired) =
        state.baskets.get(id).ok_or_else(|| ErrorKind::NotFound(format!("basket {id} not found")))?;
    if expired {
        return Err(ErrorKind::Gone(format!("basket {id} has expired")).into());
    }
    let canonical_items =
        state.canonicalizer.canonicalize(id, basket.chain_id, basket.operator.as_ref(), &basket.items).await?;
    let mut preview = basket.clone();
    preview.items = canonical_items;
    Ok((basket, preview))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub broker: Option<String>,
}

/// `POST /baskets/:id/checkout` (spec §4.14 step-by-step): canonicalize,
/// persist, validate, optimistically freeze, then create the `Order`. The
/// freeze and the order creation race any concurrent checkout attempt or
/// PATCH on the same basket; a version mismatch on freeze means someone
/// else mutated the basket since we last read it, surfaced as a 409.
pub async fn checkout_basket(
    State(state): State<Arc<AppState>>,
    claims: Option<IdentityClaims>,
    Path(id): Path<String>,
    Json(body): Json<CheckoutBody>,
) -> Result<JsonLd<OrderDocument>, ApiError> {
    let id = BasketId::parse(&id)?;
    let (current, expired) =
        state.baskets.get(&id).ok_or_else(|| ErrorKind::NotFound(format!("basket {id} not found")))?;
    if expired {
        return Err(ErrorKind::Gone(format!("basket {id} has expired")).into());
    }

    let canonical_items = state
        .canonicalizer
        .canonicalize(&id, current.chain_id, current.operator.as_ref(), &current.items)
        .await?;
    let persisted = state.baskets.patch(&id, |b| {
        b.items = canonical_items;
        Ok(())
    })?;

    let validation = crate::cart_validator::CartValidator::validate(&persisted);
    if !validation.valid {
        return Err(ErrorKind::Unprocessable(format!(
            "basket {id} is missing required fields: {:?}",
            validation.missing
        ))
        .into());
    }
    if persisted.items.is_empty() {
        return Err(ErrorKind::Unprocessable(format!("basket {id} has no items")).into());
    }

    let frozen = state
        .baskets
        .try_freeze_and_read(&id, Some(persisted.version))
        .ok_or_else(|| ErrorKind::Conflict(format!("basket {id} changed concurrently, retry checkout")))?;

    let broker = body.broker.as_deref().map(crate::ids::Address::parse).transpose()?;
    let buyer_address = claims.as_ref().map(|c| c.address.clone()).or_else(|| frozen.buyer.clone());
    let buyer_chain_id = claims.as_ref().map(|c| c.chain_id).or(Some(frozen.chain_id));

    let accepted_offer: Vec<_> = frozen
        .items
        .iter()
        .map(|item| {
            item.offer_snapshot.clone().ok_or_else(|| {
                ErrorKind::Unprocessable(format!("line {}/{} was never canonicalized", item.seller, item.sku))
            })
        })
        .collect::<Result<_, ApiError>>()?;
    let ordered_item: Vec<OrderedItem> = frozen
        .items
        .iter()
        .map(|item| OrderedItem {
            seller: item.seller.clone(),
            sku: item.sku.clone(),
            order_quantity: item.order_quantity,
            image_url: item.image_url.clone(),
            product_cid: item.product_cid.clone(),
        })
        .collect();

    let new_order = NewOrder {
        id: OrderId::new(),
        payment_reference: PaymentReference::new(),
        basket_id: id.clone(),
        buyer_address,
        buyer_chain_id,
        broker,
        accepted_offer,
        ordered_item,
    };
    let created = state.orders.create(&new_order).await?;
    if !created {
        return Err(ErrorKind::Conflict(format!("order id {} already exists", new_order.id)).into());
    }

    let order = state
        .orders
        .get(&new_order.id)
        .await?
        .ok_or_else(|| ErrorKind::Unprocessable(format!("order {} vanished right after creation", new_order.id)))?;

    Ok(JsonLd::created((&order).into()))
}
