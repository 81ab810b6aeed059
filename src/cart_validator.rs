//! C7 — `CartValidator`: runs a set of pure rules over a canonicalized
//! basket, producing slot-level requirements (spec §4.7).

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::basket::Basket;

/// Status of one evaluated requirement (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotStatus {
    Ok,
    Missing,
    /// Reserved for a structured-object assertion whose declared type
    /// doesn't match the expected one. Unreachable from a `Basket` that
    /// already deserialized cleanly through our typed model — a client
    /// sending e.g. a `shippingAddress` shaped as the wrong JSON-LD type
    /// is rejected at the request-body decoding boundary, before this
    /// validator ever runs.
    TypeMismatch,
    InvalidShape,
}

/// One evaluated requirement, matching one closed-table slot key or one
/// of the fixed structural rules (spec §4.7).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequirement {
    pub key: String,
    pub label: &'static str,
    pub json_pointer: &'static str,
    pub status: SlotStatus,
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleTraceEntry {
    pub rule: &'static str,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub basket_id: String,
    pub requirements: Vec<ValidationRequirement>,
    pub missing: Vec<String>,
    pub rule_trace: Vec<RuleTraceEntry>,
    pub valid: bool,
}

/// Derived facts about the canonicalized basket (spec §4.7).
#[derive(Debug, Clone, Copy)]
struct BasketFacts {
    has_physical_lines: bool,
    invoice_likely: bool,
    has_age_restricted_items: bool,
}

const DOWNLOAD_ONLY_METHOD: &str = "digital-download";

impl BasketFacts {
    fn derive(basket: &Basket) -> Self {
        let has_physical_lines = basket.items.iter().any(|item| {
            let Some(snapshot) = &item.offer_snapshot else { return true };
            match &snapshot.delivery_methods {
                None => true,
                Some(methods) => !(methods.len() == 1 && methods[0] == DOWNLOAD_ONLY_METHOD),
            }
        });
        let has_age_restricted_items = basket.items.iter().any(|item| {
            item.offer_snapshot
                .as_ref()
                .and_then(|s| s.required_slots.as_ref())
                .is_some_and(|slots| slots.iter().any(|s| s == "ageProof.birthDate"))
        });
        let invoice_likely = basket.billing_address.is_some();
        Self { has_physical_lines, invoice_likely, has_age_restricted_items }
    }
}

enum SlotValue {
    ObjectMissing,
    FieldBlank,
    Present,
}

fn is_blank(s: &Option<String>) -> bool {
    s.as_deref().is_none_or_empty()
}

trait IsNoneOrEmpty {
    fn is_none_or_empty(&self) -> bool;
}

impl IsNoneOrEmpty for Option<&str> {
    fn is_none_or_empty(&self) -> bool {
        match self {
            None => true,
            Some(s) => s.trim().is_empty(),
        }
    }
}

fn slot_value(basket: &Basket, key: &str) -> SlotValue {
    match key {
        "contactPoint.email" => match &basket.contact_point {
            None => SlotValue::ObjectMissing,
            Some(c) if is_blank(&c.email) => SlotValue::FieldBlank,
            Some(_) => SlotValue::Present,
        },
        "contactPoint.telephone" => match &basket.contact_point {
            None => SlotValue::ObjectMissing,
            Some(c) if is_blank(&c.telephone) => SlotValue::FieldBlank,
            Some(_) => SlotValue::Present,
        },
        "ageProof.birthDate" => match &basket.age_proof {
            None => SlotValue::ObjectMissing,
            Some(a) if is_blank(&a.birth_date) => SlotValue::FieldBlank,
            Some(_) => SlotValue::Present,
        },
        "ageProof.name" => match &basket.age_proof {
            None => SlotValue::ObjectMissing,
            Some(a) if is_blank(&a.name) => SlotValue::FieldBlank,
            Some(_) => SlotValue::Present,
        },
        "customer.name" => match &basket.customer {
            None => SlotValue::ObjectMissing,
            Some(c) if is_blank(&c.name) => SlotValue::FieldBlank,
            Some(_) => SlotValue::Present,
        },
        "shippingAddress.streetAddress" => address_field(basket.shipping_address.as_ref(), |a| &a.street_address),
        "shippingAddress.addressLocality" => {
            address_field(basket.shipping_address.as_ref(), |a| &a.address_locality)
        },
        "shippingAddress.postalCode" => address_field(basket.shipping_address.as_ref(), |a| &a.postal_code),
        "shippingAddress.addressCountry" => {
            address_field(basket.shipping_address.as_ref(), |a| &a.address_country)
        },
        _ => SlotValue::ObjectMissing,
    }
}

fn address_field(
    addr: Option<&crate::domain::basket::PostalAddress>,
    field: impl Fn(&crate::domain::basket::PostalAddress) -> &Option<String>,
) -> SlotValue {
    match addr {
        None => SlotValue::ObjectMissing,
        Some(a) if is_blank(field(a)) => SlotValue::FieldBlank,
        Some(_) => SlotValue::Present,
    }
}

/// `(label, json pointer)` for each recognized required-slot key — the
/// closed table referenced by spec §4.7. An unrecognized key is simply
/// dropped from the union rather than producing a synthetic requirement:
/// the table is closed by design.
fn slot_descriptor(key: &str) -> Option<(&'static str, &'static str)> {
    match key {
        "contactPoint.email" => Some(("Contact email", "/contactPoint/email")),
        "contactPoint.telephone" => Some(("Contact telephone", "/contactPoint/telephone")),
        "ageProof.birthDate" => Some(("Age proof birth date", "/ageProof/birthDate")),
        "ageProof.name" => Some(("Age proof name", "/ageProof/name")),
        "customer.name" => Some(("Customer name", "/customer/name")),
        "shippingAddress.streetAddress" => Some(("Shipping street address", "/shippingAddress/streetAddress")),
        "shippingAddress.addressLocality" => Some(("Shipping locality", "/shippingAddress/addressLocality")),
        "shippingAddress.postalCode" => Some(("Shipping postal code", "/shippingAddress/postalCode")),
        "shippingAddress.addressCountry" => Some(("Shipping country", "/shippingAddress/addressCountry")),
        _ => None,
    }
}

fn status_for(key: &str, basket: &Basket) -> SlotStatus {
    match slot_value(basket, key) {
        SlotValue::ObjectMissing => SlotStatus::Missing,
        SlotValue::FieldBlank => SlotStatus::InvalidShape,
        SlotValue::Present => SlotStatus::Ok,
    }
}

pub struct CartValidator;

impl CartValidator {
    /// Runs every rule over `basket` (already canonicalized) and returns
    /// the aggregate result (spec §4.7).
    #[must_use]
    pub fn validate(basket: &Basket) -> ValidationResult {
        let facts = BasketFacts::derive(basket);
        let mut requirements = Vec::new();
        let mut rule_trace = Vec::new();

        rule_items_non_empty(basket, &mut requirements, &mut rule_trace);
        rule_offer_required_slots(basket, &mut requirements, &mut rule_trace);
        rule_customer_name(basket, &requirements, &mut rule_trace);
        rule_shipping_address(basket, &facts, &mut requirements, &mut rule_trace);

        if facts.has_age_restricted_items {
            rule_trace.push(RuleTraceEntry {
                rule: "AgeRestrictedItems",
                note: "basket contains at least one age-restricted line".to_string(),
            });
        }
        if facts.invoice_likely {
            rule_trace.push(RuleTraceEntry {
                rule: "InvoiceLikely",
                note: "billing address present, invoice path likely".to_string(),
            });
        }

        let missing: Vec<String> = requirements
            .iter()
            .filter(|r| r.status != SlotStatus::Ok)
            .map(|r| r.key.clone())
            .collect();
        let valid = requirements.iter().all(|r| !r.blocking || r.status == SlotStatus::Ok);

        ValidationResult {
            basket_id: basket.id.as_str().to_string(),
            requirements,
            missing,
            rule_trace,
            valid,
        }
    }
}

fn rule_items_non_empty(
    basket: &Basket,
    requirements: &mut Vec<ValidationRequirement>,
    rule_trace: &mut Vec<RuleTraceEntry>,
) {
    let status = if basket.items.is_empty() { SlotStatus::Missing } else { SlotStatus::Ok };
    requirements.push(ValidationRequirement {
        key: "items.nonEmpty".to_string(),
        label: "At least one basket line",
        json_pointer: "/items",
        status,
        blocking: true,
    });
    rule_trace.push(RuleTraceEntry { rule: "ItemsNonEmpty", note: format!("{} line(s)", basket.items.len()) });
}

/// Union of every offer snapshot's `requiredSlots`, resolved through the
/// closed slot table (spec §4.7).
fn rule_offer_required_slots(
    basket: &Basket,
    requirements: &mut Vec<ValidationRequirement>,
    rule_trace: &mut Vec<RuleTraceEntry>,
) {
    let mut union: BTreeSet<String> = BTreeSet::new();
    for item in &basket.items {
        if let Some(slots) = item.offer_snapshot.as_ref().and_then(|s| s.required_slots.as_ref()) {
            union.extend(slots.iter().cloned());
        }
    }

    for key in &union {
        let Some((label, pointer)) = slot_descriptor(key) else { continue };
        let status = status_for(key, basket);
        requirements.push(ValidationRequirement {
            key: key.clone(),
            label,
            json_pointer: pointer,
            status,
            blocking: true,
        });
    }
    rule_trace.push(RuleTraceEntry {
        rule: "OfferRequiredSlots",
        note: format!("{} distinct required slot(s)", union.len()),
    });
}

/// `customer.name` is already covered by `OfferRequiredSlots` when it's
/// in the union; this rule only contributes a trace entry, so the slot
/// never appears twice in `requirements` (spec §4.7).
fn rule_customer_name(basket: &Basket, requirements: &[ValidationRequirement], rule_trace: &mut Vec<RuleTraceEntry>) {
    let required = requirements.iter().any(|r| r.key == "customer.name");
    rule_trace.push(RuleTraceEntry {
        rule: "CustomerName",
        note: if required {
            format!("required, status={:?}", status_for("customer.name", basket))
        } else {
            "not required by any offer in this basket".to_string()
        },
    });
}

/// Legacy rule: any non-download-only line requires a complete
/// `PostalAddress` (spec §4.7). Skipped entirely — no requirement
/// produced — when the basket has only download-only lines.
fn rule_shipping_address(
    basket: &Basket,
    facts: &BasketFacts,
    requirements: &mut Vec<ValidationRequirement>,
    rule_trace: &mut Vec<RuleTraceEntry>,
) {
    if !facts.has_physical_lines {
        rule_trace.push(RuleTraceEntry {
            rule: "ShippingAddress",
            note: "skipped: no physical lines in basket".to_string(),
        });
        return;
    }
    let status = match &basket.shipping_address {
        None => SlotStatus::Missing,
        Some(a) if !a.has_all_required_fields() => SlotStatus::InvalidShape,
        Some(_) => SlotStatus::Ok,
    };
    requirements.push(ValidationRequirement {
        key: "shippingAddress".to_string(),
        label: "Complete shipping address",
        json_pointer: "/shippingAddress",
        status,
        blocking: true,
    });
    rule_trace.push(RuleTraceEntry { rule: "ShippingAddress", note: format!("status={status:?}") });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::basket::{BasketItem, ContactPoint, OfferSnapshot, PostalAddress},
        domain::money::Price,
        ids::Address,
    };

    fn seller() -> Address {
        Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap()
    }

    fn basket_with_item(required_slots: Option<Vec<String>>, delivery_methods: Option<Vec<String>>) -> Basket {
        let mut basket = Basket::new(None, None, 100, 3600);
        basket.items.push(BasketItem {
            seller: seller(),
            sku: "tee-1".into(),
            order_quantity: 1,
            image_url: None,
            product_cid: Some("digest".into()),
            offer_snapshot: Some(OfferSnapshot {
                price: Price::new("10.00", "EUR"),
                seller_id: "eip155:100:0xcccccccccccccccccccccccccccccccccccccccc".into(),
                delivery_methods,
                required_slots,
                is_one_off: false,
                fulfillment_trigger: None,
                fulfillment_endpoint: None,
            }),
        });
        basket
    }

    #[test]
    fn empty_basket_is_invalid() {
        let basket = Basket::new(None, None, 100, 3600);
        let result = CartValidator::validate(&basket);
        assert!(!result.valid);
        assert!(result.missing.contains(&"items.nonEmpty".to_string()));
    }

    #[test]
    fn missing_required_slot_blocks_validity() {
        let basket = basket_with_item(Some(vec!["contactPoint.email".to_string()]), None);
        let result = CartValidator::validate(&basket);
        assert!(!result.valid);
        assert!(result.missing.contains(&"contactPoint.email".to_string()));
    }

    #[test]
    fn present_required_slot_is_ok() {
        let mut basket = basket_with_item(Some(vec!["contactPoint.email".to_string()]), None);
        basket.contact_point = Some(ContactPoint { email: Some("a@b.com".into()), telephone: None });
        let result = CartValidator::validate(&basket);
        assert!(result.requirements.iter().any(|r| r.key == "contactPoint.email" && r.status == SlotStatus::Ok));
    }

    #[test]
    fn download_only_basket_skips_shipping_address() {
        let basket = basket_with_item(None, Some(vec!["digital-download".to_string()]));
        let result = CartValidator::validate(&basket);
        assert!(!result.requirements.iter().any(|r| r.key == "shippingAddress"));
    }

    #[test]
    fn physical_line_without_address_blocks_validity() {
        let basket = basket_with_item(None, Some(vec!["courier".to_string()]));
        let result = CartValidator::validate(&basket);
        assert!(!result.valid);
        assert!(result.missing.contains(&"shippingAddress".to_string()));
    }

    #[test]
    fn complete_shipping_address_is_ok() {
        let mut basket = basket_with_item(None, Some(vec!["courier".to_string()]));
        basket.shipping_address = Some(PostalAddress {
            street_address: Some("1 Main St".into()),
            address_locality: Some("Berlin".into()),
            postal_code: Some("10115".into()),
            address_country: Some("DE".into()),
        });
        let result = CartValidator::validate(&basket);
        assert!(result.valid);
    }
}
