//! RouteConfig and offer-kind types for C1 (`RouteStore`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{Address, ChainId};

/// The kind of offer a route serves. `OneOff` is tracked via `is_one_off`
/// on `RouteConfig` rather than as a variant here, since "one-off" is
/// orthogonal to which adapter fulfills the offer (spec §3: `isOneOff`
/// is its own flag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum OfferType {
    /// A known fulfillment adapter kind, e.g. an ERP integration.
    Erp,
    /// A license/code-dispenser adapter.
    CodeDispenser,
    /// A digital-download adapter with no external fulfillment call.
    DigitalDownload,
}

impl OfferType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Erp => "erp",
            Self::CodeDispenser => "code-dispenser",
            Self::DigitalDownload => "digital-download",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "erp" => Some(Self::Erp),
            "code-dispenser" => Some(Self::CodeDispenser),
            "digital-download" => Some(Self::DigitalDownload),
            _ => None,
        }
    }
}

/// Which upstream URL template to expand (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    Inventory,
    Availability,
    Fulfillment,
}

/// Persisted routing row: `(chain, seller, sku) -> offer kind, enabled,
/// inventory cap, upstream templates` (spec §3, §6.3 `market_service_routes`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub chain_id: ChainId,
    pub seller: Address,
    pub sku: String,
    pub offer_type: Option<OfferType>,
    pub is_one_off: bool,
    pub enabled: bool,
    pub total_inventory: Option<i64>,
    pub inventory_url_template: Option<String>,
    pub availability_url_template: Option<String>,
    pub fulfillment_url_template: Option<String>,
}

impl RouteConfig {
    /// `isConfigured` iff enabled AND (isOneOff OR offerType refers to a
    /// known adapter) — spec §4.1.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.enabled && (self.is_one_off || self.offer_type.is_some())
    }

    fn template_for(&self, kind: UpstreamKind) -> Option<&str> {
        match kind {
            UpstreamKind::Inventory => self.inventory_url_template.as_deref(),
            UpstreamKind::Availability => self.availability_url_template.as_deref(),
            UpstreamKind::Fulfillment => self.fulfillment_url_template.as_deref(),
        }
    }

    /// Expands a parameterized URL template. Recognized placeholders are a
    /// closed set: `{seller}`, `{sku}`, `{chain_id}`, plus any named port
    /// variables passed in `extra_vars`. An unknown placeholder is a fatal
    /// config error — the template is never best-effort substituted
    /// (spec §4.1).
    pub fn resolve_upstream(
        &self,
        kind: UpstreamKind,
        extra_vars: &HashMap<String, String>,
    ) -> Result<String, String> {
        let template = self
            .template_for(kind)
            .ok_or_else(|| format!("no {kind:?} upstream configured for {}/{}", self.seller, self.sku))?;

        let mut known = HashMap::new();
        known.insert("seller".to_string(), self.seller.as_str().to_string());
        known.insert("sku".to_string(), self.sku.clone());
        known.insert("chain_id".to_string(), self.chain_id.to_string());
        for (k, v) in extra_vars {
            known.insert(k.clone(), v.clone());
        }

        expand_template(template, &known)
    }
}

/// Expands `{name}` placeholders against a closed variable set; any
/// placeholder not present in `vars` is a hard error.
fn expand_template(template: &str, vars: &HashMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for (_, c2) in chars.by_ref() {
            if c2 == '}' {
                closed = true;
                break;
            }
            name.push(c2);
        }
        if !closed {
            return Err(format!("unterminated placeholder in template: {template}"));
        }
        match vars.get(&name) {
            Some(value) => out.push_str(value),
            None => return Err(format!("unknown template placeholder `{{{name}}}` in: {template}")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> RouteConfig {
        RouteConfig {
            chain_id: 100,
            seller: Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap(),
            sku: "tee-1".into(),
            offer_type: Some(OfferType::Erp),
            is_one_off: false,
            enabled: true,
            total_inventory: None,
            inventory_url_template: Some("https://erp.example/{seller}/{sku}?chain={chain_id}".into()),
            availability_url_template: None,
            fulfillment_url_template: Some("https://erp.example/fulfill/{seller}/{sku}/{port}".into()),
        }
    }

    #[test]
    fn is_configured_requires_enabled_and_kind() {
        let r = route();
        assert!(r.is_configured());
        let mut disabled = r.clone();
        disabled.enabled = false;
        assert!(!disabled.is_configured());

        let mut unknown = r;
        unknown.offer_type = None;
        unknown.is_one_off = false;
        assert!(!unknown.is_configured());
    }

    #[test]
    fn resolve_upstream_expands_known_placeholders() {
        let r = route();
        let url = r.resolve_upstream(UpstreamKind::Inventory, &HashMap::new()).unwrap();
        assert_eq!(url, "https://erp.example/0xcccccccccccccccccccccccccccccccccccccccc/tee-1?chain=100");
    }

    #[test]
    fn resolve_upstream_rejects_unknown_placeholder() {
        let r = route();
        let err = r.resolve_upstream(UpstreamKind::Fulfillment, &HashMap::new()).unwrap_err();
        assert!(err.contains("port"));
    }

    #[test]
    fn resolve_upstream_accepts_named_extra_vars() {
        let r = route();
        let mut extra = HashMap::new();
        extra.insert("port".to_string(), "8080".to_string());
        let url = r.resolve_upstream(UpstreamKind::Fulfillment, &extra).unwrap();
        assert!(url.ends_with("/8080"));
    }
}
