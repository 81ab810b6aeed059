//! C2 — `ProductResolver`: resolves `(chain, seller, operator, sku)` to the
//! canonical signed `Product` plus its content digest (spec §4.2).
//!
//! The name registry, signed-link index and content-addressed object store
//! are external collaborators (spec §1 Out of scope) — this module only
//! defines the narrow trait seams it needs from them and composes them.
//! Signature verification is likewise external; `NameRegistry::resolve_link`
//! is documented to have already checked operator/seller signatures before
//! returning, surfacing a mismatch as `InvalidState`.

use async_trait::async_trait;

use crate::{
    domain::product::{Product, ResolvedProduct},
    errors::{ApiError, ErrorKind},
    ids::{Address, ChainId},
};

/// A signed link entry as published by a seller under a registry profile.
#[derive(Debug, Clone)]
pub struct SignedProductLink {
    pub content_digest: String,
}

/// Seam onto the name registry + signed-link index (spec §1, §4.2). A real
/// deployment's implementation walks the registry's profile digest to the
/// seller's most recent `product/{sku}` link and verifies the chain of
/// signatures; that machinery lives outside this crate's scope.
#[async_trait]
pub trait NameRegistry: Send + Sync {
    /// Resolves the seller's current profile digest under the given
    /// operator context.
    async fn resolve_profile_digest(
        &self,
        chain: ChainId,
        operator: &Address,
        seller: &Address,
    ) -> Result<Option<String>, ApiError>;

    /// Walks the signed-link index rooted at `profile_digest` for the most
    /// recent `product/{sku}` link. Returns `Ok(None)` if no such link
    /// exists; returns `Err(Unprocessable)` if a link was found but its
    /// signature chain does not verify (operator/seller mismatch).
    async fn resolve_product_link(
        &self,
        profile_digest: &str,
        sku: &str,
    ) -> Result<Option<SignedProductLink>, ApiError>;
}

/// Seam onto the content-addressed object store (spec §1).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, digest: &str) -> Result<Vec<u8>, ApiError>;
}

pub struct ProductResolver<R: NameRegistry, O: ObjectStore> {
    registry: R,
    store: O,
}

impl<R: NameRegistry, O: ObjectStore> ProductResolver<R, O> {
    pub fn new(registry: R, store: O) -> Self {
        Self { registry, store }
    }

    /// Resolves `(chain, seller, operator, sku)` to the canonical signed
    /// `Product` and its content digest. Deterministic for a fixed store
    /// snapshot (spec §4.2).
    pub async fn resolve(
        &self,
        chain: ChainId,
        seller: &Address,
        operator: &Address,
        sku: &str,
    ) -> Result<ResolvedProduct, ApiError> {
        let profile_digest = self
            .registry
            .resolve_profile_digest(chain, operator, seller)
            .await?
            .ok_or_else(|| ErrorKind::NotFound(format!("no registry profile for seller {seller}")))?;

        let link = self
            .registry
            .resolve_product_link(&profile_digest, sku)
            .await?
            .ok_or_else(|| ErrorKind::NotFound(format!("Product not found for sku {sku}")))?;

        let bytes = self.store.get(&link.content_digest).await?;
        let product: Product = serde_json::from_slice(&bytes)
            .map_err(|e| ErrorKind::Unprocessable(format!("malformed product payload: {e}")))?;

        if &product.seller != seller {
            return Err(ErrorKind::Unprocessable(format!(
                "product seller {} does not match requested seller {seller}",
                product.seller
            ))
            .into());
        }

        Ok(ResolvedProduct { product, content_digest: link.content_digest })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;
    use crate::domain::money::Price;

    struct FakeRegistry {
        profiles: HashMap<(ChainId, String), String>,
        links: HashMap<(String, String), SignedProductLink>,
    }

    #[async_trait]
    impl NameRegistry for FakeRegistry {
        async fn resolve_profile_digest(
            &self,
            chain: ChainId,
            _operator: &Address,
            seller: &Address,
        ) -> Result<Option<String>, ApiError> {
            Ok(self.profiles.get(&(chain, seller.as_str().to_string())).cloned())
        }

        async fn resolve_product_link(
            &self,
            profile_digest: &str,
            sku: &str,
        ) -> Result<Option<SignedProductLink>, ApiError> {
            Ok(self.links.get(&(profile_digest.to_string(), sku.to_string())).cloned())
        }
    }

    struct FakeStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn get(&self, digest: &str) -> Result<Vec<u8>, ApiError> {
            self.objects
                .lock()
                .unwrap()
                .get(digest)
                .cloned()
                .ok_or_else(|| ErrorKind::NotFound(format!("object {digest} not found")).into())
        }
    }

    fn seller() -> Address {
        Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap()
    }

    #[tokio::test]
    async fn resolves_product_through_registry_and_store() {
        let seller_addr = seller();
        let product = Product {
            sku: "tee-1".into(),
            name: "Tee".into(),
            price: Price::new("10.00", "EUR"),
            seller: seller_addr.clone(),
            delivery_methods: None,
            required_slots: None,
            is_one_off: None,
            fulfillment_trigger: None,
        };
        let bytes = serde_json::to_vec(&product).unwrap();

        let registry = FakeRegistry {
            profiles: HashMap::from([((100, seller_addr.as_str().to_string()), "digest-profile".into())]),
            links: HashMap::from([(
                ("digest-profile".into(), "tee-1".into()),
                SignedProductLink { content_digest: "digest-product".into() },
            )]),
        };
        let store = FakeStore { objects: Mutex::new(HashMap::from([("digest-product".into(), bytes)])) };

        let resolver = ProductResolver::new(registry, store);
        let resolved = resolver.resolve(100, &seller_addr, &seller_addr, "tee-1").await.unwrap();
        assert_eq!(resolved.product.sku, "tee-1");
        assert_eq!(resolved.content_digest, "digest-product");
    }

    #[tokio::test]
    async fn missing_link_is_not_found() {
        let seller_addr = seller();
        let registry = FakeRegistry {
            profiles: HashMap::from([((100, seller_addr.as_str().to_string()), "digest-profile".into())]),
            links: HashMap::new(),
        };
        let store = FakeStore { objects: Mutex::new(HashMap::new()) };
        let resolver = ProductResolver::new(registry, store);
        let err = resolver.resolve(100, &seller_addr, &seller_addr, "tee-1").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotFound(_)));
    }
}
