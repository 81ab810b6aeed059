//! C6 — `BasketStore`: in-memory, thread-safe basket container (spec
//! §4.6). Per-basket locking via one `Mutex<HashMap<...>>`; every
//! read/write returns a deep clone so callers never hold a reference into
//! internal state.

use std::{collections::HashMap, sync::Mutex};

use chrono::Utc;

use crate::{
    domain::basket::{Basket, BasketStatus},
    errors::{ApiError, ErrorKind},
    ids::{Address, BasketId, ChainId},
};

pub struct BasketStore {
    baskets: Mutex<HashMap<BasketId, Basket>>,
    default_ttl_seconds: u64,
}

impl BasketStore {
    #[must_use]
    pub fn new(default_ttl_seconds: u64) -> Self {
        Self { baskets: Mutex::new(HashMap::new()), default_ttl_seconds }
    }

    /// `Create(operator?, buyer?, chain?)` (spec §4.6).
    #[must_use]
    pub fn create(&self, operator: Option<Address>, buyer: Option<Address>, chain_id: ChainId) -> Basket {
        let basket = Basket::new(operator, buyer, chain_id, self.default_ttl_seconds);
        self.baskets.lock().unwrap().insert(basket.id.clone(), basket.clone());
        basket
    }

    /// `Get(id)` returns `(basketClone, expired)` or `None` (spec §4.6).
    #[must_use]
    pub fn get(&self, id: &BasketId) -> Option<(Basket, bool)> {
        let guard = self.baskets.lock().unwrap();
        let basket = guard.get(id)?;
        let expired = basket.is_expired_at(Utc::now());
        Some((basket.clone(), expired))
    }

    /// Runs `mutator` on a deep clone, bumps version/modifiedAt/expiresAt,
    /// writes it back, and returns the clone. Fails with `NotFound` if the
    /// basket does not exist, or `AlreadyCheckedOut` if it has already been
    /// frozen (spec §4.6).
    pub fn patch<F>(&self, id: &BasketId, mutator: F) -> Result<Basket, ApiError>
    where
        F: FnOnce(&mut Basket) -> Result<(), ApiError>,
    {
        let mut guard = self.baskets.lock().unwrap();
        let basket = guard.get_mut(id).ok_or_else(|| ErrorKind::NotFound(format!("basket {id} not found")))?;
        if basket.status == BasketStatus::CheckedOut {
            return Err(ErrorKind::AlreadyCheckedOut.into());
        }
        let mut clone = basket.clone();
        mutator(&mut clone)?;
        clone.touch(Utc::now());
        *basket = clone.clone();
        Ok(clone)
    }

    /// Atomically transitions to `CheckedOut` iff the current status isn't
    /// already `CheckedOut` and `expected_version` (if given) matches.
    /// Returns `None` — not an error — both when the basket doesn't exist
    /// and when the transition's preconditions aren't met; the caller
    /// re-reads current state to tell the two apart (spec §4.6).
    #[must_use]
    pub fn try_freeze_and_read(&self, id: &BasketId, expected_version: Option<u64>) -> Option<Basket> {
        let mut guard = self.baskets.lock().unwrap();
        let basket = guard.get_mut(id)?;

        let version_matches = match expected_version {
            Some(expected) => basket.version == expected,
            None => true,
        };
        if basket.status == BasketStatus::CheckedOut || !version_matches {
            return None;
        }

        basket.status = BasketStatus::CheckedOut;
        basket.version += 1;
        basket.modified_at = Utc::now();
        Some(basket.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_returns_draft_version_zero() {
        let store = BasketStore::new(3600);
        let basket = store.create(None, None, 100);
        assert_eq!(basket.version, 0);
        assert_eq!(basket.status, BasketStatus::Draft);
    }

    #[test]
    fn patch_bumps_version_and_rejects_checked_out() {
        let store = BasketStore::new(3600);
        let basket = store.create(None, None, 100);
        let patched = store.patch(&basket.id, |b| {
            b.customer = Some(crate::domain::basket::PersonName { name: Some("Ada".into()) });
            Ok(())
        })
        .unwrap();
        assert_eq!(patched.version, 1);

        store.try_freeze_and_read(&basket.id, None).unwrap();
        let err = store.patch(&basket.id, |_| Ok(())).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AlreadyCheckedOut));
    }

    #[test]
    fn try_freeze_and_read_rejects_version_mismatch() {
        let store = BasketStore::new(3600);
        let basket = store.create(None, None, 100);
        assert!(store.try_freeze_and_read(&basket.id, Some(basket.version + 1)).is_none());
    }

    #[test]
    fn try_freeze_and_read_guards_against_double_checkout() {
        let store = BasketStore::new(3600);
        let basket = store.create(None, None, 100);
        assert!(store.try_freeze_and_read(&basket.id, None).is_some());
        assert!(store.try_freeze_and_read(&basket.id, None).is_none());
    }

    #[test]
    fn get_reports_missing_basket_as_none() {
        let store = BasketStore::new(3600);
        assert!(store.get(&BasketId::new()).is_none());
    }
}
