//! C10 — `OrderPaymentFlow`: matches payments to orders, advances status
//! transitions, and invokes lifecycle hooks (spec §4.10).

use chrono::{DateTime, Utc};

use crate::{
    errors::ApiError,
    ids::{ChainId, PaymentReference},
    lifecycle::LifecycleHooks,
    order_store::OrderStore,
};

/// One observed payment event, already normalized by `PaymentPoller`
/// (spec §4.9).
#[derive(Debug, Clone)]
pub struct PaymentObservation {
    pub reference: PaymentReference,
    pub chain_id: ChainId,
    pub tx_hash: String,
    pub log_index: i64,
    pub gateway: String,
    pub amount_wei: Option<u128>,
    pub observed_at: DateTime<Utc>,
}

pub struct OrderPaymentFlow {
    order_store: OrderStore,
    hooks: LifecycleHooks,
}

impl OrderPaymentFlow {
    #[must_use]
    pub fn new(order_store: OrderStore, hooks: LifecycleHooks) -> Self {
        Self { order_store, hooks }
    }

    /// On a new payment event: mark paid, then invoke `OnPaidAsync` iff
    /// the transition actually happened (spec §4.10). Idempotent —
    /// replaying the same event after the order is already paid is a
    /// no-op both here and in the store.
    pub async fn on_payment_observed(&self, payment: &PaymentObservation) -> Result<(), ApiError> {
        let transitioned = self
            .order_store
            .try_mark_paid_by_reference(
                &payment.reference,
                payment.chain_id,
                &payment.tx_hash,
                payment.log_index,
                &payment.gateway,
                payment.amount_wei,
                payment.observed_at,
            )
            .await?;
        if transitioned {
            self.hooks.on_paid(&payment.reference).await?;
        }
        Ok(())
    }

    /// On an external confirmation signal (N confirmations / finality)
    /// (spec §4.10).
    pub async fn on_confirmation_observed(
        &self,
        reference: &PaymentReference,
        at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let transitioned = self.order_store.try_mark_confirmed_by_reference(reference, at).await?;
        if transitioned {
            self.hooks.on_confirmed(reference).await?;
        }
        Ok(())
    }

    /// On a final signal (spec §4.10).
    pub async fn on_finalization_observed(
        &self,
        reference: &PaymentReference,
        at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let transitioned = self.order_store.try_mark_finalized_by_reference(reference, at).await?;
        if transitioned {
            self.hooks.on_finalized(reference).await?;
        }
        Ok(())
    }
}
