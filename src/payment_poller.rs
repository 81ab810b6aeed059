//! C9 — `PaymentPoller`: a long-running task pulling payment events from
//! an external indexer by cursor, handing each off to `OrderPaymentFlow`
//! (spec §4.9).
//!
//! The indexer itself is an external collaborator (spec §1 Out of scope);
//! this module only defines the narrow seam it needs (`PaymentIndexer`)
//! and the cursor-persistence/normalization logic that's actually this
//! component's job.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{ApiError, ErrorKind},
    ids::{ChainId, PaymentReference},
    order_payment_flow::{OrderPaymentFlow, PaymentObservation},
};

/// Cursor into the indexer's event stream (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollCursor {
    pub block_number: u64,
    pub transaction_index: u32,
    pub log_index: u32,
}

/// One raw payment event row as the indexer hands it back, before
/// reference normalization (spec §4.9).
#[derive(Debug, Clone)]
pub struct RawPaymentEvent {
    pub cursor: PollCursor,
    pub chain_id: ChainId,
    pub raw_payment_reference: String,
    pub tx_hash: String,
    pub log_index: i64,
    pub gateway: String,
    pub amount_wei: Option<u128>,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

/// Seam onto the external on-chain event indexer (spec §1, §4.9).
#[async_trait]
pub trait PaymentIndexer: Send + Sync {
    /// Pulls the next batch of payment events strictly after `cursor`
    /// (or from genesis if `None`).
    async fn poll_batch(&self, cursor: Option<PollCursor>) -> Result<Vec<RawPaymentEvent>, ApiError>;
}

/// Durable cursor storage, so a restart resumes instead of replaying the
/// whole indexer history (spec §4.9, §5 "single-writer cursor").
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> Result<Option<PollCursor>, ApiError>;
    async fn save(&self, cursor: PollCursor) -> Result<(), ApiError>;
}

/// Strict `paymentReference` normalization (spec §4.9 step 1): trim,
/// uppercase the hex tail, and require the closed shape
/// `pay_[0-9A-F]{32}`. Anything else is rejected rather than
/// best-effort-repaired.
pub fn normalize_payment_reference(raw: &str) -> Result<PaymentReference, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ErrorKind::InvalidInput("empty payment reference in payment event".to_string()).into());
    }
    let Some(tail) = trimmed.strip_prefix(PaymentReference::PREFIX) else {
        return Err(ErrorKind::InvalidInput(format!("payment reference missing `{}` prefix: {raw}", PaymentReference::PREFIX)).into());
    };
    if tail.len() != 32 || !tail.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ErrorKind::InvalidInput(format!("malformed payment reference tail: {raw}")).into());
    }
    PaymentReference::parse(&format!("{}{}", PaymentReference::PREFIX, tail.to_uppercase()))
}

/// Parses a block number in either `0x…` (case-insensitive) or bare
/// decimal form; rejects empty strings (spec §4.9 edge cases). "Over
/// range" (values that don't fit `u64`) is a fatal error, not a clamp.
pub fn parse_block_number(raw: &str) -> Result<u64, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ErrorKind::UpstreamFailure("empty block number in payment event".to_string()).into());
    }
    let bad = || ErrorKind::UpstreamFailure(format!("malformed block number: {raw}")).into();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| bad())
    } else {
        trimmed.parse::<u64>().map_err(|_| bad())
    }
}

pub struct PaymentPoller<I: PaymentIndexer, C: CursorStore> {
    indexer: I,
    cursor_store: C,
    flow: OrderPaymentFlow,
    interval: std::time::Duration,
}

impl<I: PaymentIndexer, C: CursorStore> PaymentPoller<I, C> {
    #[must_use]
    pub fn new(indexer: I, cursor_store: C, flow: OrderPaymentFlow, interval: std::time::Duration) -> Self {
        Self { indexer, cursor_store, flow, interval }
    }

    /// Runs until `cancel` fires. Each iteration pulls one batch,
    /// processes every row in order, and persists the cursor only after
    /// every row in the batch has had its side effects committed — so a
    /// crash mid-batch replays from the last fully-processed row, and
    /// replay safety comes from `OrderPaymentFlow`'s idempotent
    /// transitions (spec §4.9, §7 "Payment matching errors are retried").
    pub async fn run(&self, cancel: CancellationToken) {
        let mut cursor = match self.cursor_store.load().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to load payment poller cursor, starting from genesis");
                None
            },
        };

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("payment poller shutting down");
                    return;
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            match self.poll_once(cursor).await {
                Ok(Some(new_cursor)) => cursor = Some(new_cursor),
                Ok(None) => {},
                Err(e) => tracing::warn!(error = %e, "payment poller batch failed, will retry next interval"),
            }
        }
    }

    /// Processes one batch and returns the new cursor, if the batch was
    /// non-empty (spec §4.9).
    async fn poll_once(&self, cursor: Option<PollCursor>) -> Result<Option<PollCursor>, ApiError> {
        let batch = self.indexer.poll_batch(cursor).await?;
        let mut last_cursor = cursor;

        for event in &batch {
            let reference = match normalize_payment_reference(&event.raw_payment_reference) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping payment event with unparseable reference");
                    continue;
                },
            };

            let observation = PaymentObservation {
                reference,
                chain_id: event.chain_id,
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
                gateway: event.gateway.clone(),
                amount_wei: event.amount_wei,
                observed_at: event.observed_at,
            };
            self.flow.on_payment_observed(&observation).await?;

            last_cursor = Some(event.cursor);
            self.cursor_store.save(event.cursor).await?;
        }

        Ok(last_cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_reference_case_and_shape() {
        let ref_ = normalize_payment_reference("  pay_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa  ").unwrap();
        assert_eq!(ref_.as_str(), "pay_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    }

    #[test]
    fn rejects_empty_and_missing_prefix() {
        assert!(normalize_payment_reference("").is_err());
        assert!(normalize_payment_reference("order_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_err());
    }

    #[test]
    fn rejects_wrong_length_tail() {
        assert!(normalize_payment_reference("pay_AAAA").is_err());
    }

    #[test]
    fn parses_hex_and_bare_block_numbers_case_insensitively() {
        assert_eq!(parse_block_number("0x1A").unwrap(), 26);
        assert_eq!(parse_block_number("0X1a").unwrap(), 26);
        assert_eq!(parse_block_number("26").unwrap(), 26);
    }

    #[test]
    fn rejects_empty_block_number() {
        assert!(parse_block_number("").is_err());
        assert!(parse_block_number("   ").is_err());
    }
}
