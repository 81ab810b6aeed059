//! Part of C11 — the in-process SSE event bus keyed by `(addressKey,
//! chainId)` (spec §4.11). `Publish` never blocks the caller: each
//! subscriber has its own bounded, `DropOldest` queue, guarded by a plain
//! `Mutex` held only long enough to push or pop one element, never across
//! an await (spec §5).

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use crate::{
    domain::order::OrderStatus,
    ids::{Address, ChainId, OrderId, PaymentReference},
};

/// Wire shape of one SSE event (spec §6.4): `orderId, paymentReference,
/// oldStatus, newStatus, changedAt`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusEvent {
    pub order_id: OrderId,
    pub payment_reference: PaymentReference,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

struct SubscriberChannel {
    queue: Mutex<VecDeque<OrderStatusEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberChannel {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new(), closed: AtomicBool::new(false) }
    }

    /// Pushes `event`, dropping the oldest queued event if at capacity
    /// (spec §4.11 `DropOldest`).
    fn push(&self, capacity: usize, event: OrderStatusEvent) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= capacity.max(1) {
            queue.pop_front();
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<OrderStatusEvent> {
        loop {
            if let Some(event) = self.queue.lock().unwrap().pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

/// A live subscription. Dropping it closes the underlying channel and
/// frees its subscriber slot on the next `subscribe`/`publish` prune
/// (spec §4.11, Design Note "SSE with cancellation").
pub struct Subscription {
    channel: Arc<SubscriberChannel>,
}

impl Subscription {
    pub async fn recv(&self) -> Option<OrderStatusEvent> {
        self.channel.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.close();
    }
}

pub struct EventBus {
    subscribers: Mutex<HashMap<(String, ChainId), Vec<Arc<SubscriberChannel>>>>,
    capacity: usize,
    max_subscribers_per_key: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize, max_subscribers_per_key: usize) -> Self {
        Self { subscribers: Mutex::new(HashMap::new()), capacity, max_subscribers_per_key }
    }

    fn key(address: &Address, chain_id: ChainId) -> (String, ChainId) {
        (address.as_str().to_string(), chain_id)
    }

    /// `Subscribe(addressKey, chain, ct)`: returns `None` — an immediately
    /// empty sequence — if the subscriber cap for this key is already at
    /// capacity (spec §4.11).
    pub fn subscribe(&self, address: &Address, chain_id: ChainId) -> Option<Subscription> {
        let mut guard = self.subscribers.lock().unwrap();
        let entry = guard.entry(Self::key(address, chain_id)).or_default();
        entry.retain(|c| !c.closed.load(Ordering::Relaxed));
        if entry.len() >= self.max_subscribers_per_key {
            return None;
        }
        let channel = Arc::new(SubscriberChannel::new());
        entry.push(Arc::clone(&channel));
        Some(Subscription { channel })
    }

    /// Non-blocking publish to every live subscriber under `(address,
    /// chain)` (spec §4.11).
    pub fn publish(&self, address: &Address, chain_id: ChainId, event: &OrderStatusEvent) {
        let guard = self.subscribers.lock().unwrap();
        if let Some(channels) = guard.get(&Self::key(address, chain_id)) {
            for channel in channels {
                channel.push(self.capacity, event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap()
    }

    fn event() -> OrderStatusEvent {
        OrderStatusEvent {
            order_id: OrderId::new(),
            payment_reference: PaymentReference::new(),
            old_status: Some(OrderStatus::PaymentDue),
            new_status: OrderStatus::PaymentProcessing,
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(2, 2);
        let sub = bus.subscribe(&addr(), 100).unwrap();
        bus.publish(&addr(), 100, &event());
        let received = sub.recv().await.unwrap();
        assert_eq!(received.new_status, OrderStatus::PaymentProcessing);
    }

    #[tokio::test]
    async fn drop_oldest_keeps_most_recent_event_under_pressure() {
        let bus = EventBus::new(1, 2);
        let sub = bus.subscribe(&addr(), 100).unwrap();
        let mut first = event();
        first.new_status = OrderStatus::PaymentDue;
        let mut second = event();
        second.new_status = OrderStatus::PaymentComplete;
        bus.publish(&addr(), 100, &first);
        bus.publish(&addr(), 100, &second);
        let received = sub.recv().await.unwrap();
        assert_eq!(received.new_status, OrderStatus::PaymentComplete);
    }

    #[test]
    fn subscriber_cap_overflow_returns_none() {
        let bus = EventBus::new(1, 1);
        let _first = bus.subscribe(&addr(), 100).unwrap();
        assert!(bus.subscribe(&addr(), 100).is_none());
    }

    #[test]
    fn dropped_subscription_frees_its_slot() {
        let bus = EventBus::new(1, 1);
        {
            let _first = bus.subscribe(&addr(), 100).unwrap();
        }
        assert!(bus.subscribe(&addr(), 100).is_some());
    }
}
