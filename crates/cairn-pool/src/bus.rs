//! In-process membership bus.
//!
//! Discovery publishes CREATE/REMOVE events here; each subscriber gets its
//! own unbounded queue, so delivery is FIFO per subscriber and nothing else
//! is ordered. Failed CREATE handling re-publishes the event after a delay,
//! which is the only retry mechanism the pool has.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use cairn_core::MembershipEvent;

#[derive(Clone, Default)]
pub struct MembershipBus {
    subscribers: Arc<DashMap<u64, mpsc::UnboundedSender<MembershipEvent>>>,
    next_id: Arc<AtomicU64>,
}

/// Receiving end of one subscription.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<MembershipEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<MembershipEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MembershipEvent> {
        self.rx.try_recv().ok()
    }
}

impl MembershipBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        tracing::debug!(subscription_id = id, "membership subscriber added");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Deliver `event` to every live subscriber. Returns how many got it.
    pub fn publish(&self, event: MembershipEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
        tracing::trace!(
            kind = %event.kind(),
            key = %event.key(),
            addr = %event.address(),
            delivered,
            "membership event published"
        );
        delivered
    }

    /// Publish `event` once `delay` has elapsed, without blocking the caller.
    pub fn publish_after(&self, event: MembershipEvent, delay: Duration) {
        if delay.is_zero() {
            self.publish(event);
            return;
        }
        let bus = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.publish(event);
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
