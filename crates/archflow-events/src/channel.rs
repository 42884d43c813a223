//! A single subscriber's bounded, policy-driven event buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use archflow_schemas::EventEnvelope;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::policy::{BackpressurePolicy, SubscriberConfig};

struct Inner {
    queue: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
    closed: AtomicBool,
    config: SubscriberConfig,
}

/// The producer side: published events enter here and are subject to the
/// subscriber's backpressure policy.
#[derive(Clone)]
pub struct SubscriberSender {
    inner: Arc<Inner>,
}

/// The consumer side: the subscriber's own handle for draining events.
pub struct SubscriberReceiver {
    inner: Arc<Inner>,
}

pub fn channel(config: SubscriberConfig) -> (SubscriberSender, SubscriberReceiver) {
    let inner = Arc::new(Inner {
        queue: Mutex::new(VecDeque::with_capacity(config.buffer_size)),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        config,
    });
    (
        SubscriberSender { inner: Arc::clone(&inner) },
        SubscriberReceiver { inner },
    )
}

/// Whether `publish` had to apply the backpressure policy, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    DroppedOldest,
    DroppedNewest,
}

impl SubscriberSender {
    pub async fn publish(&self, event: EventEnvelope) -> PublishOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return PublishOutcome::DroppedNewest;
        }

        let mut queue = self.inner.queue.lock().await;
        if queue.len() < self.inner.config.buffer_size {
            queue.push_back(event);
            drop(queue);
            self.inner.notify.notify_one();
            return PublishOutcome::Delivered;
        }

        match self.inner.config.policy {
            BackpressurePolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(event);
                drop(queue);
                self.inner.notify.notify_one();
                debug!("subscriber buffer full, dropped oldest event");
                PublishOutcome::DroppedOldest
            }
            BackpressurePolicy::DropNewest => {
                debug!("subscriber buffer full, dropped incoming event");
                PublishOutcome::DroppedNewest
            }
            BackpressurePolicy::BlockProducerUpTo { timeout } => {
                drop(queue);
                let waited = tokio::time::timeout(timeout, self.wait_for_space()).await;
                let mut queue = self.inner.queue.lock().await;
                if waited.is_ok() && queue.len() < self.inner.config.buffer_size {
                    queue.push_back(event);
                    drop(queue);
                    self.inner.notify.notify_one();
                    PublishOutcome::Delivered
                } else {
                    debug!("subscriber buffer full, producer block timed out, dropped incoming event");
                    PublishOutcome::DroppedNewest
                }
            }
        }
    }

    async fn wait_for_space(&self) {
        loop {
            {
                let queue = self.inner.queue.lock().await;
                if queue.len() < self.inner.config.buffer_size {
                    return;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub async fn depth(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

impl SubscriberReceiver {
    /// Await the next event, or `None` once the sender side is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            {
                let mut queue = self.inner.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    self.inner.notify.notify_waiters();
                    return Some(event);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::event::ThinkingPayload;
    use archflow_schemas::{EventDomain, EventPayload, EventType};

    fn event(n: u64) -> EventEnvelope {
        EventEnvelope::new(
            EventDomain::Thinking,
            EventType::Message,
            n,
            None,
            EventPayload::Thinking(ThinkingPayload { content: n.to_string(), stage: None }),
        )
    }

    #[tokio::test]
    async fn drop_oldest_evicts_the_front_of_the_queue() {
        let (tx, mut rx) = channel(SubscriberConfig::new(2, BackpressurePolicy::DropOldest));
        assert_eq!(tx.publish(event(1)).await, PublishOutcome::Delivered);
        assert_eq!(tx.publish(event(2)).await, PublishOutcome::Delivered);
        assert_eq!(tx.publish(event(3)).await, PublishOutcome::DroppedOldest);

        assert_eq!(rx.recv().await.unwrap().id, 2);
        assert_eq!(rx.recv().await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn drop_newest_keeps_the_buffered_events() {
        let (tx, mut rx) = channel(SubscriberConfig::new(1, BackpressurePolicy::DropNewest));
        assert_eq!(tx.publish(event(1)).await, PublishOutcome::Delivered);
        assert_eq!(tx.publish(event(2)).await, PublishOutcome::DroppedNewest);

        assert_eq!(rx.recv().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn closed_sender_drains_then_yields_none() {
        let (tx, mut rx) = channel(SubscriberConfig::default());
        tx.publish(event(1)).await;
        tx.close();
        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert!(rx.recv().await.is_none());
    }
}
