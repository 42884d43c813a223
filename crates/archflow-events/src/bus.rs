//! Streaming Event Bus (C9, spec.md §4.9).
//!
//! Single-writer-per-execution, many-readers: the engine step currently
//! running publishes; every current subscriber gets its own bounded,
//! policy-driven copy via [`crate::channel`]. A subscriber's panic/slow
//! drain never blocks another subscriber or the publisher beyond its own
//! backpressure policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use archflow_schemas::event::AuditPayload;
use archflow_schemas::{EventDomain, EventEnvelope, EventPayload, EventType, ExecutionId};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::channel::{channel, PublishOutcome, SubscriberReceiver, SubscriberSender};
use crate::policy::SubscriberConfig;

struct Subscription {
    sender: SubscriberSender,
}

/// In-process pub/sub bus over [`EventEnvelope`]s (C9).
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Subscription>>,
    /// Per-execution monotonically increasing event id counters (spec.md §8
    /// invariant: ids form a gapless increasing prefix per execution).
    counters: RwLock<HashMap<ExecutionId, Arc<AtomicU64>>>,
    /// Per-execution cooperative cancellation signal (spec.md §5).
    cancellations: RwLock<HashMap<ExecutionId, CancellationToken>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            cancellations: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber and return its receiver half. A later
    /// `subscribe` with the same id replaces the prior subscription (its
    /// receiver is closed).
    pub async fn subscribe(&self, subscriber_id: impl Into<String>, config: SubscriberConfig) -> SubscriberReceiver {
        let (sender, receiver) = channel(config);
        let mut subscribers = self.subscribers.write().await;
        if let Some(old) = subscribers.insert(subscriber_id.into(), Subscription { sender }) {
            old.sender.close();
        }
        receiver
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        if let Some(sub) = self.subscribers.write().await.remove(subscriber_id) {
            sub.sender.close();
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Gauge: current buffer depth per subscriber (spec.md §4.11).
    pub async fn buffer_depths(&self) -> HashMap<String, usize> {
        let subscribers = self.subscribers.read().await;
        let mut out = HashMap::new();
        for (id, sub) in subscribers.iter() {
            out.insert(id.clone(), sub.sender.depth().await);
        }
        out
    }

    /// Allocate the next monotonic event id for `execution_id`.
    async fn next_id(&self, execution_id: ExecutionId) -> u64 {
        let counter = {
            let counters = self.counters.read().await;
            counters.get(&execution_id).cloned()
        };
        let counter = match counter {
            Some(c) => c,
            None => {
                let mut counters = self.counters.write().await;
                Arc::clone(counters.entry(execution_id).or_insert_with(|| Arc::new(AtomicU64::new(0))))
            }
        };
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Broadcast an already-built envelope verbatim (id must already be
    /// assigned - used when replaying or forwarding). Prefer [`EventBus::emit`]
    /// for new events within an execution.
    pub async fn publish(&self, event: EventEnvelope) {
        let subscribers = self.subscribers.read().await;
        for (subscriber_id, sub) in subscribers.iter() {
            let outcome = sub.sender.publish(event.clone()).await;
            if outcome != PublishOutcome::Delivered {
                warn!(subscriber_id, ?outcome, "event dropped by subscriber backpressure policy");
                self.emit_dropped_audit(subscriber_id, &event).await;
            }
        }
    }

    /// Build an [`EventEnvelope`] with the next monotonic id for
    /// `execution_id` and publish it to every current subscriber.
    pub async fn emit(
        &self,
        execution_id: ExecutionId,
        domain: EventDomain,
        event_type: EventType,
        payload: EventPayload,
    ) -> EventEnvelope {
        let id = self.next_id(execution_id).await;
        let event = EventEnvelope::new(domain, event_type, id, Some(execution_id), payload);
        self.publish(event.clone()).await;
        event
    }

    async fn emit_dropped_audit(&self, subscriber_id: &str, original: &EventEnvelope) {
        // Audit events about drops bypass backpressure bookkeeping
        // entirely (publishing one more event for a drop could itself
        // drop, but it is not worth chasing recursively - the subscriber
        // that is dropping events is, by construction, already behind).
        let subscribers = self.subscribers.read().await;
        if let Some(sub) = subscribers.get(subscriber_id) {
            let dropped = EventEnvelope::new(
                EventDomain::Audit,
                EventType::Error,
                original.id,
                original.execution_id,
                EventPayload::Audit(AuditPayload {
                    action: "event.dropped".to_string(),
                    success: false,
                    resource: subscriber_id.to_string(),
                }),
            );
            let _ = sub.sender.publish(dropped).await;
        }
    }

    /// The cancellation signal for `execution_id`, created on first access.
    pub async fn cancellation_for(&self, execution_id: ExecutionId) -> CancellationToken {
        let existing = {
            let cancellations = self.cancellations.read().await;
            cancellations.get(&execution_id).cloned()
        };
        if let Some(token) = existing {
            return token;
        }
        let mut cancellations = self.cancellations.write().await;
        cancellations
            .entry(execution_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Cancel `execution_id`'s cooperative cancellation signal; all steps
    /// observing it abort in-flight LLM/MCP requests and mark queued steps
    /// `Cancelled` (spec.md §4.9, §5).
    pub async fn cancel(&self, execution_id: ExecutionId) {
        let token = self.cancellation_for(execution_id).await;
        token.cancel();
    }

    /// Drop bookkeeping for a terminated execution (counter, cancellation
    /// token) - call once the Execution reaches a terminal status.
    pub async fn forget(&self, execution_id: ExecutionId) {
        self.counters.write().await.remove(&execution_id);
        self.cancellations.write().await.remove(&execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::event::ChatPayload;

    #[tokio::test]
    async fn event_ids_are_a_gapless_increasing_prefix_per_execution() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("sub-1", SubscriberConfig::default()).await;
        let execution_id = ExecutionId::new();

        for i in 0..5 {
            bus.emit(
                execution_id,
                EventDomain::Chat,
                EventType::Delta,
                EventPayload::Chat(ChatPayload { content: i.to_string(), delta: Some(true) }),
            )
            .await;
        }

        for expected in 1..=5u64 {
            assert_eq!(rx.recv().await.unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_copy() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("sub-1", SubscriberConfig::default()).await;
        let mut rx2 = bus.subscribe("sub-2", SubscriberConfig::default()).await;
        let execution_id = ExecutionId::new();

        bus.emit(
            execution_id,
            EventDomain::Chat,
            EventType::Delta,
            EventPayload::Chat(ChatPayload { content: "hi".into(), delta: Some(true) }),
        )
        .await;

        assert_eq!(rx1.recv().await.unwrap().id, 1);
        assert_eq!(rx2.recv().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("sub-1", SubscriberConfig::default()).await;
        bus.unsubscribe("sub-1").await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_token_is_stable_across_lookups() {
        let bus = EventBus::new();
        let execution_id = ExecutionId::new();
        let token_a = bus.cancellation_for(execution_id).await;
        bus.cancel(execution_id).await;
        let token_b = bus.cancellation_for(execution_id).await;
        assert!(token_a.is_cancelled());
        assert!(token_b.is_cancelled());
    }
}
