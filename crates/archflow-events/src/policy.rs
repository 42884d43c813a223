//! Per-subscriber backpressure policy (spec.md §4.9).

use std::time::Duration;

/// What happens when a subscriber's bounded buffer is full at publish time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackpressurePolicy {
    /// Evict the oldest buffered event to make room (the default).
    DropOldest,
    /// Discard the incoming event; the buffer is left unchanged.
    DropNewest,
    /// Block the publisher until space frees up, up to `timeout`; on
    /// timeout, falls back to dropping the newest event.
    BlockProducerUpTo { timeout: Duration },
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::DropOldest
    }
}

/// Per-subscriber configuration: buffer capacity and overflow policy.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberConfig {
    pub buffer_size: usize,
    pub policy: BackpressurePolicy,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

impl SubscriberConfig {
    pub fn new(buffer_size: usize, policy: BackpressurePolicy) -> Self {
        Self { buffer_size: buffer_size.max(1), policy }
    }
}
