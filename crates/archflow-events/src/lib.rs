//! Streaming Event Bus (C9, spec.md §4.9).

pub mod bus;
pub mod channel;
pub mod policy;

pub use bus::EventBus;
pub use channel::{PublishOutcome, SubscriberReceiver, SubscriberSender};
pub use policy::{BackpressurePolicy, SubscriberConfig};

pub use tokio_util::sync::CancellationToken;
