//! Metrics & Audit Hooks (C11, spec.md §4.11).
//!
//! Pure hooks: counters, timers, gauges, and an audit sink wired into every
//! boundary crossing elsewhere in the core. This crate defines the traits
//! and a `tracing`-backed default; wiring a Prometheus/OTel exporter or a
//! persistent audit log is an external collaborator's job (spec.md §1).

pub mod audit;
pub mod hooks;
pub mod metrics;
pub mod tracing_sink;

pub use audit::{AuditSink, NoopAuditSink, TracingAuditSink};
pub use hooks::Hooks;
pub use metrics::{Label, MetricsSink, NoopMetricsSink};
pub use tracing_sink::TracingMetricsSink;
