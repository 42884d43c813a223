//! Metrics sink trait (spec.md §4.11).
//!
//! Generalizes `everruns_observability::backend::ObservabilityBackend` from
//! "translate one event enum to one tracing backend" to three narrow
//! primitives (counter/timer/gauge) so any metrics backend (tracing, a
//! Prometheus exporter an external collaborator wires in, a test double)
//! can implement just the shape spec.md §4.11 names.

use std::time::Duration;

/// A `name=value` label pair attached to a metric observation.
pub type Label<'a> = (&'a str, &'a str);

/// Sink for the counters/timers/gauges enumerated in spec.md §4.11.
///
/// Implementations must not block the caller meaningfully and must never
/// panic - a broken metrics backend must not fail the operation it is
/// observing.
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter by one, e.g. `workflow.executions` with
    /// labels `[("workflow", id), ("status", "completed")]`.
    fn incr_counter(&self, name: &str, labels: &[Label<'_>]);

    /// Add `value` to a named counter (used for `llm.prompt.tokens` etc.,
    /// where the increment is not always 1).
    fn add_counter(&self, name: &str, labels: &[Label<'_>], value: u64);

    /// Record a duration observation for a named timer, e.g.
    /// `llm.latency` with labels `[("provider", ..), ("model", ..)]`.
    fn record_timer(&self, name: &str, labels: &[Label<'_>], duration: Duration);

    /// Set a named gauge to an absolute value, e.g. event-bus buffer depth
    /// or conversation-manager waiting count.
    fn set_gauge(&self, name: &str, labels: &[Label<'_>], value: f64);
}

/// A sink that discards every observation - used when metrics are disabled
/// or in tests that do not assert on them.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn incr_counter(&self, _name: &str, _labels: &[Label<'_>]) {}
    fn add_counter(&self, _name: &str, _labels: &[Label<'_>], _value: u64) {}
    fn record_timer(&self, _name: &str, _labels: &[Label<'_>], _duration: Duration) {}
    fn set_gauge(&self, _name: &str, _labels: &[Label<'_>], _value: f64) {}
}
