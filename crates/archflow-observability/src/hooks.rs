//! Boundary-crossing hooks bundle (spec.md §4.11).
//!
//! One [`Hooks`] value is constructed at init and threaded into every
//! component that crosses a boundary named in spec.md §4.11 (workflow
//! start/end, tool call, LLM request, permission check). It owns a
//! metrics sink and an audit sink and never lets either fail the call it
//! instruments - both traits are infallible from the caller's point of
//! view by construction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use archflow_schemas::AuditRecord;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::metrics::{Label, MetricsSink};
use crate::tracing_sink::TracingMetricsSink;

#[derive(Clone)]
pub struct Hooks {
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<dyn AuditSink>,
}

impl Hooks {
    pub fn new(metrics: Arc<dyn MetricsSink>, audit: Arc<dyn AuditSink>) -> Self {
        Self { metrics, audit }
    }

    /// Default hooks: tracing-backed metrics and audit sinks.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingMetricsSink), Arc::new(TracingAuditSink))
    }

    pub fn incr_counter(&self, name: &str, labels: &[Label<'_>]) {
        self.metrics.incr_counter(name, labels);
    }

    pub fn add_counter(&self, name: &str, labels: &[Label<'_>], value: u64) {
        self.metrics.add_counter(name, labels, value);
    }

    pub fn record_timer(&self, name: &str, labels: &[Label<'_>], duration: Duration) {
        self.metrics.record_timer(name, labels, duration);
    }

    pub fn set_gauge(&self, name: &str, labels: &[Label<'_>], value: f64) {
        self.metrics.set_gauge(name, labels, value);
    }

    pub async fn audit(&self, record: AuditRecord) {
        self.audit.record(record).await;
    }

    /// Times `f` and records the elapsed duration under `name`/`labels`,
    /// returning `f`'s result unchanged.
    pub fn time<T>(&self, name: &str, labels: &[Label<'_>], f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record_timer(name, labels, start.elapsed());
        result
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::tracing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink(AtomicU64);

    impl MetricsSink for CountingSink {
        fn incr_counter(&self, _name: &str, _labels: &[Label<'_>]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn add_counter(&self, _name: &str, _labels: &[Label<'_>], value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }
        fn record_timer(&self, _name: &str, _labels: &[Label<'_>], _duration: Duration) {}
        fn set_gauge(&self, _name: &str, _labels: &[Label<'_>], _value: f64) {}
    }

    #[tokio::test]
    async fn hooks_forward_to_the_configured_sinks() {
        let sink = Arc::new(CountingSink(AtomicU64::new(0)));
        let hooks = Hooks::new(sink.clone(), Arc::new(crate::audit::NoopAuditSink));

        hooks.incr_counter("workflow.executions", &[("workflow", "wf-1"), ("status", "completed")]);
        hooks.add_counter("llm.prompt.tokens", &[], 42);

        assert_eq!(sink.0.load(Ordering::SeqCst), 43);
    }
}
