//! Default `tracing`-backed [`MetricsSink`] (spec.md §4.11).
//!
//! A process that wants real counters/timers/gauges wires a Prometheus or
//! OTel exporter in as an external collaborator (spec.md §1 Non-goals);
//! this sink just makes every observation visible in the structured log so
//! the core is useful standalone.

use std::time::Duration;

use crate::metrics::{Label, MetricsSink};

fn format_labels(labels: &[Label<'_>]) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn incr_counter(&self, name: &str, labels: &[Label<'_>]) {
        tracing::debug!(metric = name, labels = %format_labels(labels), delta = 1, "counter");
    }

    fn add_counter(&self, name: &str, labels: &[Label<'_>], value: u64) {
        tracing::debug!(metric = name, labels = %format_labels(labels), delta = value, "counter");
    }

    fn record_timer(&self, name: &str, labels: &[Label<'_>], duration: Duration) {
        tracing::debug!(
            metric = name,
            labels = %format_labels(labels),
            duration_ms = duration.as_millis() as u64,
            "timer"
        );
    }

    fn set_gauge(&self, name: &str, labels: &[Label<'_>], value: f64) {
        tracing::debug!(metric = name, labels = %format_labels(labels), value, "gauge");
    }
}
