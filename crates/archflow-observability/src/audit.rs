//! Audit sink trait (spec.md §4.11, §6).
//!
//! Persisting the audit record is an external collaborator's job (spec.md
//! §1 Non-goals); this crate only guarantees every boundary crossing
//! produces one and hands it to a sink without risking the hooked
//! operation's success.

use archflow_schemas::AuditRecord;
use async_trait::async_trait;

/// Receives [`AuditRecord`]s emitted at boundary crossings (workflow
/// start/end, tool call, LLM request, permission check).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// A sink that discards every record.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _record: AuditRecord) {}
}

/// Logs each record at `info` (success) or `warn` (failure) via `tracing`,
/// structured the way the rest of the core logs - this is the default sink
/// when no external collaborator supplies one.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        if record.success {
            tracing::info!(
                action = %record.action,
                resource_kind = %record.resource_kind,
                resource_id = %record.resource_id,
                trace_id = %record.trace_id,
                actor_id = ?record.actor_id,
                "audit"
            );
        } else {
            tracing::warn!(
                action = %record.action,
                resource_kind = %record.resource_kind,
                resource_id = %record.resource_id,
                trace_id = %record.trace_id,
                error = ?record.error_message,
                "audit"
            );
        }
    }
}
