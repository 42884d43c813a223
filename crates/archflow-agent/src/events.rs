//! Observable side effects (spec.md §4.7): `ToolStart`/`ToolComplete`/
//! `ToolError` events. Kept as a local sink trait rather than a dependency
//! on `archflow-events`, so the engine can bridge this onto the real Event
//! Bus without a crate cycle.

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait AgentEventSink: Send + Sync {
    async fn on_tool_start(&self, agent_id: &str, attempt: u32);
    async fn on_tool_complete(&self, agent_id: &str, attempt: u32, output: &Value);
    async fn on_tool_error(&self, agent_id: &str, attempt: u32, error: &str);
}

/// Default sink: structured log lines only, matching the teacher's
/// tracing-first posture before any event bus is wired in.
pub struct TracingEventSink;

#[async_trait]
impl AgentEventSink for TracingEventSink {
    async fn on_tool_start(&self, agent_id: &str, attempt: u32) {
        tracing::debug!(agent_id, attempt, "agent attempt starting");
    }

    async fn on_tool_complete(&self, agent_id: &str, attempt: u32, output: &Value) {
        tracing::debug!(agent_id, attempt, %output, "agent attempt completed");
    }

    async fn on_tool_error(&self, agent_id: &str, attempt: u32, error: &str) {
        tracing::warn!(agent_id, attempt, error, "agent attempt failed");
    }
}
