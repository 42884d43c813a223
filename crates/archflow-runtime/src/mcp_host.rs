//! Workflow-as-MCP-tool host (spec.md §4.4 server side, §4.6 Workflow-as-Tool).
//!
//! Bridges [`FlowEngine`]-registered workflows to `archflow-mcp`'s
//! [`McpToolHost`] without `archflow-mcp` needing to know about workflows -
//! the same decoupling the crate's own doc comment calls for.

use std::collections::HashMap;
use std::sync::Arc;

use archflow_engine::FlowEngine;
use archflow_mcp::{McpToolHost, ToolCallResult, ToolDescriptor};
use archflow_schemas::WorkflowId;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// One workflow registered under an MCP-visible tool name.
struct Exposed {
    workflow_id: WorkflowId,
    description: String,
}

/// Exposes a subset of a [`FlowEngine`]'s registered workflows as MCP tools
/// (spec.md §4.4: "register workflows with a tool name, description, and
/// parameter list").
pub struct WorkflowMcpHost {
    engine: Arc<FlowEngine>,
    exposed: RwLock<HashMap<String, Exposed>>,
}

impl WorkflowMcpHost {
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine, exposed: RwLock::new(HashMap::new()) }
    }

    pub async fn expose(&self, tool_name: impl Into<String>, workflow_id: WorkflowId, description: impl Into<String>) {
        self.exposed
            .write()
            .await
            .insert(tool_name.into(), Exposed { workflow_id, description: description.into() });
    }

    pub async fn unexpose(&self, tool_name: &str) {
        self.exposed.write().await.remove(tool_name);
    }
}

#[async_trait]
impl McpToolHost for WorkflowMcpHost {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.exposed
            .read()
            .await
            .iter()
            .map(|(name, exposed)| ToolDescriptor {
                name: name.clone(),
                description: exposed.description.clone(),
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect()
    }

    /// Invoke the backing workflow and marshal its result per spec.md §4.4:
    /// a workflow that fails still comes back as `Ok` with `is_error=true`
    /// so an MCP-speaking LLM can see the failure, rather than as a
    /// transport-level error.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, String> {
        let workflow_id = {
            let exposed = self.exposed.read().await;
            exposed.get(name).map(|e| e.workflow_id).ok_or_else(|| format!("tool '{name}' is not registered"))?
        };

        match self.engine.execute(workflow_id, arguments).await {
            Ok(execution) if execution.status == archflow_schemas::ExecutionStatus::Completed => {
                let output = self.output_of(workflow_id, &execution).await.unwrap_or(Value::Null);
                let text = serde_json::to_string(&output).unwrap_or_else(|_| "null".to_string());
                Ok(ToolCallResult::ok(text))
            }
            Ok(execution) => Ok(ToolCallResult::error(format!(
                "workflow '{workflow_id}' ended in status {:?}",
                execution.status
            ))),
            Err(e) => Ok(ToolCallResult::error(e.to_string())),
        }
    }
}

impl WorkflowMcpHost {
    /// A workflow's result is whatever its (first reached) `Output` step
    /// produced - there is no separate "return value" slot on [`Execution`]
    /// itself (spec.md §4.8: `Output` "formats a template... and marks the
    /// branch complete").
    async fn output_of(&self, workflow_id: WorkflowId, execution: &archflow_schemas::Execution) -> Option<Value> {
        let workflow = self.engine.list_workflows().await.into_iter().find(|w| w.id == workflow_id)?;
        workflow
            .steps
            .iter()
            .find(|s| matches!(s.kind, archflow_schemas::StepKind::Output { .. }))
            .and_then(|s| execution.completed_output(&s.id).cloned())
    }
}
