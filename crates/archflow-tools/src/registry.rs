//! Workflow-as-Tool Registry (C6, spec.md §4.6).
//!
//! Grounded on `durable::engine::registry::WorkflowRegistry`'s by-id
//! register/unregister shape, generalized from workflows specifically to
//! any [`Tool`], plus lifecycle events broadcast the way
//! `archflow-providers::switcher::ProviderSwitcher` broadcasts its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use archflow_schemas::{ArchflowError, Field, FieldType, Schema};

use crate::tool::{InvokerKind, Tool, ToolInvoker, ToolOutcome, ToolStatus};

#[derive(Debug, Clone)]
pub enum ToolLifecycleEvent {
    Registered { id: String, name: String },
    Unregistered { id: String, name: String },
    Executed { id: String, duration: Duration },
    Failed { id: String, error: String },
}

/// Outcome of [`ToolRegistry::execute`] (spec.md §4.6 `WorkflowToolResult`).
#[derive(Debug, Clone)]
pub struct WorkflowToolResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration: Duration,
    pub execution_id: String,
    pub metadata: HashMap<String, Value>,
}

impl WorkflowToolResult {
    fn from_outcome(execution_id: String, duration: Duration, outcome: ToolOutcome) -> Self {
        Self {
            success: outcome.status == ToolStatus::Success,
            output: outcome.data,
            error: outcome.error.or(outcome.message),
            duration,
            execution_id,
            metadata: outcome.metadata,
        }
    }
}

/// In-process singleton-style registry over [`Tool`]s, indexed by id and by
/// name. `register` rejects a duplicate id or a duplicate name; both
/// indices otherwise resolve to the same entry and must stay in lockstep.
pub struct ToolRegistry {
    by_id: RwLock<HashMap<String, Arc<Tool>>>,
    name_to_id: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<ToolLifecycleEvent>,
    next_execution_id: std::sync::atomic::AtomicU64,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            by_id: RwLock::new(HashMap::new()),
            name_to_id: RwLock::new(HashMap::new()),
            events,
            next_execution_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToolLifecycleEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ToolLifecycleEvent) {
        // No subscribers is the common case and not an error; any send
        // failure here can only mean that, so it's safe to ignore.
        let _ = self.events.send(event);
    }

    pub async fn register(&self, tool: Tool) -> Result<(), ArchflowError> {
        let mut by_id = self.by_id.write().await;
        let mut name_to_id = self.name_to_id.write().await;

        if by_id.contains_key(&tool.id) {
            return Err(ArchflowError::conflict(format!(
                "tool id '{}' is already registered",
                tool.id
            )));
        }
        if name_to_id.contains_key(&tool.name) {
            return Err(ArchflowError::conflict(format!(
                "tool name '{}' is already registered",
                tool.name
            )));
        }

        let id = tool.id.clone();
        let name = tool.name.clone();
        name_to_id.insert(name.clone(), id.clone());
        by_id.insert(id.clone(), Arc::new(tool));

        drop(name_to_id);
        drop(by_id);
        self.emit(ToolLifecycleEvent::Registered { id, name });
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Option<Arc<Tool>> {
        let mut by_id = self.by_id.write().await;
        let removed = by_id.remove(id)?;
        drop(by_id);

        self.name_to_id.write().await.remove(&removed.name);
        self.emit(ToolLifecycleEvent::Unregistered {
            id: removed.id.clone(),
            name: removed.name.clone(),
        });
        Some(removed)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Tool>> {
        self.by_id.read().await.get(id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<Tool>> {
        let id = self.name_to_id.read().await.get(name).cloned()?;
        self.by_id.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Tool>> {
        self.by_id.read().await.values().cloned().collect()
    }

    fn next_execution_id(&self) -> String {
        let n = self
            .next_execution_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("exec-{n}")
    }

    pub async fn execute(&self, id: &str, input: Value) -> Result<WorkflowToolResult, ArchflowError> {
        let tool = self
            .get(id)
            .await
            .ok_or_else(|| ArchflowError::not_found(format!("tool '{id}' is not registered")))?;

        let execution_id = self.next_execution_id();
        let started = Instant::now();
        let outcome = tool.call(input).await;
        let duration = started.elapsed();

        if outcome.status != ToolStatus::Success {
            self.emit(ToolLifecycleEvent::Failed {
                id: id.to_string(),
                error: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "tool invocation did not succeed".to_string()),
            });
        }
        self.emit(ToolLifecycleEvent::Executed {
            id: id.to_string(),
            duration,
        });

        Ok(WorkflowToolResult::from_outcome(execution_id, duration, outcome))
    }
}

/// Sequential-pipe invoker: each member tool's output becomes the next
/// member's input. Built against a shared registry handle so member ids
/// are resolved at call time, not baked in as `Arc<Tool>`s up front.
struct CompositeInvoker {
    registry: Arc<ToolRegistry>,
    members: Vec<String>,
}

#[async_trait]
impl ToolInvoker for CompositeInvoker {
    fn kind(&self) -> InvokerKind {
        InvokerKind::Workflow
    }

    async fn invoke(&self, input: Value) -> ToolOutcome {
        let mut current = input;
        for member_id in &self.members {
            let tool = match self.registry.get(member_id).await {
                Some(tool) => tool,
                None => {
                    return ToolOutcome::error(format!(
                        "composite member '{member_id}' is not registered"
                    ))
                }
            };
            let outcome = tool.call(current).await;
            if outcome.status != ToolStatus::Success {
                return outcome;
            }
            current = outcome.data.unwrap_or(Value::Null);
        }
        ToolOutcome::success(current)
    }
}

/// Concurrent-merge invoker: every member tool runs against the same input
/// concurrently; results are merged into one object keyed by member id. A
/// single member failure fails the whole invocation (spec.md does not
/// define partial-success semantics for composite tools; the engine's
/// ParallelFanOut step, not this one, is where partial failure is
/// reported per-branch).
struct ParallelInvoker {
    registry: Arc<ToolRegistry>,
    members: Vec<String>,
}

#[async_trait]
impl ToolInvoker for ParallelInvoker {
    fn kind(&self) -> InvokerKind {
        InvokerKind::Workflow
    }

    async fn invoke(&self, input: Value) -> ToolOutcome {
        let calls = self.members.iter().map(|member_id| {
            let registry = Arc::clone(&self.registry);
            let input = input.clone();
            let member_id = member_id.clone();
            async move {
                let tool = registry
                    .get(&member_id)
                    .await
                    .ok_or_else(|| format!("composite member '{member_id}' is not registered"))?;
                let outcome = tool.call(input).await;
                if outcome.status == ToolStatus::Success {
                    Ok((member_id, outcome.data.unwrap_or(Value::Null)))
                } else {
                    Err(outcome
                        .error
                        .unwrap_or_else(|| format!("member '{member_id}' did not succeed")))
                }
            }
        });

        let results = futures::future::join_all(calls).await;
        let mut merged = serde_json::Map::new();
        for result in results {
            match result {
                Ok((member_id, value)) => {
                    merged.insert(member_id, value);
                }
                Err(message) => return ToolOutcome::error(message),
            }
        }
        ToolOutcome::success(Value::Object(merged))
    }
}

fn passthrough_schema() -> Schema {
    Schema::new().with_field("_", Field::new(FieldType::Any))
}

/// Build (but do not register) a tool that sequentially pipes each member
/// tool's output into the next member's input.
pub fn create_composite(
    registry: Arc<ToolRegistry>,
    id: impl Into<String>,
    name: impl Into<String>,
    member_ids: Vec<String>,
) -> Tool {
    let invoker = Arc::new(CompositeInvoker {
        registry,
        members: member_ids,
    });
    Tool::new(id, name, "sequential composite tool", passthrough_schema(), invoker)
}

/// Build (but do not register) a tool that runs every member tool
/// concurrently against the same input and merges their outputs keyed by
/// member id.
pub fn create_parallel(
    registry: Arc<ToolRegistry>,
    id: impl Into<String>,
    name: impl Into<String>,
    member_ids: Vec<String>,
) -> Tool {
    let invoker = Arc::new(ParallelInvoker {
        registry,
        members: member_ids,
    });
    Tool::new(id, name, "parallel composite tool", passthrough_schema(), invoker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FunctionInvoker;

    fn upper_tool() -> Tool {
        let invoker = Arc::new(FunctionInvoker::new(|input: Value| async move {
            let text = input.get("text").and_then(Value::as_str).unwrap_or("").to_uppercase();
            ToolOutcome::success(serde_json::json!({"text": text}))
        }));
        Tool::new("tool-upper", "upper", "uppercases text", passthrough_schema(), invoker)
    }

    fn exclaim_tool() -> Tool {
        let invoker = Arc::new(FunctionInvoker::new(|input: Value| async move {
            let text = input.get("text").and_then(Value::as_str).unwrap_or("").to_string();
            ToolOutcome::success(serde_json::json!({"text": format!("{text}!")}))
        }));
        Tool::new("tool-exclaim", "exclaim", "adds an exclamation mark", passthrough_schema(), invoker)
    }

    fn failing_tool() -> Tool {
        let invoker = Arc::new(FunctionInvoker::new(|_input: Value| async move {
            ToolOutcome::error("boom")
        }));
        Tool::new("tool-fail", "fail", "always fails", passthrough_schema(), invoker)
    }

    #[tokio::test]
    async fn register_rejects_duplicate_id_and_duplicate_name() {
        let registry = ToolRegistry::new();
        registry.register(upper_tool()).await.unwrap();

        let dup_id = Tool::new("tool-upper", "other-name", "x", passthrough_schema(), Arc::new(FunctionInvoker::new(|_: Value| async { ToolOutcome::success(Value::Null) })));
        assert!(registry.register(dup_id).await.is_err());

        let dup_name = Tool::new("other-id", "upper", "x", passthrough_schema(), Arc::new(FunctionInvoker::new(|_: Value| async { ToolOutcome::success(Value::Null) })));
        assert!(registry.register(dup_name).await.is_err());
    }

    #[tokio::test]
    async fn execute_unknown_id_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn composite_pipes_output_sequentially() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(upper_tool()).await.unwrap();
        registry.register(exclaim_tool()).await.unwrap();

        let composite = create_composite(
            Arc::clone(&registry),
            "tool-composite",
            "shout",
            vec!["tool-upper".to_string(), "tool-exclaim".to_string()],
        );
        registry.register(composite).await.unwrap();

        let result = registry
            .execute("tool-composite", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["text"], "HI!");
    }

    #[tokio::test]
    async fn composite_short_circuits_on_first_member_failure() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(failing_tool()).await.unwrap();
        registry.register(exclaim_tool()).await.unwrap();

        let composite = create_composite(
            Arc::clone(&registry),
            "tool-composite",
            "shout",
            vec!["tool-fail".to_string(), "tool-exclaim".to_string()],
        );
        registry.register(composite).await.unwrap();

        let result = registry
            .execute("tool-composite", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "boom");
    }

    #[tokio::test]
    async fn parallel_merges_member_outputs_by_id() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(upper_tool()).await.unwrap();
        registry.register(exclaim_tool()).await.unwrap();

        let parallel = create_parallel(
            Arc::clone(&registry),
            "tool-parallel",
            "both",
            vec!["tool-upper".to_string(), "tool-exclaim".to_string()],
        );
        registry.register(parallel).await.unwrap();

        let result = registry
            .execute("tool-parallel", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["tool-upper"]["text"], "HI");
        assert_eq!(output["tool-exclaim"]["text"], "hi!");
    }

    #[tokio::test]
    async fn lifecycle_events_are_broadcast_for_register_execute_unregister() {
        let registry = ToolRegistry::new();
        let mut events = registry.subscribe();

        registry.register(upper_tool()).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ToolLifecycleEvent::Registered { .. }));

        registry.execute("tool-upper", serde_json::json!({"text": "x"})).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ToolLifecycleEvent::Executed { .. }));

        registry.unregister("tool-upper").await;
        assert!(matches!(events.recv().await.unwrap(), ToolLifecycleEvent::Unregistered { .. }));
    }
}
