//! Tool descriptor and invocation interface (spec.md §3, §4.5).
//!
//! Grounded on `everruns-contracts::tools` (`ToolDefinition`/`ToolCall`/
//! `ToolResult`), generalized from the teacher's two concrete kinds
//! (builtin function, MCP-exposed) into a schema-validated descriptor over
//! any [`ToolInvoker`] implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use archflow_schemas::Schema;

use crate::validation::validate;

/// Where invocation actually happens, for introspection/audit - not a
/// dispatch mechanism in itself (that's [`ToolInvoker::invoke`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerKind {
    InProcess,
    Mcp,
    Workflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    Interrupted,
    Skipped,
}

/// Tool invocation result (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            data: Some(data),
            message: None,
            error: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            data: None,
            message: None,
            error: Some(message.into()),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Skipped,
            data: None,
            message: Some(message.into()),
            error: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Dispatch target behind a [`Tool`]: an in-process function, a remote MCP
/// tool call, or a registered workflow, unified so the registry and engine
/// never need to match on the concrete kind.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    fn kind(&self) -> InvokerKind;
    async fn invoke(&self, input: Value) -> ToolOutcome;
}

/// An in-process invoker backed by a boxed async closure.
pub struct FunctionInvoker {
    #[allow(clippy::type_complexity)]
    f: Box<dyn Fn(Value) -> BoxFuture<'static, ToolOutcome> + Send + Sync>,
}

impl FunctionInvoker {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ToolOutcome> + Send + 'static,
    {
        Self {
            f: Box::new(move |input| Box::pin(f(input))),
        }
    }
}

#[async_trait]
impl ToolInvoker for FunctionInvoker {
    fn kind(&self) -> InvokerKind {
        InvokerKind::InProcess
    }

    async fn invoke(&self, input: Value) -> ToolOutcome {
        (self.f)(input).await
    }
}

/// A registered tool: a unique name, a description, an input schema, and a
/// dispatch target (spec.md §3 Tool entity).
#[derive(Clone)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Option<Schema>,
    invoker: Arc<dyn ToolInvoker>,
}

impl Tool {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            invoker,
        }
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn kind(&self) -> InvokerKind {
        self.invoker.kind()
    }

    /// Validate `input` against the declared input schema, then dispatch.
    pub async fn call(&self, input: Value) -> ToolOutcome {
        if let Err(errors) = validate(&self.input_schema, &input) {
            let details = errors
                .iter()
                .map(|e| format!("{}: {}", e.path, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return ToolOutcome::error(format!("input validation failed: {details}"));
        }
        self.invoker.invoke(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::{Field, FieldType};

    fn echo_tool() -> Tool {
        let schema = Schema::new().with_field("message", Field::new(FieldType::String).required());
        let invoker = Arc::new(FunctionInvoker::new(|input: Value| async move {
            let message = input.get("message").and_then(Value::as_str).unwrap_or("");
            ToolOutcome::success(serde_json::json!({"echo": format!("Echo: {message}")}))
        }));
        Tool::new("tool-echo", "echo", "echoes its input", schema, invoker)
    }

    #[tokio::test]
    async fn input_validation_failure_short_circuits_the_invoker() {
        let tool = echo_tool();
        let outcome = tool.call(serde_json::json!({})).await;
        assert_eq!(outcome.status, ToolStatus::Error);
        assert!(outcome.error.unwrap().contains("message"));
    }

    #[tokio::test]
    async fn valid_input_dispatches_to_the_invoker() {
        let tool = echo_tool();
        let outcome = tool.call(serde_json::json!({"message": "Hi"})).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data.unwrap()["echo"], "Echo: Hi");
    }
}
