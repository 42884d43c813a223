//! MCP server broker (C4, spec.md §4.4 server side): exposes in-process
//! tools (typically workflows, via [`McpToolHost`]) over the same
//! request/response framing the client side speaks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::message::{JsonRpcError, JsonRpcRequest, METHOD_NOT_FOUND};
use crate::transport::Transport;
use crate::types::{
    InitializeResult, ServerCapabilities, ServerInfo, ToolCallResult, ToolDescriptor, PROTOCOL_VERSION,
};

/// Host-side hook the server broker delegates `tools/list`/`tools/call` to.
/// Kept decoupled from any concrete tool registry so `archflow-mcp` does not
/// need to depend on `archflow-tools`.
#[async_trait]
pub trait McpToolHost: Send + Sync {
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Returns `Err` only for "tool not found"; a tool that runs and fails
    /// is reported via [`ToolCallResult::error`], not this `Err` arm
    /// (spec.md §4.4 failure semantics).
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, String>;
}

pub struct McpServer {
    transport: Arc<Transport>,
    host: Arc<dyn McpToolHost>,
    server_info: ServerInfo,
}

impl McpServer {
    pub fn new(transport: Arc<Transport>, host: Arc<dyn McpToolHost>, server_info: ServerInfo) -> Self {
        Self {
            transport,
            host,
            server_info,
        }
    }

    /// Drive the inbound-request channel until the transport closes.
    /// Intended to be spawned as a long-lived task, one per connected peer.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<JsonRpcRequest>) {
        while let Some(request) = inbound.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.handle(request).await;
            });
        }
    }

    async fn handle(&self, request: JsonRpcRequest) {
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => Ok(self.handle_list_tools().await),
            "tools/call" => self.handle_call_tool(request.params.clone()).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        let result = match outcome {
            Ok(value) => self.transport.reply_result(request.id, value).await,
            Err(error) => self.transport.reply_error(request.id, error).await,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, method = %request.method, "failed to write mcp response");
        }
    }

    fn handle_initialize(&self) -> Value {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                resources: false,
                resources_subscribe: false,
                tools: true,
                prompts: false,
            },
            server_info: self.server_info.clone(),
        };
        serde_json::to_value(result).expect("InitializeResult always serializes")
    }

    async fn handle_list_tools(&self) -> Value {
        let tools = self.host.list_tools().await;
        serde_json::json!({ "tools": tools })
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| {
            JsonRpcError::new(crate::message::INVALID_PARAMS, "tools/call requires params")
        })?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(crate::message::INVALID_PARAMS, "missing 'name'"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match self.host.call_tool(name, arguments).await {
            Ok(call_result) => {
                Ok(serde_json::to_value(call_result).expect("ToolCallResult always serializes"))
            }
            Err(not_found) => Err(JsonRpcError::new(METHOD_NOT_FOUND, not_found)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McpError;

    struct EchoHost;

    #[async_trait]
    impl McpToolHost for EchoHost {
        async fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "echo-flow".to_string(),
                description: "echoes its input".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }]
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, String> {
            if name != "echo-flow" {
                return Err(format!("unknown tool '{name}'"));
            }
            let message = arguments.get("message").and_then(Value::as_str).unwrap_or("");
            Ok(ToolCallResult::ok(format!(
                "{{\"echo\":\"Echo: {message}\"}}"
            )))
        }
    }

    #[tokio::test]
    async fn tools_call_round_trips_through_the_transport() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let (client_transport, _client_inbound) = Transport::spawn(client_read, client_write);
        let (server_transport, server_inbound) = Transport::spawn(server_read, server_write);

        let server = Arc::new(McpServer::new(
            server_transport,
            Arc::new(EchoHost),
            ServerInfo {
                name: "archflow".to_string(),
                version: "0.1.0".to_string(),
            },
        ));
        tokio::spawn(Arc::clone(&server).run(server_inbound));

        let params = serde_json::json!({"name": "echo-flow", "arguments": {"message": "Hi"}});
        let result = client_transport.send_request("tools/call", Some(params)).await.unwrap();
        let call_result: ToolCallResult = serde_json::from_value(result).unwrap();

        assert!(!call_result.is_error);
        assert_eq!(
            call_result.content,
            vec![crate::types::ContentItem::Text {
                text: "{\"echo\":\"Echo: Hi\"}".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let (client_transport, _client_inbound) = Transport::spawn(client_read, client_write);
        let (server_transport, server_inbound) = Transport::spawn(server_read, server_write);

        let server = Arc::new(McpServer::new(
            server_transport,
            Arc::new(EchoHost),
            ServerInfo {
                name: "archflow".to_string(),
                version: "0.1.0".to_string(),
            },
        ));
        tokio::spawn(Arc::clone(&server).run(server_inbound));

        let err = client_transport.send_request("resources/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc(e) if e.code == METHOD_NOT_FOUND));
    }
}
