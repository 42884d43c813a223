//! MCP client broker (C4, spec.md §4.4 client side).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::McpError;
use crate::transport::Transport;
use crate::types::{
    ClientCapabilities, ClientInfo, InitializeResult, PromptDescriptor, ResourceDescriptor,
    ServerCapabilities, ToolCallResult, ToolDescriptor, PROTOCOL_VERSION,
};

/// Client-side MCP broker: performs the handshake, then gates each request
/// family on the server capability it requires (spec.md §4.4), failing
/// immediately with `UnsupportedOperation` rather than a network round-trip
/// when the capability is absent.
pub struct McpClient {
    transport: Arc<Transport>,
    capabilities: RwLock<Option<ServerCapabilities>>,
}

impl McpClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            capabilities: RwLock::new(None),
        }
    }

    /// `initialize` handshake followed by the `notifications/initialized`
    /// acknowledgement (spec.md §4.4).
    pub async fn initialize(&self, client_info: ClientInfo) -> Result<ServerCapabilities, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": ClientCapabilities::default(),
            "clientInfo": client_info,
        });

        let result = self.transport.send_request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed initialize result: {e}")))?;

        *self.capabilities.write().await = Some(result.capabilities.clone());
        self.transport.send_notification("notifications/initialized", None).await?;

        Ok(result.capabilities)
    }

    async fn require(&self, predicate: impl Fn(&ServerCapabilities) -> bool, what: &str) -> Result<(), McpError> {
        let caps = self.capabilities.read().await;
        match caps.as_ref() {
            Some(caps) if predicate(caps) => Ok(()),
            Some(_) => Err(McpError::UnsupportedOperation(format!(
                "server does not advertise the '{what}' capability"
            ))),
            None => Err(McpError::UnsupportedOperation(
                "client has not completed the initialize handshake".to_string(),
            )),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.require(|c| c.tools, "tools").await?;
        let result = self.transport.send_request("tools/list", None).await?;
        parse_listing(result, "tools")
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        self.require(|c| c.tools, "tools").await?;
        let params = serde_json::json!({"name": name, "arguments": arguments});
        let result = self.transport.send_request("tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol(format!("malformed tools/call result: {e}")))
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.require(|c| c.resources, "resources").await?;
        let result = self.transport.send_request("resources/list", None).await?;
        parse_listing(result, "resources")
    }

    pub async fn list_resource_templates(&self) -> Result<Value, McpError> {
        self.require(|c| c.resources, "resources").await?;
        self.transport.send_request("resources/templates/list", None).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.require(|c| c.resources, "resources").await?;
        let params = serde_json::json!({"uri": uri});
        self.transport.send_request("resources/read", Some(params)).await
    }

    pub async fn subscribe_resource(&self, uri: &str) -> Result<(), McpError> {
        self.require(|c| c.resources && c.resources_subscribe, "resources.subscribe")
            .await?;
        let params = serde_json::json!({"uri": uri});
        self.transport.send_request("resources/subscribe", Some(params)).await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<(), McpError> {
        self.require(|c| c.resources && c.resources_subscribe, "resources.subscribe")
            .await?;
        let params = serde_json::json!({"uri": uri});
        self.transport
            .send_request("resources/unsubscribe", Some(params))
            .await?;
        Ok(())
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, McpError> {
        self.require(|c| c.prompts, "prompts").await?;
        let result = self.transport.send_request("prompts/list", None).await?;
        parse_listing(result, "prompts")
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.require(|c| c.prompts, "prompts").await?;
        let params = serde_json::json!({"name": name, "arguments": arguments});
        self.transport.send_request("prompts/get", Some(params)).await
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

fn parse_listing<T: serde::de::DeserializeOwned>(result: Value, key: &str) -> Result<Vec<T>, McpError> {
    let array = result
        .get(key)
        .cloned()
        .ok_or_else(|| McpError::Protocol(format!("listing result missing '{key}'")))?;
    serde_json::from_value(array).map_err(|e| McpError::Protocol(format!("malformed {key} listing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resources_call_before_handshake_is_unsupported_without_a_round_trip() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client_io);
        let (transport, _inbound) = Transport::spawn(read, write);
        let client = McpClient::new(transport);

        let err = client.list_resources().await.unwrap_err();
        assert!(matches!(err, McpError::UnsupportedOperation(_)));
    }
}
