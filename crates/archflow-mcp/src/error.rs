use archflow_schemas::ArchflowError;

use crate::message::JsonRpcError;

/// MCP-local failure kinds, converted into [`ArchflowError`] at the
/// broker/engine boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rpc error {code}: {message}", code = .0.code, message = .0.message)]
    Rpc(JsonRpcError),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),
}

impl From<McpError> for ArchflowError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Transport(m) => ArchflowError::TransportError { message: m },
            McpError::Protocol(m) => ArchflowError::validation(m),
            McpError::Rpc(rpc) => ArchflowError::provider(format!("{}: {}", rpc.code, rpc.message)),
            McpError::UnsupportedOperation(m) => ArchflowError::validation(m),
            McpError::Timeout(ms) => ArchflowError::timeout("mcp request timed out", ms),
        }
    }
}
