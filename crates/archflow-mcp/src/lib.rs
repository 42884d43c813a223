//! Model Context Protocol codec, transport, and client/server broker
//! (C3, C4).

pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod server;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use error::McpError;
pub use message::{IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use server::{McpServer, McpToolHost};
pub use transport::Transport;
pub use types::{
    ClientCapabilities, ClientInfo, ContentItem, InitializeResult, PromptDescriptor,
    ResourceDescriptor, ServerCapabilities, ServerInfo, ToolCallResult, ToolDescriptor,
};
