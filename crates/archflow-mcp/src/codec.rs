//! Line-delimited JSON-RPC 2.0 framing (spec.md §4.3): one whole message per
//! line, blank lines ignored, message kind determined from the presence of
//! `id`/`method`.

use serde_json::Value;

use crate::error::McpError;
use crate::message::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Parse a single line into a classified JSON-RPC message.
///
/// Returns `Ok(None)` for a blank line (per spec, these are simply ignored
/// rather than treated as a parse error).
pub fn decode_line(line: &str) -> Result<Option<IncomingMessage>, McpError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| McpError::Protocol(format!("parse error: {e}")))?;

    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();

    let message = match (has_id, has_method) {
        (true, true) => {
            let request: JsonRpcRequest = serde_json::from_value(value)
                .map_err(|e| McpError::Protocol(format!("invalid request: {e}")))?;
            IncomingMessage::Request(request)
        }
        (false, true) => {
            let notification: JsonRpcNotification = serde_json::from_value(value)
                .map_err(|e| McpError::Protocol(format!("invalid notification: {e}")))?;
            IncomingMessage::Notification(notification)
        }
        (true, false) => {
            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| McpError::Protocol(format!("invalid response: {e}")))?;
            IncomingMessage::Response(response)
        }
        (false, false) => {
            return Err(McpError::Protocol(
                "invalid request: neither id nor method present".to_string(),
            ))
        }
    };

    Ok(Some(message))
}

/// Serialize any of the three wire shapes into a single `\n`-terminated line.
pub fn encode_line<T: serde::Serialize>(message: &T) -> Result<String, McpError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_ignored() {
        assert!(decode_line("   ").unwrap().is_none());
    }

    #[test]
    fn request_has_both_id_and_method() {
        let msg = decode_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, IncomingMessage::Request(_)));
    }

    #[test]
    fn notification_has_no_id() {
        let msg = decode_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, IncomingMessage::Notification(_)));
    }

    #[test]
    fn response_has_no_method() {
        let msg = decode_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, IncomingMessage::Response(_)));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let err = decode_line("not json").unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }
}
