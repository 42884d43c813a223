//! Line-delimited transport with request/response correlation (spec.md
//! §4.3).
//!
//! Grounded on the teacher's reader-task + bounded-pool scheduling idiom
//! (`durable::engine::executor`): one long-lived cooperative task owns the
//! read half of the byte stream and demultiplexes incoming lines; callers
//! awaiting a response register a `oneshot` completion slot keyed by
//! request id, mirroring the "single-writer on completion, atomic
//! insertion" pending-requests map from spec.md §5.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{decode_line, encode_line};
use crate::error::McpError;
use crate::message::{IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// One end of a JSON-RPC connection: owns the write half directly and
/// drives a background task over the read half.
pub struct Transport {
    writer: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    pending: PendingMap,
    next_id: AtomicU64,
    notifications: broadcast::Sender<JsonRpcNotification>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Spawn the reader task over `reader` and wrap `writer` for outbound
    /// sends. Returns the transport plus the channel of inbound requests
    /// (method+id frames sent *to* us - only the server side consumes this).
    pub fn spawn<R, W>(reader: R, writer: W) -> (Arc<Self>, mpsc::UnboundedReceiver<JsonRpcRequest>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notifications_tx, _) = broadcast::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            pending: pending.clone(),
            next_id: AtomicU64::new(1),
            notifications: notifications_tx.clone(),
            reader_task: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::read_loop(reader, pending, notifications_tx, inbound_tx));
        // Stash the handle so `shutdown` can join it; best-effort, never awaited on drop.
        if let Ok(mut slot) = transport.reader_task.try_lock() {
            *slot = Some(handle);
        }

        (transport, inbound_rx)
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        reader: R,
        pending: PendingMap,
        notifications: broadcast::Sender<JsonRpcNotification>,
        inbound: mpsc::UnboundedSender<JsonRpcRequest>,
    ) {
        use tokio::io::AsyncBufReadExt;

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("mcp transport reached end of stream");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "mcp transport read error");
                    break;
                }
            };

            match decode_line(&line) {
                Ok(None) => continue,
                Ok(Some(IncomingMessage::Response(response))) => {
                    let id_key = response.id.to_string();
                    let sender = pending.lock().await.remove(&id_key);
                    if let Some(sender) = sender {
                        let _ = sender.send(response);
                    } else {
                        warn!(id = %id_key, "mcp response for unknown or already-completed request");
                    }
                }
                Ok(Some(IncomingMessage::Notification(notification))) => {
                    let _ = notifications.send(notification);
                }
                Ok(Some(IncomingMessage::Request(request))) => {
                    let _ = inbound.send(request);
                }
                Err(e) => {
                    warn!(error = %e, "failed to decode mcp line");
                }
            }
        }

        // Transport died: every outstanding request observes a transport
        // error via its oneshot receiver being dropped.
        pending.lock().await.clear();
    }

    fn allocate_id(&self) -> Value {
        Value::from(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_line(&self, line: String) -> Result<(), McpError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    /// Send a request and await its matched response (result or RPC error).
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.allocate_id();
        let request = JsonRpcRequest::new(id.clone(), method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.to_string(), tx);

        let line = encode_line(&request)?;
        if let Err(e) = self.write_line(line).await {
            self.pending.lock().await.remove(&id.to_string());
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| McpError::Transport("connection closed before response arrived".to_string()))?;

        match response.error {
            Some(error) => Err(McpError::Rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let line = encode_line(&notification)?;
        self.write_line(line).await
    }

    pub async fn reply_result(&self, id: Value, result: Value) -> Result<(), McpError> {
        let response = JsonRpcResponse::success(id, result);
        let line = encode_line(&response)?;
        self.write_line(line).await
    }

    pub async fn reply_error(&self, id: Value, error: JsonRpcError) -> Result<(), McpError> {
        let response = JsonRpcResponse::failure(id, error);
        let line = encode_line(&response)?;
        self.write_line(line).await
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notifications.subscribe()
    }

    /// Number of requests still awaiting a response; used by cancellation
    /// to decide whether a shutdown needs to drain anything.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Abort the reader task and drop any in-flight pending requests
    /// (they resolve as transport errors).
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn request_resolves_when_peer_echoes_a_matching_response() {
        let (client_io, mut server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (client, _inbound_rx) = Transport::spawn(client_read, client_write);

        // Act as a trivial peer: read one line, parse the id, write back a
        // canned success response.
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
            let mut lines = BufReader::new(&mut server_io).lines();
            if let Ok(Some(line)) = lines.next_line().await {
                let request: JsonRpcRequest = serde_json::from_str(&line).unwrap();
                let response = JsonRpcResponse::success(request.id, serde_json::json!({"ok": true}));
                let mut out = serde_json::to_string(&response).unwrap();
                out.push('\n');
                server_io.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let result = client.send_request("ping", None).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dropped_connection_fails_outstanding_requests() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (client, _inbound_rx) = Transport::spawn(client_read, client_write);

        drop(server_io);

        let err = client.send_request("ping", None).await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }
}
