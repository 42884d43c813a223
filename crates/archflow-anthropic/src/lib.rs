//! Anthropic Messages API concrete provider adapter (C1, spec.md §4.1).
//!
//! Structured after the sibling `archflow-openai` adapter (same
//! `new`/`from_env`/`with_base_url` construction idiom, same
//! request/response split), talking the Anthropic Messages API wire format
//! instead of OpenAI's chat-completions format. Anthropic does not support
//! embeddings; `embed`/`embed_batch` fall back to the default
//! `UnsupportedOperation` trait behavior.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use archflow_providers::{
    AdapterError, LlmMessage, LlmMessageRole, LlmProvider, LlmResponse, LlmResponseStream,
    LlmStreamEvent, Operation, Usage,
};
use archflow_schemas::{ArchflowError, LlmProviderConfig};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A timed-out `reqwest::Error` is a distinct adapter failure (spec.md §4.1
/// `Timeout`), not a `TransportError` - a config with `timeout == 0` must
/// fail this way before any bytes are sent (spec.md §8 boundary case).
fn map_send_error(e: reqwest::Error, config: &LlmProviderConfig) -> ArchflowError {
    if e.is_timeout() {
        ArchflowError::timeout(e.to_string(), config.timeout.as_millis() as u64)
    } else {
        ArchflowError::TransportError {
            message: e.to_string(),
        }
    }
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ArchflowError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AdapterError::NotConfigured)?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    /// Anthropic separates the leading system message out of the messages
    /// array into its own top-level field.
    fn split_system(messages: &[LlmMessage]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut wire = Vec::with_capacity(messages.len());

        for m in messages {
            match m.role {
                LlmMessageRole::System if system.is_none() => {
                    system = Some(m.content.clone());
                }
                LlmMessageRole::System => {
                    // Anthropic allows only one leading system message;
                    // fold any later ones into the conversation as user turns.
                    wire.push(serde_json::json!({"role": "user", "content": m.content}));
                }
                LlmMessageRole::User | LlmMessageRole::Tool => {
                    wire.push(serde_json::json!({"role": "user", "content": m.content}));
                }
                LlmMessageRole::Assistant => {
                    wire.push(serde_json::json!({"role": "assistant", "content": m.content}));
                }
            }
        }
        (system, wire)
    }

    fn build_request(&self, messages: &[LlmMessage], config: &LlmProviderConfig, stream: bool) -> Value {
        let (system, wire_messages) = Self::split_system(messages);
        let mut request = serde_json::json!({
            "model": config.model,
            "messages": wire_messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": stream,
        });
        if let Some(system) = system {
            request["system"] = Value::String(system);
        }
        request
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn supports(&self, operation: Operation) -> bool {
        !matches!(operation, Operation::Embed | Operation::EmbedBatch)
    }

    async fn chat(
        &self,
        messages: &[LlmMessage],
        config: &LlmProviderConfig,
    ) -> Result<LlmResponse, ArchflowError> {
        config.validate()?;
        let request = self.build_request(messages, config, false);

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, config))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ArchflowError::provider(format!(
                "anthropic messages call failed ({status}): {body}"
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ArchflowError::provider(format!("malformed anthropic response: {e}")))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            text,
            usage: Usage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
        })
    }

    async fn chat_stream(
        &self,
        messages: &[LlmMessage],
        config: &LlmProviderConfig,
    ) -> Result<LlmResponseStream, ArchflowError> {
        config.validate()?;
        let request = self.build_request(messages, config, true);

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, config))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ArchflowError::provider(format!(
                "anthropic messages call failed ({status}): {body}"
            )));
        }

        let mut usage = Usage::default();
        let event_stream = response.bytes_stream().eventsource();

        let converted: LlmResponseStream = Box::pin(event_stream.filter_map(move |result| {
            let outcome = match result {
                Err(e) => Some(Err(ArchflowError::TransportError {
                    message: format!("sse stream error: {e}"),
                })),
                Ok(event) => match event.event.as_str() {
                    "content_block_delta" => {
                        serde_json::from_str::<StreamDelta>(&event.data)
                            .ok()
                            .map(|delta| Ok(LlmStreamEvent::TextDelta(delta.delta.text)))
                    }
                    "message_delta" => {
                        if let Ok(delta) = serde_json::from_str::<MessageDelta>(&event.data) {
                            usage.completion_tokens = delta.usage.output_tokens;
                        }
                        None
                    }
                    "message_stop" => Some(Ok(LlmStreamEvent::Done(usage))),
                    _ => None,
                },
            };
            async move { outcome }
        }));

        Ok(converted)
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    delta: TextDelta,
}

#[derive(Debug, Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    usage: MessageDeltaUsage,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_without_key_is_not_configured() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let err = AnthropicProvider::from_env().unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn embed_is_unsupported() {
        let provider = AnthropicProvider::new("key");
        assert!(!provider.supports(Operation::Embed));
    }

    #[test]
    fn split_system_pulls_out_leading_system_message() {
        let messages = vec![LlmMessage::system("be terse"), LlmMessage::user("hi")];
        let (system, wire) = AnthropicProvider::split_system(&messages);
        assert_eq!(system, Some("be terse".to_string()));
        assert_eq!(wire.len(), 1);
    }
}
