//! OpenAI-compatible concrete provider adapter (C1, spec.md §4.1).
//!
//! Grounded on `everruns-core::openai_protocol::OpenAIProtocolLlmDriver`:
//! same request/response wire shapes, same SSE `[DONE]` sentinel handling,
//! generalized to the crate-local [`LlmProvider`] trait instead of the
//! teacher's `LlmDriver`.

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

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

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

/// Adapter for the OpenAI chat-completions wire protocol (also used by any
/// OpenAI-compatible endpoint reachable via `with_base_url`).
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    chat_url: String,
    embeddings_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            chat_url: DEFAULT_API_URL.to_string(),
            embeddings_url: DEFAULT_EMBEDDINGS_URL.to_string(),
        }
    }

    /// Build from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, ArchflowError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AdapterError::NotConfigured)?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(api_key: impl Into<String>, chat_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            chat_url: chat_url.into(),
            embeddings_url: DEFAULT_EMBEDDINGS_URL.to_string(),
        }
    }

    fn role_str(role: LlmMessageRole) -> &'static str {
        match role {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
            LlmMessageRole::Tool => "tool",
        }
    }

    fn build_request(&self, messages: &[LlmMessage], config: &LlmProviderConfig, stream: bool) -> Value {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": Self::role_str(m.role),
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": config.model,
            "messages": wire_messages,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "max_tokens": config.max_tokens,
            "stream": stream,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn supports(&self, _operation: Operation) -> bool {
        true
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
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, config))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ArchflowError::provider(format!(
                "openai chat completion failed ({status}): {body}"
            )));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ArchflowError::provider(format!("malformed openai response: {e}")))?;

        let text = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(LlmResponse {
            text,
            usage: Usage {
                prompt_tokens: body.usage.prompt_tokens,
                completion_tokens: body.usage.completion_tokens,
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
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, config))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ArchflowError::provider(format!(
                "openai chat completion failed ({status}): {body}"
            )));
        }

        let mut total_tokens = 0u32;
        let event_stream = response.bytes_stream().eventsource();

        let converted: LlmResponseStream = Box::pin(event_stream.map(move |result| {
            let event = result.map_err(|e| ArchflowError::TransportError {
                message: format!("sse stream error: {e}"),
            })?;

            if event.data == "[DONE]" {
                return Ok(LlmStreamEvent::Done(Usage {
                    prompt_tokens: 0,
                    completion_tokens: total_tokens,
                }));
            }

            let chunk: StreamChunk = serde_json::from_str(&event.data)
                .map_err(|e| ArchflowError::provider(format!("malformed stream chunk: {e}")))?;

            if let Some(choice) = chunk.choices.first() {
                if let Some(content) = &choice.delta.content {
                    total_tokens += 1;
                    return Ok(LlmStreamEvent::TextDelta(content.clone()));
                }
            }
            Ok(LlmStreamEvent::TextDelta(String::new()))
        }));

        Ok(converted)
    }

    async fn embed(&self, text: &str, config: &LlmProviderConfig) -> Result<Vec<f32>, ArchflowError> {
        let request = serde_json::json!({
            "model": config.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.embeddings_url)
            .bearer_auth(&self.api_key)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, config))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ArchflowError::provider(format!(
                "openai embeddings failed ({status}): {body}"
            )));
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ArchflowError::provider(format!("malformed embeddings response: {e}")))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ArchflowError::provider("openai returned no embedding"))
    }

}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("chat_url", &self.chat_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: ChatCompletionUsage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_without_key_is_not_configured() {
        std::env::remove_var("OPENAI_API_KEY");
        let err = OpenAiProvider::from_env().unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn with_base_url_overrides_chat_endpoint() {
        let provider = OpenAiProvider::with_base_url("key", "https://example.com/v1/chat/completions");
        assert_eq!(provider.chat_url, "https://example.com/v1/chat/completions");
    }

    #[test]
    fn supports_reports_true_for_all_operations() {
        let provider = OpenAiProvider::new("key");
        assert!(provider.supports(Operation::Chat));
        assert!(provider.supports(Operation::Embed));
    }
}
