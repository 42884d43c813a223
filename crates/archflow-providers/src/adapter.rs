//! Provider Adapter Interface (C1, spec.md §4.1)

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use archflow_schemas::{ArchflowError, LlmProviderConfig};

/// Adapter-local failure kinds (spec.md §4.1), narrower than the
/// cross-cutting [`ArchflowError`] taxonomy. Converted at the boundary via
/// `From`, matching the teacher's per-crate error enum + `#[from]` pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("not configured")]
    NotConfigured,
    #[error("unsupported operation: {0:?}")]
    UnsupportedOperation(Operation),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
}

impl From<AdapterError> for ArchflowError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::InvalidConfig(m) => ArchflowError::validation(m),
            AdapterError::NotConfigured => ArchflowError::validation("provider not configured"),
            AdapterError::UnsupportedOperation(op) => {
                ArchflowError::internal(format!("unsupported operation: {op:?}"))
            }
            AdapterError::ProviderError(m) => ArchflowError::provider(m),
            AdapterError::Timeout(ms) => ArchflowError::timeout("provider call timed out", ms),
        }
    }
}

/// Message role for LLM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Provider-agnostic message format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported alongside a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Non-streaming chat/generate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
}

/// A single chunk of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LlmStreamEvent {
    TextDelta(String),
    Done(Usage),
}

/// Lazy, restartable=no, finite sequence of stream events.
pub type LlmResponseStream =
    Pin<Box<dyn Stream<Item = Result<LlmStreamEvent, ArchflowError>> + Send>>;

/// The recognised operations from spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Generate,
    Chat,
    GenerateStream,
    ChatStream,
    Embed,
    EmbedBatch,
}

/// Uniform LLM call surface over N provider implementations (C1).
///
/// Adapters declare which operations they support via [`LlmProvider::supports`]
/// and fail with `UnsupportedOperation` for anything else.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider id, e.g. "openai", "anthropic".
    fn id(&self) -> &str;

    /// Validate a config against this adapter's requirements (missing api
    /// key, out-of-range decoding parameters) without making a network call.
    fn validate(&self, config: &LlmProviderConfig) -> Result<(), ArchflowError> {
        config.validate()
    }

    fn supports(&self, operation: Operation) -> bool;

    async fn generate(
        &self,
        prompt: &str,
        config: &LlmProviderConfig,
    ) -> Result<LlmResponse, ArchflowError> {
        self.chat(&[LlmMessage::user(prompt)], config).await
    }

    async fn chat(
        &self,
        messages: &[LlmMessage],
        config: &LlmProviderConfig,
    ) -> Result<LlmResponse, ArchflowError>;

    async fn generate_stream(
        &self,
        prompt: &str,
        config: &LlmProviderConfig,
    ) -> Result<LlmResponseStream, ArchflowError> {
        self.chat_stream(&[LlmMessage::user(prompt)], config).await
    }

    async fn chat_stream(
        &self,
        messages: &[LlmMessage],
        config: &LlmProviderConfig,
    ) -> Result<LlmResponseStream, ArchflowError>;

    async fn embed(&self, _text: &str, _config: &LlmProviderConfig) -> Result<Vec<f32>, ArchflowError> {
        Err(AdapterError::UnsupportedOperation(Operation::Embed).into())
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        config: &LlmProviderConfig,
    ) -> Result<Vec<Vec<f32>>, ArchflowError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t, config).await?);
        }
        Ok(out)
    }

    /// Release any held resources (connection pools, background tasks).
    async fn shutdown(&self) {}
}
