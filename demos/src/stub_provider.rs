//! A minimal in-memory [`LlmProvider`] for exercising the switcher and the
//! Func-Agent executor without a network call.

use std::sync::atomic::{AtomicUsize, Ordering};

use archflow_providers::{LlmMessage, LlmProvider, LlmProviderConfig, LlmResponse, LlmResponseStream, Operation, Usage};
use archflow_schemas::ArchflowError;
use async_trait::async_trait;

/// What `chat` does on a given call, indexed by call count (1-based).
enum Behavior {
    AlwaysOk,
    AlwaysFail,
    FlakyThenValid(String),
}

pub struct StubProvider {
    id: String,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn succeeding(id: impl Into<String>) -> Self {
        Self { id: id.into(), behavior: Behavior::AlwaysOk, calls: AtomicUsize::new(0) }
    }

    pub fn always_failing(id: impl Into<String>) -> Self {
        Self { id: id.into(), behavior: Behavior::AlwaysFail, calls: AtomicUsize::new(0) }
    }

    /// Returns unparsable text on the first call, then `valid_json` on
    /// every call after.
    pub fn flaky_then_valid(id: impl Into<String>, valid_json: impl Into<String>) -> Self {
        Self { id: id.into(), behavior: Behavior::FlakyThenValid(valid_json.into()), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn chat(&self, _messages: &[LlmMessage], _config: &LlmProviderConfig) -> Result<LlmResponse, ArchflowError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::AlwaysOk => Ok(LlmResponse { text: format!("ok from {}", self.id), usage: Usage::default() }),
            Behavior::AlwaysFail => Err(ArchflowError::TransportError { message: format!("{} is unreachable", self.id) }),
            Behavior::FlakyThenValid(valid) => {
                if call == 1 {
                    Ok(LlmResponse { text: "not json at all".into(), usage: Usage::default() })
                } else {
                    Ok(LlmResponse { text: valid.clone(), usage: Usage::default() })
                }
            }
        }
    }

    async fn chat_stream(&self, _messages: &[LlmMessage], _config: &LlmProviderConfig) -> Result<LlmResponseStream, ArchflowError> {
        Err(ArchflowError::internal("streaming is not exercised by this stub"))
    }
}
