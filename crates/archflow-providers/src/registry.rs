//! Provider registry (spec.md §4.1: "discovered through a registry indexed
//! by provider id")
//!
//! Grounded on `everruns-core::provider_factory::create_provider`, but split
//! into a registration surface (this module) and a construction surface
//! (left to the `archflow-openai`/`archflow-anthropic` crates, which each
//! provide their own constructor functions mirroring
//! `OpenAIProtocolLlmProvider::from_env`/`with_base_url`).

use std::collections::HashMap;
use std::sync::Arc;

use archflow_schemas::ArchflowError;

use crate::adapter::LlmProvider;

/// In-process registry mapping a provider id to a boxed adapter instance.
///
/// Concurrent readers, serialized mutators (spec.md §5 shared-resource
/// policy) - a `tokio::sync::RwLock` gives exactly that.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    inner: Arc<tokio::sync::RwLock<HashMap<String, Arc<dyn LlmProvider>>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, provider: Arc<dyn LlmProvider>) {
        let id = provider.id().to_string();
        tracing::info!(provider_id = %id, "registered LLM provider adapter");
        self.inner.write().await.insert(id, provider);
    }

    pub async fn unregister(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.inner.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>, ArchflowError> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ArchflowError::not_found(format!("provider '{id}' is not registered")))
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{LlmMessage, LlmProvider, LlmResponse, LlmResponseStream, Operation, Usage};
    use archflow_schemas::LlmProviderConfig;
    use async_trait::async_trait;

    struct Stub(&'static str);

    #[async_trait]
    impl LlmProvider for Stub {
        fn id(&self) -> &str {
            self.0
        }

        fn supports(&self, _operation: Operation) -> bool {
            true
        }

        async fn chat(
            &self,
            _messages: &[LlmMessage],
            _config: &LlmProviderConfig,
        ) -> Result<LlmResponse, ArchflowError> {
            Ok(LlmResponse {
                text: "ok".into(),
                usage: Usage::default(),
            })
        }

        async fn chat_stream(
            &self,
            _messages: &[LlmMessage],
            _config: &LlmProviderConfig,
        ) -> Result<LlmResponseStream, ArchflowError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn register_and_get_round_trip() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub("stub"))).await;

        let found = registry.get("stub").await.unwrap();
        assert_eq!(found.id(), "stub");
    }

    #[tokio::test]
    async fn get_missing_provider_is_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry.get("missing").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
