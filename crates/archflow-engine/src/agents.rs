//! Registry of [`AgentDefinition`]s available to `DeterministicAgent` steps.
//!
//! The same by-id register/get/list shape as
//! `archflow_providers::ProviderRegistry`/`archflow_tools::ToolRegistry` -
//! spec.md §4.8 only names `agentId` on the step, so something has to hold
//! the definitions it resolves against.

use std::collections::HashMap;
use std::sync::Arc;

use archflow_agent::AgentDefinition;
use tokio::sync::RwLock;

use crate::error::EngineError;

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentDefinition>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent: AgentDefinition) {
        self.agents.write().await.insert(agent.id.clone(), Arc::new(agent));
    }

    pub async fn unregister(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<AgentDefinition>, EngineError> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::AgentNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<Arc<AgentDefinition>> {
        self.agents.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_agent::AgentModelRef;

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentDefinition::new(
                "extract-invoice",
                "extracts invoice fields",
                AgentModelRef { provider_key: "openai".into(), model: "gpt-5.2".into() },
            ))
            .await;

        assert_eq!(registry.get("extract-invoice").await.unwrap().id, "extract-invoice");
    }

    #[tokio::test]
    async fn missing_agent_is_not_found() {
        let registry = AgentRegistry::new();
        assert!(matches!(registry.get("missing").await, Err(EngineError::AgentNotFound(_))));
    }
}
