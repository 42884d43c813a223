//! Workflow graph registry (spec.md §4.8 `register`/`unregister`/`list`).
//!
//! Grounded on `durable::engine::registry::WorkflowRegistry`'s by-id
//! register/unregister shape (already generalized once for
//! `archflow-tools::ToolRegistry`; this is the same idiom applied to
//! [`Workflow`] graphs rather than runnable tools).

use std::collections::HashMap;
use std::sync::Arc;

use archflow_schemas::{Workflow, WorkflowId};
use tokio::sync::RwLock;

use crate::error::EngineError;

#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<WorkflowId, Arc<Workflow>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the graph's structure and register it. Rejects a duplicate
    /// id (a workflow is immutable once registered - update by
    /// unregister-then-register under a fresh id or the same id).
    pub async fn register(&self, workflow: Workflow) -> Result<(), EngineError> {
        workflow
            .validate_structure()
            .map_err(|e| EngineError::InvalidStructure(e.to_string()))?;

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id) {
            return Err(EngineError::AlreadyRegistered(workflow.id));
        }
        workflows.insert(workflow.id, Arc::new(workflow));
        Ok(())
    }

    pub async fn unregister(&self, id: WorkflowId) -> Option<Arc<Workflow>> {
        self.workflows.write().await.remove(&id)
    }

    pub async fn get(&self, id: WorkflowId) -> Result<Arc<Workflow>, EngineError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    pub async fn list(&self) -> Vec<Arc<Workflow>> {
        self.workflows.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::{Edge, LocalStepId, Step, StepKind, WorkflowConfiguration, WorkflowMetadata};
    use std::collections::HashMap;

    fn linear_workflow() -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata {
                name: "linear".into(),
                description: String::new(),
                version: "1".into(),
                author: None,
                category: None,
                tags: vec![],
            },
            entry: LocalStepId::new("in"),
            steps: vec![
                Step { id: LocalStepId::new("in"), kind: StepKind::Input, retry_override: None, timeout_override_ms: None },
                Step {
                    id: LocalStepId::new("out"),
                    kind: StepKind::Output { template: "${input.x}".into() },
                    retry_override: None,
                    timeout_override_ms: None,
                },
            ],
            edges: vec![Edge::unconditional(LocalStepId::new("in"), LocalStepId::new("out"))],
            configuration: WorkflowConfiguration::default(),
            variables: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = WorkflowRegistry::new();
        let workflow = linear_workflow();
        let id = workflow.id;
        registry.register(workflow).await.unwrap();
        assert_eq!(registry.get(id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = WorkflowRegistry::new();
        let workflow = linear_workflow();
        let duplicate = Workflow { id: workflow.id, ..linear_workflow() };
        registry.register(workflow).await.unwrap();
        assert!(matches!(
            registry.register(duplicate).await,
            Err(EngineError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn unregister_removes_and_list_reflects_it() {
        let registry = WorkflowRegistry::new();
        let workflow = linear_workflow();
        let id = workflow.id;
        registry.register(workflow).await.unwrap();
        registry.unregister(id).await;
        assert!(registry.list().await.is_empty());
    }
}
