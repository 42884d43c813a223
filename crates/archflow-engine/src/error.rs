//! Flow Engine error taxonomy (spec.md §4.8, §7).

use archflow_schemas::{ArchflowError, LocalStepId, WorkflowId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("workflow '{0}' is already registered")]
    AlreadyRegistered(WorkflowId),
    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(WorkflowId),
    #[error("invalid workflow structure: {0}")]
    InvalidStructure(String),
    #[error("execution '{0}' not found")]
    ExecutionNotFound(uuid::Uuid),
    #[error("step '{0}' not found in workflow")]
    StepNotFound(LocalStepId),
    #[error("agent '{0}' is not registered")]
    AgentNotFound(String),
    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),
    #[error("expression error: {0}")]
    Expression(String),
    #[error(transparent)]
    Inner(#[from] ArchflowError),
}

impl From<EngineError> for ArchflowError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::AlreadyRegistered(id) => {
                ArchflowError::conflict(format!("workflow '{id}' is already registered"))
            }
            EngineError::WorkflowNotFound(id) => {
                ArchflowError::not_found(format!("workflow '{id}' is not registered"))
            }
            EngineError::InvalidStructure(message) => ArchflowError::validation(message),
            EngineError::ExecutionNotFound(id) => {
                ArchflowError::not_found(format!("execution '{id}' not found"))
            }
            EngineError::StepNotFound(id) => {
                ArchflowError::not_found(format!("step '{id}' not found in workflow"))
            }
            EngineError::AgentNotFound(id) => {
                ArchflowError::not_found(format!("agent '{id}' is not registered"))
            }
            EngineError::ToolNotFound(id) => {
                ArchflowError::not_found(format!("tool '{id}' is not registered"))
            }
            EngineError::Expression(message) => ArchflowError::validation(message),
            EngineError::Inner(inner) => inner,
        }
    }
}
