//! Func-Agent error taxonomy (spec.md §4.7).

use archflow_schemas::{ArchflowError, ValidationError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("input validation failed: {0:?}")]
    InputValidation(Vec<ValidationError>),
    #[error("confirmation was rejected")]
    UserRejected,
    #[error("agent call timed out after {0}ms")]
    Timeout(u64),
    #[error("output did not conform to schema after retries: {0:?}")]
    SchemaViolation(Vec<ValidationError>),
    #[error("output could not be parsed as the declared format: {0}")]
    FormatError(String),
    #[error("provider call failed: {0}")]
    Provider(#[from] ArchflowError),
}

impl From<AgentError> for ArchflowError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::InputValidation(errors) => ArchflowError::validation_with_details(
                "agent input validation failed",
                errors.into_iter().map(|e| format!("{}: {}", e.path, e.message)).collect(),
            ),
            AgentError::UserRejected => ArchflowError::Cancelled {
                message: "confirmation was rejected".to_string(),
            },
            AgentError::Timeout(ms) => ArchflowError::timeout("agent call timed out", ms),
            AgentError::SchemaViolation(errors) => ArchflowError::validation_with_details(
                "agent output did not conform to schema",
                errors.into_iter().map(|e| format!("{}: {}", e.path, e.message)).collect(),
            ),
            AgentError::FormatError(message) => ArchflowError::validation(message),
            AgentError::Provider(inner) => inner,
        }
    }
}
