//! Conversation Manager error taxonomy (spec.md §4.10, §7).

use archflow_schemas::{ArchflowError, ValidationError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConversationError {
    #[error("no suspended conversation for this token")]
    NotFound,
    #[error("resume token has expired")]
    Expired,
    #[error("resume token has already been used or the conversation is not waiting")]
    NotWaiting,
    #[error("submitted form data failed validation: {0:?}")]
    Validation(Vec<ValidationError>),
}

impl From<ConversationError> for ArchflowError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::NotFound => ArchflowError::not_found("conversation not found"),
            ConversationError::Expired => ArchflowError::conflict("resume token has expired"),
            ConversationError::NotWaiting => {
                ArchflowError::conflict("conversation is not waiting for input")
            }
            ConversationError::Validation(errors) => ArchflowError::validation_with_details(
                "form data validation failed",
                errors.into_iter().map(|e| format!("{}: {}", e.path, e.message)).collect(),
            ),
        }
    }
}
