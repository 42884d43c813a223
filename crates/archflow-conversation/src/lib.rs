//! Conversation Suspend/Resume Manager (C10, spec.md §4.10).
//!
//! Parks a workflow execution awaiting human input behind an unguessable,
//! single-use resume token, and re-enters it by invoking a captured
//! continuation once the submitted data passes schema validation.

pub mod error;
pub mod manager;
pub mod token;

pub use error::ConversationError;
pub use manager::{ConversationEvent, ConversationManager, ConversationStats, Continuation};
pub use token::{mint_api_key, mint_resume_token};
