//! Cross-crate error taxonomy
//!
//! Every subsystem defines its own narrower error enum (as the teacher's
//! crates do: `ExecutorError`, `RegistryError`, ...) and converts into
//! [`ArchflowError`] at the boundary via `#[from]`. This type is what crosses
//! a boundary the caller can observe (the Execution's terminal error, an
//! Event Bus `Error` event, an MCP tool-call `isError` payload).

use serde::{Deserialize, Serialize};

/// The error kinds enumerated in the spec's error handling design.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchflowError {
    /// Input/schema/parameter validation failure.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        /// Field path -> human-readable violation, for schema failures.
        #[serde(default)]
        details: Vec<String>,
    },

    /// Workflow, tool, conversation, or token not found.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Missing/invalid credentials or scope.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Duplicate registration, or an expired/already-resumed token.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Step, LLM, or MCP timeout.
    #[error("timeout after {duration_ms}ms: {message}")]
    Timeout { message: String, duration_ms: u64 },

    /// IO/connection loss.
    #[error("transport error: {message}")]
    TransportError { message: String },

    /// LLM upstream failure.
    #[error("provider error: {message}")]
    ProviderError { message: String },

    /// Cooperative cancellation.
    #[error("cancelled: {message}")]
    Cancelled { message: String },

    /// All retries / all providers exhausted.
    #[error("exhausted: {message}")]
    Exhausted { message: String },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ArchflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        ArchflowError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        ArchflowError::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ArchflowError::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ArchflowError::Conflict {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>, duration_ms: u64) -> Self {
        ArchflowError::Timeout {
            message: message.into(),
            duration_ms,
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        ArchflowError::ProviderError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ArchflowError::Internal {
            message: message.into(),
        }
    }

    /// Error kind as a stable, lowercase code (used in terminal-error payloads).
    pub fn code(&self) -> &'static str {
        match self {
            ArchflowError::Validation { .. } => "validation",
            ArchflowError::NotFound { .. } => "not_found",
            ArchflowError::Unauthorized { .. } => "unauthorized",
            ArchflowError::Conflict { .. } => "conflict",
            ArchflowError::Timeout { .. } => "timeout",
            ArchflowError::TransportError { .. } => "transport_error",
            ArchflowError::ProviderError { .. } => "provider_error",
            ArchflowError::Cancelled { .. } => "cancelled",
            ArchflowError::Exhausted { .. } => "exhausted",
            ArchflowError::Internal { .. } => "internal",
        }
    }

    /// Whether the engine's retry policy is allowed to recover from this
    /// kind locally (spec.md §7): TransportError, Timeout, ProviderError,
    /// and - for the deterministic agent - Validation on output.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(
            self,
            ArchflowError::TransportError { .. }
                | ArchflowError::Timeout { .. }
                | ArchflowError::ProviderError { .. }
        )
    }
}

/// Result alias used across archflow crates for boundary-crossing operations.
pub type Result<T> = std::result::Result<T, ArchflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_snake_case() {
        assert_eq!(ArchflowError::validation("x").code(), "validation");
        assert_eq!(ArchflowError::not_found("x").code(), "not_found");
    }

    #[test]
    fn only_transient_kinds_are_retryable_by_default() {
        assert!(ArchflowError::timeout("x", 10).is_retryable_by_default());
        assert!(ArchflowError::provider("x").is_retryable_by_default());
        assert!(!ArchflowError::validation("x").is_retryable_by_default());
        assert!(!ArchflowError::conflict("x").is_retryable_by_default());
    }
}
