//! Explicit-confirmation gating (spec.md §4.7 step 2).
//!
//! Decoupled from `archflow-conversation`'s suspend/resume machinery the
//! same way `archflow-mcp::McpToolHost` decouples the broker from any
//! concrete tool registry: the engine wires a real gate backed by the
//! Conversation Manager; tests and standalone use wire [`AutoAffirmGate`]
//! or [`AutoRejectGate`].

use async_trait::async_trait;

/// The form shown to whoever must confirm this agent run.
#[derive(Debug, Clone)]
pub struct ConfirmationForm {
    pub agent_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Affirmed,
    Rejected,
}

#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn request_confirmation(&self, form: ConfirmationForm) -> ConfirmationOutcome;
}

/// Always affirms; suitable for non-interactive defaults and tests.
pub struct AutoAffirmGate;

#[async_trait]
impl ConfirmationGate for AutoAffirmGate {
    async fn request_confirmation(&self, _form: ConfirmationForm) -> ConfirmationOutcome {
        ConfirmationOutcome::Affirmed
    }
}

/// Always rejects; useful for exercising the `UserRejected` abort path.
pub struct AutoRejectGate;

#[async_trait]
impl ConfirmationGate for AutoRejectGate {
    async fn request_confirmation(&self, _form: ConfirmationForm) -> ConfirmationOutcome {
        ConfirmationOutcome::Rejected
    }
}
