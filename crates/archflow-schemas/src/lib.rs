//! Shared data contracts for archflow.
//!
//! This crate has no dependency on the runtime crates (providers, tools,
//! engine, ...) - it is pure data, mirroring the teacher's
//! `everruns-contracts`/`everruns-schemas` split.

pub mod audit;
pub mod conversation;
pub mod environment;
pub mod error;
pub mod event;
pub mod execution;
pub mod ids;
pub mod provider;
pub mod schema;
pub mod workflow;

pub use audit::AuditRecord;
pub use conversation::{ConversationStatus, FormDescriptor, FormField, SuspendedConversation};
pub use environment::{resolve_environment, Environment};
pub use error::{ArchflowError, Result};
pub use event::{EventDomain, EventEnvelope, EventPayload, EventType};
pub use execution::{Execution, ExecutionMetrics, ExecutionStatus, StepError, StepMetrics, StepResult, StepStatus};
pub use ids::{ConversationId, ExecutionId, LocalStepId, StepId, WorkflowId};
pub use provider::{LlmProviderConfig, ProviderId, ProviderStats};
pub use schema::{Constraint, Field, FieldType, Schema, ValidationError};
pub use workflow::{
    Edge, LlmProviderRef, RetryPolicy, Step, StepKind, TimeoutMs, Workflow, WorkflowConfiguration,
    WorkflowMetadata,
};
