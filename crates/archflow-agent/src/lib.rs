//! Deterministic Agent Executor (C7), "Func-Agent" (spec.md §4.7).

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod format;
pub mod gate;

pub use config::{AgentDefinition, AgentMode, AgentModelRef, OutputFormat, RetryReason, StrictRetryPolicy};
pub use error::AgentError;
pub use events::{AgentEventSink, TracingEventSink};
pub use executor::{AgentExecutor, AgentMetrics, AgentResult, AttemptState};
pub use gate::{AutoAffirmGate, AutoRejectGate, ConfirmationForm, ConfirmationGate, ConfirmationOutcome};
