//! Flow Engine (C8, spec.md §4.8): graph registration, Execution lifecycle,
//! and step dispatch for every [`archflow_schemas::StepKind`].

pub mod agents;
pub mod engine;
pub mod error;
pub mod expr;
pub mod forms;
pub mod registry;

pub use agents::AgentRegistry;
pub use engine::{FlowEngine, FlowEngineDeps};
pub use error::EngineError;
pub use expr::ExprContext;
pub use forms::FormRegistry;
pub use registry::WorkflowRegistry;
