//! Schema validation (C5), tool descriptors, and the workflow-as-tool
//! registry (C6).

pub mod registry;
pub mod tool;
pub mod validation;

pub use registry::{create_composite, create_parallel, ToolLifecycleEvent, ToolRegistry, WorkflowToolResult};
pub use tool::{FunctionInvoker, InvokerKind, Tool, ToolInvoker, ToolOutcome, ToolStatus};
pub use validation::validate;
