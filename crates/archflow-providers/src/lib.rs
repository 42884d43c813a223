//! Provider Adapter Interface + Provider Switcher (C1, C2).

pub mod adapter;
pub mod registry;
pub mod switcher;

pub use adapter::{
    AdapterError, LlmMessage, LlmMessageRole, LlmProvider, LlmResponse, LlmResponseStream,
    LlmStreamEvent, Operation, Usage,
};
pub use registry::ProviderRegistry;
pub use switcher::{ProviderSwitcher, Strategy, SwitcherEvent, SwitcherOutcome};
