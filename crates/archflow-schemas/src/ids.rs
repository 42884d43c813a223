//! Newtype identifiers
//!
//! Wrapping `uuid::Uuid` (v7, time-ordered, per the teacher's id convention)
//! in distinct types avoids passing a `WorkflowId` where an `ExecutionId` is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(WorkflowId);
uuid_id!(StepId);
uuid_id!(ExecutionId);
uuid_id!(ConversationId);

/// Opaque identifier for a step within a single workflow (not globally
/// unique, unique only within the owning [`WorkflowId`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct LocalStepId(pub String);

impl LocalStepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for LocalStepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LocalStepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LocalStepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types_with_same_repr() {
        let w = WorkflowId::new();
        let serialized = serde_json::to_string(&w).unwrap();
        let back: WorkflowId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(w, back);
    }

    #[test]
    fn local_step_id_from_str() {
        let id: LocalStepId = "step-1".into();
        assert_eq!(id.to_string(), "step-1");
    }
}
