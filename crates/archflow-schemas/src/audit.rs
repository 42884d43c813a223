//! Audit record shape (spec.md §3, §6)
//!
//! This crate defines only the record shape; persisting it is an external
//! collaborator's concern (spec.md §1 Non-goals).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub action: String,
    pub actor_id: Option<String>,
    pub resource_kind: String,
    pub resource_id: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub trace_id: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: impl Into<String>,
        resource_kind: impl Into<String>,
        resource_id: impl Into<String>,
        success: bool,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor_id: None,
            resource_kind: resource_kind.into(),
            resource_id: resource_id.into(),
            success,
            error_message: None,
            ip: None,
            user_agent: None,
            session_id: None,
            trace_id: trace_id.into(),
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}
