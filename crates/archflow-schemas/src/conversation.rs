//! Suspended conversation / form types (spec.md §3, §4.10)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::ConversationId;
use crate::schema::{Field, Schema};

/// A form field presented to the human filling in a suspended conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub field: Field,
    #[serde(default)]
    pub options: Vec<String>,
}

/// A form descriptor bound to a resume token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormDescriptor {
    pub form_id: String,
    pub title: String,
    pub fields: Vec<FormField>,
}

impl FormDescriptor {
    /// The field definitions as a [`Schema`], reused by the Conversation
    /// Manager to validate submitted form data (spec.md §4.10).
    pub fn as_schema(&self) -> Schema {
        let mut schema = Schema::new();
        for f in &self.fields {
            schema.fields.insert(f.name.clone(), f.field.clone());
        }
        schema
    }
}

/// Suspended conversation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Waiting,
    Resumed,
    Cancelled,
    Expired,
}

/// A parked workflow execution waiting on human input (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedConversation {
    pub conversation_id: ConversationId,
    pub execution_id: crate::ids::ExecutionId,
    pub resume_token: String,
    pub form: FormDescriptor,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}
