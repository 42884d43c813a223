//! Streaming event envelope (spec.md §3, §6)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ExecutionId};

/// The domain an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDomain {
    Chat,
    Interaction,
    /// Reserved for provider adapters that expose a reasoning/thinking
    /// stream (e.g. o1-class models); not produced by the OpenAI/Anthropic
    /// adapters in this core (spec.md §9 Open Question).
    Thinking,
    Tool,
    Audit,
}

/// The specific event type within a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Delta,
    Message,
    Form,
    SuspendForInput,
    ToolStart,
    ToolComplete,
    ToolError,
    Error,
    TraceStart,
    TraceEnd,
}

/// Payload for a Chat-domain event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatPayload {
    pub content: String,
    pub delta: Option<bool>,
}

/// Payload for an Interaction-domain event (form suspension).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionPayload {
    pub form_id: String,
    pub fields: serde_json::Value,
    pub conversation_id: ConversationId,
    pub token: String,
}

/// Payload for a Tool-domain event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPayload {
    pub tool_name: String,
    pub arguments: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

/// Payload for a Thinking-domain event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThinkingPayload {
    pub content: String,
    pub stage: Option<String>,
}

/// Payload for an Audit-domain event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditPayload {
    pub action: String,
    pub success: bool,
    pub resource: String,
}

/// Domain-specific event payload, tagged by [`EventDomain`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    Chat(ChatPayload),
    Interaction(InteractionPayload),
    Thinking(ThinkingPayload),
    Tool(ToolPayload),
    Audit(AuditPayload),
    /// Free-form payload for Error events and anything not modeled above.
    Raw(serde_json::Value),
}

/// An immutable, ordered unit of publication on the Event Bus (C9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub domain: EventDomain,
    pub event_type: EventType,
    /// Monotonically increasing within an [`ExecutionId`] (spec.md §8 invariant).
    pub id: u64,
    pub execution_id: Option<ExecutionId>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn new(
        domain: EventDomain,
        event_type: EventType,
        id: u64,
        execution_id: Option<ExecutionId>,
        payload: EventPayload,
    ) -> Self {
        Self {
            domain,
            event_type,
            id,
            execution_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Render the wire shape from spec.md §6:
    /// `{envelope:{domain,type,id,timestamp}, data:{...}}`.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "envelope": {
                "domain": self.domain,
                "type": self.event_type,
                "id": self.id,
                "timestamp": self.timestamp,
            },
            "data": self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let env = EventEnvelope::new(
            EventDomain::Chat,
            EventType::Delta,
            1,
            Some(ExecutionId::new()),
            EventPayload::Chat(ChatPayload {
                content: "hi".into(),
                delta: Some(true),
            }),
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }
}
