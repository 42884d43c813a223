//! Conversation Suspend/Resume Manager (C10, spec.md §4.10).
//!
//! Grounded on `durable::workflow::signal::WorkflowSignal` (the
//! external-input-re-enters-a-suspended-workflow mechanism), generalized
//! from "send a signal, the workflow's `on_signal` callback decides what to
//! do" to "mint a token bound to a form, invoke a captured continuation
//! with the submitted data on resume".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use archflow_schemas::{ConversationId, ConversationStatus, ExecutionId, FormDescriptor, SuspendedConversation};
use archflow_tools::validate;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::error::ConversationError;
use crate::token::mint_resume_token;

/// The suspended step's continuation: invoked with the submitted form data
/// once `resume` validates and accepts it. Re-entering the workflow graph
/// is the caller's (Flow Engine's) business; this crate only guarantees it
/// is invoked exactly once, with exactly one winning `resume` call.
pub type Continuation = Box<dyn FnOnce(Value) -> BoxFuture<'static, ()> + Send>;

/// Lifecycle events broadcast to Conversation Manager listeners.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Suspended { conversation_id: ConversationId, token: String },
    Resumed { conversation_id: ConversationId },
    Cancelled { conversation_id: ConversationId },
    Completed { conversation_id: ConversationId },
    Expired { conversation_id: ConversationId },
}

/// Aggregate counters (spec.md §4.11 conversation-manager waiting gauge).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationStats {
    pub waiting: usize,
    pub resumed_total: u64,
    pub cancelled_total: u64,
    pub expired_total: u64,
}

struct Entry {
    conversation: SuspendedConversation,
    continuation: Option<Continuation>,
}

struct State {
    by_id: HashMap<ConversationId, Entry>,
    by_token: HashMap<String, ConversationId>,
    resumed_total: u64,
    cancelled_total: u64,
    expired_total: u64,
}

impl State {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_token: HashMap::new(),
            resumed_total: 0,
            cancelled_total: 0,
            expired_total: 0,
        }
    }

    /// Remove every trace of a conversation by id (both indices).
    fn remove(&mut self, conversation_id: &ConversationId) -> Option<Entry> {
        let entry = self.by_id.remove(conversation_id)?;
        self.by_token.remove(&entry.conversation.resume_token);
        Some(entry)
    }
}

/// Suspend/resume manager (C10). All state transitions happen under a
/// single critical section (`state` is one `Mutex`, not two independently
/// locked maps) so a concurrent resume/cancel pair on the same token can
/// never both win (spec.md §8 single-use invariant).
pub struct ConversationManager {
    state: Mutex<State>,
    events: broadcast::Sender<ConversationEvent>,
    default_ttl: Duration,
}

impl ConversationManager {
    pub fn new(default_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { state: Mutex::new(State::new()), events, default_ttl }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    /// Park `execution_id` pending human input. Mints an unguessable,
    /// single-use token, stores the entry keyed by both id and token, and
    /// emits `Suspended`. `continuation` is invoked exactly once, on the
    /// winning `resume` call.
    pub async fn suspend(
        &self,
        conversation_id: ConversationId,
        execution_id: ExecutionId,
        form: FormDescriptor,
        continuation: Continuation,
    ) -> SuspendedConversation {
        let token = mint_resume_token();
        let now = Utc::now();
        let conversation = SuspendedConversation {
            conversation_id,
            execution_id,
            resume_token: token.clone(),
            form,
            status: ConversationStatus::Waiting,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.default_ttl).unwrap_or(chrono::Duration::zero()),
            context: HashMap::new(),
        };

        {
            let mut state = self.state.lock().await;
            state.by_token.insert(token.clone(), conversation_id);
            state.by_id.insert(
                conversation_id,
                Entry { conversation: conversation.clone(), continuation: Some(continuation) },
            );
        }

        info!(%conversation_id, token = %token, "conversation suspended awaiting input");
        self.emit(ConversationEvent::Suspended { conversation_id, token });
        conversation
    }

    /// Resume the conversation bound to `token` with `form_data`. Validates
    /// `status == Waiting` and not expired, validates `form_data` against
    /// the form's schema, marks `Resumed`, removes the token binding
    /// (single-use), and invokes the captured continuation.
    ///
    /// At most one concurrent call for a given token returns `Ok` - this is
    /// `lookup-and-mutate` under one lock acquisition, per spec.md §5.
    pub async fn resume(
        &self,
        token: &str,
        form_data: Value,
    ) -> Result<SuspendedConversation, ConversationError> {
        let (conversation, continuation) = {
            let mut state = self.state.lock().await;

            let conversation_id = *state.by_token.get(token).ok_or(ConversationError::NotFound)?;
            let entry = state.by_id.get(&conversation_id).ok_or(ConversationError::NotFound)?;

            if entry.conversation.status != ConversationStatus::Waiting {
                return Err(ConversationError::NotWaiting);
            }
            if entry.conversation.expires_at <= Utc::now() {
                return Err(ConversationError::Expired);
            }

            if let Err(errors) = validate(&entry.conversation.form.as_schema(), &form_data) {
                return Err(ConversationError::Validation(errors));
            }

            // Single-use: remove the token binding and the entry together
            // before releasing the lock, so a racing resume sees NotFound.
            let mut entry = state.remove(&conversation_id).expect("just looked up");
            entry.conversation.status = ConversationStatus::Resumed;
            state.resumed_total += 1;
            (entry.conversation, entry.continuation.take())
        };

        self.emit(ConversationEvent::Resumed { conversation_id: conversation.conversation_id });

        if let Some(continuation) = continuation {
            continuation(form_data).await;
        } else {
            warn!(conversation_id = %conversation.conversation_id, "resumed conversation had no captured continuation");
        }

        Ok(conversation)
    }

    /// Cancel a waiting conversation; removes it from both indices.
    pub async fn cancel(&self, conversation_id: ConversationId) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.remove(&conversation_id).is_some();
            if removed {
                state.cancelled_total += 1;
            }
            removed
        };
        if removed {
            self.emit(ConversationEvent::Cancelled { conversation_id });
        }
        removed
    }

    /// Remove a conversation and emit a terminal `Completed` event, without
    /// running its continuation (used when the owning execution already
    /// finished some other way).
    pub async fn complete(&self, conversation_id: ConversationId) -> bool {
        let removed = self.state.lock().await.remove(&conversation_id).is_some();
        if removed {
            self.emit(ConversationEvent::Completed { conversation_id });
        }
        removed
    }

    pub async fn get_by_token(&self, token: &str) -> Option<SuspendedConversation> {
        let state = self.state.lock().await;
        let conversation_id = state.by_token.get(token)?;
        state.by_id.get(conversation_id).map(|e| e.conversation.clone())
    }

    pub async fn get_by_id(&self, conversation_id: ConversationId) -> Option<SuspendedConversation> {
        self.state.lock().await.by_id.get(&conversation_id).map(|e| e.conversation.clone())
    }

    pub async fn get_stats(&self) -> ConversationStats {
        let state = self.state.lock().await;
        ConversationStats {
            waiting: state.by_id.len(),
            resumed_total: state.resumed_total,
            cancelled_total: state.cancelled_total,
            expired_total: state.expired_total,
        }
    }

    /// Sweep entries past `expires_at`, marking them `Expired` and emitting
    /// an event for each. Returns the number of entries swept.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired_ids: Vec<ConversationId> = {
            let state = self.state.lock().await;
            state
                .by_id
                .iter()
                .filter(|(_, e)| e.conversation.status == ConversationStatus::Waiting && e.conversation.expires_at <= now)
                .map(|(id, _)| *id)
                .collect()
        };

        for conversation_id in &expired_ids {
            let mut state = self.state.lock().await;
            if state.remove(conversation_id).is_some() {
                state.expired_total += 1;
            }
            drop(state);
            self.emit(ConversationEvent::Expired { conversation_id: *conversation_id });
        }

        expired_ids.len()
    }

    /// Spawn a background janitor sweeping expired entries on `interval`.
    /// Returns a handle the caller can abort at teardown.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let swept = manager.sweep_expired().await;
                if swept > 0 {
                    info!(count = swept, "janitor swept expired conversations");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::{Field, FieldType, FormField};

    fn name_form() -> FormDescriptor {
        FormDescriptor {
            form_id: "user-registration".into(),
            title: "Register".into(),
            fields: vec![FormField {
                name: "name".into(),
                label: "Name".into(),
                field: Field::new(FieldType::String).required(),
                options: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn suspend_then_resume_invokes_the_continuation_once() {
        let manager = ConversationManager::new(Duration::from_secs(1800));
        let received = Arc::new(tokio::sync::Mutex::new(None));
        let received_clone = Arc::clone(&received);

        let conversation = manager
            .suspend(
                ConversationId::new(),
                ExecutionId::new(),
                name_form(),
                Box::new(move |data| {
                    Box::pin(async move {
                        *received_clone.lock().await = Some(data);
                    })
                }),
            )
            .await;

        let result = manager
            .resume(&conversation.resume_token, serde_json::json!({"name": "John"}))
            .await
            .unwrap();

        assert_eq!(result.status, ConversationStatus::Resumed);
        assert_eq!(*received.lock().await, Some(serde_json::json!({"name": "John"})));
    }

    #[tokio::test]
    async fn token_is_single_use_under_concurrent_resume() {
        let manager = Arc::new(ConversationManager::new(Duration::from_secs(1800)));
        let conversation = manager
            .suspend(
                ConversationId::new(),
                ExecutionId::new(),
                name_form(),
                Box::new(|_| Box::pin(async {})),
            )
            .await;

        let token = conversation.resume_token.clone();
        let m1 = Arc::clone(&manager);
        let t1 = token.clone();
        let m2 = Arc::clone(&manager);
        let t2 = token.clone();

        let (r1, r2) = tokio::join!(
            m1.resume(&t1, serde_json::json!({"name": "A"})),
            m2.resume(&t2, serde_json::json!({"name": "B"})),
        );

        let successes = [r1.is_ok(), r2.is_ok()].into_iter().filter(|x| *x).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn resume_validates_form_data_against_the_schema() {
        let manager = ConversationManager::new(Duration::from_secs(1800));
        let conversation = manager
            .suspend(
                ConversationId::new(),
                ExecutionId::new(),
                name_form(),
                Box::new(|_| Box::pin(async {})),
            )
            .await;

        let err = manager.resume(&conversation.resume_token, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));
    }

    #[tokio::test]
    async fn zero_ttl_conversations_are_expired_on_first_sweep() {
        let manager = ConversationManager::new(Duration::from_secs(0));
        manager
            .suspend(
                ConversationId::new(),
                ExecutionId::new(),
                name_form(),
                Box::new(|_| Box::pin(async {})),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let swept = manager.sweep_expired().await;
        assert_eq!(swept, 1);
        assert_eq!(manager.get_stats().await.waiting, 0);
    }

    #[tokio::test]
    async fn cancel_removes_reachability_by_both_id_and_token() {
        let manager = ConversationManager::new(Duration::from_secs(1800));
        let conversation_id = ConversationId::new();
        let conversation = manager
            .suspend(conversation_id, ExecutionId::new(), name_form(), Box::new(|_| Box::pin(async {})))
            .await;

        assert!(manager.cancel(conversation_id).await);
        assert!(manager.get_by_id(conversation_id).await.is_none());
        assert!(manager.get_by_token(&conversation.resume_token).await.is_none());
    }
}
