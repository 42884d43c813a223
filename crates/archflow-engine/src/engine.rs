//! Flow Engine (C8, spec.md §4.8): registers [`Workflow`] graphs and drives
//! [`Execution`]s over them.
//!
//! Grounded on `durable::engine::executor::WorkflowExecutor`'s
//! register/start/process shape, generalized from "replay a persisted event
//! log for one workflow type" to "walk a registered graph of heterogeneous
//! step kinds with static edges, in memory" (persistence is a Non-goal,
//! spec.md §1). Per-step concurrency is bounded the way
//! `durable::worker::pool::WorkerPool` bounds activity execution: a shared
//! `Semaphore` rather than one task per step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use archflow_agent::{AgentDefinition, AgentExecutor};
use archflow_conversation::{ConversationManager, Continuation};
use archflow_events::EventBus;
use archflow_observability::Hooks;
use archflow_providers::{LlmMessage, ProviderSwitcher};
use archflow_schemas::event::{InteractionPayload, ToolPayload};
use archflow_schemas::{
    ArchflowError, AuditRecord, ConversationId, Execution, ExecutionId, ExecutionStatus,
    EventDomain, EventPayload, EventType, FormDescriptor, LlmProviderConfig, LocalStepId, Step,
    StepError, StepMetrics, StepResult, StepStatus, Workflow, WorkflowId,
};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tracing::warn;

use crate::agents::AgentRegistry;
use crate::error::EngineError;
use crate::expr::{self, ExprContext};
use crate::forms::FormRegistry;
use crate::registry::WorkflowRegistry;

/// External collaborators the engine dispatches step work to (spec.md §5
/// init order: Provider registry, MCP transports and Tool registry,
/// Conversation Manager, Event Bus all exist before the Flow Engine is
/// constructed from this bundle).
pub struct FlowEngineDeps {
    pub providers: Arc<ProviderSwitcher>,
    pub tools: Arc<archflow_tools::ToolRegistry>,
    pub agent_executor: Arc<AgentExecutor>,
    pub event_bus: Arc<EventBus>,
    pub conversations: Arc<ConversationManager>,
    pub hooks: Hooks,
}

enum ClaimOutcome {
    Claimed,
    AlreadyCompleted,
    Skip,
}

/// Per-[`Execution`] fan-out/fan-in tracker: how many spawned step tasks are
/// still in flight. `await_drive` blocks until it reaches zero, the way a
/// workflow call normally "returns" once its graph has no more pending work.
struct DriveState {
    inflight: AtomicI64,
    notify: Notify,
}

impl DriveState {
    fn new() -> Self {
        Self { inflight: AtomicI64::new(0), notify: Notify::new() }
    }
}

/// Graph-based workflow execution engine (C8).
pub struct FlowEngine {
    registry: WorkflowRegistry,
    agents: AgentRegistry,
    forms: FormRegistry,
    deps: FlowEngineDeps,
    executions: RwLock<HashMap<ExecutionId, Arc<Mutex<Execution>>>>,
    step_pool: Arc<Semaphore>,
}

impl FlowEngine {
    /// `max_concurrency` bounds the number of step dispatches in flight
    /// across every execution at once (spec.md §5 shared worker pool).
    pub fn new(deps: FlowEngineDeps, max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: WorkflowRegistry::new(),
            agents: AgentRegistry::new(),
            forms: FormRegistry::new(),
            deps,
            executions: RwLock::new(HashMap::new()),
            step_pool: Arc::new(Semaphore::new(max_concurrency.max(1))),
        })
    }

    pub async fn register_workflow(&self, workflow: Workflow) -> Result<(), EngineError> {
        self.registry.register(workflow).await
    }

    pub async fn unregister_workflow(&self, id: WorkflowId) {
        self.registry.unregister(id).await;
    }

    pub async fn list_workflows(&self) -> Vec<Arc<Workflow>> {
        self.registry.list().await
    }

    pub async fn register_agent(&self, agent: AgentDefinition) {
        self.agents.register(agent).await;
    }

    pub async fn register_form(&self, form: FormDescriptor) {
        self.forms.register(form).await;
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<Execution, EngineError> {
        let executions = self.executions.read().await;
        let exec = executions.get(&id).ok_or(EngineError::ExecutionNotFound(id.as_uuid()))?;
        Ok(exec.lock().await.clone())
    }

    /// Request cooperative cancellation for `id` (spec.md §5). Steps observe
    /// this through the Event Bus's per-execution [`CancellationToken`].
    pub async fn cancel_execution(&self, id: ExecutionId) {
        self.deps.event_bus.cancel(id).await;
    }

    /// Run `workflow_id` to completion (or to its first suspension point)
    /// and return the final [`Execution`] snapshot.
    pub async fn execute(self: &Arc<Self>, workflow_id: WorkflowId, input: Value) -> Result<Execution, EngineError> {
        let workflow = self.registry.get(workflow_id).await?;
        let (execution_id, exec) = self.new_execution(workflow_id).await;
        let input = Arc::new(input);

        self.deps.hooks.incr_counter(
            "workflow.executions.started",
            &[("workflow", workflow.id.to_string().as_str())],
        );

        let state = Arc::new(DriveState::new());
        self.spawn_step(&state, Arc::clone(&workflow), Arc::clone(&exec), Arc::clone(&input), workflow.entry.clone());
        self.await_drive(&state).await;

        let _ = execution_id;
        Ok(self.finalize(&workflow, &exec).await)
    }

    /// Like [`FlowEngine::execute`], but returns the [`ExecutionId`]
    /// immediately and drives the graph on a background task.
    pub async fn execute_async(self: &Arc<Self>, workflow_id: WorkflowId, input: Value) -> Result<ExecutionId, EngineError> {
        let workflow = self.registry.get(workflow_id).await?;
        let (execution_id, exec) = self.new_execution(workflow_id).await;
        let input = Arc::new(input);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let state = Arc::new(DriveState::new());
            engine.spawn_step(&state, Arc::clone(&workflow), Arc::clone(&exec), Arc::clone(&input), workflow.entry.clone());
            engine.await_drive(&state).await;
            engine.finalize(&workflow, &exec).await;
        });

        Ok(execution_id)
    }

    async fn new_execution(&self, workflow_id: WorkflowId) -> (ExecutionId, Arc<Mutex<Execution>>) {
        let mut execution = Execution::new(workflow_id);
        execution.status = ExecutionStatus::Running;
        execution.metrics.started_at = Some(Utc::now());
        let execution_id = execution.id;
        let exec = Arc::new(Mutex::new(execution));
        self.executions.write().await.insert(execution_id, Arc::clone(&exec));
        (execution_id, exec)
    }

    /// Increment the in-flight counter and spawn `step_id`'s processing as
    /// an independent task. Every step a task resolves as "next" spawns its
    /// own task the same way, which is how `ParallelFanOut` produces
    /// concurrent branches without any special-cased join logic here.
    fn spawn_step(
        self: &Arc<Self>,
        state: &Arc<DriveState>,
        workflow: Arc<Workflow>,
        exec: Arc<Mutex<Execution>>,
        input: Arc<Value>,
        step_id: LocalStepId,
    ) {
        state.inflight.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(self);
        let state = Arc::clone(state);
        tokio::spawn(async move {
            let next_ids = engine.run_step_with_retry(&workflow, &exec, &input, &step_id).await;
            for next in next_ids {
                engine.spawn_step(&state, Arc::clone(&workflow), Arc::clone(&exec), Arc::clone(&input), next);
            }
            state.inflight.fetch_sub(1, Ordering::SeqCst);
            state.notify.notify_waiters();
        });
    }

    async fn await_drive(&self, state: &DriveState) {
        loop {
            let notified = state.notify.notified();
            if state.inflight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
    }

    /// Finalize status from the terminal step statuses observed so far and
    /// return a snapshot. Safe to call repeatedly (e.g. once per
    /// suspend/resume cycle) - it only reads/updates the stored state.
    async fn finalize(&self, workflow: &Workflow, exec: &Mutex<Execution>) -> Execution {
        let mut ex = exec.lock().await;
        let any_paused = ex.step_results.values().any(|r| r.status == StepStatus::Paused);
        let any_failed = ex
            .step_results
            .values()
            .any(|r| matches!(r.status, StepStatus::Failed | StepStatus::Timeout | StepStatus::Cancelled));

        ex.status = if any_paused {
            ExecutionStatus::Paused
        } else if any_failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        if !any_paused {
            ex.metrics.ended_at = Some(Utc::now());
        }

        self.deps.hooks.incr_counter(
            "workflow.executions.finished",
            &[("workflow", workflow.id.to_string().as_str()), ("status", format!("{:?}", ex.status).as_str())],
        );
        self.deps
            .hooks
            .audit(AuditRecord::new("workflow.execute", "execution", ex.id.to_string(), !any_failed, ex.id.to_string()))
            .await;

        ex.clone()
    }

    /// Claim `step_id` for execution by transitioning `Pending -> Running`,
    /// or report that it is already done / already claimed by another
    /// branch (spec.md §4.8 idempotence: a completed step is never
    /// recomputed).
    async fn claim_or_skip(&self, exec: &Mutex<Execution>, step_id: &LocalStepId) -> ClaimOutcome {
        let mut e = exec.lock().await;
        match e.step_results.get(step_id).map(|r| r.status) {
            Some(StepStatus::Completed) => ClaimOutcome::AlreadyCompleted,
            Some(_) => ClaimOutcome::Skip,
            None => {
                e.step_results.insert(
                    step_id.clone(),
                    StepResult { status: StepStatus::Running, output: None, metrics: StepMetrics::default(), errors: vec![] },
                );
                ClaimOutcome::Claimed
            }
        }
    }

    /// A `Merge` step claims only once every listed source has completed;
    /// whichever branch observes that last is the one that runs it, so a
    /// fan-in never executes twice (spec.md §4.8 `ParallelFanOut`/`Merge`).
    async fn try_claim_merge(&self, exec: &Mutex<Execution>, merge_id: &LocalStepId, from: &[LocalStepId]) -> bool {
        let mut e = exec.lock().await;
        if e.step_results.get(merge_id).map(|r| r.status != StepStatus::Pending).unwrap_or(false) {
            return false;
        }
        let ready = from
            .iter()
            .all(|id| matches!(e.step_results.get(id), Some(r) if r.status == StepStatus::Completed));
        if !ready {
            return false;
        }
        e.step_results.insert(
            merge_id.clone(),
            StepResult { status: StepStatus::Running, output: None, metrics: StepMetrics::default(), errors: vec![] },
        );
        true
    }

    async fn run_step_with_retry(
        self: &Arc<Self>,
        workflow: &Arc<Workflow>,
        exec: &Arc<Mutex<Execution>>,
        input: &Arc<Value>,
        step_id: &LocalStepId,
    ) -> Vec<LocalStepId> {
        let step = match workflow.step(step_id) {
            Some(s) => s.clone(),
            None => return Vec::new(),
        };

        if matches!(step.kind, archflow_schemas::StepKind::SuspendForInput { .. }) {
            return self.handle_suspend(workflow, exec, input, &step).await;
        }

        let claim = if let archflow_schemas::StepKind::Merge { from } = &step.kind {
            if self.try_claim_merge(exec, &step.id, from).await {
                ClaimOutcome::Claimed
            } else {
                ClaimOutcome::Skip
            }
        } else {
            self.claim_or_skip(exec, &step.id).await
        };

        match claim {
            ClaimOutcome::AlreadyCompleted => return self.next_ids_for(workflow, exec, input, &step).await,
            ClaimOutcome::Skip => return Vec::new(),
            ClaimOutcome::Claimed => {}
        }

        let (status, output, errors, metrics) = self.attempt_loop(workflow, exec, input, &step).await;

        {
            let mut e = exec.lock().await;
            e.metrics.total_retries += metrics.retry_count;
            let result = match status {
                StepStatus::Completed => StepResult::completed(output.unwrap_or(Value::Null), metrics),
                _ => StepResult { status, output: None, metrics, errors },
            };
            e.step_results.insert(step.id.clone(), result);
        }

        self.deps.hooks.incr_counter(
            "workflow.step.completed",
            &[("step", step.id.0.as_str()), ("status", format!("{status:?}").as_str())],
        );

        if status == StepStatus::Completed {
            self.next_ids_for(workflow, exec, input, &step).await
        } else {
            workflow
                .outgoing(&step.id)
                .into_iter()
                .find(|e| e.is_error_edge())
                .map(|e| vec![e.target.clone()])
                .unwrap_or_default()
        }
    }

    /// Attempt `step` up to its retry policy's `max_attempts`, honoring its
    /// timeout on every attempt (spec.md §4.8 retries/timeouts).
    async fn attempt_loop(
        self: &Arc<Self>,
        workflow: &Arc<Workflow>,
        exec: &Arc<Mutex<Execution>>,
        input: &Arc<Value>,
        step: &Step,
    ) -> (StepStatus, Option<Value>, Vec<StepError>, StepMetrics) {
        let policy = step
            .retry_override
            .clone()
            .unwrap_or_else(|| workflow.configuration.default_retry_policy.clone());
        let timeout_ms = step.timeout_override_ms.unwrap_or(workflow.configuration.default_timeout_ms);

        let mut errors = Vec::new();
        let mut metrics = StepMetrics::default();
        let started = std::time::Instant::now();

        for attempt in 1..=policy.max_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
            metrics.retry_count = attempt - 1;

            let permit = self.step_pool.acquire().await.expect("step pool semaphore is never closed");
            let outcome = tokio::time::timeout(
                std::time::Duration::from_millis(timeout_ms),
                self.dispatch_once(workflow, exec, input, step),
            )
            .await;
            drop(permit);

            let result = match outcome {
                Ok(r) => r,
                Err(_) => Err(ArchflowError::timeout(format!("step '{}' timed out", step.id), timeout_ms)),
            };

            match result {
                Ok(value) => {
                    metrics.execution_time_ms = started.elapsed().as_millis() as u64;
                    return (StepStatus::Completed, Some(value), errors, metrics);
                }
                Err(err) => {
                    let retryable = if policy.retry_on.is_empty() {
                        err.is_retryable_by_default()
                    } else {
                        policy.retry_on.contains(&err.code().to_string())
                    };
                    let is_timeout = matches!(err, ArchflowError::Timeout { .. });
                    errors.push(StepError { kind: err.code().to_string(), message: err.to_string(), attempt });
                    if !retryable || attempt == policy.max_attempts.max(1) {
                        metrics.execution_time_ms = started.elapsed().as_millis() as u64;
                        let status = if is_timeout { StepStatus::Timeout } else { StepStatus::Failed };
                        return (status, None, errors, metrics);
                    }
                }
            }
        }

        (StepStatus::Failed, None, errors, metrics)
    }

    /// Select the outgoing edges to follow from `step`'s outcome (spec.md
    /// §4.8 edge selection): `ParallelFanOut` takes every edge whose
    /// condition holds; everything else takes the first satisfied edge in
    /// declared order. Error edges are never selected here.
    async fn next_ids_for(
        &self,
        workflow: &Workflow,
        exec: &Mutex<Execution>,
        input: &Value,
        step: &Step,
    ) -> Vec<LocalStepId> {
        let snapshot = exec.lock().await.clone();
        let ctx = ExprContext::new(workflow, &snapshot, input);
        let candidates: Vec<_> = workflow.outgoing(&step.id).into_iter().filter(|e| !e.is_error_edge()).collect();

        let holds = |condition: &Option<String>| -> bool {
            match condition {
                None => true,
                Some(expr) => match expr::evaluate_condition(expr, &ctx) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(step = %step.id, error = %e, "edge condition failed to evaluate, treating as false");
                        false
                    }
                },
            }
        };

        if matches!(step.kind, archflow_schemas::StepKind::ParallelFanOut) {
            candidates.into_iter().filter(|e| holds(&e.condition)).map(|e| e.target.clone()).collect()
        } else {
            candidates
                .into_iter()
                .find(|e| holds(&e.condition))
                .map(|e| vec![e.target.clone()])
                .unwrap_or_default()
        }
    }

    /// Park the branch on a `SuspendForInput` step: claim it, look up its
    /// form, hand a continuation to the Conversation Manager, and stop (the
    /// continuation resumes the graph when the token is redeemed).
    async fn handle_suspend(
        self: &Arc<Self>,
        workflow: &Arc<Workflow>,
        exec: &Arc<Mutex<Execution>>,
        input: &Arc<Value>,
        step: &Step,
    ) -> Vec<LocalStepId> {
        let form_id = match &step.kind {
            archflow_schemas::StepKind::SuspendForInput { form_id } => form_id.clone(),
            _ => unreachable!("handle_suspend only called for SuspendForInput steps"),
        };

        match self.claim_or_skip(exec, &step.id).await {
            ClaimOutcome::AlreadyCompleted => return self.next_ids_for(workflow, exec, input, step).await,
            ClaimOutcome::Skip => return Vec::new(),
            ClaimOutcome::Claimed => {}
        }

        let form = match self.forms.get(&form_id).await {
            Ok(form) => (*form).clone(),
            Err(e) => {
                let mut ex = exec.lock().await;
                ex.step_results.insert(
                    step.id.clone(),
                    StepResult::failed(
                        vec![StepError { kind: "not_found".to_string(), message: e.to_string(), attempt: 1 }],
                        StepMetrics::default(),
                    ),
                );
                return Vec::new();
            }
        };

        {
            let mut ex = exec.lock().await;
            ex.step_results.insert(
                step.id.clone(),
                StepResult { status: StepStatus::Paused, output: None, metrics: StepMetrics::default(), errors: vec![] },
            );
        }

        let execution_id = exec.lock().await.id;
        let conversation_id = ConversationId::new();

        let engine = Arc::clone(self);
        let workflow_c = Arc::clone(workflow);
        let exec_c = Arc::clone(exec);
        let input_c = Arc::clone(input);
        let step_id = step.id.clone();

        let continuation: Continuation = Box::new(move |form_data: Value| {
            Box::pin(async move {
                {
                    let mut ex = exec_c.lock().await;
                    ex.step_results
                        .insert(step_id.clone(), StepResult::completed(form_data, StepMetrics::default()));
                }
                let resumed_step = workflow_c.step(&step_id).cloned();
                let next_ids = match resumed_step {
                    Some(resumed_step) => engine.next_ids_for(&workflow_c, &exec_c, &input_c, &resumed_step).await,
                    None => Vec::new(),
                };

                let state = Arc::new(DriveState::new());
                for id in next_ids {
                    engine.spawn_step(&state, Arc::clone(&workflow_c), Arc::clone(&exec_c), Arc::clone(&input_c), id);
                }
                engine.await_drive(&state).await;
                engine.finalize(&workflow_c, &exec_c).await;
            })
        });

        let suspended = self
            .deps
            .conversations
            .suspend(conversation_id, execution_id, form.clone(), continuation)
            .await;

        self.deps
            .event_bus
            .emit(
                execution_id,
                EventDomain::Interaction,
                EventType::SuspendForInput,
                EventPayload::Interaction(InteractionPayload {
                    form_id,
                    fields: serde_json::to_value(&form).unwrap_or(Value::Null),
                    conversation_id,
                    token: suspended.resume_token,
                }),
            )
            .await;

        Vec::new()
    }

    /// Run `step`'s kind-specific behavior exactly once (no retry/timeout -
    /// that is [`FlowEngine::attempt_loop`]'s job).
    async fn dispatch_once(
        self: &Arc<Self>,
        workflow: &Arc<Workflow>,
        exec: &Arc<Mutex<Execution>>,
        input: &Arc<Value>,
        step: &Step,
    ) -> Result<Value, ArchflowError> {
        let snapshot = exec.lock().await.clone();
        let ctx = ExprContext::new(workflow, &snapshot, input);

        match &step.kind {
            archflow_schemas::StepKind::Input => Ok((**input).clone()),
            archflow_schemas::StepKind::Output { template } => {
                Ok(Value::String(expr::render_template(template, &ctx)?))
            }
            archflow_schemas::StepKind::Condition { expression } => {
                Ok(Value::Bool(expr::evaluate_condition(expression, &ctx)?))
            }
            archflow_schemas::StepKind::ParallelFanOut => Ok(Value::Null),
            archflow_schemas::StepKind::Merge { from } => {
                let mut combined = serde_json::Map::new();
                for id in from {
                    combined.insert(id.0.clone(), snapshot.completed_output(id).cloned().unwrap_or(Value::Null));
                }
                Ok(Value::Object(combined))
            }
            archflow_schemas::StepKind::Llm { operation, provider, parameters } => {
                self.dispatch_llm(workflow, &ctx, operation, provider, parameters).await
            }
            archflow_schemas::StepKind::DeterministicAgent { agent_id, parameters } => {
                self.dispatch_agent(&ctx, agent_id, parameters).await
            }
            archflow_schemas::StepKind::Tool { tool_name, parameters } => {
                self.dispatch_tool(&ctx, tool_name, parameters).await
            }
            archflow_schemas::StepKind::Loop { items_expression, item_binding, sub_workflow, parallelism } => {
                self.dispatch_loop(&ctx, items_expression, item_binding, *sub_workflow, *parallelism).await
            }
            archflow_schemas::StepKind::SuspendForInput { .. } => {
                unreachable!("SuspendForInput is intercepted before dispatch_once")
            }
        }
    }

    async fn dispatch_llm(
        &self,
        workflow: &Workflow,
        ctx: &ExprContext<'_>,
        operation: &str,
        provider_ref: &Option<archflow_schemas::LlmProviderRef>,
        parameters: &HashMap<String, String>,
    ) -> Result<Value, ArchflowError> {
        let rendered = render_params(parameters, ctx)?;
        let provider_ref = provider_ref
            .clone()
            .or_else(|| workflow.configuration.default_provider.clone())
            .ok_or_else(|| ArchflowError::validation("no provider configured for llm step"))?;
        let config = LlmProviderConfig::new(provider_ref.provider.clone(), provider_ref.model.clone());
        let prompt = rendered.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string();
        let system = rendered.get("system").and_then(Value::as_str).map(str::to_string);
        let operation = operation.to_string();

        let response = self
            .deps
            .providers
            .execute_with_fallback("flow-engine.llm", move |provider| {
                let config = config.clone();
                let prompt = prompt.clone();
                let system = system.clone();
                let operation = operation.clone();
                async move {
                    match operation.as_str() {
                        "embed" => {
                            let embedding = provider.embed(&prompt, &config).await?;
                            Ok(archflow_providers::LlmResponse {
                                text: serde_json::to_string(&embedding).unwrap_or_default(),
                                usage: Default::default(),
                            })
                        }
                        _ => match system {
                            Some(system) => {
                                provider.chat(&[LlmMessage::system(system), LlmMessage::user(prompt)], &config).await
                            }
                            None => provider.generate(&prompt, &config).await,
                        },
                    }
                }
            })
            .await?;

        Ok(serde_json::json!({
            "text": response.text,
            "prompt_tokens": response.usage.prompt_tokens,
            "completion_tokens": response.usage.completion_tokens,
        }))
    }

    async fn dispatch_agent(
        &self,
        ctx: &ExprContext<'_>,
        agent_id: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Value, ArchflowError> {
        let agent = self.agents.get(agent_id).await?;
        let input = render_params(parameters, ctx)?;
        let result = self.deps.agent_executor.execute(&agent, input).await.map_err(ArchflowError::from)?;
        Ok(result.output)
    }

    async fn dispatch_tool(
        &self,
        ctx: &ExprContext<'_>,
        tool_name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Value, ArchflowError> {
        let tool = self
            .deps
            .tools
            .get_by_name(tool_name)
            .await
            .ok_or_else(|| ArchflowError::not_found(format!("tool '{tool_name}' is not registered")))?;
        let input = render_params(parameters, ctx)?;

        self.deps
            .event_bus
            .emit(
                ctx.execution.id,
                EventDomain::Tool,
                EventType::ToolStart,
                EventPayload::Tool(ToolPayload { tool_name: tool_name.to_string(), arguments: Some(input.clone()), result: None }),
            )
            .await;

        let result = self.deps.tools.execute(&tool.id, input).await?;

        if result.success {
            self.deps
                .event_bus
                .emit(
                    ctx.execution.id,
                    EventDomain::Tool,
                    EventType::ToolComplete,
                    EventPayload::Tool(ToolPayload {
                        tool_name: tool_name.to_string(),
                        arguments: None,
                        result: result.output.clone(),
                    }),
                )
                .await;
            Ok(result.output.unwrap_or(Value::Null))
        } else {
            let message = result.error.clone().unwrap_or_else(|| "tool call did not succeed".to_string());
            self.deps
                .event_bus
                .emit(
                    ctx.execution.id,
                    EventDomain::Tool,
                    EventType::ToolError,
                    EventPayload::Tool(ToolPayload { tool_name: tool_name.to_string(), arguments: None, result: None }),
                )
                .await;
            Err(ArchflowError::internal(message))
        }
    }

    /// Run `sub_workflow` once per item of `items_expression`'s evaluated
    /// array, bounded to `parallelism` concurrent iterations (spec.md §9
    /// Open Question: sequential by default, bounded-parallel when set).
    async fn dispatch_loop(
        self: &Arc<Self>,
        ctx: &ExprContext<'_>,
        items_expression: &str,
        item_binding: &str,
        sub_workflow: WorkflowId,
        parallelism: usize,
    ) -> Result<Value, ArchflowError> {
        let items_value = expr::evaluate_value(items_expression, ctx)?;
        let items = items_value.as_array().cloned().unwrap_or_default();

        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let mut object = serde_json::Map::new();
            object.insert(item_binding.to_string(), item);
            let engine = Arc::clone(self);
            let permits = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.expect("loop semaphore is never closed");
                engine.execute(sub_workflow, Value::Object(object)).await
            }));
        }

        let mut outputs = Vec::with_capacity(handles.len());
        for handle in handles {
            let execution = handle
                .await
                .map_err(|_| ArchflowError::internal("loop iteration task panicked"))?
                .map_err(ArchflowError::from)?;
            outputs.push(serde_json::json!({
                "execution_id": execution.id.to_string(),
                "status": format!("{:?}", execution.status),
            }));
        }
        Ok(Value::Array(outputs))
    }
}

/// Render every parameter's template and try to parse it back as JSON
/// (so `"42"` becomes a number, `"${step.output.items}"` an array/object if
/// its output is one); a plain string that doesn't parse stays a string.
fn render_params(parameters: &HashMap<String, String>, ctx: &ExprContext) -> Result<Value, ArchflowError> {
    let mut map = serde_json::Map::with_capacity(parameters.len());
    for (key, template) in parameters {
        let rendered = expr::render_template(template, ctx)?;
        let value = serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered));
        map.insert(key.clone(), value);
    }
    Ok(Value::Object(map))
}
