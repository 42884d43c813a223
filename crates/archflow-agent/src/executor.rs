//! Deterministic Agent Executor (C7, "Func-Agent"), spec.md §4.7.
//!
//! Grounded on `everruns-core::executor` (the retry/loop shell wrapped
//! around a single-purpose `call_model` atom): this executor is that shape
//! generalized so the "atom" is LLM-call-then-parse-then-validate and the
//! retry loop reacts to schema-validation failure, not just transport
//! failure.

use std::sync::Arc;
use std::time::Duration;

use archflow_providers::{LlmMessage, ProviderSwitcher};
use archflow_schemas::{ArchflowError, LlmProviderConfig, Schema};
use archflow_tools::validate;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::{AgentDefinition, AgentMode, OutputFormat, RetryReason};
use crate::error::AgentError;
use crate::events::{AgentEventSink, TracingEventSink};
use crate::format;
use crate::gate::{ConfirmationForm, ConfirmationGate, ConfirmationOutcome};

/// Per-attempt state machine (spec.md §4.7): `Preparing -> Calling ->
/// (Succeeded | ValidationFailed | TransportFailed | Timeout)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Preparing,
    Calling,
    Succeeded,
    ValidationFailed,
    TransportFailed,
    Timeout,
}

/// Metrics recorded across the run (spec.md §4.7 observable side effects).
#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
    pub attempts: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
}

/// The run's terminal outcome: `Succeeded`, `Exhausted`, or `Aborted`.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub output: Value,
    pub metrics: AgentMetrics,
}

/// Runs a single Func-Agent invocation end to end (spec.md §4.7 steps 1-6).
pub struct AgentExecutor {
    switcher: Arc<ProviderSwitcher>,
    gate: Arc<dyn ConfirmationGate>,
    sink: Arc<dyn AgentEventSink>,
}

impl AgentExecutor {
    pub fn new(switcher: Arc<ProviderSwitcher>) -> Self {
        Self {
            switcher,
            gate: Arc::new(crate::gate::AutoAffirmGate),
            sink: Arc::new(TracingEventSink),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn AgentEventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[instrument(skip(self, agent, input), fields(agent_id = %agent.id))]
    pub async fn execute(&self, agent: &AgentDefinition, input: Value) -> Result<AgentResult, AgentError> {
        // Step 1: input validation, if enabled.
        if let Some(schema) = &agent.input_schema {
            if let Err(errors) = validate(schema, &input) {
                return Err(AgentError::InputValidation(errors));
            }
        }

        // Step 2: explicit confirmation gate.
        if agent.require_explicit_confirmation {
            let form = ConfirmationForm {
                agent_id: agent.id.clone(),
                prompt: format!("Run agent `{}` with the given input?", agent.id),
            };
            match self.gate.request_confirmation(form).await {
                ConfirmationOutcome::Affirmed => {}
                ConfirmationOutcome::Rejected => return Err(AgentError::UserRejected),
            }
        }

        let timeout = Duration::from_millis(agent.timeout_ms);
        let run = self.run_attempts(agent, &input);
        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(agent.timeout_ms)),
        }
    }

    /// Steps 3-6: call, parse, validate, repair-prompt retry loop.
    async fn run_attempts(&self, agent: &AgentDefinition, input: &Value) -> Result<AgentResult, AgentError> {
        let mut metrics = AgentMetrics::default();
        let mut repair_errors: Vec<String> = Vec::new();
        let policy = &agent.strict_retry_policy;

        for attempt in 1..=policy.max_attempts {
            metrics.attempts = attempt;
            self.sink.on_tool_start(&agent.id, attempt).await;

            if attempt > 1 {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }

            let prompt = build_prompt(agent, input, &repair_errors);
            let config = LlmProviderConfig::new(&agent.model.provider_key, &agent.model.model);

            let started = std::time::Instant::now();
            let call_result = self
                .switcher
                .execute_with_fallback("func-agent", |provider| {
                    let messages = vec![LlmMessage::system(&agent.description), LlmMessage::user(&prompt)];
                    let config = config.clone();
                    async move { provider.chat(&messages, &config).await }
                })
                .await;
            metrics.latency_ms += started.elapsed().as_millis() as u64;

            let response = match call_result {
                Ok(response) => response,
                Err(error) => {
                    self.sink.on_tool_error(&agent.id, attempt, &error.to_string()).await;
                    if !policy.retries_on(RetryReason::TransientError) || attempt == policy.max_attempts {
                        return Err(AgentError::Provider(error));
                    }
                    warn!(agent_id = %agent.id, attempt, %error, "transient provider failure, retrying");
                    continue;
                }
            };
            metrics.prompt_tokens += response.usage.prompt_tokens;
            metrics.completion_tokens += response.usage.completion_tokens;

            let parsed = match format::parse(agent.output_format, &response.text) {
                Ok(value) => value,
                Err(error) => {
                    self.sink.on_tool_error(&agent.id, attempt, &error.to_string()).await;
                    if agent.mode == AgentMode::Deterministic
                        && policy.retries_on(RetryReason::SchemaError)
                        && attempt < policy.max_attempts
                    {
                        repair_errors = vec![error.to_string()];
                        continue;
                    }
                    return Err(error);
                }
            };

            match check_schema(agent, &parsed) {
                Ok(()) => {
                    self.sink.on_tool_complete(&agent.id, attempt, &parsed).await;
                    info!(agent_id = %agent.id, attempt, "func-agent succeeded");
                    return Ok(AgentResult { output: parsed, metrics });
                }
                Err(errors) if errors.is_empty() => {
                    // Creative/Hybrid mode: schema present but not enforced
                    // for this violation kind (advisory only).
                    self.sink.on_tool_complete(&agent.id, attempt, &parsed).await;
                    return Ok(AgentResult { output: parsed, metrics });
                }
                Err(errors) => {
                    let detail = errors
                        .iter()
                        .map(|e| format!("{}: {}", e.path, e.message))
                        .collect::<Vec<_>>();
                    self.sink
                        .on_tool_error(&agent.id, attempt, &detail.join("; "))
                        .await;

                    if agent.mode != AgentMode::Deterministic
                        || !policy.retries_on(RetryReason::SchemaError)
                        || attempt == policy.max_attempts
                    {
                        return Err(AgentError::SchemaViolation(errors));
                    }
                    repair_errors = detail;
                }
            }
        }

        Err(AgentError::SchemaViolation(
            repair_errors
                .into_iter()
                .map(|m| archflow_schemas::ValidationError::new("", m))
                .collect(),
        ))
    }
}

/// Validate `parsed` against the agent's output schema per its mode.
/// `Creative` skips validation entirely (advisory only: `Ok(())`... modeled
/// as an empty-error `Err` so the caller's "no schema enforcement" and
/// "validated clean" paths both read as success without collapsing the
/// two cases the caller logs differently).
fn check_schema(
    agent: &AgentDefinition,
    parsed: &Value,
) -> Result<(), Vec<archflow_schemas::ValidationError>> {
    let schema = match &agent.output_schema {
        Some(schema) => schema,
        None => return Ok(()),
    };

    match agent.mode {
        AgentMode::Creative => Err(Vec::new()),
        AgentMode::Deterministic => validate(schema, parsed),
        AgentMode::Hybrid => validate(&structure_only(schema), parsed),
    }
}

/// A copy of `schema` with every constraint stripped, for `Hybrid` mode:
/// field names/types are enforced, constraint checks (enum/pattern/range)
/// are not.
fn structure_only(schema: &Schema) -> Schema {
    let mut out = Schema::new();
    out.strict = schema.strict;
    for (name, field) in &schema.fields {
        let mut field = field.clone();
        field.constraints.clear();
        if let Some(nested) = &field.nested {
            field.nested = Some(structure_only(nested));
        }
        out.fields.insert(name.clone(), field);
    }
    out
}

/// Assemble the prompt from the agent's description, declared output
/// format, serialized output schema, and (on a repair retry) the
/// accumulated validation errors from the previous attempt.
fn build_prompt(agent: &AgentDefinition, input: &Value, repair_errors: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&agent.description);
    prompt.push_str("\n\nInput:\n");
    prompt.push_str(&serde_json::to_string_pretty(input).unwrap_or_default());
    prompt.push_str(&format!("\n\nRespond in {} format.", format_name(agent.output_format)));

    if let Some(schema) = &agent.output_schema {
        prompt.push_str("\n\nThe response must conform to this schema:\n");
        prompt.push_str(&serde_json::to_string_pretty(schema).unwrap_or_default());
    }

    if !repair_errors.is_empty() {
        prompt.push_str("\n\nThe previous attempt was rejected for these reasons - fix them:\n");
        for error in repair_errors {
            prompt.push_str("- ");
            prompt.push_str(error);
            prompt.push('\n');
        }
    }

    prompt
}

fn format_name(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => "JSON",
        OutputFormat::Csv => "CSV",
        OutputFormat::Xml => "XML",
        OutputFormat::Plain => "plain text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_providers::{
        LlmProvider, LlmResponse, LlmResponseStream, Operation, ProviderRegistry, Strategy, Usage,
    };
    use archflow_schemas::{Field, FieldType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }
        fn supports(&self, _operation: Operation) -> bool {
            true
        }
        async fn chat(
            &self,
            _messages: &[LlmMessage],
            _config: &LlmProviderConfig,
        ) -> Result<LlmResponse, ArchflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.responses.lock().unwrap().remove(0);
            Ok(LlmResponse {
                text: text.to_string(),
                usage: Usage { prompt_tokens: 10, completion_tokens: 5 },
            })
        }
        async fn chat_stream(
            &self,
            _messages: &[LlmMessage],
            _config: &LlmProviderConfig,
        ) -> Result<LlmResponseStream, ArchflowError> {
            unimplemented!()
        }
    }

    async fn switcher_for(responses: Vec<&'static str>) -> Arc<ProviderSwitcher> {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(ScriptedProvider {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }))
            .await;
        Arc::new(ProviderSwitcher::new(
            "agent-switcher",
            registry,
            "scripted",
            vec![],
            Strategy::PrimaryOnly,
        ))
    }

    fn invoice_schema() -> Schema {
        Schema::new()
            .with_field("customer_id", Field::new(FieldType::String).required())
            .with_field("total", Field::new(FieldType::Number).required())
    }

    #[tokio::test]
    async fn deterministic_json_extraction_retries_then_succeeds() {
        let switcher = switcher_for(vec![
            r#"{"customer_id":"C1","total":"x"}"#,
            r#"{"customer_id":"C1","total":42}"#,
        ])
        .await;
        let executor = AgentExecutor::new(switcher);

        let agent = AgentDefinition::new(
            "extract-invoice",
            "extracts invoice fields",
            crate::config::AgentModelRef { provider_key: "scripted".into(), model: "m1".into() },
        )
        .output_schema(invoice_schema());

        let result = executor.execute(&agent, serde_json::json!({"text": "..."})).await.unwrap();
        assert_eq!(result.metrics.attempts, 2);
        assert_eq!(result.output["customer_id"], "C1");
        assert_eq!(result.output["total"], 42);
    }

    #[tokio::test]
    async fn max_attempts_one_returns_first_failure() {
        let switcher = switcher_for(vec![r#"{"customer_id":"C1","total":"x"}"#]).await;
        let executor = AgentExecutor::new(switcher);

        let agent = AgentDefinition::new(
            "extract-invoice",
            "extracts invoice fields",
            crate::config::AgentModelRef { provider_key: "scripted".into(), model: "m1".into() },
        )
        .output_schema(invoice_schema())
        .strict_retry_policy(crate::config::StrictRetryPolicy {
            max_attempts: 1,
            ..crate::config::StrictRetryPolicy::default()
        });

        let err = executor.execute(&agent, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn creative_mode_skips_schema_enforcement() {
        let switcher = switcher_for(vec![r#"{"customer_id":"C1","total":"not-a-number"}"#]).await;
        let executor = AgentExecutor::new(switcher);

        let agent = AgentDefinition::new(
            "extract-invoice",
            "extracts invoice fields",
            crate::config::AgentModelRef { provider_key: "scripted".into(), model: "m1".into() },
        )
        .mode(AgentMode::Creative)
        .output_schema(invoice_schema());

        let result = executor.execute(&agent, serde_json::json!({})).await.unwrap();
        assert_eq!(result.output["total"], "not-a-number");
    }

    #[tokio::test]
    async fn confirmation_rejection_aborts_before_any_call() {
        let switcher = switcher_for(vec!["unused"]).await;
        let executor = AgentExecutor::new(switcher).with_gate(Arc::new(crate::gate::AutoRejectGate));

        let agent = AgentDefinition::new(
            "needs-confirmation",
            "does something consequential",
            crate::config::AgentModelRef { provider_key: "scripted".into(), model: "m1".into() },
        )
        .require_explicit_confirmation(true);

        let err = executor.execute(&agent, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::UserRejected));
    }
}
