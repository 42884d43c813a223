//! Func-Agent configuration (spec.md §4.7).
//!
//! Field names and the builder shape follow
//! `everruns-core::runtime_agent::{RuntimeAgent, RuntimeAgentBuilder}`,
//! generalized from "system prompt + tools + sampling params" to the
//! deterministic-execution knobs this executor needs.

use std::time::Duration;

use archflow_schemas::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Schema violations trigger the strict retry loop with repair prompts.
    Deterministic,
    /// The output schema is advisory only; no retry on violation.
    Creative,
    /// Field names/types are enforced; constraint checks (enum/pattern/range)
    /// are not.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Xml,
    Plain,
}

/// Which failure kinds the strict retry loop treats as retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    SchemaError,
    TransientError,
}

/// Retry policy for the Func-Agent's attempt loop (spec.md §4.7
/// `strictRetryPolicy`). A distinct type from
/// `archflow_schemas::RetryPolicy`: that one names workflow-step retry over
/// `ArchflowError` kinds, this one additionally reacts to schema-validation
/// failure, which only the agent executor observes.
#[derive(Debug, Clone)]
pub struct StrictRetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub retry_on: Vec<RetryReason>,
}

impl Default for StrictRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            retry_on: vec![RetryReason::SchemaError, RetryReason::TransientError],
        }
    }
}

impl StrictRetryPolicy {
    /// Delay before attempt N (1-indexed): `initial_delay * backoff_multiplier^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor)
    }

    pub fn retries_on(&self, reason: RetryReason) -> bool {
        self.retry_on.contains(&reason)
    }
}

/// Which LLM provider/model the agent should call through the switcher.
#[derive(Debug, Clone)]
pub struct AgentModelRef {
    pub provider_key: String,
    pub model: String,
}

/// A Func-Agent's full configuration.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub description: String,
    pub model: AgentModelRef,
    pub mode: AgentMode,
    pub output_format: OutputFormat,
    pub output_schema: Option<Schema>,
    pub input_schema: Option<Schema>,
    pub strict_retry_policy: StrictRetryPolicy,
    pub timeout_ms: u64,
    pub require_explicit_confirmation: bool,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, description: impl Into<String>, model: AgentModelRef) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            model,
            mode: AgentMode::Deterministic,
            output_format: OutputFormat::Json,
            output_schema: None,
            input_schema: None,
            strict_retry_policy: StrictRetryPolicy::default(),
            timeout_ms: 30_000,
            require_explicit_confirmation: false,
        }
    }

    pub fn mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn strict_retry_policy(mut self, policy: StrictRetryPolicy) -> Self {
        self.strict_retry_policy = policy;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn require_explicit_confirmation(mut self, required: bool) -> Self {
        self.require_explicit_confirmation = required;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_retry_delay_grows_exponentially() {
        let policy = StrictRetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn builder_sets_every_field() {
        let agent = AgentDefinition::new(
            "agent-1",
            "extracts an invoice number",
            AgentModelRef { provider_key: "openai".into(), model: "gpt-5.2".into() },
        )
        .mode(AgentMode::Hybrid)
        .output_format(OutputFormat::Csv)
        .timeout_ms(5_000)
        .require_explicit_confirmation(true);

        assert_eq!(agent.mode, AgentMode::Hybrid);
        assert_eq!(agent.output_format, OutputFormat::Csv);
        assert_eq!(agent.timeout_ms, 5_000);
        assert!(agent.require_explicit_confirmation);
    }
}
