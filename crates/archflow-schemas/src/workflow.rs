//! Workflow definition types (spec.md §3, §6 wire format)

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::ArchflowError;
use crate::ids::{LocalStepId, WorkflowId};

/// Retry policy shared by the Workflow default and per-Step overrides.
///
/// Mirrors the shape of `everruns-durable::RetryPolicy` (builder-style,
/// exponential backoff with a multiplicative coefficient) but names fields
/// per spec.md §4.8 (`maxAttempts`, `initialDelay`, `backoffMultiplier`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    /// Error kinds this policy applies to; empty means "retryable kinds only"
    /// (spec.md §7: TransportError, Timeout, ProviderError by default).
    #[serde(default)]
    pub retry_on: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            retry_on: vec![],
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            retry_on: vec![],
        }
    }

    /// Delay before attempt N (1-indexed): `initial_delay * backoff_multiplier^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor)
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Timeout override, in milliseconds on the wire.
pub type TimeoutMs = u64;

/// Which LLM provider a workflow (or step) should use by default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmProviderRef {
    pub provider: String,
    pub model: String,
}

/// Workflow-wide configuration (spec.md §3 Workflow.configuration).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfiguration {
    pub default_timeout_ms: TimeoutMs,
    pub default_retry_policy: RetryPolicy,
    pub default_provider: Option<LlmProviderRef>,
}

impl Default for WorkflowConfiguration {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            default_retry_policy: RetryPolicy::default(),
            default_provider: None,
        }
    }
}

/// The kind of a Step and its kind-specific parameters.
///
/// A sum type (per spec.md §9 re-architecture guidance) replacing a deep
/// class hierarchy of step/tool/agent types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Materialises invocation input into the execution context.
    Input,
    /// Formats an output template against the context; terminates the branch.
    Output { template: String },
    /// Calls an LLM provider directly.
    Llm {
        operation: String,
        provider: Option<LlmProviderRef>,
        /// Parameter bindings, e.g. `{"prompt": "${input.question}"}`.
        parameters: HashMap<String, String>,
    },
    /// Runs a schema-validated deterministic agent (Func-Agent, C7).
    DeterministicAgent {
        agent_id: String,
        parameters: HashMap<String, String>,
    },
    /// Invokes a registered tool (in-process, MCP, or workflow-as-tool).
    Tool {
        tool_name: String,
        parameters: HashMap<String, String>,
    },
    /// Evaluates a boolean expression; routes along matching edges.
    Condition { expression: String },
    /// Evaluates all outgoing edge conditions; all that are true run
    /// concurrently. A downstream `Merge` joins their outputs.
    ParallelFanOut,
    /// Joins the outputs of a ParallelFanOut's branches.
    Merge { from: Vec<LocalStepId> },
    /// Iterates an inner sub-graph (by workflow id) over a sequence.
    Loop {
        items_expression: String,
        item_binding: String,
        sub_workflow: WorkflowId,
        /// Bounded concurrency; default 1 (sequential) per spec.md §9 Open Question.
        #[serde(default = "default_loop_parallelism")]
        parallelism: usize,
    },
    /// Suspends the branch pending human input (hands off to the
    /// Conversation Manager, C10).
    SuspendForInput { form_id: String },
}

fn default_loop_parallelism() -> usize {
    1
}

/// A node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: LocalStepId,
    pub kind: StepKind,
    pub retry_override: Option<RetryPolicy>,
    pub timeout_override_ms: Option<TimeoutMs>,
}

impl Step {
    pub fn new(id: impl Into<LocalStepId>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            retry_override: None,
            timeout_override_ms: None,
        }
    }
}

/// A directed edge between two steps, with an optional guard expression.
///
/// `label = Some("error")` marks this as the step's error edge (spec.md §4.8
/// failure propagation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source: LocalStepId,
    pub target: LocalStepId,
    pub condition: Option<String>,
    pub label: Option<String>,
}

impl Edge {
    pub fn unconditional(source: impl Into<LocalStepId>, target: impl Into<LocalStepId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: None,
            label: None,
        }
    }

    pub fn on_error(source: impl Into<LocalStepId>, target: impl Into<LocalStepId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: None,
            label: Some("error".to_string()),
        }
    }

    pub fn is_error_edge(&self) -> bool {
        self.label.as_deref() == Some("error")
    }
}

/// Metadata describing a workflow (author-facing, not behavioral).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// An immutable, registered workflow graph (spec.md §3 Workflow).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: WorkflowId,
    pub metadata: WorkflowMetadata,
    pub entry: LocalStepId,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub configuration: WorkflowConfiguration,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl Workflow {
    pub fn step(&self, id: &LocalStepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Outgoing edges from a step, in declared (stable) order.
    pub fn outgoing(&self, id: &LocalStepId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.source == id).collect()
    }

    /// Validate structural invariants (spec.md §3, §8):
    /// exactly one entry, every edge references a declared step, every step
    /// other than entry is reachable from entry.
    pub fn validate_structure(&self) -> Result<(), ArchflowError> {
        let ids: HashSet<&LocalStepId> = self.steps.iter().map(|s| &s.id).collect();

        if !ids.contains(&self.entry) {
            return Err(ArchflowError::validation(format!(
                "entry step '{}' is not declared",
                self.entry
            )));
        }

        for edge in &self.edges {
            if !ids.contains(&edge.source) {
                return Err(ArchflowError::validation(format!(
                    "edge source '{}' is not a declared step",
                    edge.source
                )));
            }
            if !ids.contains(&edge.target) {
                return Err(ArchflowError::validation(format!(
                    "edge target '{}' is not a declared step",
                    edge.target
                )));
            }
        }

        // BFS reachability from entry.
        let mut reachable: HashSet<&LocalStepId> = HashSet::new();
        let mut queue = vec![&self.entry];
        reachable.insert(&self.entry);
        while let Some(current) = queue.pop() {
            for edge in self.outgoing(current) {
                if reachable.insert(&edge.target) {
                    queue.push(&edge.target);
                }
            }
        }

        for step in &self.steps {
            if !reachable.contains(&step.id) {
                return Err(ArchflowError::validation(format!(
                    "step '{}' is unreachable from entry '{}'",
                    step.id, self.entry
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(steps: Vec<Step>, edges: Vec<Edge>, entry: &str) -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata {
                name: "test".into(),
                ..Default::default()
            },
            entry: entry.into(),
            steps,
            edges,
            configuration: WorkflowConfiguration::default(),
            variables: HashMap::new(),
        }
    }

    #[test]
    fn rejects_dangling_edge_target() {
        let w = wf(
            vec![Step::new("a", StepKind::Input)],
            vec![Edge::unconditional("a", "missing")],
            "a",
        );
        assert!(w.validate_structure().is_err());
    }

    #[test]
    fn rejects_unreachable_step() {
        let w = wf(
            vec![
                Step::new("a", StepKind::Input),
                Step::new("orphan", StepKind::Output { template: "x".into() }),
            ],
            vec![],
            "a",
        );
        assert!(w.validate_structure().is_err());
    }

    #[test]
    fn accepts_valid_linear_graph() {
        let w = wf(
            vec![
                Step::new("a", StepKind::Input),
                Step::new("b", StepKind::Output { template: "${a}".into() }),
            ],
            vec![Edge::unconditional("a", "b")],
            "a",
        );
        assert!(w.validate_structure().is_ok());
    }

    #[test]
    fn retry_policy_backoff_progression() {
        let p = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            retry_on: vec![],
        };
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
    }
}
