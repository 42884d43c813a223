//! Execution and StepResult types (spec.md §3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ArchflowError;
use crate::ids::{ExecutionId, LocalStepId, WorkflowId};

/// Execution lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

/// Per-step result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    Paused,
    Timeout,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running | StepStatus::Paused)
    }
}

/// A single error observed while executing a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    pub kind: String,
    pub message: String,
    pub attempt: u32,
}

/// Per-step metrics (spec.md §3 StepResult).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StepMetrics {
    pub execution_time_ms: u64,
    pub retry_count: u32,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// The outcome of executing a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub metrics: StepMetrics,
    #[serde(default)]
    pub errors: Vec<StepError>,
}

impl StepResult {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            output: None,
            metrics: StepMetrics::default(),
            errors: vec![],
        }
    }

    pub fn completed(output: serde_json::Value, metrics: StepMetrics) -> Self {
        Self {
            status: StepStatus::Completed,
            output: Some(output),
            metrics,
            errors: vec![],
        }
    }

    pub fn failed(errors: Vec<StepError>, metrics: StepMetrics) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            metrics,
            errors,
        }
    }
}

/// Aggregated metrics across the whole Execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionMetrics {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_tokens: u64,
    pub total_retries: u32,
}

/// A single invocation of a Workflow (spec.md §3 Execution).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub step_results: HashMap<LocalStepId, StepResult>,
    /// The set of steps currently active (dispatched but not yet terminal).
    pub frontier: HashSet<LocalStepId>,
    pub metrics: ExecutionMetrics,
    pub terminal_error: Option<ArchflowError>,
}

impl Execution {
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: ExecutionStatus::Initialized,
            step_results: HashMap::new(),
            frontier: HashSet::new(),
            metrics: ExecutionMetrics::default(),
            terminal_error: None,
        }
    }

    /// A step's output, once completed, is memoised and must not be
    /// recomputed (spec.md §4.8 idempotence).
    pub fn completed_output(&self, step: &LocalStepId) -> Option<&serde_json::Value> {
        self.step_results
            .get(step)
            .filter(|r| r.status == StepStatus::Completed)
            .and_then(|r| r.output.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_execution_starts_initialized() {
        let e = Execution::new(WorkflowId::new());
        assert_eq!(e.status, ExecutionStatus::Initialized);
        assert!(e.step_results.is_empty());
    }

    #[test]
    fn memoised_output_only_for_completed_steps() {
        let mut e = Execution::new(WorkflowId::new());
        let step: LocalStepId = "a".into();
        e.step_results.insert(
            step.clone(),
            StepResult::completed(serde_json::json!({"x": 1}), StepMetrics::default()),
        );
        assert!(e.completed_output(&step).is_some());

        let step2: LocalStepId = "b".into();
        e.step_results.insert(step2.clone(), StepResult::pending());
        assert!(e.completed_output(&step2).is_none());
    }
}
