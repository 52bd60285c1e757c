//! Workflow outcome types.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::error::Error as CoreError;
use crate::usage::Usage;

/// Lifecycle status of a workflow step.
///
/// A finished execution only ever reports `Success`, `Failed`, `Skipped`,
/// or `Suspended`; `Pending` and `Running` are in-flight states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Not yet launched.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Success,
    /// Failed (terminal for this execution).
    Failed,
    /// Did not run; see the skip reason.
    Skipped,
    /// Raised a suspend signal (terminal for this execution).
    Suspended,
}

/// Why a step was skipped. The distinction drives downstream propagation:
/// a condition skip satisfies dependents, a failure skip cascades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The step's `when` guard returned false. Dependents still run.
    Condition,
    /// An upstream step failed, suspended, or was itself failure-skipped.
    /// Dependents are skipped recursively.
    UpstreamFailure,
}

/// The per-step outcome of one workflow execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Final status.
    pub status: StepStatus,
    /// Set when `status == Skipped`.
    pub skip_reason: Option<SkipReason>,
    /// The step's output, when it produced one.
    pub output: Option<String>,
    /// Error description, when it failed.
    pub error: Option<String>,
    /// Wall-clock duration of the step.
    pub duration: Duration,
}

impl StepResult {
    pub(crate) fn success(output: Option<String>, duration: Duration) -> Self {
        Self {
            status: StepStatus::Success,
            skip_reason: None,
            output,
            error: None,
            duration,
        }
    }

    pub(crate) fn failed(error: String, duration: Duration) -> Self {
        Self {
            status: StepStatus::Failed,
            skip_reason: None,
            output: None,
            error: Some(error),
            duration,
        }
    }

    pub(crate) fn skipped(reason: SkipReason) -> Self {
        Self {
            status: StepStatus::Skipped,
            skip_reason: Some(reason),
            output: None,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn suspended(duration: Duration) -> Self {
        Self {
            status: StepStatus::Suspended,
            skip_reason: None,
            output: None,
            error: None,
            duration,
        }
    }

    /// Whether this result satisfies dependents (success, or skipped by
    /// condition).
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        match self.status {
            StepStatus::Success => true,
            StepStatus::Skipped => self.skip_reason == Some(SkipReason::Condition),
            _ => false,
        }
    }
}

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// Every launched step succeeded or was condition-skipped.
    Success,
    /// At least one step failed.
    Failed,
    /// A step raised a suspend signal.
    Suspended,
}

/// Aggregate outcome of one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// Overall status.
    pub status: WorkflowStatus,
    /// Per-step results.
    pub steps: HashMap<String, StepResult>,
    /// Final context values.
    pub context: HashMap<String, Value>,
    /// Usage accumulated across agent steps.
    pub usage: Usage,
}

/// A workflow failure: names the failing step, unwraps to its error, and
/// carries the full result for audit.
#[derive(Debug, Error)]
#[error("workflow step '{step}' failed: {source}")]
pub struct WorkflowError {
    /// Name of the failing step.
    pub step: String,
    /// The underlying step error.
    pub source: Box<CoreError>,
    /// The execution's full result.
    pub result: Box<WorkflowResult>,
}
