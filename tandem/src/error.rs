//! Error types for the tandem framework.
//!
//! A single [`Error`] enum covers every failure mode the core can surface.
//! Two variants are control signals rather than failures: [`Error::Halt`]
//! stops an execution gracefully and [`Error::Suspend`] requests a pause for
//! external input. The loop converts a raw suspend signal into
//! [`Error::Suspended`], which carries the live [`Suspension`] handle.

use serde_json::Value;
use thiserror::Error;

use crate::agent::Suspension;
use crate::result::AgentResult;
use crate::workflow::WorkflowError;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for framework operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the LLM provider.
    #[error("provider error: {message}")]
    Provider {
        /// The underlying error message.
        message: String,
    },

    /// Error during tool execution.
    #[error("tool '{name}' failed: {message}")]
    Tool {
        /// Name of the tool that failed.
        name: String,
        /// The underlying error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration detected at construction time.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// A loop-style workflow step exceeded its iteration cap.
    #[error("maximum iterations exceeded ({iterations})")]
    MaxIterExceeded {
        /// The iteration cap that was hit.
        iterations: usize,
    },

    /// Control signal: a processor requested a graceful stop.
    ///
    /// The loop catches this and returns the response accumulated so far as
    /// a successful result. It only surfaces to callers when returned
    /// outside a processor hook.
    #[error("execution halted by processor")]
    Halt,

    /// Control signal: a processor or step requested suspension.
    ///
    /// Carries the payload intended for the human. The loop converts this
    /// into [`Error::Suspended`] after the budget check; when the budget is
    /// exhausted this signal propagates unchanged.
    #[error("suspension requested")]
    Suspend {
        /// Payload handed to whoever answers the suspension.
        payload: Value,
    },

    /// Execution is paused, awaiting external input.
    ///
    /// Resume through [`Suspension::resume`]; the handle is single-use and
    /// auto-releases after its TTL.
    #[error("execution suspended at '{}'", .0.step())]
    Suspended(Suspension),

    /// Execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// A workflow step failed; unwraps to the underlying step error.
    #[error(transparent)]
    Workflow(Box<WorkflowError>),

    /// An execution failed after making partial progress.
    ///
    /// Wraps the underlying error together with an [`AgentResult`] carrying
    /// the usage and step traces accumulated before the failure, so callers
    /// can bill and audit partial progress.
    #[error(transparent)]
    Execution(Box<ExecutionFailure>),

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal {
        /// The underlying error message.
        message: String,
    },
}

/// An execution failure bundled with the partial result accumulated so far.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ExecutionFailure {
    /// The error that aborted the execution.
    pub source: Box<Error>,
    /// Usage and step traces collected before the failure.
    pub partial: Box<AgentResult>,
}

impl Error {
    /// Create a new provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap `source` together with the partial result accumulated so far.
    #[must_use]
    pub fn with_partial(source: Self, partial: AgentResult) -> Self {
        Self::Execution(Box::new(ExecutionFailure {
            source: Box::new(source),
            partial: Box::new(partial),
        }))
    }

    /// Whether this is the graceful-stop control signal.
    #[must_use]
    pub const fn is_halt(&self) -> bool {
        matches!(self, Self::Halt)
    }

    /// Whether this is a raw suspend signal (not yet converted into a
    /// [`Suspension`]).
    #[must_use]
    pub const fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend { .. })
    }

    /// The partial result attached to this error, if any.
    #[must_use]
    pub fn partial(&self) -> Option<&AgentResult> {
        match self {
            Self::Execution(failure) => Some(&failure.partial),
            _ => None,
        }
    }

    /// The live suspension handle, if this error is a suspension.
    #[must_use]
    pub const fn suspension(&self) -> Option<&Suspension> {
        match self {
            Self::Suspended(suspension) => Some(suspension),
            _ => None,
        }
    }

    /// Strip partial-progress and workflow wrappers, yielding the root error.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Execution(failure) => failure.source.root(),
            Self::Workflow(wrapped) => wrapped.source.root(),
            other => other,
        }
    }
}

impl From<WorkflowError> for Error {
    fn from(err: WorkflowError) -> Self {
        Self::Workflow(Box::new(err))
    }
}
