//! Human-input and sandboxed-code contracts.
//!
//! [`InputHandler`] backs the `ask_user` built-in: it blocks until a human
//! answers or the execution is cancelled. [`CodeRunner`] backs
//! `execute_code`: the runner receives a dispatch function so sandboxed code
//! can re-enter the tool registry (recursion into `execute_plan` /
//! `execute_code` is blocked by the wrapper the framework passes).

use async_trait::async_trait;

use crate::agent::DispatchFn;
use crate::error::Result;

/// A question for the human.
#[derive(Debug, Clone, Default)]
pub struct InputRequest {
    /// The question text.
    pub question: String,

    /// Optional fixed choices.
    pub options: Vec<String>,
}

impl InputRequest {
    /// Create a free-form question.
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
        }
    }

    /// Create a question with fixed choices.
    #[must_use]
    pub fn with_options(question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            question: question.into(),
            options,
        }
    }
}

/// Blocks until a human answers or the context cancels.
#[async_trait]
pub trait InputHandler: Send + Sync {
    /// Ask the human and return their answer.
    async fn request_input(&self, request: InputRequest) -> Result<String>;
}

/// A code-execution request from the model.
#[derive(Debug, Clone, Default)]
pub struct CodeRequest {
    /// The code to run.
    pub code: String,

    /// Optional runtime hint (e.g. `python`, `javascript`).
    pub runtime: Option<String>,
}

/// Runs model-authored code in a sandbox.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Run the code. `dispatch` lets the sandbox call back into the tool
    /// registry; the framework passes a wrapped dispatch that rejects
    /// recursive plan/code calls.
    async fn run(&self, request: CodeRequest, dispatch: DispatchFn) -> Result<String>;
}
