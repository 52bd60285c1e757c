//! The workflow engine: explicit step DAGs executed reactively.
//!
//! Where the agent loop lets an LLM decide what happens next, a
//! [`Workflow`] runs a pre-validated graph of [`Step`]s in dependency
//! order with controlled concurrency — deterministic control flow, with
//! agents and tools as step kinds rather than drivers. Workflows implement
//! [`crate::agent::Agent`], so they collapse to the same result shape and
//! nest inside networks or other workflows.
//!
//! ```rust,ignore
//! let workflow = Workflow::builder("etl")
//!     .step(Step::basic("fetch", fetch))
//!     .step(Step::basic("clean", clean).after(["fetch"]))
//!     .step(Step::agent("summarize", agent).after(["clean"]))
//!     .build()?;
//! let result = workflow.execute(AgentTask::new("yesterday's logs")).await?;
//! ```

mod context;
mod graph;
mod result;
mod scheduler;
mod step;

pub use context::{CTX_INPUT, CTX_RESUME, CTX_USAGE, WorkflowContext};
pub use graph::{Workflow, WorkflowBuilder};
pub use result::{
    SkipReason, StepResult, StepStatus, WorkflowError, WorkflowResult, WorkflowStatus,
};
pub use step::{IterItem, RetryPolicy, Step};
