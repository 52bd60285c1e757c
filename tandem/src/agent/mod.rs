//! The agent abstraction and the iterative LLM loop.
//!
//! An [`Agent`] is a composable work unit: it takes an [`AgentTask`] and
//! returns an [`AgentResult`]. Three implementations ship with the crate —
//! the tool-loop [`LoopAgent`], the sub-agent router
//! [`crate::network::Network`], and the DAG [`crate::workflow::Workflow`] —
//! and they nest freely: a workflow step can delegate to a network whose
//! sub-agents are loops.

mod builder;
mod builtins;
mod compress;
mod config;
mod dispatch;
mod runner;
mod suspend;

pub use builder::AgentBuilder;
pub use builtins::{TOOL_ASK_USER, TOOL_EXECUTE_CODE, TOOL_EXECUTE_PLAN};
pub use config::AgentConfig;
pub use dispatch::{DispatchFn, DispatchResult};
pub use runner::LoopAgent;
pub use suspend::Suspension;

pub(crate) use suspend::{ResumeFn, SuspendBudget};

use async_trait::async_trait;

use crate::error::Result;
use crate::event::EventSender;
use crate::result::AgentResult;
use crate::task::AgentTask;

/// A composable work unit: takes a task, returns a result.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's name. Used as the suspension step name, in delegation
    /// tool names (`agent_<name>`), and in logs.
    fn name(&self) -> &str;

    /// What this agent does; shown to routing models as the delegation
    /// tool description.
    fn description(&self) -> &str {
        ""
    }

    /// Execute the task to completion.
    async fn execute(&self, task: AgentTask) -> Result<AgentResult>;

    /// Execute the task, emitting [`crate::event::StreamEvent`]s on the way.
    ///
    /// The default implementation runs [`Agent::execute`] and closes the
    /// channel, so non-streaming agents compose into streaming parents;
    /// they just produce no incremental events.
    async fn execute_stream(&self, task: AgentTask, events: EventSender) -> Result<AgentResult> {
        let result = self.execute(task).await;
        events.close();
        result
    }
}
