#![cfg_attr(docsrs, feature(doc_cfg))]
//! Tandem is an AI agent orchestration core: the primitives an application
//! uses to drive an LLM through multi-turn tool use, coordinate delegated
//! sub-agents, and execute declared step graphs deterministically — while
//! streaming incremental events, surviving cooperative pauses for external
//! input, and bounding resource consumption.
//!
//! # The three agents
//!
//! Everything implements one trait, [`Agent`], so the pieces nest freely:
//!
//! - [`LoopAgent`] — the iterative controller: LLM call, parallel tool
//!   dispatch, repeat. Processor hooks around every call, context
//!   compression past a size threshold, suspend/resume, event streaming.
//! - [`Network`] — a loop whose tools include other agents. Tool calls
//!   named `agent_<name>` delegate, with stream forwarding and attachment
//!   propagation.
//! - [`Workflow`] — a validated DAG of [`Step`]s executed reactively:
//!   fan-out by dependency order, retry with back-off, conditional skips,
//!   failure cascades, per-step tracing.
//!
//! The conversation memory layer ([`memory`]) runs on the loop's
//! boundaries: history load and recall before the first LLM call,
//! backpressured background persistence and fact extraction after the
//! turn.
//!
//! # External collaborators
//!
//! The core owns no I/O. Callers implement (or import) the narrow
//! contracts: [`Provider`] for LLM backends, [`EmbeddingProvider`],
//! [`Store`] / [`MemoryStore`] for persistence, [`Tool`] for capabilities,
//! [`Processor`] for hooks, [`InputHandler`] for humans in the loop,
//! [`CodeRunner`] for sandboxes, and [`Tracer`] for span export.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem::{Agent, AgentTask, LoopAgent};
//!
//! let agent = LoopAgent::builder("assistant")
//!     .provider(provider)
//!     .system_prompt("You are terse.")
//!     .tool(search)
//!     .build()?;
//!
//! let result = agent.execute(AgentTask::new("what changed yesterday?")).await?;
//! println!("{}", result.output);
//! ```
//!
//! Suspension surfaces as an error carrying a single-use handle:
//!
//! ```rust,ignore
//! match agent.execute(task).await {
//!     Ok(result) => println!("{}", result.output),
//!     Err(tandem::Error::Suspended(suspension)) => {
//!         let answer = ask_human(suspension.payload()).await;
//!         let result = suspension.resume(answer).await?;
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

pub mod agent;
pub mod chat;
pub mod embedding;
pub mod error;
pub mod event;
pub mod input;
pub mod memory;
pub mod message;
pub mod network;
pub mod processor;
pub mod result;
pub mod sse;
pub mod task;
pub mod tool;
pub mod trace;
pub mod usage;
pub mod workflow;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, DispatchFn, DispatchResult, LoopAgent, Suspension,
    TOOL_ASK_USER, TOOL_EXECUTE_CODE, TOOL_EXECUTE_PLAN,
};
pub use chat::{ChatRequest, ChatResponse, GenParams, MockProvider, Provider};
pub use embedding::{EmbeddingProvider, MockEmbedder};
pub use error::{Error, ExecutionFailure, Result};
pub use event::{CancellationToken, EventKind, EventSender, StreamEvent};
pub use input::{CodeRequest, CodeRunner, InputHandler, InputRequest};
pub use memory::{
    Fact, InMemoryMemoryStore, InMemoryStore, MemoryConfig, MemoryLayer, MemoryStore,
    ScoredFact, ScoredMessage, Store, StoredMessage, ThreadRecord,
};
pub use message::{ChatMessage, Role, ToolCall, ToolResult};
pub use network::{AGENT_TOOL_PREFIX, Network, NetworkBuilder};
pub use processor::{Processor, halt, suspend};
pub use result::{AgentResult, StepKind, StepTrace};
pub use sse::{format_event, stream_sse};
pub use task::{AgentTask, Attachment, META_CHAT_ID, META_THREAD_ID, META_USER_ID};
pub use tool::{StreamingTool, Tool, ToolDefinition, ToolOutput, Toolbox};
pub use trace::{NoopTracer, Span, Tracer};
pub use usage::Usage;
pub use workflow::{
    IterItem, RetryPolicy, SkipReason, Step, StepResult, StepStatus, Workflow, WorkflowBuilder,
    WorkflowContext, WorkflowError, WorkflowResult, WorkflowStatus,
};
