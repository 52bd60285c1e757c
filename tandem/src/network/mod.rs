//! The network router: an agent whose tools include other agents.
//!
//! A [`Network`] reuses the loop wholesale; what changes is dispatch. Tool
//! calls named `agent_<name>` resolve to registered sub-agents: the router
//! derives a child task from the LLM's arguments (inheriting the parent's
//! attachments and metadata), invokes the sub-agent, forwards its stream to
//! the parent channel, and merges returned attachments into the dispatch
//! result. When the router's own final text is empty, the loop falls back
//! to the last sub-agent output.
//!
//! A sub-agent that ignores cancellation cannot leak: the forwarder drains
//! its channel with a timeout and closes it through the once-only guard,
//! unblocking the sub-agent's next send.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentBuilder, DispatchResult, LoopAgent};
use crate::error::Result;
use crate::event::{EventKind, EventSender, StreamEvent};
use crate::result::AgentResult;
use crate::task::AgentTask;
use crate::usage::Usage;

/// Prefix marking a tool call as a sub-agent delegation.
pub const AGENT_TOOL_PREFIX: &str = "agent_";

/// How long the forwarder keeps draining a cancelled sub-agent's stream.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Buffer size of the forwarding channel.
const FORWARD_BUFFER: usize = 64;

/// An agent that routes work to sub-agents.
///
/// Thin wrapper over [`LoopAgent`]: construction injects the delegation
/// tool set; execution is the plain loop.
#[derive(Debug, Clone)]
pub struct Network {
    agent: LoopAgent,
}

impl Network {
    /// Create a builder for a network with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> NetworkBuilder {
        NetworkBuilder {
            inner: AgentBuilder::new(name),
            sub_agent_names: Vec::new(),
        }
    }
}

#[async_trait]
impl Agent for Network {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    async fn execute(&self, task: AgentTask) -> Result<AgentResult> {
        self.agent.execute(task).await
    }

    async fn execute_stream(&self, task: AgentTask, events: EventSender) -> Result<AgentResult> {
        self.agent.execute_stream(task, events).await
    }
}

/// Builder for [`Network`].
///
/// Accepts everything [`AgentBuilder`] accepts, plus sub-agents. When no
/// system prompt is set, a routing prompt listing the sub-agents is
/// generated.
#[derive(Debug)]
pub struct NetworkBuilder {
    inner: AgentBuilder,
    sub_agent_names: Vec<(String, String)>,
}

impl NetworkBuilder {
    /// Set the LLM provider used for routing. Required.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn crate::chat::Provider>) -> Self {
        self.inner = self.inner.provider(provider);
        self
    }

    /// Register a sub-agent.
    #[must_use]
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agent_names
            .push((agent.name().to_owned(), agent.description().to_owned()));
        self.inner = self.inner.sub_agent(agent);
        self
    }

    /// Register an ordinary tool alongside the sub-agents.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn crate::tool::Tool>) -> Self {
        self.inner = self.inner.tool(tool);
        self
    }

    /// Override the generated routing prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner = self.inner.system_prompt(prompt);
        self
    }

    /// Apply any other loop option through the underlying builder.
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(AgentBuilder) -> AgentBuilder) -> Self {
        self.inner = f(self.inner);
        self
    }

    /// Build the network.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] when no provider is set.
    pub fn build(mut self) -> Result<Network> {
        if !self.sub_agent_names.is_empty() {
            let mut prompt = String::from(
                "You coordinate a team of agents. Delegate work with the agent_* tools:\n",
            );
            for (name, description) in &self.sub_agent_names {
                prompt.push_str(&format!("- {AGENT_TOOL_PREFIX}{name}: {description}\n"));
            }
            prompt.push_str("Combine their results into a final answer.");
            self.inner = self.inner.default_system_prompt(prompt);
        }
        Ok(Network {
            agent: self.inner.build()?,
        })
    }
}

/// Dispatch one sub-agent delegation.
///
/// Derives the child task from the LLM's `task` argument, runs the
/// sub-agent (streaming when the parent streams, with its events forwarded
/// minus `InputReceived`, which the router already emitted), and converts
/// the outcome into a [`DispatchResult`] carrying the sub-agent's usage and
/// attachments. Panics and errors become error results, never loop
/// failures.
pub(crate) async fn delegate(
    tool_name: &str,
    sub: Arc<dyn Agent>,
    parent_task: &AgentTask,
    args: &Value,
    events: &EventSender,
) -> DispatchResult {
    let started = Instant::now();
    let task_text = args
        .get("task")
        .and_then(Value::as_str)
        .unwrap_or(&parent_task.task);
    let child_task = parent_task.child(task_text);

    events
        .send(StreamEvent::agent_start(sub.name()))
        .await;

    let outcome = if events.is_enabled() {
        delegate_streaming(Arc::clone(&sub), child_task, events).await
    } else {
        // Plain invocation still recovers panics at the boundary.
        match AssertUnwindSafe(sub.execute(child_task)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(crate::error::Error::internal(format!(
                "sub-agent '{tool_name}' panicked"
            ))),
        }
    };

    let elapsed = started.elapsed();
    match outcome {
        Ok(result) => {
            events
                .send(StreamEvent::agent_finish(sub.name(), result.usage, elapsed))
                .await;
            DispatchResult {
                content: result.output,
                usage: result.usage,
                attachments: result.attachments,
                is_error: false,
                duration: elapsed,
            }
        }
        Err(e) => {
            // Bill whatever the sub-agent spent before failing.
            let usage = e.partial().map_or(Usage::zero(), |p| p.usage);
            warn!(sub_agent = %sub.name(), error = %e, "delegation failed");
            events
                .send(StreamEvent::agent_finish(sub.name(), usage, elapsed))
                .await;
            let mut result = DispatchResult::error(format!("sub-agent failed: {e}"));
            result.usage = usage;
            result.duration = elapsed;
            result
        }
    }
}

/// Run a sub-agent with its events forwarded to the parent channel.
async fn delegate_streaming(
    sub: Arc<dyn Agent>,
    child_task: AgentTask,
    events: &EventSender,
) -> Result<AgentResult> {
    let (tx, mut rx) = mpsc::channel(FORWARD_BUFFER);
    let cancel = events.cancellation();
    let child_events = EventSender::new(tx, cancel.child_token());
    let guard = child_events.clone();

    let handle = tokio::spawn({
        let child_events = child_events.clone();
        async move { sub.execute_stream(child_task, child_events).await }
    });

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    // The router already announced the task entering.
                    if event.kind != EventKind::InputReceived {
                        events.send(event).await;
                    }
                }
                None => break,
            },
            () = cancel.cancelled() => {
                // Drain with a timeout so a sub-agent that ignores
                // cancellation cannot block us forever, then close the
                // channel through the once-only guard to unblock its next
                // send.
                loop {
                    match timeout(DRAIN_TIMEOUT, rx.recv()).await {
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(_) => {
                            debug!("sub-agent drain timed out; closing its channel");
                            break;
                        }
                    }
                }
                guard.close();
                break;
            }
        }
    }

    match handle.await {
        Ok(result) => result,
        Err(join) if join.is_panic() => Err(crate::error::Error::internal(
            "sub-agent panicked during streaming execution",
        )),
        Err(_) => Err(crate::error::Error::Cancelled),
    }
}
