//! The agent execution loop.
//!
//! [`LoopAgent`] drives a provider through an iterative tool-use
//! conversation:
//!
//! 1. Build messages from the system prompt, memory, and the task.
//! 2. Call the LLM (running pre/post processor hooks around it).
//! 3. If the response carries tool calls, dispatch them in parallel and
//!    append the results in input order; otherwise finish.
//! 4. Repeat until a final response, a halt, a suspension, or the
//!    iteration cap — which forces one last synthesis call.
//!
//! All mutable per-execution state lives in `RunState`; the agent itself
//! is immutable and shared, so concurrent executions are safe.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::agent::builtins::{self, TOOL_ASK_USER, TOOL_EXECUTE_CODE, TOOL_EXECUTE_PLAN};
use crate::agent::compress;
use crate::agent::config::AgentConfig;
use crate::agent::dispatch::{DispatchFn, DispatchResult, dispatch_all};
use crate::agent::suspend::{ResumeFn, SuspendBudget, Suspension, estimate_snapshot_bytes};
use crate::agent::{Agent, AgentBuilder};
use crate::chat::{ChatRequest, ChatResponse, Provider};
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSender, StreamEvent};
use crate::input::{CodeRequest, CodeRunner, InputHandler};
use crate::memory::MemoryLayer;
use crate::message::{ChatMessage, ToolResult, snapshot_messages};
use crate::network;
use crate::processor::Processor;
use crate::result::{AgentResult, StepKind, StepTrace, truncate_chars};
use crate::task::{AgentTask, Attachment};
use crate::tool::{Tool, ToolDefinition, Toolbox};
use crate::trace::{self, Tracer, op};
use crate::usage::Usage;

/// Instruction appended when the iteration cap forces a final answer.
const SYNTHESIS_INSTRUCTION: &str =
    "Provide your final answer now, based on the tool results above. Do not request more tools.";

/// Dynamic system-prompt resolver.
pub(crate) type PromptFn = Arc<dyn Fn(&AgentTask) -> String + Send + Sync>;

/// Dynamic provider resolver. `None` falls back to the configured provider.
pub(crate) type ProviderFn = Arc<dyn Fn(&AgentTask) -> Option<Arc<dyn Provider>> + Send + Sync>;

/// Dynamic tool-set resolver. The returned tools *replace* the
/// construction-time set for that execution.
pub(crate) type ToolsFn = Arc<dyn Fn(&AgentTask) -> Vec<Arc<dyn Tool>> + Send + Sync>;

/// The iterative tool-loop agent.
///
/// Construct with [`LoopAgent::builder`]. Cheap to clone; clones share the
/// same configuration and suspension budget.
#[derive(Clone)]
pub struct LoopAgent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for LoopAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopAgent")
            .field("name", &self.inner.config.name)
            .field("tools", &self.inner.toolbox.definitions().len())
            .field("sub_agents", &self.inner.sub_agents.len())
            .finish_non_exhaustive()
    }
}

impl LoopAgent {
    /// Create a builder for an agent with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub(crate) fn from_inner(inner: AgentInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The agent's configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }
}

#[async_trait]
impl Agent for LoopAgent {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn description(&self) -> &str {
        &self.inner.config.description
    }

    async fn execute(&self, task: AgentTask) -> Result<AgentResult> {
        self.inner.run(task, EventSender::disabled()).await
    }

    async fn execute_stream(&self, task: AgentTask, events: EventSender) -> Result<AgentResult> {
        self.inner.run(task, events).await
    }
}

/// Everything a [`LoopAgent`] is built from. Immutable after construction.
pub(crate) struct AgentInner {
    pub(crate) config: AgentConfig,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) compress_provider: Option<Arc<dyn Provider>>,
    pub(crate) toolbox: Arc<Toolbox>,
    pub(crate) processors: Vec<Arc<dyn Processor>>,
    pub(crate) memory: MemoryLayer,
    /// Sub-agents keyed by delegation tool name (`agent_<name>`).
    pub(crate) sub_agents: Vec<(String, Arc<dyn Agent>)>,
    pub(crate) input_handler: Option<Arc<dyn InputHandler>>,
    pub(crate) code_runner: Option<Arc<dyn CodeRunner>>,
    pub(crate) prompt_fn: Option<PromptFn>,
    pub(crate) provider_fn: Option<ProviderFn>,
    pub(crate) tools_fn: Option<ToolsFn>,
    pub(crate) tracer: Option<Arc<dyn Tracer>>,
    pub(crate) budget: Arc<SuspendBudget>,
}

/// Per-execution environment resolved once at entry (dynamic prompt,
/// provider, and tool resolution happen here, not per iteration).
#[derive(Clone)]
struct ExecEnv {
    provider: Arc<dyn Provider>,
    toolbox: Arc<Toolbox>,
    definitions: Vec<ToolDefinition>,
    system_prompt: String,
}

/// Usage and traces carried into a resumed execution.
#[derive(Default, Clone)]
struct RunSeed {
    usage: Usage,
    steps: Vec<StepTrace>,
}

/// Mutable state accumulated during one execution.
struct RunState {
    messages: Vec<ChatMessage>,
    usage: Usage,
    steps: Vec<StepTrace>,
    attachments: Vec<Attachment>,
    attachment_bytes: usize,
    /// Output of the most recent successful sub-agent delegation; used when
    /// the final LLM response is empty.
    last_agent_output: Option<String>,
    /// Whether a sub-agent already streamed text to the consumer.
    subagent_streamed: bool,
}

impl RunState {
    fn new(messages: Vec<ChatMessage>, seed: RunSeed) -> Self {
        Self {
            messages,
            usage: seed.usage,
            steps: seed.steps,
            attachments: Vec::new(),
            attachment_bytes: 0,
            last_agent_output: None,
            subagent_streamed: false,
        }
    }

    /// Clone the billing-relevant state for an error path.
    fn partial(&self) -> AgentResult {
        AgentResult {
            output: String::new(),
            attachments: self.attachments.clone(),
            usage: self.usage,
            steps: self.steps.clone(),
        }
    }

    fn into_result(self, output: String) -> AgentResult {
        AgentResult {
            output,
            attachments: self.attachments,
            usage: self.usage,
            steps: self.steps,
        }
    }

    /// Accumulate attachments under both the count and byte caps; excess is
    /// silently dropped at the boundary.
    fn add_attachments(&mut self, incoming: Vec<Attachment>, max_count: usize, max_bytes: usize) {
        for attachment in incoming {
            if self.attachments.len() >= max_count
                || self.attachment_bytes + attachment.len() > max_bytes
            {
                return;
            }
            self.attachment_bytes += attachment.len();
            self.attachments.push(attachment);
        }
    }
}

/// The per-execution dispatch function: routes a call to a built-in, a
/// registered tool, or a sub-agent delegation.
pub(crate) struct ExecDispatcher {
    inner: Arc<AgentInner>,
    provider_toolbox: Arc<Toolbox>,
    task: AgentTask,
    events: EventSender,
}

impl ExecDispatcher {
    /// Expose the dispatcher as a [`DispatchFn`].
    fn as_fn(self: &Arc<Self>) -> DispatchFn {
        let this = Arc::clone(self);
        Arc::new(move |call| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.dispatch(call).await })
        })
    }

    async fn dispatch(self: Arc<Self>, call: crate::message::ToolCall) -> DispatchResult {
        if call.name == TOOL_ASK_USER {
            if let Some(handler) = &self.inner.input_handler {
                return builtins::run_ask_user(handler.as_ref(), &call.arguments).await;
            }
        }
        if call.name == TOOL_EXECUTE_PLAN && self.inner.config.plan_execution {
            return builtins::run_plan(
                &call.arguments,
                Self::as_fn(&self),
                self.inner.config.max_parallel_tools,
                &self.events.cancellation(),
            )
            .await;
        }
        if call.name == TOOL_EXECUTE_CODE {
            if let Some(runner) = &self.inner.code_runner {
                let request = CodeRequest {
                    code: call
                        .arguments
                        .get("code")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    runtime: call
                        .arguments
                        .get("runtime")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                };
                let fenced = builtins::wrap_blocking(Self::as_fn(&self), builtins::CODE_BLOCKED);
                return match runner.run(request, fenced).await {
                    Ok(output) => DispatchResult::text(output),
                    Err(e) => DispatchResult::error(e),
                };
            }
        }
        if self.provider_toolbox.contains(&call.name) {
            return match self
                .provider_toolbox
                .execute(&call.name, call.arguments.clone(), &self.events)
                .await
            {
                Ok(output) => DispatchResult {
                    content: output.content,
                    attachments: output.attachments,
                    ..DispatchResult::default()
                },
                Err(e) => DispatchResult::error(e),
            };
        }
        if let Some(sub) = self.inner.find_sub_agent(&call.name) {
            return network::delegate(&call.name, sub, &self.task, &call.arguments, &self.events)
                .await;
        }
        DispatchResult::error(format!("tool '{}' not found", call.name))
    }
}

impl AgentInner {
    /// Look up a sub-agent by its delegation tool name.
    pub(crate) fn find_sub_agent(&self, tool_name: &str) -> Option<Arc<dyn Agent>> {
        self.sub_agents
            .iter()
            .find(|(name, _)| name == tool_name)
            .map(|(_, agent)| Arc::clone(agent))
    }

    /// Execute a task from scratch: resolve the environment, build messages
    /// through the memory layer, then run the loop.
    pub(crate) async fn run(
        self: &Arc<Self>,
        task: AgentTask,
        events: EventSender,
    ) -> Result<AgentResult> {
        let span = trace::start_span(
            self.tracer.as_ref(),
            op::AGENT_EXECUTE,
            &[("agent", Value::from(self.config.name.clone()))],
        );
        events.send(StreamEvent::of(EventKind::InputReceived)).await;

        let env = self.resolve_env(&task);
        let messages = match self.memory.build_messages(&task, &env.system_prompt).await {
            Ok(messages) => messages,
            Err(e) => {
                events.close();
                trace::end_span(span);
                return Err(e);
            }
        };
        events
            .send(StreamEvent::of(EventKind::ProcessingStart))
            .await;

        let result = self
            .run_loop(env, task, messages, RunSeed::default(), events.clone())
            .await;
        events.close();
        trace::end_span(span);
        result
    }

    /// Resolve the per-execution environment. Dynamic tools replace the
    /// construction-time set; dynamic prompt and provider override theirs.
    fn resolve_env(&self, task: &AgentTask) -> ExecEnv {
        let provider = self
            .provider_fn
            .as_ref()
            .and_then(|f| f(task))
            .unwrap_or_else(|| Arc::clone(&self.provider));
        let system_prompt = self
            .prompt_fn
            .as_ref()
            .map_or_else(|| self.config.system_prompt.clone(), |f| f(task));
        let toolbox = match &self.tools_fn {
            Some(f) => {
                let mut replaced = Toolbox::new();
                for tool in f(task) {
                    replaced.register(tool);
                }
                Arc::new(replaced)
            }
            None => Arc::clone(&self.toolbox),
        };

        let mut definitions = toolbox.definitions();
        definitions.extend(builtins::definitions(
            self.input_handler.is_some(),
            self.config.plan_execution,
            self.code_runner.is_some(),
        ));
        for (tool_name, sub) in &self.sub_agents {
            let description = if sub.description().is_empty() {
                format!("Delegate a task to the '{}' agent.", sub.name())
            } else {
                sub.description().to_owned()
            };
            definitions.push(ToolDefinition::new(
                tool_name,
                description,
                json!({
                    "type": "object",
                    "properties": {
                        "task": {"type": "string", "description": "The task to delegate."}
                    },
                    "required": ["task"]
                }),
            ));
        }

        ExecEnv {
            provider,
            toolbox,
            definitions,
            system_prompt,
        }
    }

    /// The inner loop, shared by fresh executions and resumes.
    async fn run_loop(
        self: &Arc<Self>,
        env: ExecEnv,
        task: AgentTask,
        messages: Vec<ChatMessage>,
        seed: RunSeed,
        events: EventSender,
    ) -> Result<AgentResult> {
        let mut state = RunState::new(messages, seed);
        let cancel = events.cancellation();

        for iteration in 1..=self.config.max_iterations {
            let span = trace::start_span(
                self.tracer.as_ref(),
                op::AGENT_LOOP_ITERATION,
                &[("iteration", Value::from(iteration as u64))],
            );
            debug!(agent = %self.config.name, iteration, "starting iteration");

            if compress::total_chars(&state.messages) > self.config.compress_threshold_chars {
                let compress_span =
                    trace::start_span(self.tracer.as_ref(), op::AGENT_LOOP_COMPRESS, &[]);
                let provider = self
                    .compress_provider
                    .as_deref()
                    .unwrap_or(env.provider.as_ref());
                let (compressed, usage) =
                    compress::compress(std::mem::take(&mut state.messages), provider).await;
                state.messages = compressed;
                state.usage += usage;
                trace::end_span(compress_span);
            }

            let mut request =
                ChatRequest::new(state.messages.clone()).with_tools(env.definitions.clone());
            request.response_schema = self.config.response_schema.clone();

            for processor in &self.processors {
                if let Err(signal) = processor.pre_llm(&mut request).await {
                    trace::end_span(span);
                    return self
                        .handle_signal(signal, &env, &task, state, ChatResponse::default(), &events)
                        .await;
                }
            }

            // With tools advertised the call is blocking; pure-text
            // executions stream when a consumer is attached.
            let streaming_text = env.definitions.is_empty() && events.is_enabled();
            let response = if streaming_text {
                env.provider.chat_stream(&request, &events).await
            } else {
                env.provider.chat(&request).await
            };
            let mut response = match response {
                Ok(response) => response,
                Err(e) => {
                    trace::end_span(span);
                    return Err(Error::with_partial(e, state.partial()));
                }
            };
            state.usage += response.usage;

            for processor in &self.processors {
                if let Err(signal) = processor.post_llm(&mut response).await {
                    trace::end_span(span);
                    return self
                        .handle_signal(signal, &env, &task, state, response.clone(), &events)
                        .await;
                }
            }

            if !response.has_tool_calls() {
                trace::end_span(span);
                return Ok(self
                    .finish(&env, &task, state, response, streaming_text, &events)
                    .await);
            }

            if let Some(thinking) = &response.thinking {
                events.send(StreamEvent::thinking(thinking)).await;
            }

            let chosen: Vec<String> = response
                .tool_calls
                .iter()
                .filter(|c| self.find_sub_agent(&c.name).is_some())
                .map(|c| c.name.clone())
                .collect();
            if !chosen.is_empty() {
                events.send(StreamEvent::routing_decision(&chosen)).await;
            }

            state.messages.push(ChatMessage::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                events
                    .send(StreamEvent::tool_call_start(
                        &call.name,
                        call.arguments.clone(),
                    ))
                    .await;
            }

            let dispatcher = Arc::new(ExecDispatcher {
                inner: Arc::clone(self),
                provider_toolbox: Arc::clone(&env.toolbox),
                task: task.clone(),
                events: events.clone(),
            });
            let results = dispatch_all(
                response.tool_calls.clone(),
                ExecDispatcher::as_fn(&dispatcher),
                self.config.max_parallel_tools,
                &cancel,
            )
            .await;

            for (call, dispatched) in response.tool_calls.iter().zip(results) {
                events
                    .send(StreamEvent::tool_call_result(
                        &call.name,
                        &dispatched.content,
                        dispatched.usage,
                        dispatched.duration,
                    ))
                    .await;
                state.usage += dispatched.usage;

                let delegation = self.find_sub_agent(&call.name).is_some();
                let kind = if delegation {
                    StepKind::Agent
                } else {
                    StepKind::Tool
                };
                state.steps.push(StepTrace::new(
                    &call.name,
                    kind,
                    &call.arguments_string(),
                    &dispatched.content,
                    dispatched.usage,
                    dispatched.duration,
                ));

                let mut tool_result = if dispatched.is_error {
                    ToolResult::err(dispatched.content.clone(), "dispatch error")
                } else {
                    ToolResult::ok(dispatched.content.clone())
                };
                for processor in &self.processors {
                    if let Err(signal) = processor.post_tool(call, &mut tool_result).await {
                        trace::end_span(span);
                        return self
                            .handle_signal(
                                signal,
                                &env,
                                &task,
                                state,
                                ChatResponse::default(),
                                &events,
                            )
                            .await;
                    }
                }

                let truncated =
                    truncate_chars(&tool_result.content, self.config.tool_result_max_chars);
                state.messages.push(ChatMessage::tool(&call.id, truncated));

                if delegation && !dispatched.is_error {
                    state.last_agent_output = Some(dispatched.content.clone());
                    if events.is_enabled() {
                        state.subagent_streamed = true;
                    }
                }
                state.add_attachments(
                    dispatched.attachments,
                    self.config.max_attachments,
                    self.config.max_attachment_bytes,
                );
            }

            trace::end_span(span);
        }

        // Iteration cap: force one synthesis call without tools.
        let span = trace::start_span(self.tracer.as_ref(), op::AGENT_LOOP_SYNTHESIS, &[]);
        info!(
            agent = %self.config.name,
            max_iterations = self.config.max_iterations,
            "iteration cap reached; synthesizing final answer"
        );
        state.messages.push(ChatMessage::user(SYNTHESIS_INSTRUCTION));
        let request = ChatRequest::new(state.messages.clone());
        let streaming = events.is_enabled();
        let response = if streaming {
            env.provider.chat_stream(&request, &events).await
        } else {
            env.provider.chat(&request).await
        };
        let mut response = match response {
            Ok(response) => response,
            Err(e) => {
                trace::end_span(span);
                return Err(Error::with_partial(e, state.partial()));
            }
        };
        state.usage += response.usage;
        for processor in &self.processors {
            if let Err(signal) = processor.post_llm(&mut response).await {
                trace::end_span(span);
                return self
                    .handle_signal(signal, &env, &task, state, response.clone(), &events)
                    .await;
            }
        }
        trace::end_span(span);
        Ok(self
            .finish(&env, &task, state, response, streaming, &events)
            .await)
    }

    /// Convert a processor signal into the matching loop outcome.
    async fn handle_signal(
        self: &Arc<Self>,
        signal: Error,
        env: &ExecEnv,
        task: &AgentTask,
        state: RunState,
        response: ChatResponse,
        events: &EventSender,
    ) -> Result<AgentResult> {
        match signal {
            Error::Halt => {
                debug!(agent = %self.config.name, "processor halted execution");
                Ok(self.finish(env, task, state, response, false, events).await)
            }
            Error::Suspend { payload } => self.suspend_now(payload, env, task, state, events),
            other => Err(Error::with_partial(other, state.partial())),
        }
    }

    /// Terminate successfully: resolve the output (falling back to the last
    /// sub-agent output when the model said nothing), emit the final delta,
    /// accumulate response attachments, persist, and close the stream.
    async fn finish(
        &self,
        env: &ExecEnv,
        task: &AgentTask,
        mut state: RunState,
        response: ChatResponse,
        already_streamed: bool,
        events: &EventSender,
    ) -> AgentResult {
        let mut output = response.content.clone();
        if output.is_empty() {
            if let Some(last) = &state.last_agent_output {
                output.clone_from(last);
            }
        }

        if events.is_enabled() && !already_streamed && !state.subagent_streamed && !output.is_empty()
        {
            events.send(StreamEvent::text_delta(&output)).await;
        }

        // Final-response attachments append after the accumulated ones.
        state.add_attachments(
            response.attachments,
            self.config.max_attachments,
            self.config.max_attachment_bytes,
        );

        if self.memory.has_store() {
            self.memory
                .persist_exchange(task, output.clone(), Some(Arc::clone(&env.provider)));
        }
        events.close();
        state.into_result(output)
    }

    /// Build a suspension: budget check, deep-copied snapshot, single-use
    /// resume closure, release accounting, TTL.
    fn suspend_now(
        self: &Arc<Self>,
        payload: Value,
        env: &ExecEnv,
        task: &AgentTask,
        state: RunState,
        events: &EventSender,
    ) -> Result<AgentResult> {
        let estimate = estimate_snapshot_bytes(&state.messages);
        if !self.budget.try_reserve(estimate) {
            warn!(
                agent = %self.config.name,
                estimate, "suspension budget exceeded; propagating processor error"
            );
            return Err(Error::Suspend { payload });
        }

        let snapshot = snapshot_messages(&state.messages);
        let seed = RunSeed {
            usage: state.usage,
            steps: state.steps.clone(),
        };
        let inner = Arc::clone(self);
        let env = env.clone();
        let task = task.clone();
        let budget = Arc::clone(&self.budget);
        let release = Box::new(move || budget.release(estimate));
        let resume: ResumeFn = Box::new(move |input: String| {
            let mut messages = snapshot;
            messages.push(ChatMessage::user(format!("Human input: {input}")));
            Box::pin(async move {
                inner
                    .run_loop(env, task, messages, seed, EventSender::disabled())
                    .await
            })
        });

        events.close();
        Err(Error::Suspended(Suspension::new(
            self.config.name.clone(),
            payload,
            estimate,
            resume,
            release,
            self.config.suspend_ttl,
        )))
    }
}
