//! Agent builder.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::config::AgentConfig;
use crate::agent::runner::{AgentInner, LoopAgent, PromptFn, ProviderFn, ToolsFn};
use crate::agent::suspend::SuspendBudget;
use crate::agent::Agent;
use crate::chat::Provider;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::input::{CodeRunner, InputHandler};
use crate::memory::{MemoryConfig, MemoryLayer, MemoryStore, Store};
use crate::network::AGENT_TOOL_PREFIX;
use crate::processor::Processor;
use crate::task::AgentTask;
use crate::tool::{StreamingTool, Tool, Toolbox};
use crate::trace::Tracer;

/// Builder for [`LoopAgent`].
///
/// Options apply in call order; construction validates the combination and
/// logs what will be ignored.
///
/// # Example
///
/// ```rust,ignore
/// let agent = LoopAgent::builder("researcher")
///     .provider(provider)
///     .system_prompt("You research things.")
///     .tool(search_tool)
///     .max_iterations(5)
///     .build()?;
/// ```
pub struct AgentBuilder {
    config: AgentConfig,
    provider: Option<Arc<dyn Provider>>,
    compress_provider: Option<Arc<dyn Provider>>,
    toolbox: Toolbox,
    processors: Vec<Arc<dyn Processor>>,
    store: Option<Arc<dyn Store>>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    sub_agents: Vec<(String, Arc<dyn Agent>)>,
    input_handler: Option<Arc<dyn InputHandler>>,
    code_runner: Option<Arc<dyn CodeRunner>>,
    prompt_fn: Option<PromptFn>,
    provider_fn: Option<ProviderFn>,
    tools_fn: Option<ToolsFn>,
    tracer: Option<Arc<dyn Tracer>>,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.config.name)
            .field("has_provider", &self.provider.is_some())
            .field("sub_agents", &self.sub_agents.len())
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Create a builder for an agent with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: AgentConfig::new(name),
            provider: None,
            compress_provider: None,
            toolbox: Toolbox::new(),
            processors: Vec::new(),
            store: None,
            memory_store: None,
            embedder: None,
            sub_agents: Vec::new(),
            input_handler: None,
            code_runner: None,
            prompt_fn: None,
            provider_fn: None,
            tools_fn: None,
            tracer: None,
        }
    }

    /// Set the agent description (shown to routing models).
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    /// Set the base system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Set the system prompt only when none was configured.
    #[must_use]
    pub(crate) fn default_system_prompt(mut self, prompt: String) -> Self {
        if self.config.system_prompt.is_empty() {
            self.config.system_prompt = prompt;
        }
        self
    }

    /// Set the LLM provider. Required.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use a separate (usually cheaper) provider for context compression.
    #[must_use]
    pub fn compression_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.compress_provider = Some(provider);
        self
    }

    /// Register a tool.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.toolbox.register(tool);
        self
    }

    /// Register a streaming tool.
    #[must_use]
    pub fn streaming_tool(mut self, tool: Arc<dyn StreamingTool>) -> Self {
        self.toolbox.register_streaming(tool);
        self
    }

    /// Register several tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        for tool in tools {
            self.toolbox.register(tool);
        }
        self
    }

    /// Register a sub-agent, advertised as the `agent_<name>` tool.
    #[must_use]
    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        let tool_name = format!("{AGENT_TOOL_PREFIX}{}", agent.name());
        self.sub_agents.push((tool_name, agent));
        self
    }

    /// Append a processor to the hook chain.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Wire a conversation store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wire a user-fact store and enable user memory.
    #[must_use]
    pub fn memory_store(mut self, memory_store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(memory_store);
        self.config.memory.user_memory = true;
        self
    }

    /// Wire an embedding provider.
    #[must_use]
    pub fn embedding(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the memory-layer tunables wholesale.
    #[must_use]
    pub fn memory_config(mut self, config: MemoryConfig) -> Self {
        self.config.memory = config;
        self
    }

    /// Enable cross-thread recall.
    #[must_use]
    pub fn cross_thread_recall(mut self) -> Self {
        self.config.memory.cross_thread_recall = true;
        self
    }

    /// Wire a human-input handler, enabling the `ask_user` built-in.
    #[must_use]
    pub fn input_handler(mut self, handler: Arc<dyn InputHandler>) -> Self {
        self.input_handler = Some(handler);
        self
    }

    /// Wire a code runner, enabling the `execute_code` built-in.
    #[must_use]
    pub fn code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    /// Enable the `execute_plan` built-in.
    #[must_use]
    pub const fn enable_plan_execution(mut self) -> Self {
        self.config.plan_execution = true;
        self
    }

    /// Set the iteration cap (default 10).
    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    /// Set the parallel-dispatch worker cap (default 10).
    #[must_use]
    pub const fn max_parallel_tools(mut self, max: usize) -> Self {
        self.config.max_parallel_tools = max;
        self
    }

    /// Set the attachment accumulation caps (default 50 / 50 MB).
    #[must_use]
    pub const fn attachment_limits(mut self, max_count: usize, max_bytes: usize) -> Self {
        self.config.max_attachments = max_count;
        self.config.max_attachment_bytes = max_bytes;
        self
    }

    /// Set the tool-result character cap (default 100,000).
    #[must_use]
    pub const fn tool_result_max_chars(mut self, max: usize) -> Self {
        self.config.tool_result_max_chars = max;
        self
    }

    /// Set the compression threshold in characters (default 200,000).
    #[must_use]
    pub const fn compress_threshold_chars(mut self, threshold: usize) -> Self {
        self.config.compress_threshold_chars = threshold;
        self
    }

    /// Set the suspension TTL (default 30 minutes).
    #[must_use]
    pub const fn suspend_ttl(mut self, ttl: Duration) -> Self {
        self.config.suspend_ttl = ttl;
        self
    }

    /// Set the per-agent suspension budget (default 20 snapshots / 256 MB).
    #[must_use]
    pub const fn suspend_budget(mut self, max_count: usize, max_bytes: usize) -> Self {
        self.config.max_suspensions = max_count;
        self.config.max_suspend_bytes = max_bytes;
        self
    }

    /// Set a JSON schema hint for the final response.
    #[must_use]
    pub fn response_schema(mut self, schema: Value) -> Self {
        self.config.response_schema = Some(schema);
        self
    }

    /// Resolve the system prompt per execution.
    #[must_use]
    pub fn prompt_fn(
        mut self,
        f: impl Fn(&AgentTask) -> String + Send + Sync + 'static,
    ) -> Self {
        self.prompt_fn = Some(Arc::new(f));
        self
    }

    /// Resolve the provider per execution; `None` falls back to the
    /// configured provider.
    #[must_use]
    pub fn provider_fn(
        mut self,
        f: impl Fn(&AgentTask) -> Option<Arc<dyn Provider>> + Send + Sync + 'static,
    ) -> Self {
        self.provider_fn = Some(Arc::new(f));
        self
    }

    /// Resolve the tool set per execution, replacing the registered tools.
    #[must_use]
    pub fn tools_fn(
        mut self,
        f: impl Fn(&AgentTask) -> Vec<Arc<dyn Tool>> + Send + Sync + 'static,
    ) -> Self {
        self.tools_fn = Some(Arc::new(f));
        self
    }

    /// Wire a span exporter.
    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Build the agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no provider is set.
    pub fn build(self) -> Result<LoopAgent> {
        let provider = self.provider.ok_or_else(|| {
            Error::configuration(format!(
                "agent '{}' has no provider; call .provider() before .build()",
                self.config.name
            ))
        })?;
        self.config.validate(self.store.is_some());

        let memory = MemoryLayer::new(
            self.store,
            self.memory_store,
            self.embedder,
            self.config.memory.clone(),
        );
        let budget = Arc::new(SuspendBudget::new(
            self.config.max_suspensions,
            self.config.max_suspend_bytes,
        ));

        Ok(LoopAgent::from_inner(AgentInner {
            config: self.config,
            provider,
            compress_provider: self.compress_provider,
            toolbox: Arc::new(self.toolbox),
            processors: self.processors,
            memory,
            sub_agents: self.sub_agents,
            input_handler: self.input_handler,
            code_runner: self.code_runner,
            prompt_fn: self.prompt_fn,
            provider_fn: self.provider_fn,
            tools_fn: self.tools_fn,
            tracer: self.tracer,
            budget,
        }))
    }
}
