//! Tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::EventSender;
use crate::tool::{StreamingTool, Tool, ToolDefinition, ToolOutput};

enum Registered {
    Plain(Arc<dyn Tool>),
    Streaming(Arc<dyn StreamingTool>),
}

impl Registered {
    fn definitions(&self) -> Vec<ToolDefinition> {
        match self {
            Self::Plain(t) => t.definitions(),
            Self::Streaming(t) => t.definitions(),
        }
    }
}

/// A name-indexed collection of tools.
///
/// Registration order is preserved in [`Toolbox::definitions`] so the model
/// sees tools in the order the application added them. A tool registering a
/// name that already exists replaces the previous owner of that name.
#[derive(Default)]
pub struct Toolbox {
    tools: Vec<Registered>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox")
            .field("names", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Toolbox {
    /// Create an empty toolbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under every name it defines.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let slot = self.tools.len();
        for def in tool.definitions() {
            self.index.insert(def.name, slot);
        }
        self.tools.push(Registered::Plain(tool));
    }

    /// Register a streaming tool under every name it defines.
    pub fn register_streaming(&mut self, tool: Arc<dyn StreamingTool>) {
        let slot = self.tools.len();
        for def in tool.definitions() {
            self.index.insert(def.name, slot);
        }
        self.tools.push(Registered::Streaming(tool));
    }

    /// All advertised definitions, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().flat_map(Registered::definitions).collect()
    }

    /// Whether a tool is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute the named call, preferring the streaming path when the owner
    /// supports it and events are enabled.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        events: &EventSender,
    ) -> Result<ToolOutput> {
        let slot = self
            .index
            .get(name)
            .ok_or_else(|| Error::tool(name, "tool not found"))?;
        match &self.tools[*slot] {
            Registered::Plain(tool) => tool.execute(name, args).await,
            Registered::Streaming(tool) => {
                if events.is_enabled() {
                    tool.execute_stream(name, args, events).await
                } else {
                    tool.execute(name, args).await
                }
            }
        }
    }
}
