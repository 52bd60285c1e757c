//! Tool contracts and the registry agents dispatch through.
//!
//! A [`Tool`] advertises one or more [`ToolDefinition`]s and executes calls
//! by name. [`StreamingTool`] additionally emits progress events while
//! executing. The [`Toolbox`] maps call names to the tool that registered
//! them.

mod toolbox;

pub use toolbox::Toolbox;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::event::EventSender;
use crate::task::Attachment;

/// A tool advertised to the model: name, description, and a JSON schema of
/// its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// What the tool does, shown to the model.
    pub description: String,

    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a definition from an explicit schema value.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a definition whose schema is derived from an argument type.
    #[must_use]
    pub fn for_args<T: JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let schema = schemars::schema_for!(T);
        Self::new(
            name,
            description,
            serde_json::to_value(schema).unwrap_or_else(|_| Value::Object(serde_json::Map::new())),
        )
    }
}

/// What a tool execution produced.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Result content, appended to the conversation as a tool message.
    pub content: String,

    /// Attachments surfaced by the tool (accumulate on the agent result).
    pub attachments: Vec<Attachment>,
}

impl ToolOutput {
    /// Create a text-only output.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Add an attachment.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// The tool contract.
///
/// One implementation may serve several definitions; `execute` routes by
/// name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The definitions this tool serves.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute the named call with the given arguments.
    async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput>;
}

/// A tool that can report progress while executing.
#[async_trait]
pub trait StreamingTool: Tool {
    /// Execute the named call, emitting [`crate::event::EventKind::ToolProgress`]
    /// events on the way.
    async fn execute_stream(
        &self,
        name: &str,
        args: Value,
        events: &EventSender,
    ) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(JsonSchema, Deserialize)]
    #[allow(dead_code)]
    struct SearchArgs {
        /// The query string.
        query: String,
        /// Maximum hits to return.
        limit: Option<u32>,
    }

    #[test]
    fn definition_from_schema_type() {
        let def = ToolDefinition::for_args::<SearchArgs>("search", "Search the index");
        assert_eq!(def.name, "search");
        let props = &def.parameters["properties"];
        assert!(props.get("query").is_some());
        assert!(props.get("limit").is_some());
    }

    #[test]
    fn output_builder() {
        let out = ToolOutput::text("found 3 hits")
            .with_attachment(Attachment::new("text/csv", "a,b,c"));
        assert_eq!(out.content, "found 3 hits");
        assert_eq!(out.attachments.len(), 1);
    }
}
