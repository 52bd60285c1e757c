//! Conversation message types.
//!
//! [`ChatMessage`] is the ordered record of a conversation: one of four
//! roles, content text, and (for assistant turns) the tool calls the model
//! emitted. Tool-role messages answer a specific call via `tool_call_id`.
//!
//! Suspension snapshots are built with [`snapshot_messages`], which
//! deep-copies everything mutable. Attachment payloads are the deliberate
//! exception: they are immutable [`bytes::Bytes`] and alias on clone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::Attachment;

/// The role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// A tool result answering an assistant tool call.
    Tool,
}

impl Role {
    /// The wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Stable id correlating the call with its result message.
    pub id: String,

    /// Tool name. Sub-agent delegations use the `agent_` prefix.
    pub name: String,

    /// Raw JSON arguments as produced by the model.
    pub arguments: Value,

    /// Opaque provider metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            metadata: None,
        }
    }

    /// The arguments rendered as a JSON string.
    #[must_use]
    pub fn arguments_string(&self) -> String {
        self.arguments.to_string()
    }
}

/// The outcome of one tool execution, as seen by processors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Result content appended to the conversation.
    pub content: String,

    /// Structured error description when the execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
        }
    }

    /// Create a failed result.
    #[must_use]
    pub fn err(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: Some(error.into()),
        }
    }

    /// Whether the execution failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One ordered record in a conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: Role,

    /// Content text.
    pub content: String,

    /// Tool calls emitted with this message (assistant role only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Id of the tool call this message answers (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Attachments carried with the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Opaque metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl ChatMessage {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create an assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: calls,
            ..Self::default()
        }
    }

    /// Create a tool-result message answering `tool_call_id`.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::default()
        }
    }

    /// Attach payloads to the message.
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Whether the message carries tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Character count of the content, used for budget accounting.
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Deep-copy a message list for a suspension snapshot.
///
/// Tool-call arguments and all metadata values are `serde_json::Value`s, so
/// cloning them is a deep copy. Attachment payloads alias (they are
/// immutable by contract), which keeps snapshots of attachment-heavy
/// conversations cheap.
#[must_use]
pub fn snapshot_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages.to_vec()
}
