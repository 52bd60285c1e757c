//! Chat types and the LLM provider contract.
//!
//! The core never talks HTTP itself: concrete providers live outside the
//! framework and implement [`Provider`]. A [`ChatRequest`] carries the
//! message list, advertised tool definitions, an optional response-schema
//! hint, and nil-optional generation parameters so providers can fall back
//! to their own defaults.
//!
//! [`MockProvider`] is the scripted test double used throughout the test
//! suite; it replays canned responses and records every request it saw.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::{EventSender, StreamEvent};
use crate::message::{ChatMessage, ToolCall};
use crate::task::Attachment;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Generation parameters. All fields are optional; `None` means "use the
/// provider's default".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenParams {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    pub top_k: Option<u32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,

    /// Optional JSON schema the final response should conform to.
    pub response_schema: Option<Value>,

    /// Generation parameters.
    pub params: GenParams,
}

impl ChatRequest {
    /// Create a request from a message list.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Advertise tools to the model.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A chat completion response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Final text content.
    pub content: String,

    /// Tool calls the model wants executed. Empty means the response is
    /// final.
    pub tool_calls: Vec<ToolCall>,

    /// Token usage for this call.
    pub usage: Usage,

    /// Attachments produced by the provider (e.g. generated images).
    pub attachments: Vec<Attachment>,

    /// Reasoning content, for providers that expose it.
    pub thinking: Option<String>,
}

impl ChatResponse {
    /// Create a plain text response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create a response requesting tool calls.
    #[must_use]
    pub fn with_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    /// Set the usage for this response.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Whether the model requested tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The LLM backend contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, used in logs and traces.
    fn name(&self) -> &str;

    /// Synchronous completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion: emit [`StreamEvent`]s while generating, then
    /// return the aggregated response.
    ///
    /// The default implementation falls back to [`Provider::chat`] and emits
    /// the final text as a single delta, so providers without native
    /// streaming still work in streaming mode.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        events: &EventSender,
    ) -> Result<ChatResponse> {
        let response = self.chat(request).await?;
        if !response.content.is_empty() {
            events.send(StreamEvent::text_delta(&response.content)).await;
        }
        if let Some(thinking) = &response.thinking {
            events.send(StreamEvent::thinking(thinking)).await;
        }
        Ok(response)
    }
}

/// Scripted provider for tests and examples.
///
/// Responses are replayed in push order; every request is recorded for
/// later inspection. An exhausted script yields a provider error, which is
/// usually the sign of a test driving more iterations than scripted.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push_response(&self, response: ChatResponse) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// Queue a plain text response.
    pub fn push_text(&self, content: impl Into<String>) {
        self.push_response(ChatResponse::text(content).with_usage(Usage::new(10, 10)));
    }

    /// Queue a response carrying a single tool call.
    pub fn push_tool_call(&self, name: impl Into<String>, arguments: Value) {
        let call = ToolCall::new(format!("call-{}", uuid::Uuid::new_v4()), name, arguments);
        self.push_response(ChatResponse::with_tool_calls(vec![call]).with_usage(Usage::new(10, 10)));
    }

    /// Queue a response carrying several tool calls in one iteration.
    pub fn push_tool_calls(&self, calls: Vec<(String, Value)>) {
        let calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, args))| ToolCall::new(format!("call-{i}"), name, args))
            .collect();
        self.push_response(ChatResponse::with_tool_calls(calls).with_usage(Usage::new(10, 10)));
    }

    /// The requests observed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// How many calls were made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .ok_or_else(|| Error::provider("mock script exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_in_order() {
        let provider = MockProvider::new();
        provider.push_text("first");
        provider.push_text("second");
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        assert_eq!(provider.chat(&req).await.unwrap().content, "first");
        assert_eq!(provider.chat(&req).await.unwrap().content, "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_errors_when_exhausted() {
        let provider = MockProvider::new();
        let req = ChatRequest::new(vec![]);
        let err = provider.chat(&req).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[tokio::test]
    async fn default_chat_stream_emits_one_delta() {
        let provider = MockProvider::new();
        provider.push_text("streamed");
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let events = EventSender::new(tx, tokio_util::sync::CancellationToken::new());
        let response = provider
            .chat_stream(&ChatRequest::new(vec![]), &events)
            .await
            .unwrap();
        assert_eq!(response.content, "streamed");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.content, "streamed");
    }

    #[tokio::test]
    async fn mock_records_tools_advertised() {
        let provider = MockProvider::new();
        provider.push_text("ok");
        let req = ChatRequest::new(vec![]).with_tools(vec![ToolDefinition::new(
            "search",
            "Search the web",
            serde_json::json!({"type": "object"}),
        )]);
        provider.chat(&req).await.unwrap();
        assert_eq!(provider.requests()[0].tools.len(), 1);
    }
}
