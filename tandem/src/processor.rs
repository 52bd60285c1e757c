//! Processor hooks around LLM calls and tool results.
//!
//! A [`Processor`] may implement any subset of the three hooks; every hook
//! has a default no-op so implementations override only what they need.
//! Hooks run in registration order and may mutate the request or response
//! in place.
//!
//! Control flow is signalled through the return value:
//!
//! - `Ok(())` — continue.
//! - [`halt()`] — stop gracefully; the loop returns a success result.
//! - [`suspend(payload)`] — pause for external input (see
//!   [`crate::agent::Suspension`]).
//! - any other error — abort the execution.

use async_trait::async_trait;
use serde_json::Value;

use crate::chat::{ChatRequest, ChatResponse};
use crate::error::{Error, Result};
use crate::message::{ToolCall, ToolResult};

/// A hook chain participant.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Called before each LLM call. May mutate the request.
    async fn pre_llm(&self, _request: &mut ChatRequest) -> Result<()> {
        Ok(())
    }

    /// Called after each LLM call. May mutate the response.
    async fn post_llm(&self, _response: &mut ChatResponse) -> Result<()> {
        Ok(())
    }

    /// Called after each tool result, before it is appended to the
    /// conversation. May mutate the result.
    async fn post_tool(&self, _call: &ToolCall, _result: &mut ToolResult) -> Result<()> {
        Ok(())
    }
}

/// The graceful-stop signal. Return from any hook to end the execution with
/// the response accumulated so far.
#[must_use]
pub fn halt() -> Error {
    Error::Halt
}

/// The suspension signal. Return from any hook to pause the execution;
/// `payload` is surfaced to whoever answers the suspension.
#[must_use]
pub fn suspend(payload: impl Into<Value>) -> Error {
    Error::Suspend {
        payload: payload.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Redactor;

    #[async_trait]
    impl Processor for Redactor {
        async fn post_tool(&self, _call: &ToolCall, result: &mut ToolResult) -> Result<()> {
            result.content = result.content.replace("secret", "[redacted]");
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_hooks_are_no_ops() {
        struct Nothing;
        impl Processor for Nothing {}

        let mut request = ChatRequest::default();
        let mut response = ChatResponse::default();
        Nothing.pre_llm(&mut request).await.unwrap();
        Nothing.post_llm(&mut response).await.unwrap();
    }

    #[tokio::test]
    async fn post_tool_can_mutate_result() {
        let call = ToolCall::new("1", "read", serde_json::json!({}));
        let mut result = ToolResult::ok("the secret value");
        Redactor.post_tool(&call, &mut result).await.unwrap();
        assert_eq!(result.content, "the [redacted] value");
    }

    #[test]
    fn signal_constructors() {
        assert!(halt().is_halt());
        assert!(suspend(serde_json::json!({"ask": "?"})).is_suspend());
    }
}
