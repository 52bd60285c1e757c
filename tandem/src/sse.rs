//! Server-Sent Events adapter.
//!
//! Transport-agnostic SSE framing: [`format_event`] renders one
//! `event: <kind>\ndata: <json>\n\n` frame, and [`stream_sse`] drives any
//! agent with a buffered event channel, yielding frames as they arrive and
//! terminating with a `done` frame carrying the final result (or an
//! `error` frame). HTTP layers write the frames with an immediate flush
//! each and add their own headers.

use std::sync::Arc;

use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::event::EventSender;
use crate::task::AgentTask;

/// Terminal frame name for a successful run.
pub const SSE_DONE: &str = "done";

/// Terminal frame name for a failed run.
pub const SSE_ERROR: &str = "error";

/// Buffer size of the event channel behind the adapter.
const SSE_BUFFER: usize = 64;

/// Render one SSE frame.
#[must_use]
pub fn format_event(kind: &str, data: &Value) -> String {
    format!("event: {kind}\ndata: {data}\n\n")
}

/// Run `agent` on `task`, yielding SSE frames.
///
/// Events stream as they happen; the final frame is `done` with the
/// JSON-encoded result, or `error` with the error message. The agent runs
/// on its own task under panic recovery, so a panicking agent produces an
/// `error` frame rather than a broken stream.
pub fn stream_sse(agent: Arc<dyn Agent>, task: AgentTask) -> impl Stream<Item = String> {
    async_stream::stream! {
        let (tx, mut rx) = mpsc::channel(SSE_BUFFER);
        let cancel = CancellationToken::new();
        let events = EventSender::new(tx, cancel.clone());

        let handle = tokio::spawn({
            let events = events.clone();
            async move { agent.execute_stream(task, events).await }
        });

        while let Some(event) = rx.recv().await {
            let data = serde_json::to_value(&event).unwrap_or(Value::Null);
            yield format_event(event.kind.as_str(), &data);
        }

        match handle.await {
            Ok(Ok(result)) => {
                let data = serde_json::to_value(&result).unwrap_or(Value::Null);
                yield format_event(SSE_DONE, &data);
            }
            Ok(Err(e)) => {
                yield format_event(SSE_ERROR, &json!({"message": e.to_string()}));
            }
            Err(join) => {
                let message = if join.is_panic() {
                    "agent panicked"
                } else {
                    "agent cancelled"
                };
                yield format_event(SSE_ERROR, &json!({"message": message}));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::agent::LoopAgent;
    use crate::chat::MockProvider;

    #[test]
    fn frame_layout() {
        let frame = format_event("text_delta", &json!({"content": "hi"}));
        assert_eq!(frame, "event: text_delta\ndata: {\"content\":\"hi\"}\n\n");
    }

    #[tokio::test]
    async fn stream_ends_with_done_frame() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("the answer");
        let agent = LoopAgent::builder("sse-agent")
            .provider(provider)
            .build()
            .unwrap();

        let frames: Vec<String> =
            stream_sse(Arc::new(agent), AgentTask::new("question")).collect().await;

        assert!(frames.iter().any(|f| f.starts_with("event: text_delta\n")));
        let last = frames.last().unwrap();
        assert!(last.starts_with("event: done\n"));
        assert!(last.contains("the answer"));
    }

    #[tokio::test]
    async fn provider_failure_yields_error_frame() {
        let agent = LoopAgent::builder("sse-agent")
            .provider(Arc::new(MockProvider::new())) // empty script
            .build()
            .unwrap();
        let frames: Vec<String> =
            stream_sse(Arc::new(agent), AgentTask::new("question")).collect().await;
        let last = frames.last().unwrap();
        assert!(last.starts_with("event: error\n"));
    }
}
