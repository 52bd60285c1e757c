//! Streaming events and the channel they flow on.
//!
//! Agents operated in streaming mode emit [`StreamEvent`]s through an
//! [`EventSender`]. Two properties are load-bearing:
//!
//! - Every send races against the execution's cancellation token, so a
//!   stalled consumer can never deadlock the loop.
//! - Closing is idempotent. The sender half lives in an `Option` behind a
//!   mutex; the first `close()` takes it, later calls are no-ops. Providers
//!   and forwarding goroutine-equivalents may all attempt the close.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

pub use tokio_util::sync::CancellationToken;

use crate::result::duration_millis;
use crate::usage::Usage;

/// The kind of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventKind {
    /// A task entered the agent.
    InputReceived,
    /// Memory build finished; the first LLM call is about to happen.
    ProcessingStart,
    /// Incremental text from the model.
    TextDelta,
    /// Reasoning content from providers that expose it.
    Thinking,
    /// A tool call is starting.
    ToolCallStart,
    /// Provider-streamed fragment of tool-call arguments.
    ToolCallDelta,
    /// Progress from a streaming tool.
    ToolProgress,
    /// A tool call finished.
    ToolCallResult,
    /// A sub-agent delegation is starting.
    AgentStart,
    /// A sub-agent delegation finished.
    AgentFinish,
    /// A workflow step is starting.
    StepStart,
    /// A workflow step finished.
    StepFinish,
    /// Progress within a workflow step.
    StepProgress,
    /// The router chose a set of sub-agents.
    RoutingDecision,
}

impl EventKind {
    /// The wire name of the event kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputReceived => "input_received",
            Self::ProcessingStart => "processing_start",
            Self::TextDelta => "text_delta",
            Self::Thinking => "thinking",
            Self::ToolCallStart => "tool_call_start",
            Self::ToolCallDelta => "tool_call_delta",
            Self::ToolProgress => "tool_progress",
            Self::ToolCallResult => "tool_call_result",
            Self::AgentStart => "agent_start",
            Self::AgentFinish => "agent_finish",
            Self::StepStart => "step_start",
            Self::StepFinish => "step_finish",
            Self::StepProgress => "step_progress",
            Self::RoutingDecision => "routing_decision",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged event on a streaming channel.
///
/// Flows from producer to consumer and is never retained by the framework.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    /// What happened.
    pub kind: EventKind,

    /// Tool, agent, or step name, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Content fragment (text delta, tool result excerpt, payload).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Raw arguments, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Usage attributable to the event, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Wall-clock duration, when known.
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_duration_millis")]
    pub duration: Option<Duration>,
}

impl StreamEvent {
    /// Create a bare event of the given kind.
    #[must_use]
    pub fn of(kind: EventKind) -> Self {
        Self {
            kind,
            name: None,
            content: String::new(),
            args: None,
            usage: None,
            duration: None,
        }
    }

    /// An incremental text fragment.
    #[must_use]
    pub fn text_delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::of(EventKind::TextDelta)
        }
    }

    /// Reasoning content.
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::of(EventKind::Thinking)
        }
    }

    /// A tool call is starting.
    #[must_use]
    pub fn tool_call_start(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: Some(name.into()),
            args: Some(args),
            ..Self::of(EventKind::ToolCallStart)
        }
    }

    /// A tool call finished.
    #[must_use]
    pub fn tool_call_result(
        name: impl Into<String>,
        content: impl Into<String>,
        usage: Usage,
        duration: Duration,
    ) -> Self {
        Self {
            name: Some(name.into()),
            content: content.into(),
            usage: Some(usage),
            duration: Some(duration),
            ..Self::of(EventKind::ToolCallResult)
        }
    }

    /// A sub-agent delegation is starting.
    #[must_use]
    pub fn agent_start(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::of(EventKind::AgentStart)
        }
    }

    /// A sub-agent delegation finished.
    #[must_use]
    pub fn agent_finish(name: impl Into<String>, usage: Usage, duration: Duration) -> Self {
        Self {
            name: Some(name.into()),
            usage: Some(usage),
            duration: Some(duration),
            ..Self::of(EventKind::AgentFinish)
        }
    }

    /// A workflow step is starting.
    #[must_use]
    pub fn step_start(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::of(EventKind::StepStart)
        }
    }

    /// A workflow step finished.
    #[must_use]
    pub fn step_finish(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: Some(name.into()),
            duration: Some(duration),
            ..Self::of(EventKind::StepFinish)
        }
    }

    /// The router chose a set of sub-agents.
    #[must_use]
    pub fn routing_decision(chosen: &[String]) -> Self {
        Self {
            content: chosen.join(","),
            ..Self::of(EventKind::RoutingDecision)
        }
    }
}

struct EventChannel {
    tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    cancel: CancellationToken,
}

/// Cancel-aware, close-once handle to a streaming channel.
///
/// Cheap to clone; all clones share the same close state. A disabled sender
/// (see [`EventSender::disabled`]) swallows events, which lets the loop run
/// one code path for both streaming and blocking executions.
#[derive(Clone)]
pub struct EventSender {
    inner: Arc<EventChannel>,
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EventSender {
    /// Create a sender over `tx`, racing sends against `cancel`.
    #[must_use]
    pub fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(EventChannel {
                tx: Mutex::new(Some(tx)),
                cancel,
            }),
        }
    }

    /// Create a sender that discards all events.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(EventChannel {
                tx: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Whether events will actually be delivered.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner
            .tx
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// The cancellation token sends race against.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Send an event.
    ///
    /// Returns `true` when delivered. Returns `false` without blocking
    /// indefinitely when the channel is closed, the consumer went away, or
    /// the execution was cancelled.
    pub async fn send(&self, event: StreamEvent) -> bool {
        let tx = {
            let Ok(guard) = self.inner.tx.lock() else {
                return false;
            };
            guard.clone()
        };
        let Some(tx) = tx else {
            return false;
        };
        tokio::select! {
            sent = tx.send(event) => sent.is_ok(),
            () = self.inner.cancel.cancelled() => false,
        }
    }

    /// Close the channel. Idempotent: later calls (from any clone) are
    /// no-ops, tolerating a provider that already closed its side.
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.tx.lock() {
            guard.take();
        }
    }
}

/// Serialize `Option<Duration>` as optional integer milliseconds.
mod opt_duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    use super::duration_millis;

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => duration_millis::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_when_open() {
        let (tx, mut rx) = mpsc::channel(4);
        let events = EventSender::new(tx, CancellationToken::new());
        assert!(events.send(StreamEvent::text_delta("hi")).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::TextDelta);
        assert_eq!(received.content, "hi");
    }

    #[tokio::test]
    async fn close_is_idempotent_across_clones() {
        let (tx, mut rx) = mpsc::channel(4);
        let events = EventSender::new(tx, CancellationToken::new());
        let clone = events.clone();
        events.close();
        clone.close();
        assert!(!events.is_enabled());
        assert!(!events.send(StreamEvent::text_delta("late")).await);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_returns_false_on_cancellation() {
        // Capacity-1 channel that is already full, and no consumer: the send
        // would block forever without the cancellation race.
        let (tx, _rx) = mpsc::channel(1);
        tx.send(StreamEvent::of(EventKind::ProcessingStart))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let events = EventSender::new(tx, cancel.clone());
        cancel.cancel();
        assert!(!events.send(StreamEvent::text_delta("stuck")).await);
    }

    #[tokio::test]
    async fn disabled_sender_swallows_events() {
        let events = EventSender::disabled();
        assert!(!events.is_enabled());
        assert!(!events.send(StreamEvent::text_delta("nope")).await);
    }

    #[test]
    fn event_serialization_skips_empty_fields() {
        let json = serde_json::to_value(StreamEvent::text_delta("x")).unwrap();
        assert_eq!(json["kind"], "text_delta");
        assert!(json.get("name").is_none());
        assert!(json.get("usage").is_none());
    }
}
