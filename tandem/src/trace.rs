//! Tracing contracts.
//!
//! The core logs through `tracing` and additionally emits spans to an
//! optional pluggable [`Tracer`], so applications can wire exporters
//! without the core depending on one. [`op`] lists the span names the core
//! emits.

use serde_json::Value;

/// Span names emitted by the core.
pub mod op {
    /// One full agent execution.
    pub const AGENT_EXECUTE: &str = "agent.execute";
    /// One pass through the loop (LLM call + dispatches).
    pub const AGENT_LOOP_ITERATION: &str = "agent.loop.iteration";
    /// The forced final call after the iteration cap.
    pub const AGENT_LOOP_SYNTHESIS: &str = "agent.loop.synthesis";
    /// A context-compression call.
    pub const AGENT_LOOP_COMPRESS: &str = "agent.loop.compress";
    /// One full workflow execution.
    pub const WORKFLOW_EXECUTE: &str = "workflow.execute";
    /// One workflow step.
    pub const WORKFLOW_STEP: &str = "workflow.step";
}

/// An open span.
pub trait Span: Send + Sync {
    /// Attach an attribute.
    fn set_attr(&self, key: &str, value: Value);

    /// Record a point-in-time event.
    fn event(&self, name: &str);

    /// Record an error on the span.
    fn error(&self, err: &dyn std::error::Error);

    /// Close the span.
    fn end(&self);
}

/// Starts spans.
pub trait Tracer: Send + Sync {
    /// Start a span with initial attributes.
    fn start(&self, name: &str, attrs: &[(&str, Value)]) -> Box<dyn Span>;
}

/// A tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attr(&self, _key: &str, _value: Value) {}
    fn event(&self, _name: &str) {}
    fn error(&self, _err: &dyn std::error::Error) {}
    fn end(&self) {}
}

impl Tracer for NoopTracer {
    fn start(&self, _name: &str, _attrs: &[(&str, Value)]) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// Start a span on an optional tracer.
pub(crate) fn start_span(
    tracer: Option<&std::sync::Arc<dyn Tracer>>,
    name: &str,
    attrs: &[(&str, Value)],
) -> Option<Box<dyn Span>> {
    tracer.map(|t| t.start(name, attrs))
}

/// End a span, if one is open.
pub(crate) fn end_span(span: Option<Box<dyn Span>>) {
    if let Some(span) = span {
        span.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recording {
        spans: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingSpan {
        name: String,
        spans: Arc<Mutex<Vec<String>>>,
    }

    impl Span for RecordingSpan {
        fn set_attr(&self, _key: &str, _value: Value) {}
        fn event(&self, _name: &str) {}
        fn error(&self, _err: &dyn std::error::Error) {}
        fn end(&self) {
            if let Ok(mut spans) = self.spans.lock() {
                spans.push(self.name.clone());
            }
        }
    }

    impl Tracer for Recording {
        fn start(&self, name: &str, _attrs: &[(&str, Value)]) -> Box<dyn Span> {
            Box::new(RecordingSpan {
                name: name.to_owned(),
                spans: Arc::clone(&self.spans),
            })
        }
    }

    #[test]
    fn spans_record_on_end() {
        let tracer = Recording::default();
        let spans = Arc::clone(&tracer.spans);
        let tracer: Arc<dyn Tracer> = Arc::new(tracer);
        let span = start_span(Some(&tracer), op::AGENT_EXECUTE, &[]);
        end_span(span);
        assert_eq!(spans.lock().unwrap().as_slice(), [op::AGENT_EXECUTE]);
    }

    #[test]
    fn noop_tracer_is_silent() {
        let span = NoopTracer.start(op::WORKFLOW_STEP, &[("step", Value::from("a"))]);
        span.set_attr("k", Value::from(1));
        span.event("tick");
        span.end();
    }
}
