//! Agent with tracing / observability.
//!
//! Demonstrates how to wire up `tracing-subscriber` so that the agent's
//! structured logs (iterations, dispatches, persistence) are printed to
//! stderr, alongside a pluggable span exporter printing the spans the core
//! emits (`agent.execute`, `agent.loop.iteration`, ...).
//!
//! Run with: `cargo run --example agent_tracing`

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use serde_json::{Value, json};
use tandem::{Agent, AgentTask, LoopAgent, MockProvider, Span, Tracer};

/// A span exporter that prints span lifecycles to stderr.
struct PrintTracer;

struct PrintSpan {
    name: String,
}

impl Span for PrintSpan {
    fn set_attr(&self, key: &str, value: Value) {
        eprintln!("span {} attr {key}={value}", self.name);
    }

    fn event(&self, name: &str) {
        eprintln!("span {} event {name}", self.name);
    }

    fn error(&self, err: &dyn std::error::Error) {
        eprintln!("span {} error {err}", self.name);
    }

    fn end(&self) {
        eprintln!("span {} end", self.name);
    }
}

impl Tracer for PrintTracer {
    fn start(&self, name: &str, attrs: &[(&str, Value)]) -> Box<dyn Span> {
        eprintln!("span {name} start {attrs:?}");
        Box::new(PrintSpan {
            name: name.to_owned(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize a tracing subscriber that prints events to stderr.
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter("debug")
        .init();

    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("echo", json!({"text": "observability"}));
    provider.push_text("Traced and done.");

    let agent = LoopAgent::builder("traced-assistant")
        .provider(provider)
        .system_prompt("You are a helpful assistant.")
        .tool(Arc::new(EchoTool))
        .tracer(Arc::new(PrintTracer))
        .build()?;

    let result = agent.execute(AgentTask::new("Echo something back.")).await?;
    println!("{}", result.output);

    Ok(())
}

/// Minimal tool so the loop has something to dispatch.
struct EchoTool;

#[async_trait::async_trait]
impl tandem::Tool for EchoTool {
    fn definitions(&self) -> Vec<tandem::ToolDefinition> {
        vec![tandem::ToolDefinition::new(
            "echo",
            "Echo the given text.",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        )]
    }

    async fn execute(&self, _name: &str, args: Value) -> tandem::Result<tandem::ToolOutput> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(tandem::ToolOutput::text(text))
    }
}
