//! Minimal streaming example.
//!
//! Drives an agent in streaming mode and prints events as they arrive:
//! text deltas flush straight to stdout, tool activity goes to stderr.
//!
//! Run with: `cargo run --example agent_streaming`

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::{Write, stdout};
use std::sync::Arc;

use serde_json::json;
use tandem::{
    Agent, AgentTask, CancellationToken, EventKind, EventSender, LoopAgent, MockProvider,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("agent_poet", json!({"task": "write one line about rivers"}));
    provider.push_text("");

    let poet = LoopAgent::builder("poet")
        .provider({
            let p = Arc::new(MockProvider::new());
            p.push_text("The river remembers every stone it passes.");
            p
        })
        .build()?;

    let agent = tandem::Network::builder("narrator")
        .provider(provider)
        .agent(Arc::new(poet))
        .build()?;

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let events = EventSender::new(tx, CancellationToken::new());
    let handle = tokio::spawn(async move {
        agent
            .execute_stream(AgentTask::new("Ask the poet for a line."), events)
            .await
    });

    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::TextDelta => {
                print!("{}", event.content);
                let _ = stdout().flush();
            }
            EventKind::AgentStart => {
                eprintln!("[delegating to {}]", event.name.as_deref().unwrap_or("?"));
            }
            EventKind::ToolCallStart | EventKind::ToolCallResult | EventKind::AgentFinish => {
                eprintln!("[{} {}]", event.kind, event.name.as_deref().unwrap_or(""));
            }
            _ => {}
        }
    }

    let result = handle.await??;
    println!("\n=> {}", result.output);

    Ok(())
}
