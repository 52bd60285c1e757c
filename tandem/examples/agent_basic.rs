//! Basic example demonstrating a tool-calling agent.
//!
//! The core ships no LLM backend, so this example drives the loop with the
//! scripted [`MockProvider`]; swap in any [`tandem::Provider`]
//! implementation for a real model.
//!
//! Run with: `cargo run --example agent_basic`

#![allow(clippy::print_stdout)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tandem::{Agent, AgentTask, LoopAgent, MockProvider, Tool, ToolDefinition, ToolOutput};

/// A simple calculator tool.
#[derive(Debug, Clone, Copy, Default)]
struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "calculator",
            "Perform basic arithmetic operations (add, subtract, multiply, divide).",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number", "description": "First operand"},
                    "b": {"type": "number", "description": "Second operand"},
                    "operation": {
                        "type": "string",
                        "description": "Operation: add, subtract, multiply, divide",
                        "enum": ["add", "subtract", "multiply", "divide"]
                    }
                },
                "required": ["a", "b", "operation"]
            }),
        )]
    }

    async fn execute(&self, _name: &str, args: Value) -> tandem::Result<ToolOutput> {
        let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
        let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
        let result = match args.get("operation").and_then(Value::as_str) {
            Some("add") => a + b,
            Some("subtract") => a - b,
            Some("multiply") => a * b,
            Some("divide") if b != 0.0 => a / b,
            Some("divide") => return Err(tandem::Error::tool("calculator", "division by zero")),
            other => {
                return Err(tandem::Error::tool(
                    "calculator",
                    format!("unknown operation {other:?}"),
                ));
            }
        };
        Ok(ToolOutput::text(result.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Script the provider: one tool call, then a final answer.
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call(
        "calculator",
        json!({"a": 21.0, "b": 2.0, "operation": "multiply"}),
    );
    provider.push_text("21 times 2 is 42.");

    let agent = LoopAgent::builder("assistant")
        .provider(provider)
        .system_prompt("You are a helpful assistant. Keep answers concise.")
        .tool(Arc::new(CalculatorTool))
        .build()?;

    let result = agent.execute(AgentTask::new("What is 21 times 2?")).await?;

    println!("{}", result.output);
    for step in &result.steps {
        println!("  {} -> {}", step.name, step.output);
    }
    println!("tokens: {}", result.usage.total_tokens);

    Ok(())
}
