//! Workflow example: an explicit step DAG with fan-out and a join.
//!
//! Builds `fetch -> {headline, wordcount} -> report` and runs it. The two
//! middle steps execute concurrently; `report` waits for both and reads
//! their outputs from the shared context.
//!
//! Run with: `cargo run --example workflow_steps`

#![allow(clippy::print_stdout)]

use std::sync::Arc;

use serde_json::json;
use tandem::{Agent, AgentTask, Step, Workflow, WorkflowContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let workflow = Workflow::builder("article-report")
        .step(Step::basic("fetch", |ctx: Arc<WorkflowContext>| async move {
            // A real step would pull the article from somewhere.
            ctx.set(
                "article",
                json!("Rivers shape the land more slowly than floods, but more surely."),
            );
            Ok(())
        }))
        .step(
            Step::basic("headline", |ctx: Arc<WorkflowContext>| async move {
                let article = ctx.resolve("{{article}}");
                let headline = article.split(',').next().unwrap_or(&article).to_owned();
                ctx.set("headline.output", json!(headline));
                Ok(())
            })
            .after(["fetch"]),
        )
        .step(
            Step::basic("wordcount", |ctx: Arc<WorkflowContext>| async move {
                let article = ctx.resolve("{{article}}");
                ctx.set(
                    "wordcount.output",
                    json!(article.split_whitespace().count()),
                );
                Ok(())
            })
            .after(["fetch"]),
        )
        .step(
            Step::basic("report", |ctx: Arc<WorkflowContext>| async move {
                let report = ctx.resolve("{{headline.output}} ({{wordcount.output}} words)");
                ctx.set("report.output", json!(report));
                Ok(())
            })
            .after(["headline", "wordcount"]),
        )
        .build()?;

    let result = workflow
        .execute(AgentTask::new("summarize the article"))
        .await?;

    println!("{}", result.output);
    for step in &result.steps {
        println!("  {} ({} ms)", step.name, step.duration.as_millis());
    }

    Ok(())
}
