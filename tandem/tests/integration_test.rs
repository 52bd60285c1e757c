//! End-to-end scenarios over the scripted mock provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use tandem::{
    Agent, AgentResult, AgentTask, Attachment, ChatRequest, ChatResponse, Error, EventKind,
    EventSender, InputHandler, InputRequest, LoopAgent, MockProvider, Network, Processor, Role,
    Step, Tool, ToolDefinition, ToolOutput, Usage, Workflow, WorkflowContext, suspend,
};

fn object_schema() -> Value {
    json!({"type": "object"})
}

/// A tool that records invocations and echoes a canned reply per name.
struct ScriptedTool {
    names: Vec<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedTool {
    fn new(names: Vec<&'static str>) -> Self {
        Self {
            names,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.names
            .iter()
            .map(|n| ToolDefinition::new(*n, format!("The {n} tool"), object_schema()))
            .collect()
    }

    async fn execute(&self, name: &str, _args: Value) -> tandem::Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text(format!("{name} output")))
    }
}

/// A tool that panics for one name and succeeds for the rest.
struct PanickyTool;

#[async_trait]
impl Tool for PanickyTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ["x", "y", "z"]
            .iter()
            .map(|n| ToolDefinition::new(*n, "test tool", object_schema()))
            .collect()
    }

    async fn execute(&self, name: &str, _args: Value) -> tandem::Result<ToolOutput> {
        assert!(name != "y", "tool y exploded");
        Ok(ToolOutput::text(format!("{name} ok")))
    }
}

#[tokio::test]
async fn sequential_tools_trace_in_order_and_sum_usage() {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("a", json!({}));
    provider.push_tool_call("b", json!({}));
    provider.push_text("done");

    let agent = LoopAgent::builder("seq")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(ScriptedTool::new(vec!["a", "b"])))
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("A then B")).await.unwrap();
    assert_eq!(result.output, "done");
    let names: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    // Three LLM calls at (10, 10) each; tool dispatches bill nothing.
    assert_eq!(result.usage, Usage::new(30, 30));
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn parallel_tools_survive_a_panicking_tool() {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_calls(vec![
        ("x".into(), json!({})),
        ("y".into(), json!({})),
        ("z".into(), json!({})),
    ]);
    provider.push_text("combined");

    let agent = LoopAgent::builder("par")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(PanickyTool))
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("run all three")).await.unwrap();
    assert_eq!(result.output, "combined");
    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.steps[0].output, "x ok");
    assert!(result.steps[1].output.starts_with("error:"));
    assert_eq!(result.steps[2].output, "z ok");

    // All three results entered the next request, in input order.
    let followup = &provider.requests()[1];
    let tool_messages: Vec<&str> = followup
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(tool_messages.len(), 3);
    assert_eq!(tool_messages[0], "x ok");
    assert!(tool_messages[1].starts_with("error:"));
}

#[tokio::test]
async fn iteration_cap_forces_exactly_one_synthesis_call() {
    let provider = Arc::new(MockProvider::new());
    for _ in 0..3 {
        provider.push_tool_call("a", json!({}));
    }
    provider.push_text("synthesized");

    let agent = LoopAgent::builder("capped")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(ScriptedTool::new(vec!["a"])))
        .max_iterations(3)
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("loop forever")).await.unwrap();
    assert_eq!(result.output, "synthesized");
    assert_eq!(provider.call_count(), 4); // 3 iterations + 1 synthesis

    // The synthesis request advertises no tools and appends the nudge.
    let synthesis = provider.requests().into_iter().next_back().unwrap();
    assert!(synthesis.tools.is_empty());
    let last_user = synthesis
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .unwrap()
        .content
        .clone();
    assert!(last_user.contains("final answer"));
}

#[tokio::test]
async fn tool_results_are_truncated_with_marker() {
    struct LongTool;

    #[async_trait]
    impl Tool for LongTool {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition::new("dump", "dump data", object_schema())]
        }

        async fn execute(&self, _name: &str, _args: Value) -> tandem::Result<ToolOutput> {
            Ok(ToolOutput::text("x".repeat(500)))
        }
    }

    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("dump", json!({}));
    provider.push_text("ok");

    let agent = LoopAgent::builder("trunc")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(LongTool))
        .tool_result_max_chars(100)
        .build()
        .unwrap();

    agent.execute(AgentTask::new("dump")).await.unwrap();
    let followup = &provider.requests()[1];
    let tool_message = followup
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_message.content.len() < 200);
    assert!(tool_message.content.ends_with("...[truncated]"));
}

#[tokio::test]
async fn attachment_bytes_cap_keeps_first_fifty() {
    struct Hoarder;

    #[async_trait]
    impl Tool for Hoarder {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition::new("hoard", "emit blobs", object_schema())]
        }

        async fn execute(&self, _name: &str, _args: Value) -> tandem::Result<ToolOutput> {
            let mut output = ToolOutput::text("blobs");
            for i in 0..100 {
                output = output.with_attachment(
                    Attachment::new("application/octet-stream", vec![0u8; 1024 * 1024])
                        .with_name(format!("blob-{i}")),
                );
            }
            Ok(output)
        }
    }

    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("hoard", json!({}));
    provider.push_text("ok");

    let agent = LoopAgent::builder("bounded")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(Hoarder))
        .attachment_limits(1000, 50 * 1024 * 1024)
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("hoard")).await.unwrap();
    assert_eq!(result.attachments.len(), 50);
    assert_eq!(result.attachments[0].name.as_deref(), Some("blob-0"));
    assert_eq!(result.attachments[49].name.as_deref(), Some("blob-49"));
}

/// Suspends on the nth `pre_llm` invocation.
struct SuspendOnNth {
    n: usize,
    seen: AtomicUsize,
    payload: Value,
}

#[async_trait]
impl Processor for SuspendOnNth {
    async fn pre_llm(&self, _request: &mut ChatRequest) -> tandem::Result<()> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.n {
            return Err(suspend(self.payload.clone()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn suspend_and_resume_carries_usage_across_both_legs() {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("a", json!({}));
    // After resume: one final answer.
    provider.push_text("resumed answer");

    let agent = LoopAgent::builder("pausable")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(ScriptedTool::new(vec!["a"])))
        .processor(Arc::new(SuspendOnNth {
            n: 2,
            seen: AtomicUsize::new(0),
            payload: json!({"approval": "needed"}),
        }))
        .build()
        .unwrap();

    let err = agent.execute(AgentTask::new("start")).await.unwrap_err();
    let Error::Suspended(suspension) = err else {
        panic!("expected suspension, got {err}");
    };
    assert_eq!(suspension.step(), "pausable");
    assert_eq!(suspension.payload()["approval"], "needed");

    let result = suspension.resume("yes").await.unwrap();
    assert_eq!(result.output, "resumed answer");
    // First leg: one LLM call (10, 10). Second leg: one more.
    assert_eq!(result.usage, Usage::new(20, 20));
    // The resumed conversation saw the human's answer.
    let last_request = provider.requests().into_iter().next_back().unwrap();
    assert!(
        last_request
            .messages
            .iter()
            .any(|m| m.content.contains("Human input: yes"))
    );

    // Single use.
    assert!(suspension.resume("again").await.is_err());
}

#[tokio::test]
async fn suspension_budget_rejects_over_limit_with_raw_signal() {
    struct AlwaysSuspend;

    #[async_trait]
    impl Processor for AlwaysSuspend {
        async fn pre_llm(&self, _request: &mut ChatRequest) -> tandem::Result<()> {
            Err(suspend(json!("pause")))
        }
    }

    let agent = LoopAgent::builder("budgeted")
        .provider(Arc::new(MockProvider::new()) as Arc<dyn tandem::Provider>)
        .processor(Arc::new(AlwaysSuspend))
        .suspend_budget(2, usize::MAX)
        .build()
        .unwrap();

    let first = agent.execute(AgentTask::new("one")).await.unwrap_err();
    assert!(matches!(first, Error::Suspended(_)));
    let second = agent.execute(AgentTask::new("two")).await.unwrap_err();
    assert!(matches!(second, Error::Suspended(_)));
    // Third suspension exceeds the count cap: the raw processor signal
    // propagates unchanged.
    let third = agent.execute(AgentTask::new("three")).await.unwrap_err();
    assert!(matches!(third, Error::Suspend { .. }));

    // Releasing one frees budget for the next.
    if let Error::Suspended(s) = &first {
        s.release();
    }
    let fourth = agent.execute(AgentTask::new("four")).await.unwrap_err();
    assert!(matches!(fourth, Error::Suspended(_)));
}

#[tokio::test]
async fn halt_processor_ends_gracefully() {
    struct HaltAfterLlm;

    #[async_trait]
    impl Processor for HaltAfterLlm {
        async fn post_llm(&self, response: &mut ChatResponse) -> tandem::Result<()> {
            response.content = "halted politely".to_owned();
            Err(tandem::halt())
        }
    }

    let provider = Arc::new(MockProvider::new());
    provider.push_text("original");

    let agent = LoopAgent::builder("haltable")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .processor(Arc::new(HaltAfterLlm))
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("go")).await.unwrap();
    assert_eq!(result.output, "halted politely");
}

struct CannedInput;

#[async_trait]
impl InputHandler for CannedInput {
    async fn request_input(&self, request: InputRequest) -> tandem::Result<String> {
        assert_eq!(request.question, "how many?");
        Ok("42".to_owned())
    }
}

#[tokio::test]
async fn ask_user_builtin_round_trips_an_answer() {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("ask_user", json!({"question": "how many?"}));
    provider.push_text("the answer is 42");

    let agent = LoopAgent::builder("asker")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .input_handler(Arc::new(CannedInput))
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("count things")).await.unwrap();
    assert_eq!(result.output, "the answer is 42");
    let followup = &provider.requests()[1];
    let tool_message = followup
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_message.content, "42");
}

#[tokio::test]
async fn execute_plan_builtin_fans_out_steps() {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call(
        "execute_plan",
        json!({"steps": [
            {"tool": "a", "args": {}},
            {"tool": "b", "args": {}}
        ]}),
    );
    provider.push_text("planned");

    let agent = LoopAgent::builder("planner")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(ScriptedTool::new(vec!["a", "b"])))
        .enable_plan_execution()
        .build()
        .unwrap();

    let result = agent.execute(AgentTask::new("plan it")).await.unwrap();
    assert_eq!(result.output, "planned");
    let followup = &provider.requests()[1];
    let plan_result = followup
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    let rendered: Vec<Value> = serde_json::from_str(&plan_result.content).unwrap();
    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[0]["content"], "a output");
}

#[tokio::test]
async fn streaming_emits_ordered_events_and_closes_once() {
    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("a", json!({}));
    provider.push_text("final text");

    let agent = LoopAgent::builder("streamer")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .tool(Arc::new(ScriptedTool::new(vec!["a"])))
        .build()
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let events = EventSender::new(tx, tandem::CancellationToken::new());
    let result = agent
        .execute_stream(AgentTask::new("go"), events)
        .await
        .unwrap();
    assert_eq!(result.output, "final text");

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        kinds.push(event.kind);
    }
    // Channel closed (recv returned None) and the order holds.
    let start_pos = kinds
        .iter()
        .position(|k| *k == EventKind::ToolCallStart)
        .unwrap();
    let result_pos = kinds
        .iter()
        .position(|k| *k == EventKind::ToolCallResult)
        .unwrap();
    assert!(start_pos < result_pos);
    assert_eq!(kinds[0], EventKind::InputReceived);
    assert!(kinds.contains(&EventKind::ProcessingStart));
    assert_eq!(kinds.last(), Some(&EventKind::TextDelta));
}

#[tokio::test]
async fn network_delegation_bills_sub_agent_usage() {
    struct Worker;

    #[async_trait]
    impl Agent for Worker {
        fn name(&self) -> &str {
            "worker"
        }
        fn description(&self) -> &str {
            "Does the work"
        }
        async fn execute(&self, task: AgentTask) -> tandem::Result<AgentResult> {
            assert_eq!(task.task, "delegated piece");
            Ok(AgentResult {
                output: "piece done".to_owned(),
                attachments: vec![Attachment::new("text/plain", "receipt")],
                usage: Usage::new(7, 3),
                steps: Vec::new(),
            })
        }
    }

    let provider = Arc::new(MockProvider::new());
    provider.push_tool_call("agent_worker", json!({"task": "delegated piece"}));
    provider.push_text("all done");

    let network = Network::builder("boss")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .agent(Arc::new(Worker))
        .build()
        .unwrap();

    let result = network.execute(AgentTask::new("do it")).await.unwrap();
    assert_eq!(result.output, "all done");
    // Two router LLM calls (10,10 each) plus the worker's (7,3).
    assert_eq!(result.usage, Usage::new(27, 23));
    // The worker's attachment propagated to the parent result.
    assert_eq!(result.attachments.len(), 1);
}

#[tokio::test]
async fn workflow_agent_step_feeds_context_and_usage() {
    let provider = Arc::new(MockProvider::new());
    provider.push_text("summarized!");

    let summarizer = LoopAgent::builder("summarizer")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .build()
        .unwrap();

    let workflow = Workflow::builder("pipeline")
        .step(Step::basic("prepare", |ctx: Arc<WorkflowContext>| async move {
            ctx.set("prepared", json!("cleaned text"));
            Ok(())
        }))
        .step(
            Step::agent("summarize", Arc::new(summarizer))
                .after(["prepare"])
                .input_from("prepared"),
        )
        .build()
        .unwrap();

    let result = workflow.execute(AgentTask::new("raw text")).await.unwrap();
    assert_eq!(result.output, "summarized!");
    assert_eq!(result.usage, Usage::new(10, 10));
    // The agent actually received the prepared input.
    let request = provider.requests().into_iter().next().unwrap();
    assert!(request.messages.iter().any(|m| m.content == "cleaned text"));
}

#[tokio::test]
async fn memory_persists_the_exchange() {
    let store = Arc::new(tandem::InMemoryStore::new());
    let provider = Arc::new(MockProvider::new());
    provider.push_text("hello there");

    let agent = LoopAgent::builder("remembering")
        .provider(Arc::clone(&provider) as Arc<dyn tandem::Provider>)
        .store(Arc::clone(&store) as Arc<dyn tandem::Store>)
        .build()
        .unwrap();

    let task = AgentTask::new("hi").with_thread_id("thread-1");
    agent.execute(task).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let messages = tandem::Store::get_messages(&*store, "thread-1", 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "hello there");

    // History flows into the next turn of the same thread.
    provider.push_text("again");
    let task = AgentTask::new("more").with_thread_id("thread-1");
    agent.execute(task).await.unwrap();
    let second_request = provider.requests().into_iter().next_back().unwrap();
    assert!(second_request.messages.iter().any(|m| m.content == "hi"));
    assert!(
        second_request
            .messages
            .iter()
            .any(|m| m.content == "hello there")
    );
}
