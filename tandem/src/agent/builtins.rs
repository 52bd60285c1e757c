//! Built-in tool shims: `ask_user`, `execute_plan`, `execute_code`.
//!
//! These appear in the advertised tool set only when the matching
//! capability is wired (an input handler, plan execution, a code runner).
//! They dispatch through the same function as ordinary tools, with
//! recursion fences: `ask_user` is blocked inside plans, and code runners
//! receive a wrapped dispatch that rejects nested `execute_plan` /
//! `execute_code`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::agent::dispatch::{DispatchFn, DispatchResult, dispatch_all};
use crate::input::{InputHandler, InputRequest};
use crate::message::ToolCall;
use crate::tool::ToolDefinition;

/// Name of the human-input built-in.
pub const TOOL_ASK_USER: &str = "ask_user";

/// Name of the plan-execution built-in.
pub const TOOL_EXECUTE_PLAN: &str = "execute_plan";

/// Name of the code-execution built-in.
pub const TOOL_EXECUTE_CODE: &str = "execute_code";

/// Cap on steps within one plan.
const MAX_PLAN_STEPS: usize = 50;

/// Names blocked inside a plan.
pub(crate) const PLAN_BLOCKED: &[&str] = &[TOOL_ASK_USER];

/// Names blocked inside sandboxed code.
pub(crate) const CODE_BLOCKED: &[&str] = &[TOOL_EXECUTE_PLAN, TOOL_EXECUTE_CODE];

/// Definitions for the enabled built-ins.
pub(crate) fn definitions(
    has_input_handler: bool,
    plan_execution: bool,
    has_code_runner: bool,
) -> Vec<ToolDefinition> {
    let mut defs = Vec::new();
    if has_input_handler {
        defs.push(ToolDefinition::new(
            TOOL_ASK_USER,
            "Ask the human a question and wait for their answer.",
            json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string", "description": "The question to ask."},
                    "options": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional fixed choices."
                    }
                },
                "required": ["question"]
            }),
        ));
    }
    if plan_execution {
        defs.push(ToolDefinition::new(
            TOOL_EXECUTE_PLAN,
            "Execute a list of tool calls in parallel and return their results as a JSON array.",
            json!({
                "type": "object",
                "properties": {
                    "steps": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "tool": {"type": "string"},
                                "args": {"type": "object"}
                            },
                            "required": ["tool"]
                        }
                    }
                },
                "required": ["steps"]
            }),
        ));
    }
    if has_code_runner {
        defs.push(ToolDefinition::new(
            TOOL_EXECUTE_CODE,
            "Run code in a sandbox. The sandbox can call registered tools.",
            json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "The code to run."},
                    "runtime": {"type": "string", "description": "Optional runtime hint."}
                },
                "required": ["code"]
            }),
        ));
    }
    defs
}

/// Wrap a dispatch function so that calls to `blocked` names fail without
/// reaching their handler.
pub(crate) fn wrap_blocking(dispatch: DispatchFn, blocked: &'static [&'static str]) -> DispatchFn {
    Arc::new(move |call: ToolCall| {
        if blocked.contains(&call.name.as_str()) {
            let name = call.name;
            return Box::pin(async move {
                DispatchResult::error(format!("'{name}' is not allowed in this context"))
            });
        }
        dispatch(call)
    })
}

#[derive(Deserialize)]
struct AskUserArgs {
    question: String,
    #[serde(default)]
    options: Vec<String>,
}

/// Dispatch `ask_user`. Handler failures are soft: they come back as tool
/// content so the model can route around a missing human.
pub(crate) async fn run_ask_user(handler: &dyn InputHandler, args: &Value) -> DispatchResult {
    let parsed: AskUserArgs = match serde_json::from_value(args.clone()) {
        Ok(parsed) => parsed,
        Err(e) => return DispatchResult::error(format!("invalid ask_user arguments: {e}")),
    };
    let request = if parsed.options.is_empty() {
        InputRequest::new(parsed.question)
    } else {
        InputRequest::with_options(parsed.question, parsed.options)
    };
    match handler.request_input(request).await {
        Ok(answer) => DispatchResult::text(answer),
        Err(e) => DispatchResult::error(format!("input handler failed: {e}")),
    }
}

#[derive(Deserialize)]
struct PlanArgs {
    #[serde(default)]
    steps: Vec<PlanStep>,
}

#[derive(Deserialize)]
struct PlanStep {
    tool: String,
    #[serde(default)]
    args: Value,
}

/// Dispatch `execute_plan`: run each step through the (fenced) dispatch
/// function in parallel and return a JSON array of per-step results.
pub(crate) async fn run_plan(
    args: &Value,
    dispatch: DispatchFn,
    max_workers: usize,
    cancel: &CancellationToken,
) -> DispatchResult {
    let parsed: PlanArgs = match serde_json::from_value(args.clone()) {
        Ok(parsed) => parsed,
        Err(e) => return DispatchResult::error(format!("invalid plan: {e}")),
    };
    if parsed.steps.is_empty() {
        return DispatchResult::error("plan has no steps");
    }
    if parsed.steps.len() > MAX_PLAN_STEPS {
        return DispatchResult::error(format!(
            "plan has {} steps; the cap is {MAX_PLAN_STEPS}",
            parsed.steps.len()
        ));
    }

    let fenced = wrap_blocking(dispatch, PLAN_BLOCKED);
    let calls: Vec<ToolCall> = parsed
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| ToolCall::new(format!("plan-{i}"), step.tool.clone(), step.args.clone()))
        .collect();
    let results = dispatch_all(calls, fenced, max_workers, cancel).await;

    let mut usage = crate::usage::Usage::zero();
    let mut attachments = Vec::new();
    let rendered: Vec<Value> = parsed
        .steps
        .iter()
        .zip(&results)
        .map(|(step, result)| {
            json!({
                "tool": step.tool,
                "content": result.content,
                "is_error": result.is_error,
            })
        })
        .collect();
    for mut result in results {
        usage += result.usage;
        attachments.append(&mut result.attachments);
    }

    DispatchResult {
        content: Value::Array(rendered).to_string(),
        usage,
        attachments,
        is_error: false,
        duration: std::time::Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::Result;

    struct CannedInput(&'static str);

    #[async_trait]
    impl InputHandler for CannedInput {
        async fn request_input(&self, _request: InputRequest) -> Result<String> {
            Ok(self.0.to_owned())
        }
    }

    struct FailingInput;

    #[async_trait]
    impl InputHandler for FailingInput {
        async fn request_input(&self, _request: InputRequest) -> Result<String> {
            Err(crate::error::Error::internal("nobody home"))
        }
    }

    fn echo_dispatch() -> DispatchFn {
        Arc::new(|call: ToolCall| {
            Box::pin(async move { DispatchResult::text(format!("ran {}", call.name)) })
        })
    }

    #[test]
    fn definitions_follow_enabled_capabilities() {
        assert!(definitions(false, false, false).is_empty());
        let all = definitions(true, true, true);
        let names: Vec<&str> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, [TOOL_ASK_USER, TOOL_EXECUTE_PLAN, TOOL_EXECUTE_CODE]);
    }

    #[tokio::test]
    async fn ask_user_returns_answer() {
        let result = run_ask_user(&CannedInput("yes"), &json!({"question": "proceed?"})).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "yes");
    }

    #[tokio::test]
    async fn ask_user_handler_failure_is_soft() {
        let result = run_ask_user(&FailingInput, &json!({"question": "proceed?"})).await;
        assert!(result.is_error);
        assert!(result.content.contains("nobody home"));
    }

    #[tokio::test]
    async fn plan_runs_steps_and_renders_json() {
        let args = json!({"steps": [
            {"tool": "alpha", "args": {}},
            {"tool": "beta", "args": {}}
        ]});
        let result = run_plan(&args, echo_dispatch(), 10, &CancellationToken::new()).await;
        assert!(!result.is_error);
        let rendered: Vec<Value> = serde_json::from_str(&result.content).unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0]["content"], "ran alpha");
        assert_eq!(rendered[1]["tool"], "beta");
    }

    #[tokio::test]
    async fn plan_blocks_ask_user() {
        let args = json!({"steps": [{"tool": "ask_user", "args": {"question": "?"}}]});
        let result = run_plan(&args, echo_dispatch(), 10, &CancellationToken::new()).await;
        let rendered: Vec<Value> = serde_json::from_str(&result.content).unwrap();
        assert_eq!(rendered[0]["is_error"], true);
    }

    #[tokio::test]
    async fn plan_rejects_oversized_plans() {
        let steps: Vec<Value> = (0..51).map(|i| json!({"tool": format!("t{i}")})).collect();
        let result = run_plan(
            &json!({"steps": steps}),
            echo_dispatch(),
            10,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_error);
        assert!(result.content.contains("cap"));
    }

    #[tokio::test]
    async fn wrap_blocking_rejects_named_calls() {
        let fenced = wrap_blocking(echo_dispatch(), CODE_BLOCKED);
        let blocked = fenced(ToolCall::new("1", TOOL_EXECUTE_CODE, Value::Null)).await;
        assert!(blocked.is_error);
        let allowed = fenced(ToolCall::new("2", "other", Value::Null)).await;
        assert_eq!(allowed.content, "ran other");
    }
}
