//! Reactive DAG execution.
//!
//! No wave-based batching: each step carries a remaining-in-degree counter,
//! roots launch immediately, and every completion decrements its
//! dependents' counters, launching any that reach zero. Fast branches never
//! wait for slow siblings.
//!
//! Failure is fail-fast: the first failed step cancels the execution
//! context, in-flight steps terminate cooperatively, and downstream steps
//! are skipped recursively. A `when` guard returning false skips only the
//! step itself — its dependents still run. A suspend signal ends the
//! execution like a failure for downstream purposes, but captures a
//! resumable snapshot of completed results and context values.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{ResumeFn, Suspension};
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSender, StreamEvent};
use crate::result::{AgentResult, StepKind as TraceKind, StepTrace};
use crate::task::AgentTask;
use crate::trace::{self, op};
use crate::usage::Usage;
use crate::workflow::context::{CTX_INPUT, CTX_RESUME, WorkflowContext};
use crate::workflow::graph::WorkflowInner;
use crate::workflow::result::{
    SkipReason, StepResult, WorkflowError, WorkflowResult, WorkflowStatus,
};
use crate::workflow::step::{IterItem, Step, StepKind};

/// State carried into a (re-)execution of the DAG: results that already
/// satisfy dependents, a context snapshot, the resume payload, and the
/// traces billed by the first leg.
#[derive(Default)]
pub(crate) struct WorkflowSeed {
    pub(crate) presets: HashMap<String, StepResult>,
    pub(crate) context: Option<HashMap<String, Value>>,
    pub(crate) resume_input: Option<String>,
    pub(crate) traces: Vec<StepTrace>,
}

/// What one launched step reported back.
enum Outcome {
    Success(Option<String>),
    Failed(Error),
    Suspended(Value),
}

struct Completion {
    name: String,
    outcome: Outcome,
    duration: Duration,
    usage: Usage,
}

impl WorkflowInner {
    /// Execute the DAG.
    pub(crate) async fn run(
        self: &Arc<Self>,
        task: AgentTask,
        events: EventSender,
        seed: WorkflowSeed,
    ) -> Result<AgentResult> {
        let span = trace::start_span(
            self.tracer.as_ref(),
            op::WORKFLOW_EXECUTE,
            &[("workflow", Value::from(self.name.clone()))],
        );
        let result = self.run_dag(task, events, seed).await;
        trace::end_span(span);
        result
    }

    #[allow(clippy::too_many_lines)]
    async fn run_dag(
        self: &Arc<Self>,
        task: AgentTask,
        events: EventSender,
        seed: WorkflowSeed,
    ) -> Result<AgentResult> {
        let ctx = Arc::new(match seed.context {
            Some(values) => WorkflowContext::from_values(values),
            None => WorkflowContext::new(&task.task),
        });
        if let Some(input) = &seed.resume_input {
            ctx.set(CTX_RESUME, Value::String(input.clone()));
        }

        let cancel = events.cancellation().child_token();
        let mut completed: HashMap<String, StepResult> = seed.presets;
        let mut remaining: HashMap<String, usize> = HashMap::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        for step in &self.steps {
            if completed.contains_key(&step.name) {
                continue;
            }
            let unmet = step
                .after
                .iter()
                .filter(|dep| !completed.contains_key(*dep))
                .count();
            remaining.insert(step.name.clone(), unmet);
            if unmet == 0 {
                ready.push_back(step.name.clone());
            }
        }

        let mut traces = seed.traces;
        let mut last_success_output: Option<String> = None;
        let mut first_failure: Option<(String, Error)> = None;
        let mut suspended: Option<(String, Value)> = None;
        let mut inflight = 0usize;
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(self.steps.len().max(1));

        loop {
            while let Some(name) = ready.pop_front() {
                let Some(&slot) = self.index.get(&name) else {
                    continue;
                };
                let step = Arc::clone(&self.steps[slot]);

                let failed_upstream = step.after.iter().any(|dep| {
                    completed
                        .get(dep)
                        .is_some_and(|result| !result.satisfies_dependents())
                });
                if failed_upstream {
                    self.record_completion(
                        &name,
                        StepResult::skipped(SkipReason::UpstreamFailure),
                        &mut completed,
                        &mut remaining,
                        &mut ready,
                    );
                    continue;
                }

                if let Some(when) = &step.when {
                    if !when(&ctx) {
                        debug!(step = %name, "condition guard false; skipping");
                        self.record_completion(
                            &name,
                            StepResult::skipped(SkipReason::Condition),
                            &mut completed,
                            &mut remaining,
                            &mut ready,
                        );
                        continue;
                    }
                }

                inflight += 1;
                self.spawn_step(
                    step,
                    Arc::clone(&ctx),
                    task.clone(),
                    events.clone(),
                    cancel.clone(),
                    done_tx.clone(),
                );
            }

            if inflight == 0 {
                break;
            }
            let Some(completion) = done_rx.recv().await else {
                break;
            };
            inflight -= 1;

            let result = match completion.outcome {
                Outcome::Success(output) => {
                    if let Some(output) = &output {
                        last_success_output = Some(output.clone());
                    }
                    StepResult::success(output, completion.duration)
                }
                Outcome::Failed(error) => {
                    let message = error.to_string();
                    if first_failure.is_none() {
                        first_failure = Some((completion.name.clone(), error));
                        cancel.cancel();
                    }
                    StepResult::failed(message, completion.duration)
                }
                Outcome::Suspended(payload) => {
                    if suspended.is_none() {
                        suspended = Some((completion.name.clone(), payload));
                    }
                    StepResult::suspended(completion.duration)
                }
            };

            traces.push(StepTrace::new(
                &completion.name,
                TraceKind::Step,
                "",
                result
                    .output
                    .as_deref()
                    .or(result.error.as_deref())
                    .unwrap_or_default(),
                completion.usage,
                completion.duration,
            ));
            self.record_completion(
                &completion.name,
                result,
                &mut completed,
                &mut remaining,
                &mut ready,
            );
        }

        let status = if suspended.is_some() {
            WorkflowStatus::Suspended
        } else if first_failure.is_some() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Success
        };
        let workflow_result = WorkflowResult {
            status,
            steps: completed.clone(),
            context: ctx.snapshot(),
            usage: ctx.usage(),
        };

        if let Some((step_name, payload)) = suspended {
            return self.suspend_workflow(
                step_name,
                payload,
                task,
                &completed,
                &ctx,
                traces,
            );
        }
        if let Some((step_name, source)) = first_failure {
            return Err(Error::Workflow(Box::new(WorkflowError {
                step: step_name,
                source: Box::new(source),
                result: Box::new(workflow_result),
            })));
        }
        Ok(AgentResult {
            output: last_success_output.unwrap_or_default(),
            attachments: Vec::new(),
            usage: workflow_result.usage,
            steps: traces,
        })
    }

    /// Record a completed step and wake any dependent whose counter hits
    /// zero.
    fn record_completion(
        &self,
        name: &str,
        result: StepResult,
        completed: &mut HashMap<String, StepResult>,
        remaining: &mut HashMap<String, usize>,
        ready: &mut VecDeque<String>,
    ) {
        completed.insert(name.to_owned(), result);
        let Some(dependents) = self.dependents.get(name) else {
            return;
        };
        for dependent in dependents {
            if completed.contains_key(dependent) {
                continue;
            }
            if let Some(count) = remaining.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.push_back(dependent.clone());
                }
            }
        }
    }

    fn spawn_step(
        self: &Arc<Self>,
        step: Arc<Step>,
        ctx: Arc<WorkflowContext>,
        task: AgentTask,
        events: EventSender,
        cancel: CancellationToken,
        done_tx: mpsc::Sender<Completion>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let span = trace::start_span(
                inner.tracer.as_ref(),
                op::WORKFLOW_STEP,
                &[("step", Value::from(step.name.clone()))],
            );
            events.send(StreamEvent::step_start(&step.name)).await;
            let started = Instant::now();

            let run = inner.run_step_with_retry(&step, &ctx, &task, &events, &cancel);
            let (outcome, usage) = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(done) => done,
                Err(_) => (
                    Outcome::Failed(Error::internal(format!("step '{}' panicked", step.name))),
                    Usage::zero(),
                ),
            };

            let duration = started.elapsed();
            events
                .send(StreamEvent::step_finish(&step.name, duration))
                .await;
            trace::end_span(span);
            let _ = done_tx
                .send(Completion {
                    name: step.name.clone(),
                    outcome,
                    duration,
                    usage,
                })
                .await;
        });
    }

    /// Run one step under its retry policy. Suspension and cancellation
    /// short-circuit retry.
    async fn run_step_with_retry(
        &self,
        step: &Step,
        ctx: &Arc<WorkflowContext>,
        task: &AgentTask,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> (Outcome, Usage) {
        let attempts = 1 + step.retry.map_or(0, |policy| policy.attempts);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return (Outcome::Failed(Error::Cancelled), Usage::zero());
            }
            match self.run_step_once(step, ctx, task, events, cancel).await {
                Ok((output, usage)) => return (Outcome::Success(output), usage),
                Err(Error::Suspend { payload }) => {
                    return (Outcome::Suspended(payload), Usage::zero());
                }
                Err(Error::Suspended(inner)) => {
                    // A nested agent suspended. The DAG owns resumption: we
                    // record the payload and release the inner handle; the
                    // re-run executes the step afresh.
                    let payload = inner.payload().clone();
                    inner.release();
                    return (Outcome::Suspended(payload), Usage::zero());
                }
                Err(Error::Cancelled) => return (Outcome::Failed(Error::Cancelled), Usage::zero()),
                Err(error) => {
                    if attempt >= attempts {
                        return (Outcome::Failed(error), Usage::zero());
                    }
                    let Some(policy) = step.retry else {
                        return (Outcome::Failed(error), Usage::zero());
                    };
                    let backoff = policy.delay * 2u32.saturating_pow(attempt as u32 - 1);
                    debug!(
                        step = %step.name,
                        attempt,
                        delay_ms = backoff.as_millis() as u64,
                        "step failed; retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = cancel.cancelled() => {
                            return (Outcome::Failed(Error::Cancelled), Usage::zero());
                        }
                    }
                }
            }
        }
    }

    async fn run_step_once(
        &self,
        step: &Step,
        ctx: &Arc<WorkflowContext>,
        task: &AgentTask,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<(Option<String>, Usage)> {
        match &step.kind {
            StepKind::Basic { run } => {
                run(Arc::clone(ctx)).await?;
                let output = ctx
                    .get(&format!("{}.output", step.name))
                    .map(|v| value_to_string(&v));
                Ok((output, Usage::zero()))
            }

            StepKind::Agent {
                agent,
                input_from,
                output_to,
            } => {
                let input = input_from
                    .as_ref()
                    .and_then(|key| ctx.get(key))
                    .or_else(|| ctx.get(CTX_INPUT))
                    .map_or_else(|| task.task.clone(), |v| value_to_string(&v));
                let child = task.child(input);
                let result = agent.execute(child).await?;
                ctx.add_usage(result.usage);
                let key = output_to
                    .clone()
                    .unwrap_or_else(|| format!("{}.output", step.name));
                ctx.set(key, Value::String(result.output.clone()));
                Ok((Some(result.output), result.usage))
            }

            StepKind::Tool {
                tool,
                args_from,
                output_to,
            } => {
                let args = args_from
                    .as_ref()
                    .and_then(|key| ctx.get(key))
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                let output = self.toolbox.execute(tool, args, events).await?;
                let key = output_to
                    .clone()
                    .unwrap_or_else(|| format!("{}.result", step.name));
                ctx.set(key, Value::String(output.content.clone()));
                Ok((Some(output.content), Usage::zero()))
            }

            StepKind::ForEach {
                iter_over,
                concurrency,
                run,
            } => {
                let collection = ctx.get(iter_over).ok_or_else(|| {
                    Error::internal(format!(
                        "step '{}' iterates over missing key '{iter_over}'",
                        step.name
                    ))
                })?;
                let Value::Array(items) = collection else {
                    return Err(Error::internal(format!(
                        "step '{}' iterates over non-array '{iter_over}'",
                        step.name
                    )));
                };

                let total = items.len();
                let child_cancel = cancel.child_token();
                let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
                let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));

                futures::stream::iter(items.into_iter().enumerate().map(|(index, value)| {
                    let run = Arc::clone(run);
                    let ctx = Arc::clone(ctx);
                    let child_cancel = child_cancel.clone();
                    let first_error = Arc::clone(&first_error);
                    let done = Arc::clone(&done);
                    let events = events.clone();
                    let name = step.name.clone();
                    async move {
                        if child_cancel.is_cancelled() {
                            return;
                        }
                        match run(IterItem { value, index }, ctx).await {
                            Ok(()) => {
                                let finished =
                                    done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                                events
                                    .send(StreamEvent {
                                        name: Some(name),
                                        content: format!("{finished}/{total}"),
                                        ..StreamEvent::of(EventKind::StepProgress)
                                    })
                                    .await;
                            }
                            Err(error) => {
                                // First error wins; storing never blocks.
                                if let Ok(mut slot) = first_error.lock() {
                                    if slot.is_none() {
                                        *slot = Some(error);
                                    }
                                }
                                child_cancel.cancel();
                            }
                        }
                    }
                }))
                .buffer_unordered((*concurrency).max(1))
                .for_each(|()| futures::future::ready(()))
                .await;

                let failure = first_error.lock().ok().and_then(|mut slot| slot.take());
                match failure {
                    Some(error) => Err(error),
                    None => Ok((None, Usage::zero())),
                }
            }

            StepKind::DoUntil {
                run,
                until,
                max_iter,
            } => {
                let cap = max_iter.unwrap_or(10);
                let mut iterations = 0;
                loop {
                    if iterations >= cap {
                        return Err(Error::MaxIterExceeded { iterations: cap });
                    }
                    run(Arc::clone(ctx)).await?;
                    iterations += 1;
                    if until(ctx) {
                        return Ok((None, Usage::zero()));
                    }
                }
            }

            StepKind::DoWhile {
                run,
                while_cond,
                max_iter,
            } => {
                let cap = max_iter.unwrap_or(10);
                let mut iterations = 0;
                loop {
                    if iterations >= cap {
                        return Err(Error::MaxIterExceeded { iterations: cap });
                    }
                    run(Arc::clone(ctx)).await?;
                    iterations += 1;
                    if !while_cond(ctx) {
                        return Ok((None, Usage::zero()));
                    }
                }
            }
        }
    }

    /// Build the workflow suspension: snapshot completed results (not
    /// failure-skipped steps) and context values; the resume closure
    /// reconstructs the context, injects the answer under the reserved key,
    /// and re-runs the DAG.
    fn suspend_workflow(
        self: &Arc<Self>,
        step_name: String,
        payload: Value,
        task: AgentTask,
        completed: &HashMap<String, StepResult>,
        ctx: &WorkflowContext,
        traces: Vec<StepTrace>,
    ) -> Result<AgentResult> {
        let presets: HashMap<String, StepResult> = completed
            .iter()
            .filter(|(_, result)| result.satisfies_dependents())
            .map(|(name, result)| (name.clone(), result.clone()))
            .collect();
        let context = ctx.snapshot();

        let estimate = serde_json::to_string(&context).map_or(0, |s| s.len())
            + presets
                .values()
                .map(|r| r.output.as_ref().map_or(0, String::len))
                .sum::<usize>();
        if !self.budget.try_reserve(estimate) {
            warn!(
                workflow = %self.name,
                step = %step_name,
                estimate, "suspension budget exceeded; propagating step error"
            );
            return Err(Error::Suspend { payload });
        }

        let inner = Arc::clone(self);
        let budget = Arc::clone(&self.budget);
        let release = Box::new(move || budget.release(estimate));
        let resume: ResumeFn = Box::new(move |input: String| {
            Box::pin(async move {
                inner
                    .run(
                        task,
                        EventSender::disabled(),
                        WorkflowSeed {
                            presets,
                            context: Some(context),
                            resume_input: Some(input),
                            traces,
                        },
                    )
                    .await
            })
        });

        Err(Error::Suspended(Suspension::new(
            step_name,
            payload,
            estimate,
            resume,
            release,
            self.suspend_ttl,
        )))
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
