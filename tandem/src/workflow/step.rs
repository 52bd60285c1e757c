//! Workflow step kinds and their builders.
//!
//! A [`Step`] names a unit of work, its dependencies (`after`), an optional
//! guard (`when`), and an optional retry policy. Six kinds exist: plain
//! functions, agent delegations, tool calls, ForEach fan-out, and the two
//! condition-driven loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::agent::Agent;
use crate::error::Result;
use crate::workflow::WorkflowContext;

/// One element of a ForEach collection, with its position.
///
/// Carried as an explicit argument rather than through the shared context,
/// so concurrent iterations never contend on the context lock.
#[derive(Debug, Clone)]
pub struct IterItem {
    /// The element.
    pub value: Value,
    /// Zero-based position in the collection.
    pub index: usize,
}

/// Retry policy: up to `attempts` extra attempts with exponentially growing
/// delays starting at `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub attempts: usize,
    /// Delay before the first retry; doubles per attempt.
    pub delay: Duration,
}

pub(crate) type BasicFn =
    Arc<dyn Fn(Arc<WorkflowContext>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub(crate) type ForEachFn =
    Arc<dyn Fn(IterItem, Arc<WorkflowContext>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub(crate) type CondFn = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

/// What a step does when launched.
pub(crate) enum StepKind {
    /// A user function writing its outputs through the context.
    Basic { run: BasicFn },
    /// Delegate to an agent.
    Agent {
        agent: Arc<dyn Agent>,
        input_from: Option<String>,
        output_to: Option<String>,
    },
    /// Dispatch a named tool.
    Tool {
        tool: String,
        args_from: Option<String>,
        output_to: Option<String>,
    },
    /// Run a function once per element of a collection.
    ForEach {
        iter_over: String,
        concurrency: usize,
        run: ForEachFn,
    },
    /// Run until the condition becomes true.
    DoUntil {
        run: BasicFn,
        until: CondFn,
        max_iter: Option<usize>,
    },
    /// Run while the condition stays true.
    DoWhile {
        run: BasicFn,
        while_cond: CondFn,
        max_iter: Option<usize>,
    },
}

/// A declared workflow step.
pub struct Step {
    pub(crate) name: String,
    pub(crate) kind: StepKind,
    pub(crate) after: Vec<String>,
    pub(crate) when: Option<CondFn>,
    pub(crate) retry: Option<RetryPolicy>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("has_when", &self.when.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Step {
    fn with_kind(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            after: Vec::new(),
            when: None,
            retry: None,
        }
    }

    /// A step running a user function.
    pub fn basic<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_kind(
            name,
            StepKind::Basic {
                run: Arc::new(move |ctx| Box::pin(run(ctx))),
            },
        )
    }

    /// A step delegating to an agent. Input comes from the key set with
    /// [`Step::input_from`], defaulting to the workflow input; the output
    /// lands under `{step}.output` unless [`Step::output_to`] overrides it.
    pub fn agent(name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self::with_kind(
            name,
            StepKind::Agent {
                agent,
                input_from: None,
                output_to: None,
            },
        )
    }

    /// A step dispatching the named tool. Arguments come from the key set
    /// with [`Step::args_from`], defaulting to `{}`; the content lands
    /// under `{step}.result` unless [`Step::output_to`] overrides it.
    pub fn tool(name: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            StepKind::Tool {
                tool: tool.into(),
                args_from: None,
                output_to: None,
            },
        )
    }

    /// A step running `run` once per element of the collection under
    /// `iter_over`. Concurrency defaults to 1.
    pub fn for_each<F, Fut>(
        name: impl Into<String>,
        iter_over: impl Into<String>,
        run: F,
    ) -> Self
    where
        F: Fn(IterItem, Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_kind(
            name,
            StepKind::ForEach {
                iter_over: iter_over.into(),
                concurrency: 0,
                run: Arc::new(move |item, ctx| Box::pin(run(item, ctx))),
            },
        )
    }

    /// A step running `run` repeatedly until `until` returns true.
    pub fn do_until<F, Fut>(
        name: impl Into<String>,
        run: F,
        until: impl Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    ) -> Self
    where
        F: Fn(Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_kind(
            name,
            StepKind::DoUntil {
                run: Arc::new(move |ctx| Box::pin(run(ctx))),
                until: Arc::new(until),
                max_iter: None,
            },
        )
    }

    /// A step running `run` once, then again while `while_cond` holds.
    pub fn do_while<F, Fut>(
        name: impl Into<String>,
        run: F,
        while_cond: impl Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    ) -> Self
    where
        F: Fn(Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_kind(
            name,
            StepKind::DoWhile {
                run: Arc::new(move |ctx| Box::pin(run(ctx))),
                while_cond: Arc::new(while_cond),
                max_iter: None,
            },
        )
    }

    /// The step's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare dependencies: this step runs after all of `deps`.
    #[must_use]
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Guard the step: when the predicate returns false at launch time the
    /// step is skipped by condition (dependents still run).
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&WorkflowContext) -> bool + Send + Sync + 'static) -> Self {
        self.when = Some(Arc::new(predicate));
        self
    }

    /// Retry on failure: up to `attempts` extra attempts with exponential
    /// back-off starting at `delay`.
    #[must_use]
    pub fn retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.retry = Some(RetryPolicy { attempts, delay });
        self
    }

    /// Read the agent step's input from this context key.
    #[must_use]
    pub fn input_from(mut self, key: impl Into<String>) -> Self {
        if let StepKind::Agent { input_from, .. } = &mut self.kind {
            *input_from = Some(key.into());
        }
        self
    }

    /// Read the tool step's arguments from this context key.
    #[must_use]
    pub fn args_from(mut self, key: impl Into<String>) -> Self {
        if let StepKind::Tool { args_from, .. } = &mut self.kind {
            *args_from = Some(key.into());
        }
        self
    }

    /// Write the step's output under this key instead of the default.
    #[must_use]
    pub fn output_to(mut self, key: impl Into<String>) -> Self {
        match &mut self.kind {
            StepKind::Agent { output_to, .. } | StepKind::Tool { output_to, .. } => {
                *output_to = Some(key.into());
            }
            _ => {}
        }
        self
    }

    /// Bound ForEach concurrency (default 1).
    #[must_use]
    pub fn concurrency(mut self, n: usize) -> Self {
        if let StepKind::ForEach { concurrency, .. } = &mut self.kind {
            *concurrency = n;
        }
        self
    }

    /// Cap loop iterations (default 10).
    #[must_use]
    pub fn max_iter(mut self, n: usize) -> Self {
        match &mut self.kind {
            StepKind::DoUntil { max_iter, .. } | StepKind::DoWhile { max_iter, .. } => {
                *max_iter = Some(n);
            }
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_metadata() {
        let step = Step::basic("a", |_ctx| async { Ok(()) })
            .after(["x", "y"])
            .retry(2, Duration::from_millis(10));
        assert_eq!(step.name(), "a");
        assert_eq!(step.after, ["x", "y"]);
        assert_eq!(
            step.retry,
            Some(RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(10)
            })
        );
    }

    #[test]
    fn output_to_only_applies_to_agent_and_tool() {
        let tool = Step::tool("t", "search").output_to("hits");
        match tool.kind {
            StepKind::Tool { output_to, .. } => assert_eq!(output_to.as_deref(), Some("hits")),
            _ => unreachable!(),
        }
        // No-op on a basic step.
        let basic = Step::basic("b", |_ctx| async { Ok(()) }).output_to("ignored");
        assert!(matches!(basic.kind, StepKind::Basic { .. }));
    }

    #[test]
    fn for_each_concurrency_defaults_unset() {
        let step = Step::for_each("fan", "items", |_item, _ctx| async { Ok(()) });
        match step.kind {
            StepKind::ForEach { concurrency, .. } => assert_eq!(concurrency, 0),
            _ => unreachable!(),
        }
    }
}
