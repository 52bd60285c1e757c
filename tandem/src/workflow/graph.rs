//! Workflow construction and graph validation.
//!
//! Construction registers steps in declaration order and validates the
//! graph once: duplicate names and references to unknown steps are
//! rejected, Kahn's topological sort over in-degrees detects cycles, and a
//! forward adjacency map (dependency → dependents) is built for the
//! reactive scheduler. Per-step defaults (retry, loop caps, ForEach
//! concurrency) are applied here so the scheduler never sees an unset
//! knob.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{Agent, AgentConfig};
use crate::agent::SuspendBudget;
use crate::error::{Error, Result};
use crate::event::EventSender;
use crate::result::AgentResult;
use crate::task::AgentTask;
use crate::tool::{Tool, Toolbox};
use crate::trace::Tracer;
use crate::workflow::scheduler::WorkflowSeed;
use crate::workflow::step::{RetryPolicy, Step, StepKind};

/// Default iteration cap for DoUntil/DoWhile steps.
const DEFAULT_LOOP_MAX_ITER: usize = 10;

/// Default ForEach concurrency.
const DEFAULT_FOREACH_CONCURRENCY: usize = 1;

/// A validated, executable step DAG.
///
/// Construct with [`Workflow::builder`]. Executes as an [`Agent`]: the task
/// text seeds the context under `input`, and the result output is the last
/// successful step's output.
#[derive(Clone)]
pub struct Workflow {
    pub(crate) inner: Arc<WorkflowInner>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.inner.name)
            .field("steps", &self.inner.steps.len())
            .finish_non_exhaustive()
    }
}

pub(crate) struct WorkflowInner {
    pub(crate) name: String,
    pub(crate) description: String,
    /// Steps in declaration order.
    pub(crate) steps: Vec<Arc<Step>>,
    /// Step name → index into `steps`.
    pub(crate) index: HashMap<String, usize>,
    /// Forward adjacency: dependency → dependents.
    pub(crate) dependents: HashMap<String, Vec<String>>,
    pub(crate) toolbox: Arc<Toolbox>,
    pub(crate) tracer: Option<Arc<dyn Tracer>>,
    pub(crate) budget: Arc<SuspendBudget>,
    pub(crate) suspend_ttl: Duration,
}

impl Workflow {
    /// Create a builder for a workflow with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            toolbox: Toolbox::new(),
            default_retry: None,
            tracer: None,
            suspend_ttl: AgentConfig::DEFAULT_SUSPEND_TTL,
        }
    }

    /// Names of the declared steps, in declaration order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.inner.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

#[async_trait]
impl Agent for Workflow {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn description(&self) -> &str {
        &self.inner.description
    }

    async fn execute(&self, task: AgentTask) -> Result<AgentResult> {
        self.inner
            .run(task, EventSender::disabled(), WorkflowSeed::default())
            .await
    }

    async fn execute_stream(&self, task: AgentTask, events: EventSender) -> Result<AgentResult> {
        let result = self
            .inner
            .run(task, events.clone(), WorkflowSeed::default())
            .await;
        events.close();
        result
    }
}

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    name: String,
    description: String,
    steps: Vec<Step>,
    toolbox: Toolbox,
    default_retry: Option<RetryPolicy>,
    tracer: Option<Arc<dyn Tracer>>,
    suspend_ttl: Duration,
}

impl std::fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowBuilder {
    /// Set the workflow description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a step. Declaration order is preserved.
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Register a tool for `Step::tool` dispatch.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.toolbox.register(tool);
        self
    }

    /// Retry policy applied to steps that declare none.
    #[must_use]
    pub const fn default_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.default_retry = Some(RetryPolicy { attempts, delay });
        self
    }

    /// Wire a span exporter.
    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Override the suspension TTL (default 30 minutes).
    #[must_use]
    pub const fn suspend_ttl(mut self, ttl: Duration) -> Self {
        self.suspend_ttl = ttl;
        self
    }

    /// Validate the graph and build the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on duplicate step names, references
    /// to unknown steps, or a dependency cycle.
    pub fn build(mut self) -> Result<Workflow> {
        if self.steps.is_empty() {
            return Err(Error::configuration(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let mut index = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                return Err(Error::configuration(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }
        for step in &self.steps {
            for dep in &step.after {
                if !index.contains_key(dep) {
                    return Err(Error::configuration(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.name
                    )));
                }
                if dep == &step.name {
                    return Err(Error::configuration(format!(
                        "step '{}' depends on itself",
                        step.name
                    )));
                }
            }
        }

        // Forward adjacency and in-degrees.
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for step in &self.steps {
            in_degree.insert(&step.name, step.after.len());
            for dep in &step.after {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.name.clone());
            }
        }

        // Kahn's sort: a cycle leaves nodes unvisited.
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut visited = HashSet::new();
        while let Some(name) = queue.pop_front() {
            visited.insert(name.to_owned());
            if let Some(next) = dependents.get(name) {
                for dependent in next {
                    let Some(degree) = in_degree.get_mut(dependent.as_str()) else {
                        continue;
                    };
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(
                            self.steps[index[dependent.as_str()]].name.as_str(),
                        );
                    }
                }
            }
        }
        if visited.len() < self.steps.len() {
            let stuck: Vec<&str> = self
                .steps
                .iter()
                .map(|s| s.name.as_str())
                .filter(|name| !visited.contains(*name))
                .collect();
            return Err(Error::configuration(format!(
                "workflow '{}' has a dependency cycle involving: {}",
                self.name,
                stuck.join(", ")
            )));
        }

        // Per-step defaults.
        for step in &mut self.steps {
            if step.retry.is_none() {
                step.retry = self.default_retry;
            }
            match &mut step.kind {
                StepKind::ForEach { concurrency, .. } => {
                    if *concurrency == 0 {
                        *concurrency = DEFAULT_FOREACH_CONCURRENCY;
                    }
                }
                StepKind::DoUntil { max_iter, .. } | StepKind::DoWhile { max_iter, .. } => {
                    if max_iter.is_none() {
                        *max_iter = Some(DEFAULT_LOOP_MAX_ITER);
                    }
                }
                _ => {}
            }
        }

        Ok(Workflow {
            inner: Arc::new(WorkflowInner {
                name: self.name,
                description: self.description,
                steps: self.steps.into_iter().map(Arc::new).collect(),
                index,
                dependents,
                toolbox: Arc::new(self.toolbox),
                tracer: self.tracer,
                budget: Arc::new(SuspendBudget::new(
                    AgentConfig::DEFAULT_MAX_SUSPENSIONS,
                    AgentConfig::DEFAULT_MAX_SUSPEND_BYTES,
                )),
                suspend_ttl: self.suspend_ttl,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Step {
        Step::basic(name, |_ctx| async { Ok(()) })
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let err = Workflow::builder("empty").build().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Workflow::builder("dup")
            .step(noop("a"))
            .step(noop("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = Workflow::builder("bad-dep")
            .step(noop("a").after(["ghost"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = Workflow::builder("cyclic")
            .step(noop("a").after(["c"]))
            .step(noop("b").after(["a"]))
            .step(noop("c").after(["b"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn valid_dag_builds_with_adjacency() {
        let workflow = Workflow::builder("diamond")
            .step(noop("a"))
            .step(noop("b").after(["a"]))
            .step(noop("c").after(["a"]))
            .step(noop("d").after(["b", "c"]))
            .build()
            .unwrap();
        assert_eq!(workflow.step_names(), ["a", "b", "c", "d"]);
        let dependents = &workflow.inner.dependents;
        assert_eq!(dependents["a"], ["b", "c"]);
        assert_eq!(dependents["b"], ["d"]);
    }

    #[test]
    fn loop_and_foreach_defaults_applied() {
        let workflow = Workflow::builder("defaults")
            .step(Step::for_each("fan", "items", |_item, _ctx| async {
                Ok(())
            }))
            .step(Step::do_until("loop", |_ctx| async { Ok(()) }, |_| true))
            .build()
            .unwrap();
        match &workflow.inner.steps[0].kind {
            StepKind::ForEach { concurrency, .. } => assert_eq!(*concurrency, 1),
            _ => unreachable!(),
        }
        match &workflow.inner.steps[1].kind {
            StepKind::DoUntil { max_iter, .. } => assert_eq!(*max_iter, Some(10)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn default_retry_applies_to_bare_steps() {
        let workflow = Workflow::builder("retry")
            .default_retry(3, Duration::from_millis(5))
            .step(noop("bare"))
            .step(noop("own").retry(1, Duration::from_millis(1)))
            .build()
            .unwrap();
        assert_eq!(workflow.inner.steps[0].retry.map(|r| r.attempts), Some(3));
        assert_eq!(workflow.inner.steps[1].retry.map(|r| r.attempts), Some(1));
    }
}
