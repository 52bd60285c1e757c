//! Suspend/resume protocol.
//!
//! A processor or workflow step pauses execution by returning the suspend
//! signal ([`crate::processor::suspend`]). The loop converts it into a
//! [`Suspension`]: a deep-copied snapshot of the conversation, a single-use
//! resume closure, and an auto-release timer. Per-agent budget counters
//! bound how many snapshots (and how many estimated bytes) can be alive at
//! once; over-budget suspensions are rejected and the raw signal propagates
//! instead.
//!
//! The resume closure is guarded by a lock because the TTL timer runs on a
//! separate task: a racing `resume()` and timer expiry would otherwise both
//! observe the closure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::ChatMessage;
use crate::result::AgentResult;

/// The future a resume closure evaluates to.
pub type ResumeFuture = BoxFuture<'static, Result<AgentResult>>;

/// The single-use continuation captured at suspension.
pub(crate) type ResumeFn = Box<dyn FnOnce(String) -> ResumeFuture + Send>;

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct SuspensionState {
    resume: Mutex<Option<ResumeFn>>,
    release: Mutex<Option<ReleaseFn>>,
}

impl SuspensionState {
    /// Run the release callback, at most once.
    fn run_release(&self) {
        let taken = self.release.lock().ok().and_then(|mut guard| guard.take());
        if let Some(release) = taken {
            release();
        }
    }
}

/// A paused execution awaiting external input.
///
/// Carried by [`Error::Suspended`]. Exactly one of three things consumes
/// it: [`Suspension::resume`], [`Suspension::release`], or TTL expiry.
pub struct Suspension {
    step: String,
    payload: Value,
    snapshot_bytes: usize,
    state: Arc<SuspensionState>,
}

impl std::fmt::Debug for Suspension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suspension")
            .field("step", &self.step)
            .field("snapshot_bytes", &self.snapshot_bytes)
            .field("resumable", &self.is_resumable())
            .finish_non_exhaustive()
    }
}

impl Suspension {
    /// Construct a suspension and arm its auto-release timer.
    pub(crate) fn new(
        step: impl Into<String>,
        payload: Value,
        snapshot_bytes: usize,
        resume: ResumeFn,
        release: ReleaseFn,
        ttl: Duration,
    ) -> Self {
        let state = Arc::new(SuspensionState {
            resume: Mutex::new(Some(resume)),
            release: Mutex::new(Some(release)),
        });

        let timer_state = Arc::clone(&state);
        let step_name = step.into();
        let timer_step = step_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let expired = timer_state
                .resume
                .lock()
                .ok()
                .and_then(|mut guard| guard.take())
                .is_some();
            if expired {
                debug!(step = %timer_step, "suspension expired; auto-released");
            }
            timer_state.run_release();
        });

        Self {
            step: step_name,
            payload,
            snapshot_bytes,
            state,
        }
    }

    /// The name of the suspending step (the agent or workflow step name).
    #[must_use]
    pub fn step(&self) -> &str {
        &self.step
    }

    /// The payload for whoever answers the suspension.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Estimated snapshot size counted against the agent's budget.
    #[must_use]
    pub const fn snapshot_bytes(&self) -> usize {
        self.snapshot_bytes
    }

    /// Whether the suspension can still be resumed.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.state
            .resume
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Continue the execution with the human's answer.
    ///
    /// Single-use: the closure is extracted under the lock and invoked
    /// outside it. A second call, a released suspension, or an expired one
    /// returns an error.
    pub async fn resume(&self, input: impl Into<String>) -> Result<AgentResult> {
        let resume = self
            .state
            .resume
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        self.state.run_release();
        match resume {
            Some(resume) => resume(input.into()).await,
            None => Err(Error::internal(
                "suspension already resumed, released, or expired",
            )),
        }
    }

    /// Drop the suspension without resuming. Idempotent.
    pub fn release(&self) {
        if let Ok(mut guard) = self.state.resume.lock() {
            guard.take();
        }
        self.state.run_release();
    }
}

/// Per-agent suspension budget: concurrent snapshot count and total
/// estimated bytes, both atomic.
pub(crate) struct SuspendBudget {
    count: AtomicU64,
    bytes: AtomicU64,
    max_count: u64,
    max_bytes: u64,
}

impl SuspendBudget {
    pub(crate) fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            max_count: max_count as u64,
            max_bytes: max_bytes as u64,
        }
    }

    /// Reserve room for one snapshot of `bytes`. Rolls back and returns
    /// `false` when either cap would be exceeded.
    pub(crate) fn try_reserve(&self, bytes: usize) -> bool {
        let bytes = bytes as u64;
        let prev_count = self.count.fetch_add(1, Ordering::SeqCst);
        let prev_bytes = self.bytes.fetch_add(bytes, Ordering::SeqCst);
        if prev_count >= self.max_count || prev_bytes.saturating_add(bytes) > self.max_bytes {
            self.count.fetch_sub(1, Ordering::SeqCst);
            self.bytes.fetch_sub(bytes, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Return one snapshot's reservation.
    pub(crate) fn release(&self, bytes: usize) {
        self.count.fetch_sub(1, Ordering::SeqCst);
        self.bytes.fetch_sub(bytes as u64, Ordering::SeqCst);
    }
}

/// Estimate the in-memory size of a snapshot for budget accounting.
///
/// Counts content text, tool-call arguments, and metadata; attachment
/// payloads are aliased by the snapshot and deliberately not counted.
#[must_use]
pub(crate) fn estimate_snapshot_bytes(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| {
            let calls: usize = m
                .tool_calls
                .iter()
                .map(|c| c.arguments.to_string().len() + c.id.len() + c.name.len())
                .sum();
            let metadata = m.metadata.as_ref().map_or(0, |v| v.to_string().len());
            m.content.len() + calls + metadata + std::mem::size_of::<ChatMessage>()
        })
        .sum()
}
