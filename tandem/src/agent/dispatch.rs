//! Parallel tool dispatch.
//!
//! One iteration of the loop may produce many tool calls. A single call
//! runs inline; N calls run on a fixed pool of `min(N, cap)` workers
//! consuming an index-tagged work queue — never a task per call. Results
//! are reassembled in input order regardless of completion order.
//!
//! Every dispatch runs inside panic recovery: a panicking tool becomes an
//! error result (`error: ...`, `is_error = true`), never a crashed worker.
//! Collection selects against the cancellation token; on cancellation any
//! unseen slot is filled with a cancellation result immediately.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::ToolCall;
use crate::task::Attachment;
use crate::usage::Usage;

/// Dispatcher-level outcome of one tool call or delegation.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Result content.
    pub content: String,

    /// Usage attributable to the call (sub-agent delegations report their
    /// aggregate usage here).
    pub usage: Usage,

    /// Attachments surfaced by the call.
    pub attachments: Vec<Attachment>,

    /// Structural error flag.
    pub is_error: bool,

    /// Wall-clock duration of the dispatch.
    pub duration: Duration,
}

impl DispatchResult {
    /// A successful text result.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// An error result. Content is prefixed `error:` so the model sees the
    /// failure in-band.
    #[must_use]
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("error: {message}"),
            is_error: true,
            ..Self::default()
        }
    }
}

/// A per-execution dispatch function: inspects the call name and routes to
/// a built-in, a registered tool, or a sub-agent.
pub type DispatchFn = Arc<dyn Fn(ToolCall) -> BoxFuture<'static, DispatchResult> + Send + Sync>;

/// Run one dispatch under panic recovery, stamping its duration.
async fn dispatch_one(dispatch: &DispatchFn, call: ToolCall) -> DispatchResult {
    let name = call.name.clone();
    let started = Instant::now();
    let mut result = match AssertUnwindSafe(dispatch(call)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => DispatchResult::error(format!(
            "tool '{name}' panicked: {}",
            panic_message(panic.as_ref())
        )),
    };
    result.duration = started.elapsed();
    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Dispatch `calls` and return results in input order.
///
/// `max_workers` bounds the pool; the effective pool size is
/// `min(calls.len(), max_workers)`.
pub(crate) async fn dispatch_all(
    calls: Vec<ToolCall>,
    dispatch: DispatchFn,
    max_workers: usize,
    cancel: &CancellationToken,
) -> Vec<DispatchResult> {
    let n = calls.len();
    // A single call runs inline on the loop's own task.
    if n == 1 {
        if cancel.is_cancelled() {
            return vec![DispatchResult::error("execution cancelled")];
        }
        return match calls.into_iter().next() {
            Some(call) => vec![dispatch_one(&dispatch, call).await],
            None => Vec::new(),
        };
    }
    if n == 0 {
        return Vec::new();
    }
    dispatch_pooled(calls, dispatch, max_workers.clamp(1, n), cancel).await
}

async fn dispatch_pooled(
    calls: Vec<ToolCall>,
    dispatch: DispatchFn,
    workers: usize,
    cancel: &CancellationToken,
) -> Vec<DispatchResult> {
    let n = calls.len();
    let (work_tx, work_rx) = mpsc::channel::<(usize, ToolCall)>(n);
    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(usize, DispatchResult)>(n);

    for (index, call) in calls.into_iter().enumerate() {
        // Capacity equals n; these sends cannot fail.
        let _ = work_tx.try_send((index, call));
    }
    drop(work_tx);

    for _ in 0..workers {
        let work_rx = Arc::clone(&work_rx);
        let result_tx = result_tx.clone();
        let dispatch = Arc::clone(&dispatch);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let next = { work_rx.lock().await.recv().await };
                let Some((index, call)) = next else {
                    break;
                };
                let result = if cancel.is_cancelled() {
                    DispatchResult::error("execution cancelled")
                } else {
                    dispatch_one(&dispatch, call).await
                };
                if result_tx.send((index, result)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let mut slots: Vec<Option<DispatchResult>> = (0..n).map(|_| None).collect();
    let mut filled = 0;
    while filled < n {
        tokio::select! {
            received = result_rx.recv() => match received {
                Some((index, result)) => {
                    if slots[index].is_none() {
                        slots[index] = Some(result);
                        filled += 1;
                    }
                }
                // All workers exited; any hole is filled below.
                None => break,
            },
            () = cancel.cancelled() => {
                for slot in &mut slots {
                    if slot.is_none() {
                        *slot = Some(DispatchResult::error("execution cancelled"));
                    }
                }
                return slots.into_iter().flatten().collect();
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| DispatchResult::error("dispatch worker exited unexpectedly"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slow_echo_dispatch(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> DispatchFn {
        Arc::new(move |call: ToolCall| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                DispatchResult::text(format!("ran {}", call.name))
            })
        })
    }

    fn calls(n: usize) -> Vec<ToolCall> {
        (0..n)
            .map(|i| ToolCall::new(format!("id-{i}"), format!("tool-{i}"), serde_json::Value::Null))
            .collect()
    }

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        let dispatch: DispatchFn = Arc::new(|call: ToolCall| {
            Box::pin(async move {
                // Later calls finish first.
                let index: u64 = call.name.strip_prefix("tool-").unwrap().parse().unwrap();
                tokio::time::sleep(Duration::from_millis(40 - 10 * index)).await;
                DispatchResult::text(call.name)
            })
        });
        let results = dispatch_all(calls(4), dispatch, 10, &CancellationToken::new()).await;
        let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["tool-0", "tool-1", "tool-2", "tool-3"]);
    }

    #[tokio::test]
    async fn pool_never_exceeds_worker_cap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dispatch = slow_echo_dispatch(Arc::clone(&active), Arc::clone(&peak));
        let results = dispatch_all(calls(25), dispatch, 10, &CancellationToken::new()).await;
        assert_eq!(results.len(), 25);
        assert!(peak.load(Ordering::SeqCst) <= 10);
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_result() {
        let dispatch: DispatchFn = Arc::new(|call: ToolCall| {
            Box::pin(async move {
                if call.name == "tool-1" {
                    panic!("tool exploded");
                }
                DispatchResult::text("ok")
            })
        });
        let results = dispatch_all(calls(3), dispatch, 10, &CancellationToken::new()).await;
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert!(results[1].content.starts_with("error:"));
        assert!(results[1].content.contains("tool exploded"));
        assert!(!results[2].is_error);
    }

    #[tokio::test]
    async fn single_call_runs_inline_with_recovery() {
        let dispatch: DispatchFn =
            Arc::new(|_call: ToolCall| Box::pin(async move { panic!("inline panic") }));
        let results = dispatch_all(calls(1), dispatch, 10, &CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);
    }

    #[tokio::test]
    async fn cancellation_fills_unseen_slots() {
        let cancel = CancellationToken::new();
        let dispatch: DispatchFn = {
            let cancel = cancel.clone();
            Arc::new(move |call: ToolCall| {
                let cancel = cancel.clone();
                Box::pin(async move {
                    if call.name == "tool-0" {
                        cancel.cancel();
                        DispatchResult::text("first")
                    } else {
                        // Never completes on its own.
                        cancel.cancelled().await;
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        DispatchResult::text("late")
                    }
                })
            })
        };
        let results = dispatch_all(calls(3), dispatch, 10, &cancel).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().skip(1).all(|r| r.is_error));
    }

    #[tokio::test]
    async fn duration_is_stamped() {
        let dispatch: DispatchFn = Arc::new(|_call: ToolCall| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(15)).await;
                DispatchResult::text("done")
            })
        });
        let results = dispatch_all(calls(1), dispatch, 10, &CancellationToken::new()).await;
        assert!(results[0].duration >= Duration::from_millis(10));
    }
}
