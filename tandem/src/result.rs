//! Agent result types.
//!
//! Every agent — loop, router, or workflow — collapses to the same
//! [`AgentResult`] shape: final text, accumulated attachments, aggregate
//! token usage, and an ordered list of [`StepTrace`]s recording each
//! dispatch. Error paths carry the same shape as partial progress (see
//! [`crate::Error::partial`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::Attachment;
use crate::usage::Usage;

/// Cap on the input/output excerpts recorded in a [`StepTrace`].
pub(crate) const TRACE_FIELD_MAX_CHARS: usize = 2_000;

/// Marker appended when content is elided.
pub(crate) const TRUNCATION_MARKER: &str = "...[truncated]";

/// What kind of dispatch a [`StepTrace`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// A registered or built-in tool call.
    Tool,
    /// A sub-agent delegation.
    Agent,
    /// A workflow step.
    Step,
}

/// Post-hoc record of one dispatch within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    /// Tool, sub-agent, or step name.
    pub name: String,

    /// What kind of dispatch this was.
    pub kind: StepKind,

    /// Input excerpt, truncated to a fixed cap.
    pub input: String,

    /// Output excerpt, truncated to a fixed cap.
    pub output: String,

    /// Usage attributable to this dispatch.
    pub usage: Usage,

    /// Wall-clock duration of the dispatch.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl StepTrace {
    /// Create a trace, truncating the input/output excerpts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: StepKind,
        input: &str,
        output: &str,
        usage: Usage,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            input: truncate_chars(input, TRACE_FIELD_MAX_CHARS),
            output: truncate_chars(output, TRACE_FIELD_MAX_CHARS),
            usage,
            duration,
        }
    }
}

/// Output envelope of one agent execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResult {
    /// Final response text.
    pub output: String,

    /// Attachments accumulated from tool results, sub-agents, and the final
    /// provider response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Aggregate token usage across every provider call and dispatch.
    pub usage: Usage,

    /// Ordered dispatch traces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepTrace>,
}

impl AgentResult {
    /// Create a result carrying only output text.
    #[must_use]
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }
}

/// Truncate `s` to at most `max` characters, appending an elision marker
/// when anything was cut. Returns the input unchanged when it fits.
#[must_use]
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&s[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => s.to_owned(),
    }
}

/// Serialize a [`Duration`] as integer milliseconds.
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `u64` milliseconds.
    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from `u64` milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
