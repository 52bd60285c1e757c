//! Agent configuration.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::memory::MemoryConfig;

/// Configuration for a [`crate::agent::LoopAgent`].
///
/// Defaults match the documented policy table; every knob has a builder
/// method on [`crate::agent::AgentBuilder`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name.
    pub name: String,

    /// Agent description, shown to routing models.
    pub description: String,

    /// Base system prompt.
    pub system_prompt: String,

    /// Maximum tool iterations before the forced synthesis call.
    pub max_iterations: usize,

    /// Worker-pool cap for parallel tool calls within one iteration.
    pub max_parallel_tools: usize,

    /// Cap on accumulated attachments, by count.
    pub max_attachments: usize,

    /// Cap on accumulated attachments, by total bytes.
    pub max_attachment_bytes: usize,

    /// Tool results longer than this (in characters) are elided before
    /// entering the conversation.
    pub tool_result_max_chars: usize,

    /// Cumulative conversation size (in characters) that triggers context
    /// compression.
    pub compress_threshold_chars: usize,

    /// How long a suspension stays resumable.
    pub suspend_ttl: Duration,

    /// Concurrent suspensions allowed per agent.
    pub max_suspensions: usize,

    /// Total estimated snapshot bytes allowed per agent.
    pub max_suspend_bytes: usize,

    /// Optional JSON schema hint for the final response.
    pub response_schema: Option<Value>,

    /// Enable the `execute_plan` built-in.
    pub plan_execution: bool,

    /// Memory-layer tunables.
    pub memory: MemoryConfig,
}

impl AgentConfig {
    /// Default maximum tool iterations.
    pub const DEFAULT_MAX_ITERATIONS: usize = 10;

    /// Default worker-pool cap for parallel tool calls.
    pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 10;

    /// Default attachment count cap.
    pub const DEFAULT_MAX_ATTACHMENTS: usize = 50;

    /// Default attachment byte cap (50 MB).
    pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 50 * 1024 * 1024;

    /// Default tool-result character cap.
    pub const DEFAULT_TOOL_RESULT_MAX_CHARS: usize = 100_000;

    /// Default compression threshold in characters.
    pub const DEFAULT_COMPRESS_THRESHOLD_CHARS: usize = 200_000;

    /// Default suspension TTL.
    pub const DEFAULT_SUSPEND_TTL: Duration = Duration::from_secs(30 * 60);

    /// Default concurrent-suspension cap.
    pub const DEFAULT_MAX_SUSPENSIONS: usize = 20;

    /// Default suspension byte budget (256 MB).
    pub const DEFAULT_MAX_SUSPEND_BYTES: usize = 256 * 1024 * 1024;

    /// Create a config with default limits for the given agent name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            max_parallel_tools: Self::DEFAULT_MAX_PARALLEL_TOOLS,
            max_attachments: Self::DEFAULT_MAX_ATTACHMENTS,
            max_attachment_bytes: Self::DEFAULT_MAX_ATTACHMENT_BYTES,
            tool_result_max_chars: Self::DEFAULT_TOOL_RESULT_MAX_CHARS,
            compress_threshold_chars: Self::DEFAULT_COMPRESS_THRESHOLD_CHARS,
            suspend_ttl: Self::DEFAULT_SUSPEND_TTL,
            max_suspensions: Self::DEFAULT_MAX_SUSPENSIONS,
            max_suspend_bytes: Self::DEFAULT_MAX_SUSPEND_BYTES,
            response_schema: None,
            plan_execution: false,
            memory: MemoryConfig::default(),
        }
    }

    /// Check option combinations and log what will be ignored.
    ///
    /// Unknown-but-harmless combinations warn instead of failing: the agent
    /// still runs, skipping what it cannot do.
    pub(crate) fn validate(&self, has_store: bool) {
        if self.memory.user_memory && !has_store {
            warn!(
                agent = %self.name,
                "user memory enabled without a conversation store; write path will be skipped"
            );
        }
        if self.memory.cross_thread_recall && !has_store {
            warn!(
                agent = %self.name,
                "cross-thread recall enabled without a conversation store; recall will be skipped"
            );
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_table() {
        let config = AgentConfig::new("a");
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.max_parallel_tools, 10);
        assert_eq!(config.max_attachments, 50);
        assert_eq!(config.max_attachment_bytes, 50 * 1024 * 1024);
        assert_eq!(config.tool_result_max_chars, 100_000);
        assert_eq!(config.compress_threshold_chars, 200_000);
        assert_eq!(config.suspend_ttl, Duration::from_secs(1800));
        assert_eq!(config.max_suspensions, 20);
        assert_eq!(config.max_suspend_bytes, 256 * 1024 * 1024);
    }
}
