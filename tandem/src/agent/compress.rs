//! Context compression.
//!
//! When the cumulative character count of the conversation crosses the
//! configured threshold, the loop summarizes old tool results into a single
//! message. The last two iterations (assistant-with-tool-calls groups and
//! their results) are always preserved; earlier tool results, plus any
//! summary produced by a previous compression round, are collapsed through
//! one LLM call. Failure degrades gracefully: the original list is kept.

use tracing::{debug, warn};

use crate::chat::{ChatRequest, Provider};
use crate::message::{ChatMessage, Role};
use crate::usage::Usage;

/// Reserved prefix marking a compression summary message.
pub(crate) const SUMMARY_PREFIX: &str = "[conversation summary] ";

/// The fixed compression instruction.
const COMPRESS_INSTRUCTION: &str =
    "Summarize these tool results concisely; preserve facts, values, decisions, errors.";

/// Cumulative character count of a message list.
pub(crate) fn total_chars(messages: &[ChatMessage]) -> usize {
    messages.iter().map(ChatMessage::char_count).sum()
}

/// Index of the first message of the second-to-last iteration, or `None`
/// when fewer than two iterations exist.
fn preserve_boundary(messages: &[ChatMessage]) -> Option<usize> {
    let mut iteration_starts = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Assistant && m.has_tool_calls())
        .map(|(i, _)| i);
    let last_two = [iteration_starts.next_back()?, iteration_starts.next_back()?];
    Some(last_two[1])
}

/// Whether a message is collapsible: an old tool result or a previous
/// summary.
fn collectible(message: &ChatMessage) -> bool {
    message.role == Role::Tool
        || (message.role == Role::User && message.content.starts_with(SUMMARY_PREFIX))
}

/// Compress `messages`, returning the (possibly unchanged) list and the
/// usage spent on the summary call.
pub(crate) async fn compress(
    messages: Vec<ChatMessage>,
    provider: &dyn Provider,
) -> (Vec<ChatMessage>, Usage) {
    let Some(boundary) = preserve_boundary(&messages) else {
        return (messages, Usage::zero());
    };

    let collected: Vec<usize> = messages[..boundary]
        .iter()
        .enumerate()
        .filter(|(_, m)| collectible(m))
        .map(|(i, _)| i)
        .collect();
    if collected.is_empty() {
        return (messages, Usage::zero());
    }

    let corpus = collected
        .iter()
        .map(|&i| messages[i].content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let request = ChatRequest::new(vec![
        ChatMessage::system(COMPRESS_INSTRUCTION),
        ChatMessage::user(corpus),
    ]);

    match provider.chat(&request).await {
        Ok(response) => {
            let summary =
                ChatMessage::user(format!("{SUMMARY_PREFIX}{}", response.content));
            let insert_at = collected[0];
            let removed: std::collections::HashSet<usize> = collected.into_iter().collect();
            let mut compressed = Vec::with_capacity(messages.len());
            for (i, message) in messages.into_iter().enumerate() {
                if i == insert_at {
                    compressed.push(summary.clone());
                }
                if !removed.contains(&i) {
                    compressed.push(message);
                }
            }
            debug!(
                collapsed = removed.len(),
                remaining = compressed.len(),
                "context compressed"
            );
            (compressed, response.usage)
        }
        Err(e) => {
            warn!(error = %e, "context compression failed; keeping full history");
            (messages, Usage::zero())
        }
    }
}
