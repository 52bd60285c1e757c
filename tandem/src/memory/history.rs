//! Message building: the memory read path.
//!
//! Before the first LLM call of an execution the layer composes the message
//! list: system prompt (optionally extended with the fact store's context
//! block), thread history, an optional cross-thread recall annotation, and
//! the new user input with its attachments. When both the history query and
//! the input embedding are needed they run concurrently.

use tracing::warn;

use crate::error::Result;
use crate::memory::{MemoryLayer, ScoredMessage, cosine};
use crate::message::ChatMessage;
use crate::task::AgentTask;

/// Header of the cross-thread recall annotation.
const RECALL_HEADER: &str = "Relevant context from past conversations:";

impl MemoryLayer {
    /// Build the starting message list for an execution.
    pub(crate) async fn build_messages(
        &self,
        task: &AgentTask,
        system_prompt: &str,
    ) -> Result<Vec<ChatMessage>> {
        let user_message =
            ChatMessage::user(&task.task).with_attachments(task.attachments.clone());

        let (Some(store), Some(thread_id)) = (&self.store, task.thread_id()) else {
            let mut messages = Vec::with_capacity(2);
            if !system_prompt.is_empty() {
                messages.push(ChatMessage::system(system_prompt));
            }
            messages.push(user_message);
            return Ok(messages);
        };

        let needs_embedding = self.embedder.is_some()
            && (self.memory_store.is_some() || self.config.cross_thread_recall);

        let (history, query_embedding) = tokio::join!(
            store.get_messages(thread_id, self.config.max_history),
            async {
                if !needs_embedding {
                    return None;
                }
                let embedder = self.embedder.as_ref()?;
                match embedder.embed(&[task.task.clone()]).await {
                    Ok(mut vectors) => vectors.pop(),
                    Err(e) => {
                        warn!(error = %e, "input embedding failed; recall disabled for this turn");
                        None
                    }
                }
            }
        );
        let mut history = history?;

        let mut messages = Vec::with_capacity(history.len() + 3);

        // System prompt, optionally extended with the user-fact context block.
        let mut prompt = system_prompt.to_owned();
        if let (Some(memory_store), Some(embedding)) = (&self.memory_store, &query_embedding) {
            match memory_store.build_context(embedding).await {
                Ok(block) if !block.is_empty() => {
                    if !prompt.is_empty() {
                        prompt.push_str("\n\n");
                    }
                    prompt.push_str(&block);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "memory context build failed"),
            }
        }
        if !prompt.is_empty() {
            messages.push(ChatMessage::system(prompt));
        }

        // Trim history to the token budget before converting.
        if let Some(budget) = self.config.max_tokens {
            self.trim_history(&mut history, budget, query_embedding.as_deref());
        }
        for stored in &history {
            messages.push(ChatMessage {
                role: stored.role,
                content: stored.content.clone(),
                ..ChatMessage::default()
            });
        }

        // Cross-thread recall annotation.
        if self.config.cross_thread_recall {
            if let Some(embedding) = &query_embedding {
                match store.search_messages(embedding, self.config.recall_top_k).await {
                    Ok(hits) => {
                        let annotation = self.format_recall(hits, thread_id);
                        if let Some(annotation) = annotation {
                            messages.push(ChatMessage::system(annotation));
                        }
                    }
                    Err(e) => warn!(error = %e, "cross-thread recall failed"),
                }
            }
        }

        messages.push(user_message);
        Ok(messages)
    }

    /// Format surviving recall hits, or `None` when nothing survives.
    ///
    /// Hits from the current thread are dropped (already in history). A
    /// store that reports no similarity at all (every score zero) is treated
    /// as "unknown relevance" and passes the score filter; genuinely scored
    /// results below the threshold are dropped.
    fn format_recall(&self, hits: Vec<ScoredMessage>, current_thread: &str) -> Option<String> {
        let scoring_unknown = hits.iter().all(|h| h.score == 0.0);
        let survivors: Vec<&ScoredMessage> = hits
            .iter()
            .filter(|h| h.message.thread_id != current_thread)
            .filter(|h| scoring_unknown || h.score >= self.config.min_recall_score)
            .collect();
        if survivors.is_empty() {
            return None;
        }
        let mut annotation = String::from(RECALL_HEADER);
        for hit in survivors {
            annotation.push_str("\n- ");
            annotation.push_str(&hit.message.content);
        }
        Some(annotation)
    }

    /// Drop history until the estimated token count (character count) fits
    /// the budget. With semantic trimming, candidates score by similarity to
    /// the query and the lowest-scoring drop first; the most recent
    /// `keep_recent` messages are always preserved. Otherwise the oldest
    /// drop first.
    fn trim_history(
        &self,
        history: &mut Vec<crate::memory::StoredMessage>,
        budget: usize,
        query: Option<&[f32]>,
    ) {
        let total =
            |msgs: &[crate::memory::StoredMessage]| -> usize {
                msgs.iter().map(|m| m.content.chars().count()).sum()
            };
        if total(history) <= budget {
            return;
        }

        if self.config.semantic_trim {
            if let Some(query) = query {
                let keep_from = history.len().saturating_sub(self.config.keep_recent);
                // (index, score) of droppable candidates, worst first.
                let mut candidates: Vec<(usize, f32)> = history[..keep_from]
                    .iter()
                    .enumerate()
                    .map(|(i, m)| {
                        let score = m
                            .embedding
                            .as_deref()
                            .map_or(0.0, |e| cosine(query, e));
                        (i, score)
                    })
                    .collect();
                candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
                let mut drop = std::collections::HashSet::new();
                let mut remaining = total(history);
                for (idx, _) in candidates {
                    if remaining <= budget {
                        break;
                    }
                    remaining -= history[idx].content.chars().count();
                    drop.insert(idx);
                }
                let mut i = 0;
                history.retain(|_| {
                    let dropped = drop.contains(&i);
                    i += 1;
                    !dropped
                });
                return;
            }
        }

        // Age-based: drop oldest first.
        while history.len() > 1 && total(history) > budget {
            history.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::memory::{
        InMemoryMemoryStore, InMemoryStore, MemoryConfig, MemoryStore, Store, StoredMessage,
    };
    use crate::message::Role;

    fn stored(thread: &str, seq: u64, role: Role, content: &str) -> StoredMessage {
        StoredMessage {
            id: format!("m-{seq}"),
            thread_id: thread.to_owned(),
            role,
            content: content.to_owned(),
            created_at: Utc::now(),
            seq,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn no_store_builds_bare_list() {
        let layer = MemoryLayer::unwired();
        let task = AgentTask::new("hello");
        let messages = layer.build_messages(&task, "be helpful").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn history_is_loaded_between_system_and_user() {
        let store = Arc::new(InMemoryStore::new());
        store
            .store_message(stored("t", 0, Role::User, "earlier question"))
            .await
            .unwrap();
        store
            .store_message(stored("t", 1, Role::Assistant, "earlier answer"))
            .await
            .unwrap();
        let layer = MemoryLayer::new(Some(store), None, None, MemoryConfig::default());
        let task = AgentTask::new("new question").with_thread_id("t");
        let messages = layer.build_messages(&task, "sys").await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            ["sys", "earlier question", "earlier answer", "new question"]
        );
    }

    #[tokio::test]
    async fn recall_drops_current_thread_and_low_scores() {
        let store = Arc::new(InMemoryStore::new());
        let mut same_thread = stored("t", 0, Role::User, "same thread hit");
        same_thread.embedding = Some(vec![1.0, 0.0]);
        let mut other = stored("other", 1, Role::User, "relevant elsewhere");
        other.embedding = Some(vec![1.0, 0.0]);
        store.store_message(same_thread).await.unwrap();
        store.store_message(other).await.unwrap();

        let config = MemoryConfig {
            cross_thread_recall: true,
            ..MemoryConfig::default()
        };
        let layer = MemoryLayer::new(
            Some(store),
            None,
            Some(Arc::new(MockEmbedder)),
            config,
        );
        let task = AgentTask::new("a question about things").with_thread_id("t");
        let messages = layer.build_messages(&task, "").await.unwrap();
        let recall: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.content.starts_with(RECALL_HEADER))
            .collect();
        // The same-thread hit must never appear in the annotation.
        if let Some(annotation) = recall.first() {
            assert!(!annotation.content.contains("same thread hit"));
        }
    }

    #[tokio::test]
    async fn fact_context_extends_system_prompt() {
        let store = Arc::new(InMemoryStore::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let embedder = Arc::new(MockEmbedder);
        let embedding = crate::embedding::EmbeddingProvider::embed(
            &*embedder,
            &["what should I wear".to_owned()],
        )
        .await
        .unwrap();
        memory
            .upsert_fact("lives in Oslo", "context", Some(&embedding[0]))
            .await
            .unwrap();

        let config = MemoryConfig {
            user_memory: true,
            ..MemoryConfig::default()
        };
        let layer = MemoryLayer::new(Some(store), Some(memory), Some(embedder), config);
        let task = AgentTask::new("what should I wear").with_thread_id("t");
        let messages = layer.build_messages(&task, "base prompt").await.unwrap();
        assert!(messages[0].content.contains("base prompt"));
        assert!(messages[0].content.contains("lives in Oslo"));
    }

    #[tokio::test]
    async fn trimming_drops_oldest_past_budget() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..4 {
            store
                .store_message(stored("t", i, Role::User, &"x".repeat(100)))
                .await
                .unwrap();
        }
        let config = MemoryConfig {
            max_tokens: Some(250),
            ..MemoryConfig::default()
        };
        let layer = MemoryLayer::new(Some(store), None, None, config);
        let task = AgentTask::new("q").with_thread_id("t");
        let messages = layer.build_messages(&task, "").await.unwrap();
        // 2 history messages of 100 chars fit the 250 budget, plus the user message.
        assert_eq!(messages.len(), 3);
    }
}
