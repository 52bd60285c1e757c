//! Background persistence: the memory write path.
//!
//! After a successful turn the exchange is persisted on a task detached
//! from the caller's cancellation (the caller's `tracing` span is carried
//! along, so trace ids survive). Order within one exchange is fixed:
//! thread ensure, then the user message, then the assistant message with a
//! strictly greater timestamp; a monotonic sequence number breaks ties.
//!
//! A bounded semaphore gates concurrent persists. When it is full the
//! persist falls back to a lightweight path (store writes only, no
//! embedding and no extraction); when even that cannot acquire a slot
//! within the configured timeout the persist is dropped with an error log.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, warn};

use crate::chat::Provider;
use crate::memory::{MemoryLayer, StoredMessage, ThreadRecord, facts};
use crate::message::Role;
use crate::task::AgentTask;

impl MemoryLayer {
    /// Persist one exchange in the background.
    ///
    /// Returns immediately; all failures log only. No-op when no store is
    /// wired or the task carries no thread id. `extraction_provider` powers
    /// fact extraction when user memory is enabled.
    pub(crate) fn persist_exchange(
        &self,
        task: &AgentTask,
        assistant_text: String,
        extraction_provider: Option<Arc<dyn Provider>>,
    ) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(thread_id) = task.thread_id().map(ToOwned::to_owned) else {
            return;
        };

        let user_text = task.task.clone();
        let metadata = task.metadata.clone();
        let memory_store = self.memory_store.clone();
        let embedder = self.embedder.clone();
        let config = self.config.clone();
        let gate = self.persist_gate();
        let seq = self.seq_counter();
        let span = tracing::Span::current();

        tokio::spawn(
            async move {
                // Full path when a slot is free; lightweight when the gate is
                // saturated; dropped when even that times out.
                let (_permit, lightweight) = match gate.clone().try_acquire_owned() {
                    Ok(permit) => (permit, false),
                    Err(_) => {
                        match timeout(config.persist_acquire_timeout, gate.acquire_owned()).await {
                            Ok(Ok(permit)) => (permit, true),
                            _ => {
                                error!(thread = %thread_id, "persist dropped: gate saturated");
                                return;
                            }
                        }
                    }
                };

                let now = Utc::now();
                let thread = ThreadRecord {
                    id: thread_id.clone(),
                    title: None,
                    metadata,
                    created_at: now,
                    updated_at: now,
                };
                let ensure = match store.get_thread(&thread_id).await {
                    Ok(Some(_)) => store.update_thread(thread).await,
                    Ok(None) => store.create_thread(thread).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = ensure {
                    error!(error = %e, thread = %thread_id, "thread ensure failed");
                    return;
                }

                // Embed the user text once; skipped on the lightweight path.
                let user_embedding = if lightweight {
                    None
                } else if let Some(embedder) = &embedder {
                    match embedder.embed(&[user_text.clone()]).await {
                        Ok(mut vectors) => vectors.pop(),
                        Err(e) => {
                            warn!(error = %e, "persist embedding failed");
                            None
                        }
                    }
                } else {
                    None
                };

                let user_at = Utc::now();
                let user_message = StoredMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    thread_id: thread_id.clone(),
                    role: Role::User,
                    content: user_text.clone(),
                    created_at: user_at,
                    seq: seq.fetch_add(1, Ordering::Relaxed),
                    embedding: user_embedding,
                };
                if let Err(e) = store.store_message(user_message).await {
                    error!(error = %e, thread = %thread_id, "user message persist failed");
                    return;
                }

                // Assistant timestamp must be strictly after the user's.
                let assistant_at = Utc::now().max(user_at + ChronoDuration::milliseconds(1));
                let assistant_message = StoredMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    thread_id: thread_id.clone(),
                    role: Role::Assistant,
                    content: assistant_text,
                    created_at: assistant_at,
                    seq: seq.fetch_add(1, Ordering::Relaxed),
                    embedding: None,
                };
                if let Err(e) = store.store_message(assistant_message).await {
                    error!(error = %e, thread = %thread_id, "assistant message persist failed");
                    return;
                }

                if lightweight {
                    debug!(thread = %thread_id, "lightweight persist complete");
                    return;
                }

                if let (true, Some(memory_store), Some(provider)) =
                    (config.user_memory, &memory_store, &extraction_provider)
                {
                    if !facts::is_trivial(&user_text, &config.trivial_denylist) {
                        if let Err(e) = facts::extract_and_store(
                            Arc::clone(provider),
                            embedder.clone(),
                            Arc::clone(memory_store),
                            &config,
                            &user_text,
                        )
                        .await
                        {
                            debug!(error = %e, "fact extraction failed");
                        }
                    }

                    if fastrand::f64() < config.decay_probability {
                        match memory_store.decay_old_facts().await {
                            Ok(removed) if removed > 0 => {
                                debug!(removed, "decayed old facts");
                            }
                            Ok(_) => {}
                            Err(e) => debug!(error = %e, "fact decay failed"),
                        }
                    }
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::chat::MockProvider;
    use crate::embedding::MockEmbedder;
    use crate::memory::{
        InMemoryMemoryStore, InMemoryStore, MemoryConfig, MemoryLayer, Store,
    };

    async fn settle() {
        // Persistence is fire-and-forget; give the spawned task time to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn persists_thread_and_both_messages_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let layer = MemoryLayer::new(
            Some(Arc::clone(&store) as Arc<dyn Store>),
            None,
            None,
            MemoryConfig::default(),
        );
        let task = AgentTask::new("what is rust").with_thread_id("t-1");
        layer.persist_exchange(&task, "a language".to_owned(), None);
        settle().await;

        assert!(store.get_thread("t-1").await.unwrap().is_some());
        let messages = store.get_messages("t-1", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].created_at > messages[0].created_at);
        assert!(messages[1].seq > messages[0].seq);
    }

    #[tokio::test]
    async fn no_thread_id_skips_persistence() {
        let store = Arc::new(InMemoryStore::new());
        let layer = MemoryLayer::new(
            Some(Arc::clone(&store) as Arc<dyn Store>),
            None,
            None,
            MemoryConfig::default(),
        );
        layer.persist_exchange(&AgentTask::new("no thread"), "answer".to_owned(), None);
        settle().await;
        assert_eq!(store.get_messages("", 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn user_memory_extracts_facts() {
        let store = Arc::new(InMemoryStore::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        provider.push_text(r#"[{"fact": "works on compilers", "category": "context"}]"#);

        let config = MemoryConfig {
            user_memory: true,
            decay_probability: 0.0,
            ..MemoryConfig::default()
        };
        let layer = MemoryLayer::new(
            Some(store),
            Some(Arc::clone(&memory) as Arc<dyn crate::memory::MemoryStore>),
            Some(Arc::new(MockEmbedder)),
            config,
        );
        let task = AgentTask::new("I spend my days working on compilers").with_thread_id("t-2");
        layer.persist_exchange(&task, "nice".to_owned(), Some(provider));
        settle().await;

        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn trivial_messages_skip_extraction() {
        let store = Arc::new(InMemoryStore::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        // No scripted response: an extraction call would error loudly, but
        // a trivial message must never reach the provider at all.
        let config = MemoryConfig {
            user_memory: true,
            decay_probability: 0.0,
            ..MemoryConfig::default()
        };
        let layer = MemoryLayer::new(
            Some(store),
            Some(Arc::clone(&memory) as Arc<dyn crate::memory::MemoryStore>),
            Some(Arc::new(MockEmbedder)),
            config,
        );
        let task = AgentTask::new("thanks").with_thread_id("t-3");
        layer.persist_exchange(
            &task,
            "you're welcome".to_owned(),
            Some(Arc::clone(&provider) as Arc<dyn Provider>),
        );
        settle().await;

        assert_eq!(provider.call_count(), 0);
        assert!(memory.is_empty());
    }
}
