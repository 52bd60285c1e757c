//! In-memory reference implementations of [`Store`] and [`MemoryStore`].
//!
//! Useful as test fixtures and for single-process deployments that don't
//! need durability. Search is brute-force cosine over stored embeddings.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::error::{Error, Result};
use crate::memory::{
    Fact, MemoryStore, ScoredFact, ScoredMessage, Store, StoredMessage, ThreadRecord, cosine,
};

/// How long an in-memory fact lives before `decay_old_facts` removes it.
const FACT_RETENTION_DAYS: i64 = 90;

#[derive(Default)]
struct StoreInner {
    threads: HashMap<String, ThreadRecord>,
    messages: Vec<StoredMessage>,
}

/// In-memory conversation store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().map_err(|_| std::fmt::Error)?;
        f.debug_struct("InMemoryStore")
            .field("threads", &inner.threads.len())
            .field("messages", &inner.messages.len())
            .finish()
    }
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| Error::internal("store lock poisoned"))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| Error::internal("store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_thread(&self, thread: ThreadRecord) -> Result<()> {
        self.write()?.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn get_thread(&self, id: &str) -> Result<Option<ThreadRecord>> {
        Ok(self.read()?.threads.get(id).cloned())
    }

    async fn update_thread(&self, thread: ThreadRecord) -> Result<()> {
        let mut inner = self.write()?;
        match inner.threads.get_mut(&thread.id) {
            Some(existing) => {
                existing.updated_at = thread.updated_at;
                existing.metadata = thread.metadata;
                if thread.title.is_some() {
                    existing.title = thread.title;
                }
                Ok(())
            }
            None => {
                inner.threads.insert(thread.id.clone(), thread);
                Ok(())
            }
        }
    }

    async fn store_message(&self, message: StoredMessage) -> Result<()> {
        self.write()?.messages.push(message);
        Ok(())
    }

    async fn get_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let inner = self.read()?;
        let mut messages: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (a.created_at, a.seq).cmp(&(b.created_at, b.seq)));
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    async fn search_messages(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMessage>> {
        let inner = self.read()?;
        let mut scored: Vec<ScoredMessage> = inner
            .messages
            .iter()
            .filter_map(|m| {
                let stored = m.embedding.as_deref()?;
                Some(ScoredMessage {
                    message: m.clone(),
                    score: cosine(embedding, stored),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

struct StoredFact {
    fact: Fact,
    embedding: Option<Vec<f32>>,
}

/// In-memory user-fact store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    facts: RwLock<Vec<StoredFact>>,
}

impl std::fmt::Debug for InMemoryMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let facts = self.facts.read().map_err(|_| std::fmt::Error)?;
        f.debug_struct("InMemoryMemoryStore")
            .field("facts", &facts.len())
            .finish()
    }
}

impl InMemoryMemoryStore {
    /// Create an empty fact store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.read().map(|f| f.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn upsert_fact(
        &self,
        text: &str,
        category: &str,
        embedding: Option<&[f32]>,
    ) -> Result<String> {
        let mut facts = self
            .facts
            .write()
            .map_err(|_| Error::internal("fact lock poisoned"))?;
        if let Some(existing) = facts
            .iter_mut()
            .find(|f| f.fact.text == text && f.fact.category == category)
        {
            existing.embedding = embedding.map(<[f32]>::to_vec);
            existing.fact.created_at = Utc::now();
            return Ok(existing.fact.id.clone());
        }
        let id = uuid::Uuid::new_v4().to_string();
        facts.push(StoredFact {
            fact: Fact {
                id: id.clone(),
                text: text.to_owned(),
                category: category.to_owned(),
                created_at: Utc::now(),
            },
            embedding: embedding.map(<[f32]>::to_vec),
        });
        Ok(id)
    }

    async fn search_facts(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredFact>> {
        let facts = self
            .facts
            .read()
            .map_err(|_| Error::internal("fact lock poisoned"))?;
        let mut scored: Vec<ScoredFact> = facts
            .iter()
            .filter_map(|f| {
                let stored = f.embedding.as_deref()?;
                Some(ScoredFact {
                    fact: f.fact.clone(),
                    score: cosine(embedding, stored),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_fact(&self, id: &str) -> Result<()> {
        self.facts
            .write()
            .map_err(|_| Error::internal("fact lock poisoned"))?
            .retain(|f| f.fact.id != id);
        Ok(())
    }

    async fn delete_matching_facts(&self, pattern: &str) -> Result<usize> {
        let mut facts = self
            .facts
            .write()
            .map_err(|_| Error::internal("fact lock poisoned"))?;
        let before = facts.len();
        facts.retain(|f| !f.fact.text.contains(pattern));
        Ok(before - facts.len())
    }

    async fn decay_old_facts(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(FACT_RETENTION_DAYS);
        let mut facts = self
            .facts
            .write()
            .map_err(|_| Error::internal("fact lock poisoned"))?;
        let before = facts.len();
        facts.retain(|f| f.fact.created_at >= cutoff);
        Ok(before - facts.len())
    }

    async fn build_context(&self, embedding: &[f32]) -> Result<String> {
        let relevant = self.search_facts(embedding, 5).await?;
        if relevant.is_empty() {
            return Ok(String::new());
        }
        let mut block = String::from("What you remember about this user:\n");
        for scored in relevant {
            block.push_str(&format!(
                "- [{}] {}\n",
                scored.fact.category, scored.fact.text
            ));
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn msg(thread: &str, seq: u64, content: &str, embedding: Option<Vec<f32>>) -> StoredMessage {
        StoredMessage {
            id: format!("m-{seq}"),
            thread_id: thread.to_owned(),
            role: Role::User,
            content: content.to_owned(),
            created_at: Utc::now(),
            seq,
            embedding,
        }
    }

    #[tokio::test]
    async fn get_messages_returns_most_recent_in_order() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .store_message(msg("t", i, &format!("msg {i}"), None))
                .await
                .unwrap();
        }
        let loaded = store.get_messages("t", 3).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].content, "msg 2");
        assert_eq!(loaded[2].content, "msg 4");
    }

    #[tokio::test]
    async fn update_thread_preserves_title_when_absent() {
        let store = InMemoryStore::new();
        store
            .create_thread(ThreadRecord {
                id: "t".into(),
                title: Some("original".into()),
                ..ThreadRecord::default()
            })
            .await
            .unwrap();
        store
            .update_thread(ThreadRecord {
                id: "t".into(),
                title: None,
                updated_at: Utc::now(),
                ..ThreadRecord::default()
            })
            .await
            .unwrap();
        let thread = store.get_thread("t").await.unwrap().unwrap();
        assert_eq!(thread.title.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = InMemoryStore::new();
        store
            .store_message(msg("a", 0, "near", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .store_message(msg("b", 1, "far", Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        let hits = store.search_messages(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].message.content, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn upsert_replaces_same_text_and_category() {
        let store = InMemoryMemoryStore::new();
        let first = store
            .upsert_fact("likes rust", "preference", Some(&[1.0]))
            .await
            .unwrap();
        let second = store
            .upsert_fact("likes rust", "preference", Some(&[0.5]))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_matching_is_substring_based() {
        let store = InMemoryMemoryStore::new();
        store
            .upsert_fact("works at Initech", "context", None)
            .await
            .unwrap();
        store
            .upsert_fact("likes coffee", "preference", None)
            .await
            .unwrap();
        let deleted = store.delete_matching_facts("Initech").await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn build_context_lists_relevant_facts() {
        let store = InMemoryMemoryStore::new();
        store
            .upsert_fact("prefers dark mode", "preference", Some(&[1.0, 0.0]))
            .await
            .unwrap();
        let block = store.build_context(&[1.0, 0.0]).await.unwrap();
        assert!(block.contains("prefers dark mode"));
        assert!(block.contains("[preference]"));
    }
}
