//! Conversation and user memory.
//!
//! The memory layer runs on the loop's boundaries: before the first LLM
//! call it assembles the message list (system prompt, recalled user facts,
//! thread history, optional cross-thread recall, the new user input), and
//! after a successful turn it persists the exchange in the background,
//! opportunistically extracting durable facts about the user.
//!
//! Concrete persistence backends implement [`Store`] (conversations) and
//! [`MemoryStore`] (user facts). The crate ships in-memory reference
//! implementations; anything durable lives outside the core.

mod facts;
mod history;
mod in_memory;
mod persist;

pub use facts::{DEFAULT_FACT_CATEGORIES, DEFAULT_TRIVIAL_DENYLIST};
pub use in_memory::{InMemoryMemoryStore, InMemoryStore};

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::message::Role;

/// A conversation thread row.
#[derive(Debug, Clone, Default)]
pub struct ThreadRecord {
    /// Thread id.
    pub id: String,
    /// Optional human-readable title.
    pub title: Option<String>,
    /// Opaque metadata carried from the task.
    pub metadata: HashMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last-update time.
    pub updated_at: DateTime<Utc>,
}

/// A persisted conversation message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Message id.
    pub id: String,
    /// Owning thread.
    pub thread_id: String,
    /// Message role.
    pub role: Role,
    /// Content text.
    pub content: String,
    /// Persistence timestamp. Within one exchange the assistant timestamp is
    /// strictly greater than the user's.
    pub created_at: DateTime<Utc>,
    /// Time-ordered secondary id breaking timestamp ties.
    pub seq: u64,
    /// Optional content embedding.
    pub embedding: Option<Vec<f32>>,
}

/// A message with a similarity score.
///
/// Stores that do not expose similarity report `score = 0.0`; callers must
/// treat zero as "unknown relevance".
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    /// The message.
    pub message: StoredMessage,
    /// Cosine similarity to the query, or `0.0` when unknown.
    pub score: f32,
}

/// A durable fact about a user.
#[derive(Debug, Clone)]
pub struct Fact {
    /// Fact id.
    pub id: String,
    /// The fact text.
    pub text: String,
    /// One of the configured fact categories.
    pub category: String,
    /// When the fact was stored.
    pub created_at: DateTime<Utc>,
}

/// A fact with a similarity score.
#[derive(Debug, Clone)]
pub struct ScoredFact {
    /// The fact.
    pub fact: Fact,
    /// Cosine similarity to the query, or `0.0` when unknown.
    pub score: f32,
}

/// Conversation persistence contract.
///
/// `get_messages` returns the most recent `limit` messages of a thread in
/// chronological order (oldest first).
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a thread row.
    async fn create_thread(&self, thread: ThreadRecord) -> Result<()>;

    /// Look up a thread row.
    async fn get_thread(&self, id: &str) -> Result<Option<ThreadRecord>>;

    /// Update a thread row. Implementations preserve an existing title when
    /// the update carries none.
    async fn update_thread(&self, thread: ThreadRecord) -> Result<()>;

    /// Persist a message.
    async fn store_message(&self, message: StoredMessage) -> Result<()>;

    /// Load the most recent `limit` messages of a thread, oldest first.
    async fn get_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Search messages store-wide by embedding similarity.
    async fn search_messages(&self, embedding: &[f32], top_k: usize)
    -> Result<Vec<ScoredMessage>>;
}

/// User-fact persistence contract.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or update a fact; returns its id.
    async fn upsert_fact(
        &self,
        text: &str,
        category: &str,
        embedding: Option<&[f32]>,
    ) -> Result<String>;

    /// Search facts by embedding similarity.
    async fn search_facts(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredFact>>;

    /// Delete a fact by id.
    async fn delete_fact(&self, id: &str) -> Result<()>;

    /// Delete facts whose text contains `pattern` (substring match, not
    /// regex or SQL). Returns how many were deleted.
    async fn delete_matching_facts(&self, pattern: &str) -> Result<usize>;

    /// Age out stale facts. Returns how many were removed.
    async fn decay_old_facts(&self) -> Result<usize>;

    /// Render a context block for the system prompt from the facts most
    /// relevant to the query embedding.
    async fn build_context(&self, embedding: &[f32]) -> Result<String>;
}

/// Memory-layer tunables. Defaults match the documented policy table.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Messages of history loaded per execution.
    pub max_history: usize,
    /// Optional token budget (estimated as character count) for loaded
    /// history; `None` disables trimming.
    pub max_tokens: Option<usize>,
    /// Most-recent messages always preserved by semantic trimming.
    pub keep_recent: usize,
    /// Score trimming candidates by similarity instead of age.
    pub semantic_trim: bool,
    /// Search past threads for relevant context.
    pub cross_thread_recall: bool,
    /// Minimum similarity for cross-thread recall hits.
    pub min_recall_score: f32,
    /// Recall hits requested from the store.
    pub recall_top_k: usize,
    /// Extract and persist durable facts about the user.
    pub user_memory: bool,
    /// Minimum similarity for a fact to be superseded.
    pub supersede_min_score: f32,
    /// Facts accepted per turn.
    pub max_facts_per_turn: usize,
    /// Fact text cap in characters.
    pub fact_max_chars: usize,
    /// Probability of running fact decay after a turn.
    pub decay_probability: f64,
    /// Accepted fact categories.
    pub categories: Vec<String>,
    /// Messages never worth extracting facts from.
    pub trivial_denylist: Vec<String>,
    /// Concurrent background persists.
    pub persist_capacity: usize,
    /// How long a lightweight persist waits for a slot before dropping.
    pub persist_acquire_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 10,
            max_tokens: None,
            keep_recent: 4,
            semantic_trim: false,
            cross_thread_recall: false,
            min_recall_score: 0.60,
            recall_top_k: 5,
            user_memory: false,
            supersede_min_score: 0.80,
            max_facts_per_turn: 10,
            fact_max_chars: 200,
            decay_probability: 0.05,
            categories: DEFAULT_FACT_CATEGORIES
                .iter()
                .map(ToString::to_string)
                .collect(),
            trivial_denylist: DEFAULT_TRIVIAL_DENYLIST
                .iter()
                .map(ToString::to_string)
                .collect(),
            persist_capacity: 16,
            persist_acquire_timeout: Duration::from_secs(2),
        }
    }
}

/// The memory layer an agent executes against.
///
/// Bundles the optional store, fact store, and embedder with the config,
/// plus the persistence gate and the monotonic sequence counter.
pub struct MemoryLayer {
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) memory_store: Option<Arc<dyn MemoryStore>>,
    pub(crate) embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub(crate) config: MemoryConfig,
    persist_gate: OnceLock<Arc<Semaphore>>,
    seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLayer")
            .field("store", &self.store.is_some())
            .field("memory_store", &self.memory_store.is_some())
            .field("embedder", &self.embedder.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryLayer {
    /// Assemble a memory layer.
    #[must_use]
    pub fn new(
        store: Option<Arc<dyn Store>>,
        memory_store: Option<Arc<dyn MemoryStore>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            memory_store,
            embedder,
            config,
            persist_gate: OnceLock::new(),
            seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A layer with nothing wired: builds bare message lists and skips
    /// persistence entirely.
    #[must_use]
    pub fn unwired() -> Self {
        Self::new(None, None, None, MemoryConfig::default())
    }

    /// Whether conversation persistence is wired.
    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// The persistence gate, lazily initialized exactly once.
    pub(crate) fn persist_gate(&self) -> Arc<Semaphore> {
        Arc::clone(
            self.persist_gate
                .get_or_init(|| Arc::new(Semaphore::new(self.config.persist_capacity))),
        )
    }

    pub(crate) fn seq_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.seq)
    }
}

/// Cosine similarity between two vectors. Mismatched or zero-length inputs
/// score `0.0`.
#[must_use]
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.7];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn config_defaults_match_policy_table() {
        let config = MemoryConfig::default();
        assert_eq!(config.max_history, 10);
        assert!((config.min_recall_score - 0.60).abs() < f32::EPSILON);
        assert!((config.supersede_min_score - 0.80).abs() < f32::EPSILON);
        assert_eq!(config.max_facts_per_turn, 10);
        assert_eq!(config.fact_max_chars, 200);
        assert_eq!(config.persist_capacity, 16);
        assert!((config.decay_probability - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn persist_gate_initializes_once() {
        let layer = MemoryLayer::unwired();
        let a = layer.persist_gate();
        let b = layer.persist_gate();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
