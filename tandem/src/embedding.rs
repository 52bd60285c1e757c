//! Embedding provider contract.
//!
//! Embeddings power cross-thread recall, semantic history trimming, and
//! user-fact search. Concrete providers (and their retry wrappers) live
//! outside the core.

use async_trait::async_trait;

use crate::error::Result;

/// Produces fixed-size float vectors from text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed each text, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of the vectors returned by [`EmbeddingProvider::embed`].
    fn dimensions(&self) -> usize;

    /// Provider name, used in logs.
    fn name(&self) -> &str;
}

/// Deterministic embedder for tests: hashes characters into a small vector.
///
/// Similar strings produce similar vectors, which is enough to exercise
/// recall and fact-supersede paths without a real model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockEmbedder;

const MOCK_DIMENSIONS: usize = 16;

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    fn name(&self) -> &str {
        "mock-embedder"
    }
}

fn embed_one(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; MOCK_DIMENSIONS];
    for (i, c) in text.chars().enumerate() {
        v[i % MOCK_DIMENSIONS] += (c as u32 % 97) as f32;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_vector_per_input() {
        let vectors = MockEmbedder
            .embed(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == MOCK_DIMENSIONS));
    }

    #[tokio::test]
    async fn identical_texts_embed_identically() {
        let vectors = MockEmbedder
            .embed(&["same text".into(), "same text".into()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vectors[1]);
    }
}
