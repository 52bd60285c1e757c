//! Automatic fact extraction.
//!
//! After a successful turn the persistence path may run one LLM call asking
//! for durable facts about the user, constrained to a small category set.
//! The response is parsed tolerantly (models love markdown fences),
//! sanitized, deduplicated against superseded facts, embedded, and
//! upserted. Every failure here degrades silently: extraction is
//! opportunistic, never load-bearing.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::chat::{ChatRequest, Provider};
use crate::embedding::EmbeddingProvider;
use crate::memory::{MemoryConfig, MemoryStore};
use crate::message::ChatMessage;

/// Default fact categories.
pub const DEFAULT_FACT_CATEGORIES: [&str; 5] =
    ["identity", "preference", "goal", "relationship", "context"];

/// Common acknowledgments, across several languages, never worth an
/// extraction call.
pub const DEFAULT_TRIVIAL_DENYLIST: [&str; 16] = [
    "ok", "okay", "yes", "no", "thanks", "thank you", "hi", "hello", "bye", "lol", "cool",
    "gracias", "merci", "danke", "спасибо", "谢谢",
];

/// Messages shorter than this never trigger extraction.
const TRIVIAL_MIN_CHARS: usize = 10;

/// The fixed extraction instruction.
const EXTRACTION_PROMPT: &str = "Extract durable facts about the user from their message. \
Respond with a JSON array of objects, each with \"fact\" (a short statement), \"category\" \
(one of: identity, preference, goal, relationship, context), and optionally \"supersedes\" \
(the text of an earlier fact this one replaces). Respond with [] when there is nothing \
worth remembering.";

/// One candidate fact parsed from the extraction response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FactCandidate {
    /// The fact text.
    pub fact: String,
    /// Claimed category; validated against the configured set.
    pub category: String,
    /// Text of an earlier fact this one replaces.
    #[serde(default)]
    pub supersedes: Option<String>,
}

/// Whether a message is too trivial to extract from.
pub(crate) fn is_trivial(text: &str, denylist: &[String]) -> bool {
    if text.chars().count() < TRIVIAL_MIN_CHARS {
        return true;
    }
    let normalized = text.trim().trim_end_matches(['.', '!', '?']).to_lowercase();
    denylist.iter().any(|entry| *entry == normalized)
}

/// Strip a markdown code fence when the whole payload is fenced.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the fence line.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .trim_end_matches('`')
        .trim()
}

/// Parse the extraction response into candidates. Unparseable responses
/// yield an empty list.
pub(crate) fn parse_facts(response: &str) -> Vec<FactCandidate> {
    serde_json::from_str(strip_code_fence(response)).unwrap_or_default()
}

/// Drop invalid categories, truncate fact text, and cap the count.
pub(crate) fn sanitize(candidates: Vec<FactCandidate>, config: &MemoryConfig) -> Vec<FactCandidate> {
    candidates
        .into_iter()
        .filter(|c| config.categories.iter().any(|cat| *cat == c.category))
        .map(|mut c| {
            c.fact = crate::result::truncate_chars(&c.fact, config.fact_max_chars);
            c
        })
        .take(config.max_facts_per_turn)
        .collect()
}

/// Run the full extraction pipeline for one user message.
///
/// Errors are logged and swallowed by the caller; this function reports them
/// for the persist path's logging only.
pub(crate) async fn extract_and_store(
    provider: Arc<dyn Provider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    memory_store: Arc<dyn MemoryStore>,
    config: &MemoryConfig,
    user_text: &str,
) -> crate::error::Result<usize> {
    let request = ChatRequest::new(vec![
        ChatMessage::system(EXTRACTION_PROMPT),
        ChatMessage::user(user_text),
    ]);
    let response = provider.chat(&request).await?;
    let candidates = sanitize(parse_facts(&response.content), config);
    if candidates.is_empty() {
        return Ok(0);
    }

    let mut stored = 0;
    for candidate in candidates {
        // Retire facts the new one supersedes.
        if let (Some(superseded), Some(embedder)) = (&candidate.supersedes, &embedder) {
            match embedder.embed(&[superseded.clone()]).await {
                Ok(vectors) => {
                    if let Some(vector) = vectors.first() {
                        match memory_store.search_facts(vector, 5).await {
                            Ok(matches) => {
                                for hit in matches
                                    .iter()
                                    .filter(|h| h.score >= config.supersede_min_score)
                                {
                                    if let Err(e) = memory_store.delete_fact(&hit.fact.id).await {
                                        warn!(error = %e, "superseded fact delete failed");
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "supersede search failed"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "supersede embedding failed"),
            }
        }

        let embedding = match &embedder {
            Some(embedder) => match embedder.embed(&[candidate.fact.clone()]).await {
                Ok(mut vectors) => vectors.pop(),
                Err(e) => {
                    warn!(error = %e, "fact embedding failed; storing without vector");
                    None
                }
            },
            None => None,
        };
        memory_store
            .upsert_fact(&candidate.fact, &candidate.category, embedding.as_deref())
            .await?;
        stored += 1;
    }
    debug!(facts = stored, "fact extraction stored facts");
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> MemoryConfig {
        MemoryConfig::default()
    }

    #[test]
    fn trivial_detection() {
        let denylist: Vec<String> = DEFAULT_TRIVIAL_DENYLIST
            .iter()
            .map(ToString::to_string)
            .collect();
        assert!(is_trivial("ok", &denylist));
        assert!(is_trivial("Thank you!", &denylist));
        assert!(is_trivial("short", &denylist)); // under the length floor
        assert!(!is_trivial(
            "I moved to Berlin last month and started a new job",
            &denylist
        ));
    }

    #[test]
    fn parses_plain_json_array() {
        let facts =
            parse_facts(r#"[{"fact": "lives in Berlin", "category": "context"}]"#);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact, "lives in Berlin");
        assert!(facts[0].supersedes.is_none());
    }

    #[test]
    fn parses_fenced_json() {
        let fenced = "```json\n[{\"fact\": \"prefers tea\", \"category\": \"preference\", \
                      \"supersedes\": \"prefers coffee\"}]\n```";
        let facts = parse_facts(fenced);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].supersedes.as_deref(), Some("prefers coffee"));
    }

    #[test]
    fn garbage_parses_to_empty() {
        assert!(parse_facts("I couldn't find any facts.").is_empty());
    }

    #[test]
    fn sanitize_drops_invalid_categories() {
        let candidates = vec![
            FactCandidate {
                fact: "valid".into(),
                category: "preference".into(),
                supersedes: None,
            },
            FactCandidate {
                fact: "invalid".into(),
                category: "horoscope".into(),
                supersedes: None,
            },
        ];
        let kept = sanitize(candidates, &default_config());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].fact, "valid");
    }

    #[test]
    fn sanitize_truncates_and_caps() {
        let config = default_config();
        let candidates: Vec<FactCandidate> = (0..15)
            .map(|i| FactCandidate {
                fact: format!("{i}-").repeat(100),
                category: "context".into(),
                supersedes: None,
            })
            .collect();
        let kept = sanitize(candidates, &config);
        assert_eq!(kept.len(), config.max_facts_per_turn);
        assert!(kept[0].fact.chars().count() <= config.fact_max_chars + 20);
    }

    #[tokio::test]
    async fn extraction_pipeline_stores_and_supersedes() {
        use std::sync::Arc;

        use crate::chat::MockProvider;
        use crate::embedding::MockEmbedder;
        use crate::memory::{InMemoryMemoryStore, MemoryStore};

        let embedder = Arc::new(MockEmbedder);
        let store = Arc::new(InMemoryMemoryStore::new());

        // Seed a fact the extraction will supersede. Identical text gives
        // an identical embedding, so the supersede search finds it.
        let old = embedder.embed(&["prefers coffee".to_owned()]).await.unwrap();
        store
            .upsert_fact("prefers coffee", "preference", Some(&old[0]))
            .await
            .unwrap();

        let provider = Arc::new(MockProvider::new());
        provider.push_text(
            r#"[{"fact": "prefers tea", "category": "preference", "supersedes": "prefers coffee"}]"#,
        );

        let stored = extract_and_store(
            provider,
            Some(embedder),
            Arc::clone(&store) as Arc<dyn MemoryStore>,
            &default_config(),
            "actually I prefer tea these days",
        )
        .await
        .unwrap();

        assert_eq!(stored, 1);
        assert_eq!(store.len(), 1);
    }
}
