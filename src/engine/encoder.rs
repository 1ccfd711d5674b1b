// ── Encoder (C1) ───────────────────────────────────────────────────────────
//
// Turns raw text into an unstored MemoryNode: embedding, entity anchors,
// and sentiment. The structural output is the vector; entities and
// sentiment are enrichments and their failures never fail the call — the
// node comes back with empty entities and neutral sentiment instead.
//
// Embedding failure is survivable too: the node is returned with a zero
// vector and degraded = true, and the caller keeps it out of recall seeds.

use crate::atoms::constants::EMBEDDING_MAX_CONTENT_BYTES;
use crate::atoms::error::MemoryResult;
use crate::atoms::types::{MemoryNode, MemoryTier, NodeMetadata};
use crate::engine::providers::{extract_json_block, EmbeddingProvider, LlmProvider};
use crate::engine::store::embedding::l2_normalize;
use log::warn;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

const MAX_ENTITIES: usize = 20;

const ENTITY_PROMPT: &str = r#"Extract the named entities from the text below: people, organizations, places, products, events, dates, and amounts.

Respond with ONLY valid JSON in this shape, no additional text:
{"entities": ["entity one", "entity two"]}

Text:
"#;

const SENTIMENT_PROMPT: &str = r#"Classify the emotional polarity of the text below as a single number between -1.0 (strongly negative) and 1.0 (strongly positive); 0.0 is neutral.

Respond with ONLY valid JSON in this shape, no additional text:
{"sentiment": 0.0}

Text:
"#;

static CAPITALIZED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w.-]+@[\w.-]+\.\w+\b").unwrap());
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s*\d{4}\b",
    )
    .unwrap()
});

/// Encodes content into memory nodes with metadata and embeddings.
pub struct Encoder {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Encoder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { embedder, llm }
    }

    /// Encode content into an unstored MemoryNode.
    pub async fn encode(
        &self,
        scope: &str,
        content: &str,
        source_tag: &str,
    ) -> MemoryResult<MemoryNode> {
        let entities = self.extract_entities(content).await;
        let sentiment = self.analyze_sentiment(content).await;
        let (vector, degraded) = self.generate_embedding(content).await;

        let mut node = MemoryNode::new(scope, content);
        node.vector = vector;
        node.metadata = NodeMetadata {
            entities,
            sentiment,
            source: source_tag.to_string(),
            degraded,
        };
        node.tier = MemoryTier::L2;
        Ok(node)
    }

    /// Generate an L2-normalized embedding. On provider failure, returns a
    /// zero vector of the configured dimension and flags degradation.
    pub async fn generate_embedding(&self, content: &str) -> (Vec<f32>, bool) {
        let truncated = truncate_bytes(content, EMBEDDING_MAX_CONTENT_BYTES);
        match self.embedder.embed_one(truncated).await {
            Ok(mut v) if !v.is_empty() => {
                l2_normalize(&mut v);
                (v, false)
            }
            Ok(_) => {
                warn!("[encoder] Empty embedding — storing degraded node");
                (vec![0.0; self.embedder.dim()], true)
            }
            Err(e) => {
                warn!("[encoder] Embedding failed — storing degraded node: {}", e);
                (vec![0.0; self.embedder.dim()], true)
            }
        }
    }

    // ── Entity extraction ──────────────────────────────────────────────

    /// Union of the LLM's JSON-extracted entities and the regex fallback,
    /// deduplicated case-insensitively, capped at MAX_ENTITIES.
    pub async fn extract_entities(&self, content: &str) -> Vec<String> {
        let mut entities = Vec::new();

        if let Some(llm) = &self.llm {
            let prompt = format!("{}{}", ENTITY_PROMPT, truncate_bytes(content, 4000));
            match llm.complete(&prompt).await {
                Ok(response) => {
                    if let Some(v) = extract_json_block(&response) {
                        if let Some(list) = v["entities"].as_array() {
                            for e in list {
                                if let Some(s) = e.as_str() {
                                    let s = s.trim();
                                    if !s.is_empty() {
                                        entities.push(s.to_string());
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("[encoder] Entity extraction skipped: {}", e),
            }
        }

        entities.extend(extract_entities_regex(content));
        dedup_case_insensitive(entities, MAX_ENTITIES)
    }

    // ── Sentiment ──────────────────────────────────────────────────────

    /// Sentiment in [-1, 1] via the LLM classifier, lexicon fallback, 0.0
    /// when everything fails.
    pub async fn analyze_sentiment(&self, content: &str) -> f64 {
        if let Some(llm) = &self.llm {
            let prompt = format!("{}{}", SENTIMENT_PROMPT, truncate_bytes(content, 4000));
            match llm.complete(&prompt).await {
                Ok(response) => {
                    if let Some(v) = extract_json_block(&response) {
                        if let Some(s) = v["sentiment"].as_f64() {
                            return s.clamp(-1.0, 1.0);
                        }
                    }
                }
                Err(e) => warn!("[encoder] Sentiment classification skipped: {}", e),
            }
        }
        lexicon_sentiment(content)
    }
}

// ── Fallback helpers ───────────────────────────────────────────────────────

/// Regex entity extraction: capitalized phrases, emails, URLs, dates.
fn extract_entities_regex(content: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    entities.extend(CAPITALIZED_RE.find_iter(content).take(10).map(|m| m.as_str().to_string()));
    entities.extend(EMAIL_RE.find_iter(content).take(3).map(|m| m.as_str().to_string()));
    entities.extend(URL_RE.find_iter(content).take(3).map(|m| m.as_str().to_string()));
    entities.extend(DATE_RE.find_iter(content).take(5).map(|m| m.as_str().to_string()));
    entities
}

fn dedup_case_insensitive(entities: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(e.to_lowercase()))
        .take(cap)
        .collect()
}

/// Lexicon-based polarity: (pos − neg) / (pos + neg) over matched words.
fn lexicon_sentiment(content: &str) -> f64 {
    const POSITIVE: &[&str] = &[
        "good", "great", "excellent", "amazing", "wonderful", "fantastic", "happy", "love",
        "best", "perfect", "success", "win", "positive", "helpful", "useful", "effective",
        "efficient", "improve", "solved",
    ];
    const NEGATIVE: &[&str] = &[
        "bad", "terrible", "awful", "horrible", "worst", "fail", "error", "problem", "issue",
        "bug", "crash", "broken", "wrong", "negative", "difficult", "hard", "confusing",
        "slow", "frustrated", "angry",
    ];

    let lower = content.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let pos = words.iter().filter(|w| POSITIVE.contains(w)).count() as f64;
    let neg = words.iter().filter(|w| NEGATIVE.contains(w)).count() as f64;
    let total = pos + neg;
    if total == 0.0 {
        0.0
    } else {
        ((pos - neg) / total).clamp(-1.0, 1.0)
    }
}

/// Truncate to a byte budget without splitting a UTF-8 sequence.
fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::MemoryError;
    use async_trait::async_trait;

    /// Deterministic embedder for tests: words hash into buckets, L2-normed.
    struct HashEmbedder {
        dim: usize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
            if self.fail {
                return Err(MemoryError::provider("test", "down"));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dim];
                    for word in t.to_lowercase().split_whitespace() {
                        let mut h = 5381usize;
                        for b in word.bytes() {
                            h = h.wrapping_mul(33).wrapping_add(b as usize);
                        }
                        v[h % self.dim] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }

    struct CannedLlm(String);

    #[async_trait]
    impl LlmProvider for CannedLlm {
        async fn complete(&self, _prompt: &str) -> MemoryResult<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn encode_produces_unit_vector() {
        let encoder = Encoder::new(Arc::new(HashEmbedder { dim: 16, fail: false }), None);
        let node = encoder.encode("s", "the quick brown fox", "user").await.unwrap();
        let norm: f32 = node.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(!node.metadata.degraded);
        assert_eq!(node.metadata.source, "user");
    }

    #[tokio::test]
    async fn embedding_failure_yields_degraded_zero_vector() {
        let encoder = Encoder::new(Arc::new(HashEmbedder { dim: 8, fail: true }), None);
        let node = encoder.encode("s", "anything", "user").await.unwrap();
        assert!(node.metadata.degraded);
        assert_eq!(node.vector, vec![0.0; 8]);
    }

    #[tokio::test]
    async fn entities_union_llm_and_regex() {
        let llm = CannedLlm(r#"{"entities": ["Paris", "Eiffel Tower"]}"#.to_string());
        let encoder = Encoder::new(
            Arc::new(HashEmbedder { dim: 8, fail: false }),
            Some(Arc::new(llm)),
        );
        let entities = encoder
            .extract_entities("Visited Paris and emailed anne@example.com")
            .await;
        assert!(entities.contains(&"Paris".to_string()));
        assert!(entities.contains(&"Eiffel Tower".to_string()));
        assert!(entities.contains(&"anne@example.com".to_string()));
        // "Paris" from both sources appears once
        let paris_count = entities.iter().filter(|e| e.to_lowercase() == "paris").count();
        assert_eq!(paris_count, 1);
    }

    #[tokio::test]
    async fn llm_garbage_falls_back_to_regex_entities() {
        let llm = CannedLlm("not json at all".to_string());
        let encoder = Encoder::new(
            Arc::new(HashEmbedder { dim: 8, fail: false }),
            Some(Arc::new(llm)),
        );
        let entities = encoder.extract_entities("Meeting with Alice Johnson").await;
        assert!(entities.contains(&"Meeting".to_string()) || entities.contains(&"Alice Johnson".to_string()));
    }

    #[tokio::test]
    async fn llm_sentiment_is_clamped() {
        let llm = CannedLlm(r#"{"sentiment": 3.5}"#.to_string());
        let encoder = Encoder::new(
            Arc::new(HashEmbedder { dim: 8, fail: false }),
            Some(Arc::new(llm)),
        );
        let s = encoder.analyze_sentiment("whatever").await;
        assert_eq!(s, 1.0);
    }

    #[test]
    fn lexicon_sentiment_polarity() {
        assert!(lexicon_sentiment("this is great and helpful") > 0.0);
        assert!(lexicon_sentiment("terrible awful crash") < 0.0);
        assert_eq!(lexicon_sentiment("the cat sat on the mat"), 0.0);
        assert_eq!(lexicon_sentiment(""), 0.0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate_bytes(s, 3);
        assert!(t.len() <= 3);
        assert!(s.starts_with(t));
    }

    #[test]
    fn regex_extracts_dates_and_urls() {
        let found = extract_entities_regex("Due 12/31/2025, see https://example.com/doc");
        assert!(found.iter().any(|e| e == "12/31/2025"));
        assert!(found.iter().any(|e| e.starts_with("https://example.com")));
    }
}
