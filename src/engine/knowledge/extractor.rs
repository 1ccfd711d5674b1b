// ── KnowledgeExtractor (C12) ───────────────────────────────────────────────
//
// LLM-driven extraction of (subject, predicate, object) triples from
// conversation messages, followed by the strict filter that keeps personal
// user attributes out of the global knowledge base:
//   1. subject "user" is rejected outright
//   2. personal-attribute predicates (name, age, location, preference, …)
//      are rejected
//   3. extractions below the confidence floor are rejected
//
// The whole result is discarded unless the message is factual with
// statement or correction intent. Extraction failure never blocks the
// caller — an empty result comes back instead.

use crate::atoms::knowledge_types::{
    ExtractionResult, KnowledgeConfig, KnowledgeIntent, KnowledgeSource, KnowledgeTriple,
};
use crate::engine::providers::{extract_json_block, LlmProvider};
use log::{info, warn};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

const EXTRACTION_PROMPT: &str = r#"You are a knowledge extraction system. Analyze the following message and extract structured knowledge.

## Task
1. Determine if the message contains factual information about the world (technical facts, domain knowledge, properties of named things)
2. If factual, extract knowledge as triples: (subject, predicate, object)
3. Identify the intent: statement, correction, question, or opinion

## Examples

Input: "Claude 3.5 Sonnet has a context window of 200k tokens"
Output:
```json
{"is_factual": true, "intent": "statement", "triples": [{"subject": "Claude 3.5 Sonnet", "predicate": "context_window", "object": "200k tokens"}], "confidence": 0.95}
```

Input: "Actually, GPT-4 now supports 128k context, not 32k"
Output:
```json
{"is_factual": true, "intent": "correction", "triples": [{"subject": "GPT-4", "predicate": "context_window", "object": "128k"}], "confidence": 0.9}
```

Input: "Python was created by Guido van Rossum and released in 1991"
Output:
```json
{"is_factual": true, "intent": "statement", "triples": [{"subject": "Python", "predicate": "created_by", "object": "Guido van Rossum"}, {"subject": "Python", "predicate": "release_year", "object": "1991"}], "confidence": 0.95}
```

Input: "I think Python is the best language"
Output:
```json
{"is_factual": false, "intent": "opinion", "triples": [], "confidence": 0.8}
```

Input: "What's the latest version of React?"
Output:
```json
{"is_factual": false, "intent": "question", "triples": [], "confidence": 0.9}
```

## Guidelines
- subject: the main entity. Use "user" for personal information about the current user.
- predicate: the relationship or attribute in snake_case (e.g. "created_by", "context_window")
- object: the value or target entity
- Correction intent means the message corrects previously stated information
- Set confidence by how clear and unambiguous the statement is

## Message to Analyze
{message}

## Response
Respond with ONLY valid JSON, no additional text:"#;

/// Personal-attribute predicates excluded from the global store, with
/// their common synonyms. Matched per snake_case token.
const BLOCKED_PREDICATE_TERMS: &[&str] = &[
    "name", "nickname", "age", "birthday", "birthdate", "birthplace", "location", "address",
    "hometown", "email", "phone", "preference", "preferences", "favorite", "favourite",
    "hobby", "hobbies", "goal", "goals", "project", "projects", "job", "occupation",
    "workplace", "employer",
];

static NON_PREDICATE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_]").unwrap());
static PREDICATE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-]+").unwrap());

pub struct KnowledgeExtractor {
    config: KnowledgeConfig,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl KnowledgeExtractor {
    pub fn new(config: KnowledgeConfig, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { config, llm }
    }

    /// Extract storable triples from one message. `role` decides the
    /// provenance: assistant messages yield agent_inferred triples, user
    /// messages user_stated (or user_correction on correction intent).
    pub async fn extract(&self, message: &str, role: &str) -> ExtractionResult {
        let llm = match &self.llm {
            Some(llm) => llm,
            None => return ExtractionResult::default(),
        };
        if message.trim().len() < 10 {
            return ExtractionResult::default();
        }

        let prompt = EXTRACTION_PROMPT.replace("{message}", message);
        let response = match llm.complete(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!("[knowledge] Extraction skipped: {}", e);
                return ExtractionResult::default();
            }
        };

        let mut result = self.parse_response(&response);
        if !result.is_factual || !result.intent.map_or(false, |i| i.is_storable()) {
            result.triples.clear();
            return result;
        }

        // Provenance per role and intent.
        let source = if role == "assistant" {
            KnowledgeSource::AgentInferred
        } else if result.intent == Some(KnowledgeIntent::Correction) {
            KnowledgeSource::UserCorrection
        } else {
            KnowledgeSource::UserStated
        };

        let before = result.triples.len();
        result.triples = result
            .triples
            .into_iter()
            .filter(|t| self.passes_strict_filter(t))
            .map(|mut t| {
                t.source = source;
                t.contributor_id = self.config.contributor_id.clone();
                t.session_id = self.config.session_id.clone();
                t
            })
            .collect();

        if before != result.triples.len() {
            info!(
                "[knowledge] Strict filter dropped {} of {} triple(s)",
                before - result.triples.len(),
                before
            );
        }
        result
    }

    fn parse_response(&self, response: &str) -> ExtractionResult {
        let v = match extract_json_block(response) {
            Some(v) => v,
            None => return ExtractionResult::default(),
        };

        let intent = v["intent"]
            .as_str()
            .and_then(|s| s.to_lowercase().parse::<KnowledgeIntent>().ok());
        let confidence = v["confidence"].as_f64().unwrap_or(0.0);

        let mut triples = Vec::new();
        if let Some(list) = v["triples"].as_array() {
            for t in list.iter().take(self.config.max_triples_per_message) {
                let subject = t["subject"].as_str().unwrap_or("").trim();
                let predicate = t["predicate"].as_str().unwrap_or("");
                let object = t["object"].as_str().unwrap_or("").trim();
                if subject.is_empty() || predicate.is_empty() || object.is_empty() {
                    continue;
                }
                let per_triple_confidence = t["confidence"].as_f64().unwrap_or(confidence);
                triples.push(KnowledgeTriple::new(
                    subject,
                    &normalize_predicate(predicate),
                    object,
                    per_triple_confidence,
                ));
            }
        }

        ExtractionResult {
            is_factual: v["is_factual"].as_bool().unwrap_or(false),
            intent,
            triples,
            confidence,
        }
    }

    /// The strict filter: no "user" subject, no personal-attribute
    /// predicates, no low-confidence extractions.
    fn passes_strict_filter(&self, triple: &KnowledgeTriple) -> bool {
        if triple.subject.to_lowercase() == "user" {
            return false;
        }
        if triple
            .predicate
            .to_lowercase()
            .split('_')
            .any(|token| BLOCKED_PREDICATE_TERMS.contains(&token))
        {
            return false;
        }
        triple.confidence >= self.config.min_confidence
    }
}

/// Normalize a predicate to snake_case.
pub fn normalize_predicate(predicate: &str) -> String {
    let lowered = predicate.to_lowercase();
    let underscored = PREDICATE_SEPARATORS.replace_all(lowered.trim(), "_");
    NON_PREDICATE_CHARS.replace_all(&underscored, "").to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::MemoryResult;
    use async_trait::async_trait;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmProvider for CannedLlm {
        async fn complete(&self, _prompt: &str) -> MemoryResult<String> {
            Ok(self.0.clone())
        }
    }

    fn extractor(response: &str) -> KnowledgeExtractor {
        KnowledgeExtractor::new(
            KnowledgeConfig::default(),
            Some(Arc::new(CannedLlm(response.to_string()))),
        )
    }

    #[tokio::test]
    async fn extracts_factual_statement() {
        let e = extractor(
            r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "GPT-4", "predicate": "context window", "object": "32k"}], "confidence": 0.95}"#,
        );
        let result = e.extract("GPT-4 context window is 32k", "user").await;

        assert!(result.is_factual);
        assert_eq!(result.intent, Some(KnowledgeIntent::Statement));
        assert_eq!(result.triples.len(), 1);
        assert_eq!(result.triples[0].subject, "GPT-4");
        assert_eq!(result.triples[0].predicate, "context_window");
        assert_eq!(result.triples[0].object, "32k");
        assert_eq!(result.triples[0].source, KnowledgeSource::UserStated);
    }

    #[tokio::test]
    async fn correction_intent_sets_correction_source() {
        let e = extractor(
            r#"{"is_factual": true, "intent": "correction", "triples": [{"subject": "GPT-4", "predicate": "context_window", "object": "128k"}], "confidence": 0.9}"#,
        );
        let result = e.extract("Actually GPT-4 supports 128k now", "user").await;
        assert_eq!(result.triples[0].source, KnowledgeSource::UserCorrection);
    }

    #[tokio::test]
    async fn assistant_role_sets_agent_inferred() {
        let e = extractor(
            r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "Rust", "predicate": "first_release", "object": "2015"}], "confidence": 0.9}"#,
        );
        let result = e.extract("Rust 1.0 was released in 2015", "assistant").await;
        assert_eq!(result.triples[0].source, KnowledgeSource::AgentInferred);
    }

    #[tokio::test]
    async fn opinions_and_questions_yield_nothing() {
        let e = extractor(
            r#"{"is_factual": false, "intent": "opinion", "triples": [], "confidence": 0.8}"#,
        );
        let result = e.extract("I think Python is the best language", "user").await;
        assert!(result.triples.is_empty());

        let e = extractor(
            r#"{"is_factual": true, "intent": "question", "triples": [{"subject": "React", "predicate": "latest_version", "object": "19"}], "confidence": 0.9}"#,
        );
        let result = e.extract("Is React 19 the latest version?", "user").await;
        assert!(result.triples.is_empty());
    }

    #[tokio::test]
    async fn user_subject_is_filtered() {
        let e = extractor(
            r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "user", "predicate": "editor", "object": "Vim"}], "confidence": 1.0}"#,
        );
        let result = e.extract("My favorite editor is Vim", "user").await;
        assert!(result.triples.is_empty());
    }

    #[tokio::test]
    async fn personal_predicates_are_filtered() {
        let e = extractor(
            r#"{"is_factual": true, "intent": "statement", "triples": [
                {"subject": "Alice", "predicate": "favorite_color", "object": "blue"},
                {"subject": "Alice", "predicate": "email_address", "object": "a@example.com"},
                {"subject": "TiDB", "predicate": "storage_engine", "object": "TiKV"}
            ], "confidence": 0.9}"#,
        );
        let result = e.extract("...", "user").await;
        assert_eq!(result.triples.len(), 1);
        assert_eq!(result.triples[0].subject, "TiDB");
    }

    #[tokio::test]
    async fn low_confidence_is_filtered() {
        let e = extractor(
            r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "X", "predicate": "maybe_is", "object": "Y", "confidence": 0.3}], "confidence": 0.9}"#,
        );
        let result = e.extract("X might be Y, not sure", "user").await;
        assert!(result.triples.is_empty());
    }

    #[tokio::test]
    async fn short_messages_are_skipped() {
        let e = extractor(r#"{"is_factual": true, "intent": "statement", "triples": [], "confidence": 1.0}"#);
        let result = e.extract("ok", "user").await;
        assert!(!result.is_factual);
    }

    #[tokio::test]
    async fn unparseable_response_yields_empty_result() {
        let e = extractor("I could not process that message.");
        let result = e.extract("GPT-4 context window is 32k", "user").await;
        assert!(!result.is_factual);
        assert!(result.triples.is_empty());
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let e = extractor(
            "```json\n{\"is_factual\": true, \"intent\": \"statement\", \"triples\": [{\"subject\": \"Go\", \"predicate\": \"designed_at\", \"object\": \"Google\"}], \"confidence\": 0.9}\n```",
        );
        let result = e.extract("Go was designed at Google", "user").await;
        assert_eq!(result.triples.len(), 1);
    }

    #[test]
    fn predicate_normalization() {
        assert_eq!(normalize_predicate("Context Window"), "context_window");
        assert_eq!(normalize_predicate("created-by"), "created_by");
        assert_eq!(normalize_predicate("  release  year "), "release_year");
        assert_eq!(normalize_predicate("weird!chars?"), "weirdchars");
    }
}
