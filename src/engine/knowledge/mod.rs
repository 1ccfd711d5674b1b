// ── Knowledge Engine (C11 + C12 + C13) ─────────────────────────────────────
//
// The global knowledge layer: triple extraction from dialogue, per-triple
// conflict detection against the unique (subject, predicate) store, the
// pending-update confirmation lifecycle, and cluster-expanded retrieval
// for query-time context injection.
//
// Knowledge is GLOBAL — every scope reads and writes the same triples;
// contributor ids are attribution only.
//
// Module layout:
//   extractor — LLM triple extraction + strict personal-attribute filter
//   conflict  — value-change detection + ConfirmationManager (pending TTL)
//   retriever — vector search with cluster expansion

pub mod conflict;
pub mod extractor;
pub mod retriever;

pub use conflict::ConfirmationManager;
pub use extractor::KnowledgeExtractor;
pub use retriever::RetrievalParams;

use crate::atoms::error::MemoryResult;
use crate::atoms::knowledge_types::{
    KnowledgeConfig, KnowledgeHistoryEntry, KnowledgeSource, KnowledgeStats, KnowledgeTriple,
    PendingUpdate, ProcessOutcome,
};
use crate::atoms::types::now_ts;
use crate::engine::providers::{EmbeddingProvider, LlmProvider};
use crate::engine::store::{MemoryStore, TripleInsert};
use log::{info, warn};
use std::sync::Arc;

pub struct KnowledgeEngine {
    config: KnowledgeConfig,
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: KnowledgeExtractor,
    confirmation: ConfirmationManager,
}

impl KnowledgeEngine {
    pub fn new(
        config: KnowledgeConfig,
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            extractor: KnowledgeExtractor::new(config.clone(), llm),
            confirmation: ConfirmationManager::new(config.pending_ttl_seconds),
            config,
            store,
            embedder,
        }
    }

    // ══════════════════════════════════════════════════════════════════
    // Message processing
    // ══════════════════════════════════════════════════════════════════

    /// Run one message through the pipeline: extract → strict filter →
    /// per-triple conflict check → store directly or hold as a pending
    /// update. Assistant messages flow through the same path (as
    /// agent_inferred) when extract_from_agent is on.
    pub async fn process(&self, message: &str, role: &str) -> MemoryResult<ProcessOutcome> {
        if role == "assistant" && !self.config.extract_from_agent {
            return Ok(ProcessOutcome::default());
        }

        let extraction = self.extractor.extract(message, role).await;
        if extraction.triples.is_empty() {
            return Ok(ProcessOutcome::default());
        }

        let now = now_ts();
        let mut outcome = ProcessOutcome::default();

        for mut triple in extraction.triples {
            // Embedding is an enrichment here: a triple without a vector
            // still stores, it just stays invisible to vector search until
            // re-embedded.
            match self.embedder.embed_one(&triple.to_text()).await {
                Ok(v) => triple.vector = v,
                Err(e) => warn!("[knowledge] Triple embed failed ({}): {}", triple.display(), e),
            }

            if let Some(found) = conflict::detect_conflict(&self.store, &triple)? {
                outcome.pending.push(self.confirmation.add_pending(&found, now));
                continue;
            }

            if !self.config.auto_store {
                continue;
            }
            match self.store.insert_triple(&triple)? {
                TripleInsert::Inserted(_) => {
                    info!("[knowledge] Stored {}", triple.display());
                    outcome.stored.push(triple);
                }
                TripleInsert::Corroborated(id) => {
                    if let Some(refreshed) = self.store.get_triple(&id)? {
                        outcome.stored.push(refreshed);
                    }
                }
                TripleInsert::Conflicted(existing) => {
                    // Raced with a concurrent writer between the conflict
                    // check and the insert; hold for confirmation.
                    let suggestion = conflict::confirmation_prompt(&existing, &triple);
                    let found = crate::atoms::knowledge_types::TripleConflict {
                        existing,
                        incoming: triple,
                        conflict_type: "value_change".to_string(),
                        suggestion,
                    };
                    outcome.pending.push(self.confirmation.add_pending(&found, now));
                }
            }
        }

        Ok(outcome)
    }

    // ══════════════════════════════════════════════════════════════════
    // Confirmation lifecycle
    // ══════════════════════════════════════════════════════════════════

    /// Resolve a pending update. Returns true when the id referenced a
    /// live pending record (whatever the decision), false when the record
    /// was unknown or already expired.
    pub async fn confirm(&self, pending_id: &str, accept: bool) -> MemoryResult<bool> {
        let update = match self.confirmation.take(pending_id, now_ts()) {
            Some(update) => update,
            None => return Ok(false),
        };

        if !accept {
            info!("[knowledge] Pending update {} rejected", pending_id);
            return Ok(true);
        }

        let new_triple = update.new_triple;
        match update.existing_triple {
            Some(existing) => {
                // Re-embed the updated rendering so vector search tracks
                // the new object.
                let text = format!(
                    "{} {} {}",
                    existing.subject, existing.predicate, new_triple.object
                );
                let vector = match self.embedder.embed_one(&text).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!("[knowledge] Re-embed failed for {}: {}", existing.id, e);
                        None
                    }
                };

                self.store.update_triple_object(
                    &existing.id,
                    &new_triple.object,
                    "user_confirmed",
                    KnowledgeSource::UserVerified,
                    1.0,
                    &self.config.contributor_id,
                    &self.config.session_id,
                    vector.as_deref(),
                )?;
                info!(
                    "[knowledge] Confirmed update: ({}, {}) → {}",
                    existing.subject, existing.predicate, new_triple.object
                );
            }
            None => {
                let mut verified = new_triple;
                verified.source = KnowledgeSource::UserVerified;
                verified.confidence = 1.0;
                self.store.insert_triple(&verified)?;
            }
        }
        Ok(true)
    }

    /// Live pending updates (expired ones are purged on the way).
    pub fn list_pending(&self) -> Vec<PendingUpdate> {
        self.confirmation.list(now_ts())
    }

    /// Purge expired pending updates; the periodic sweep entry point.
    pub fn sweep_expired(&self) -> usize {
        self.confirmation.sweep_expired(now_ts())
    }

    // ══════════════════════════════════════════════════════════════════
    // Retrieval
    // ══════════════════════════════════════════════════════════════════

    /// Cluster-expanded semantic search over the triple store.
    pub async fn query(&self, text: &str) -> MemoryResult<Vec<(KnowledgeTriple, f64)>> {
        let query_vector = self.embedder.embed_one(text).await?;
        let params = RetrievalParams::from_config(&self.config);
        retriever::retrieve(&self.store, &query_vector, &params)
    }

    /// Formatted context block for prompt injection.
    pub async fn context_for_query(&self, text: &str) -> MemoryResult<String> {
        let triples = self.query(text).await?;
        if triples.is_empty() {
            return Ok(String::new());
        }

        let mut lines = vec!["## Learned Knowledge".to_string()];
        for (triple, _) in &triples {
            let tag = if triple.confidence >= 1.0 {
                "[verified]".to_string()
            } else {
                format!("[{}]", triple.source)
            };
            lines.push(format!("- {} {}", triple.display(), tag));
        }
        Ok(lines.join("\n"))
    }

    // ══════════════════════════════════════════════════════════════════
    // Introspection and administration
    // ══════════════════════════════════════════════════════════════════

    pub fn history(&self, triple_id: &str) -> MemoryResult<Vec<KnowledgeHistoryEntry>> {
        self.store.triple_history(triple_id)
    }

    pub fn stats(&self) -> MemoryResult<KnowledgeStats> {
        let mut stats = self.store.knowledge_stats()?;
        stats.pending_updates = self.confirmation.len();
        Ok(stats)
    }

    /// Administrative reset: drops every triple, its history, and any
    /// in-flight pending updates.
    pub fn reset(&self) -> MemoryResult<()> {
        self.store.clear_knowledge()?;
        self.confirmation.sweep_expired(f64::INFINITY);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::MemoryError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Deterministic embedder (word-bucket hashing, L2-normalized).
    struct HashEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dim];
                    for word in t
                        .to_lowercase()
                        .split(|c: char| !c.is_alphanumeric())
                        .filter(|w| !w.is_empty())
                    {
                        let mut h = 5381usize;
                        for b in word.bytes() {
                            h = h.wrapping_mul(33).wrapping_add(b as usize);
                        }
                        v[h % self.dim] += 1.0;
                    }
                    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                    if norm > 1e-8 {
                        for x in v.iter_mut() {
                            *x /= norm;
                        }
                    }
                    v
                })
                .collect())
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }

    /// LLM double that replies with the next queued response.
    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            let mut queue: Vec<String> = responses.into_iter().map(String::from).collect();
            queue.reverse();
            Self { responses: Mutex::new(queue) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(&self, _prompt: &str) -> MemoryResult<String> {
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| MemoryError::provider("test", "script exhausted"))
        }
    }

    fn engine_with(responses: Vec<&str>) -> KnowledgeEngine {
        KnowledgeEngine::new(
            KnowledgeConfig {
                contributor_id: "tester".into(),
                session_id: "sess-1".into(),
                ..Default::default()
            },
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(HashEmbedder { dim: 64 }),
            Some(Arc::new(ScriptedLlm::new(responses))),
        )
    }

    const GPT4_32K: &str = r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "GPT-4", "predicate": "context_window", "object": "32k"}], "confidence": 0.95}"#;
    const GPT4_128K: &str = r#"{"is_factual": true, "intent": "correction", "triples": [{"subject": "GPT-4", "predicate": "context_window", "object": "128k"}], "confidence": 0.9}"#;

    #[tokio::test]
    async fn statement_is_stored_directly() {
        let engine = engine_with(vec![GPT4_32K]);
        let outcome = engine.process("GPT-4 context window is 32k", "user").await.unwrap();

        assert_eq!(outcome.stored.len(), 1);
        assert!(outcome.pending.is_empty());

        let stored = engine
            .store
            .find_by_subject_predicate("GPT-4", "context_window")
            .unwrap()
            .unwrap();
        assert_eq!(stored.object, "32k");
        assert_eq!(stored.version, 1);
        assert_eq!(stored.contributor_id, "tester");
        assert!(!stored.vector.is_empty());
    }

    #[tokio::test]
    async fn conflicting_update_goes_through_confirmation() {
        let engine = engine_with(vec![GPT4_32K, GPT4_128K]);
        engine.process("GPT-4 context window is 32k", "user").await.unwrap();

        let outcome = engine
            .process("Actually GPT-4 supports 128k now", "user")
            .await
            .unwrap();
        assert!(outcome.stored.is_empty());
        assert_eq!(outcome.pending.len(), 1);
        let pending = &outcome.pending[0];
        assert!(pending.confirmation_prompt.contains("32k"));
        assert!(pending.confirmation_prompt.contains("128k"));

        // Unconfirmed: the store still holds the old value.
        let unchanged = engine
            .store
            .find_by_subject_predicate("GPT-4", "context_window")
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.object, "32k");

        // Confirm: version bump, previous value retained, history row.
        assert!(engine.confirm(&pending.id, true).await.unwrap());
        let updated = engine
            .store
            .find_by_subject_predicate("GPT-4", "context_window")
            .unwrap()
            .unwrap();
        assert_eq!(updated.object, "128k");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.previous_values, vec!["32k".to_string()]);
        assert_eq!(updated.source, KnowledgeSource::UserVerified);

        let history = engine.history(&updated.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].confirmed);
        assert_eq!(history[0].old_value, "32k");
        assert_eq!(history[0].new_value, "128k");
    }

    #[tokio::test]
    async fn rejected_update_discards_the_new_value() {
        let engine = engine_with(vec![GPT4_32K, GPT4_128K]);
        engine.process("GPT-4 context window is 32k", "user").await.unwrap();
        let outcome = engine.process("Actually GPT-4 supports 128k now", "user").await.unwrap();

        let pending_id = outcome.pending[0].id.clone();
        assert!(engine.confirm(&pending_id, false).await.unwrap());

        let unchanged = engine
            .store
            .find_by_subject_predicate("GPT-4", "context_window")
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.object, "32k");
        assert_eq!(unchanged.version, 1);

        // The decision is terminal — a late confirm finds nothing.
        assert!(!engine.confirm(&pending_id, true).await.unwrap());
    }

    #[tokio::test]
    async fn personal_statement_stores_nothing() {
        let engine = engine_with(vec![
            r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "user", "predicate": "favorite_editor", "object": "Vim"}], "confidence": 1.0}"#,
        ]);
        let outcome = engine.process("My favorite editor is Vim", "user").await.unwrap();
        assert!(outcome.stored.is_empty());
        assert!(outcome.pending.is_empty());
        assert_eq!(engine.stats().unwrap().total_triples, 0);
    }

    #[tokio::test]
    async fn agent_messages_store_as_agent_inferred() {
        let engine = engine_with(vec![
            r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "Tokio", "predicate": "scheduler_type", "object": "work-stealing"}], "confidence": 0.9}"#,
        ]);
        let outcome = engine
            .process("Tokio uses a work-stealing scheduler", "assistant")
            .await
            .unwrap();
        assert_eq!(outcome.stored.len(), 1);
        assert_eq!(outcome.stored[0].source, KnowledgeSource::AgentInferred);
    }

    #[tokio::test]
    async fn agent_extraction_can_be_disabled() {
        let engine = KnowledgeEngine::new(
            KnowledgeConfig { extract_from_agent: false, ..Default::default() },
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(HashEmbedder { dim: 64 }),
            Some(Arc::new(ScriptedLlm::new(vec![GPT4_32K]))),
        );
        let outcome = engine.process("GPT-4 context window is 32k", "assistant").await.unwrap();
        assert!(outcome.stored.is_empty());
        assert_eq!(engine.stats().unwrap().total_triples, 0);
    }

    #[tokio::test]
    async fn restating_the_same_fact_does_not_version_bump() {
        let engine = engine_with(vec![GPT4_32K, GPT4_32K]);
        engine.process("GPT-4 context window is 32k", "user").await.unwrap();
        let outcome = engine.process("GPT-4 context window is 32k", "user").await.unwrap();

        assert_eq!(outcome.stored.len(), 1);
        let stored = engine
            .store
            .find_by_subject_predicate("GPT-4", "context_window")
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(engine.stats().unwrap().total_triples, 1);
    }

    #[tokio::test]
    async fn query_finds_stored_triples() {
        let engine = engine_with(vec![GPT4_32K]);
        engine.process("GPT-4 context window is 32k", "user").await.unwrap();

        let results = engine.query("GPT-4 context_window").await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0.subject, "GPT-4");

        let context = engine.context_for_query("GPT-4 context_window").await.unwrap();
        assert!(context.starts_with("## Learned Knowledge"));
        assert!(context.contains("(GPT-4, context_window, 32k)"));
    }

    #[tokio::test]
    async fn stats_include_pending_count() {
        let engine = engine_with(vec![GPT4_32K, GPT4_128K]);
        engine.process("GPT-4 context window is 32k", "user").await.unwrap();
        engine.process("Actually GPT-4 supports 128k now", "user").await.unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total_triples, 1);
        assert_eq!(stats.pending_updates, 1);
        assert_eq!(engine.list_pending().len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let engine = engine_with(vec![GPT4_32K]);
        engine.process("GPT-4 context window is 32k", "user").await.unwrap();
        engine.reset().unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total_triples, 0);
        assert_eq!(stats.history_rows, 0);
        assert_eq!(stats.pending_updates, 0);
    }
}
