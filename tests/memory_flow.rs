// End-to-end flows through the public API with deterministic providers:
// a word-bucket hash embedder (identical text → identical vector, shared
// words → high cosine) and a scripted LLM double. Each test builds its own
// in-memory store, so every scenario starts cold.

use async_trait::async_trait;
use biem::{
    EmbeddingProvider, KnowledgeConfig, KnowledgeEngine, LinkType, LlmProvider, MemoryConfig,
    MemoryManager, MemoryResult, MemoryStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

const DIM: usize = 128;

/// Deterministic embedder: words hash into buckets, L2-normalized.
struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIM];
                for word in t
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    let mut h = 5381usize;
                    for b in word.bytes() {
                        h = h.wrapping_mul(33).wrapping_add(b as usize);
                    }
                    v[h % DIM] += 1.0;
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
        DIM
    }
}

/// LLM double that replies with queued responses in order.
struct ScriptedLlm {
    responses: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(responses: &[&str]) -> Self {
        let mut queue: Vec<String> = responses.iter().map(|s| s.to_string()).collect();
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
            .ok_or_else(|| biem::MemoryError::provider("scripted", "script exhausted"))
    }
}

fn memory_manager(scope: &str) -> (Arc<MemoryStore>, MemoryManager) {
    let store = Arc::new(MemoryStore::open_in_memory().unwrap());
    let config = MemoryConfig { scope_key: scope.into(), embedding_dim: DIM, ..Default::default() };
    let manager =
        MemoryManager::new(config, Arc::clone(&store), Arc::new(HashEmbedder), None).unwrap();
    (store, manager)
}

fn knowledge_engine(responses: &[&str]) -> KnowledgeEngine {
    KnowledgeEngine::new(
        KnowledgeConfig::default(),
        Arc::new(MemoryStore::open_in_memory().unwrap()),
        Arc::new(HashEmbedder),
        Some(Arc::new(ScriptedLlm::new(responses))),
    )
}

// ── Scenario: basic recall ─────────────────────────────────────────────────

#[tokio::test]
async fn basic_recall_returns_the_fact_first_and_boosts_it() {
    let (store, manager) = memory_manager("main");
    let id = manager
        .ingest("The mitochondrion is the powerhouse of the cell.", "user")
        .await
        .unwrap();
    manager.ingest("Grocery list: eggs, flour, basil.", "user").await.unwrap();

    let before = store.get_node(&id).unwrap().unwrap().energy;

    let results = manager
        .recall("The mitochondrion is the powerhouse of the cell.", 5)
        .await
        .unwrap();

    assert_eq!(results[0].0.id, id, "the matching node must rank first");
    assert!(results[0].1 > 0.6, "fused score should exceed 0.6, got {}", results[0].1);

    let after = store.get_node(&id).unwrap().unwrap().energy;
    let delta = after - before;
    assert!(delta > 0.09 && delta <= 0.1 + 1e-6, "recall boost should be ≈ +0.1, got {}", delta);
    assert!(after <= 1.0);
}

// ── Scenario: temporal linking ─────────────────────────────────────────────

#[tokio::test]
async fn temporal_links_form_symmetric_undup_pairs() {
    let (store, manager) = memory_manager("main");
    let a = manager.ingest("first note about astronomy", "user").await.unwrap();
    let b = manager.ingest("second note about geology", "user").await.unwrap();
    manager.ingest("third note about botany", "user").await.unwrap();

    let links = store.links_for_scope("main").unwrap();
    let temporal: Vec<_> = links.iter().filter(|l| l.link_type == LinkType::Temporal).collect();

    let ab = temporal
        .iter()
        .filter(|l| l.source_id == a && l.target_id == b)
        .count();
    let ba = temporal
        .iter()
        .filter(|l| l.source_id == b && l.target_id == a)
        .count();
    assert_eq!(ab, 1, "(a, b, temporal) must exist exactly once");
    assert_eq!(ba, 1, "(b, a, temporal) must exist exactly once");
    assert!(temporal.iter().all(|l| (l.weight - 1.0).abs() < 1e-9));
}

// ── Scenario: semantic linking ─────────────────────────────────────────────

#[tokio::test]
async fn paraphrases_get_bidirectional_semantic_rows() {
    let (store, manager) = memory_manager("main");
    let a = manager.ingest("Paris is the capital of France", "user").await.unwrap();
    let b = manager.ingest("Paris is the capital city of France", "user").await.unwrap();

    let links = store.links_for_scope("main").unwrap();
    let semantic: Vec<_> = links.iter().filter(|l| l.link_type == LinkType::Semantic).collect();

    assert_eq!(semantic.len(), 2, "one bidirectional pair → two crystal rows");
    assert!(semantic.iter().any(|l| l.source_id == a && l.target_id == b));
    assert!(semantic.iter().any(|l| l.source_id == b && l.target_id == a));
    assert!(semantic.iter().all(|l| l.weight >= 0.7));

    // Re-ingesting similar content links to the cluster without
    // duplicating the existing pair.
    manager.ingest("Paris is the capital city of France", "user").await.unwrap();
    let links = store.links_for_scope("main").unwrap();
    let ab_count = links
        .iter()
        .filter(|l| l.source_id == a && l.target_id == b && l.link_type == LinkType::Semantic)
        .count();
    assert_eq!(ab_count, 1);
}

// ── Scenario: knowledge update with confirmation ───────────────────────────

const GPT4_32K: &str = r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "GPT-4", "predicate": "context_window", "object": "32k"}], "confidence": 0.95}"#;
const GPT4_128K: &str = r#"{"is_factual": true, "intent": "correction", "triples": [{"subject": "GPT-4", "predicate": "context_window", "object": "128k"}], "confidence": 0.9}"#;

#[tokio::test]
async fn knowledge_update_requires_confirmation() {
    let engine = knowledge_engine(&[GPT4_32K, GPT4_128K]);

    let first = engine.process("GPT-4 context window is 32k", "user").await.unwrap();
    assert_eq!(first.stored.len(), 1);
    assert_eq!(first.stored[0].version, 1);

    let second = engine
        .process("Actually GPT-4 supports 128k now", "user")
        .await
        .unwrap();
    assert!(second.stored.is_empty());
    assert_eq!(second.pending.len(), 1);
    assert!(!second.pending[0].confirmation_prompt.is_empty());

    assert!(engine.confirm(&second.pending[0].id, true).await.unwrap());

    let results = engine.query("GPT-4 context_window").await.unwrap();
    let triple = &results[0].0;
    assert_eq!(triple.object, "128k");
    assert_eq!(triple.version, 2);
    assert_eq!(triple.previous_values, vec!["32k".to_string()]);

    let history = engine.history(&triple.id).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].confirmed);

    // Versioning invariant: version == previous_values.len() + 1, and
    // version − 1 history rows.
    assert_eq!(triple.version as usize, triple.previous_values.len() + 1);
    assert_eq!(history.len(), (triple.version - 1) as usize);
}

// ── Scenario: strict filter ────────────────────────────────────────────────

#[tokio::test]
async fn personal_preferences_never_reach_the_global_store() {
    let engine = knowledge_engine(&[
        r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "user", "predicate": "favorite_editor", "object": "Vim"}], "confidence": 1.0}"#,
    ]);

    let outcome = engine.process("My favorite editor is Vim", "user").await.unwrap();
    assert!(outcome.stored.is_empty());
    assert!(outcome.pending.is_empty());
    assert_eq!(engine.stats().unwrap().total_triples, 0);
}

// ── Scenario: cluster expansion ────────────────────────────────────────────

#[tokio::test]
async fn cluster_expansion_surfaces_weighted_neighbours() {
    let engine = knowledge_engine(&[
        r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "neural networks", "predicate": "learn_via", "object": "backpropagation"}], "confidence": 0.9}"#,
        r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "backpropagation", "predicate": "adjusts", "object": "neural weights"}], "confidence": 0.9}"#,
        r#"{"is_factual": true, "intent": "statement", "triples": [{"subject": "espresso", "predicate": "brewed_at", "object": "9 bar pressure"}], "confidence": 0.9}"#,
    ]);
    engine.process("Neural networks learn via backpropagation", "user").await.unwrap();
    engine.process("Backpropagation adjusts neural weights", "user").await.unwrap();
    engine.process("Espresso is brewed at 9 bar pressure", "user").await.unwrap();

    let results = engine.query("how do neural networks learn?").await.unwrap();
    assert!(results.len() >= 2, "expected direct match plus expansion, got {}", results.len());

    assert_eq!(results[0].0.subject, "neural networks");
    let direct_score = results[0].1;

    let expansion = results
        .iter()
        .find(|(t, _)| t.subject == "backpropagation")
        .expect("expansion should surface the neighbouring triple");
    assert!(
        expansion.1 < direct_score,
        "expansion score {} must stay below direct score {}",
        expansion.1,
        direct_score
    );
    assert!(results.iter().all(|(t, _)| t.subject != "espresso"));
}

// ── Scope isolation across managers ────────────────────────────────────────

#[tokio::test]
async fn scopes_are_isolated_but_knowledge_is_global() {
    let store = Arc::new(MemoryStore::open_in_memory().unwrap());

    let alice = MemoryManager::new(
        MemoryConfig { scope_key: "alice".into(), embedding_dim: DIM, ..Default::default() },
        Arc::clone(&store),
        Arc::new(HashEmbedder),
        None,
    )
    .unwrap();
    let bob = MemoryManager::new(
        MemoryConfig { scope_key: "bob".into(), embedding_dim: DIM, ..Default::default() },
        Arc::clone(&store),
        Arc::new(HashEmbedder),
        None,
    )
    .unwrap();

    alice.ingest("the staging database password rotated", "user").await.unwrap();
    bob.ingest("the staging database password rotated", "user").await.unwrap();

    for (manager, scope) in [(&alice, "alice"), (&bob, "bob")] {
        let results = manager.recall("staging database password", 10).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|(n, _)| n.scope == scope));
    }

    // Knowledge written through one engine is visible to another built on
    // the same store — no scoping key applies.
    let k1 = KnowledgeEngine::new(
        KnowledgeConfig { contributor_id: "alice".into(), ..Default::default() },
        Arc::clone(&store),
        Arc::new(HashEmbedder),
        Some(Arc::new(ScriptedLlm::new(&[GPT4_32K]))),
    );
    let k2 = KnowledgeEngine::new(
        KnowledgeConfig { contributor_id: "bob".into(), ..Default::default() },
        Arc::clone(&store),
        Arc::new(HashEmbedder),
        None,
    );
    k1.process("GPT-4 context window is 32k", "user").await.unwrap();

    let seen_by_bob = k2.query("GPT-4 context_window").await.unwrap();
    assert!(!seen_by_bob.is_empty());
    assert_eq!(seen_by_bob[0].0.contributor_id, "alice");
}

// ── Ingesting the same content twice ───────────────────────────────────────

#[tokio::test]
async fn duplicate_content_yields_two_nodes_and_one_semantic_pair() {
    let (store, manager) = memory_manager("main");
    let a = manager.ingest("the sky above the port was tuned to a dead channel", "user").await.unwrap();
    let b = manager.ingest("the sky above the port was tuned to a dead channel", "user").await.unwrap();

    assert_ne!(a, b, "identical content still creates distinct nodes");
    assert!(store.get_node(&a).unwrap().is_some());
    assert!(store.get_node(&b).unwrap().is_some());

    let semantic: Vec<_> = store
        .links_for_scope("main")
        .unwrap()
        .into_iter()
        .filter(|l| l.link_type == LinkType::Semantic)
        .collect();
    // Exactly one pair between the two nodes.
    assert_eq!(semantic.len(), 2);
    assert!((semantic[0].weight - 1.0).abs() < 1e-5, "identical text embeds identically");
}

// ── Restart transparency ───────────────────────────────────────────────────

#[tokio::test]
async fn restart_rehydrates_graph_and_preserves_recall() {
    let store = Arc::new(MemoryStore::open_in_memory().unwrap());
    let config = MemoryConfig { scope_key: "main".into(), embedding_dim: DIM, ..Default::default() };

    let first = MemoryManager::new(
        config.clone(),
        Arc::clone(&store),
        Arc::new(HashEmbedder),
        None,
    )
    .unwrap();
    let id = first.ingest("the reactor inspection is every thursday", "user").await.unwrap();
    first.ingest("the turbine inspection is every friday", "user").await.unwrap();
    let links_before = store.count_links("main").unwrap();
    assert!(links_before > 0);
    drop(first);

    let second =
        MemoryManager::new(config, Arc::clone(&store), Arc::new(HashEmbedder), None).unwrap();
    let stats = second.stats().unwrap();
    assert_eq!(stats.graph_links, links_before);
    assert_eq!(stats.l1_count, 0, "L1 starts empty after restart");

    let results = second.recall("reactor inspection thursday", 5).await.unwrap();
    assert_eq!(results[0].0.id, id);
}
