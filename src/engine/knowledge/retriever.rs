// ── KnowledgeRetriever (C13) ───────────────────────────────────────────────
//
// Vector-plus-cluster-expansion search over the global triple store.
// Activating one concept activates its neighbours: each direct hit seeds a
// secondary search around its own vector, and the expansion hits come back
// down-weighted so a neighbour can never outrank the concept that pulled
// it in. Results are deduplicated by triple id, keeping the best score.

use crate::atoms::error::MemoryResult;
use crate::atoms::knowledge_types::{KnowledgeConfig, KnowledgeTriple};
use crate::engine::store::MemoryStore;
use std::collections::HashMap;

/// Search parameters for one retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub expansion_k: usize,
    pub min_score: f64,
    pub expansion_min_score: f64,
    pub expansion_weight: f64,
    pub max_items: usize,
    pub cluster_expansion: bool,
}

impl RetrievalParams {
    pub fn from_config(config: &KnowledgeConfig) -> Self {
        Self {
            top_k: 5,
            expansion_k: config.expansion_k,
            min_score: config.min_score,
            expansion_min_score: config.expansion_min_score,
            expansion_weight: config.expansion_weight,
            max_items: config.max_context_items,
            cluster_expansion: config.enable_cluster_expansion,
        }
    }
}

/// Run the retrieval for an already-embedded query vector.
pub fn retrieve(
    store: &MemoryStore,
    query_vector: &[f32],
    params: &RetrievalParams,
) -> MemoryResult<Vec<(KnowledgeTriple, f64)>> {
    let direct = store.search_triples_by_vector(query_vector, params.top_k, params.min_score)?;

    let mut best: HashMap<String, (KnowledgeTriple, f64)> = HashMap::new();
    for (triple, score) in &direct {
        best.insert(triple.id.clone(), (triple.clone(), *score));
    }

    if params.cluster_expansion {
        for (hit, _) in &direct {
            if hit.vector.is_empty() {
                continue;
            }
            // +1 because the secondary search will find the hit itself.
            let neighbours = store.search_triples_by_vector(
                &hit.vector,
                params.expansion_k + 1,
                params.expansion_min_score,
            )?;
            for (neighbour, sim) in neighbours {
                if neighbour.id == hit.id {
                    continue;
                }
                let weighted = sim * params.expansion_weight;
                let keep = best.get(&neighbour.id).map_or(true, |(_, existing)| *existing < weighted);
                if keep {
                    best.insert(neighbour.id.clone(), (neighbour, weighted));
                }
            }
        }
    }

    let mut ranked: Vec<(KnowledgeTriple, f64)> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    ranked.truncate(params.max_items);
    Ok(ranked)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RetrievalParams {
        RetrievalParams::from_config(&KnowledgeConfig::default())
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::open_in_memory().unwrap();
        // Three related triples clustered along the x axis, one outlier.
        let mut a = KnowledgeTriple::new("neural networks", "learn_via", "backpropagation", 0.9);
        a.vector = vec![1.0, 0.0, 0.0];
        let mut b = KnowledgeTriple::new("backpropagation", "computes", "gradients", 0.9);
        b.vector = vec![0.9, 0.435889, 0.0];
        let mut c = KnowledgeTriple::new("gradient descent", "minimizes", "loss", 0.9);
        c.vector = vec![0.85, 0.526783, 0.0];
        let mut d = KnowledgeTriple::new("espresso", "brewed_at", "9 bar", 0.9);
        d.vector = vec![0.0, 0.0, 1.0];
        for t in [&a, &b, &c, &d] {
            store.insert_triple(t).unwrap();
        }
        store
    }

    #[test]
    fn direct_match_ranks_first() {
        let store = seeded_store();
        let results = retrieve(&store, &[1.0, 0.0, 0.0], &params()).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0.subject, "neural networks");
    }

    #[test]
    fn expansion_pulls_in_neighbours_below_direct_scores() {
        let store = seeded_store();
        // Query aimed squarely at the first triple: the outlier and the
        // far cluster members arrive only through expansion.
        let mut p = params();
        p.top_k = 1;
        p.min_score = 0.95;
        let results = retrieve(&store, &[1.0, 0.0, 0.0], &p).unwrap();

        assert!(results.len() > 1, "expansion should add neighbours");
        let direct_score = results[0].1;
        for (triple, score) in &results[1..] {
            assert!(
                *score < direct_score,
                "expansion hit {} should score below the direct hit",
                triple.subject
            );
        }
        assert!(results.iter().all(|(t, _)| t.subject != "espresso"));
    }

    #[test]
    fn expansion_can_be_disabled() {
        let store = seeded_store();
        let mut p = params();
        p.top_k = 1;
        p.min_score = 0.95;
        p.cluster_expansion = false;
        let results = retrieve(&store, &[1.0, 0.0, 0.0], &p).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn dedup_keeps_the_best_score() {
        let store = seeded_store();
        // Broad direct search: cluster members are both direct hits and
        // expansion neighbours. Their direct (unweighted) score must win.
        let results = retrieve(&store, &[0.9, 0.435889, 0.0], &params()).unwrap();
        let backprop = results.iter().find(|(t, _)| t.subject == "backpropagation").unwrap();
        assert!(backprop.1 > 0.99, "direct score must survive dedup, got {}", backprop.1);

        let mut ids: Vec<&str> = results.iter().map(|(t, _)| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }

    #[test]
    fn truncates_at_max_items() {
        let store = seeded_store();
        let mut p = params();
        p.max_items = 2;
        p.min_score = 0.0;
        let results = retrieve(&store, &[1.0, 0.0, 0.0], &p).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn empty_store_returns_nothing() {
        let store = MemoryStore::open_in_memory().unwrap();
        let results = retrieve(&store, &[1.0, 0.0, 0.0], &params()).unwrap();
        assert!(results.is_empty());
    }
}
