// ── MemoryManager (C10) ────────────────────────────────────────────────────
//
// The memory API for one scope. Owns the operators and the per-scope state,
// and runs the two pipelines:
//
//   ingest:  encode → initial energy → conflict scan (non-blocking) →
//            tier store (C4 upsert happens-before any link) → link routing →
//            durable link persistence
//   recall:  embed query → vector seeds → spreading activation over a graph
//            snapshot → fused scoring → fetch via the tier manager →
//            energy boost on every returned node
//
// Ingest is total: embedding failure produces a degraded node that is
// stored, flagged, and kept out of recall seeds. Enrichment failures
// (entities, sentiment, conflict arbitration) are absorbed; structural
// failures surface as typed errors.

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{
    now_ts, ConflictReport, MemoryConfig, MemoryNode, MemoryStats, VectorFilter,
};
use crate::engine::conflict::ConflictChecker;
use crate::engine::encoder::Encoder;
use crate::engine::energy::EnergyController;
use crate::engine::graph::MemoryGraph;
use crate::engine::providers::{EmbeddingProvider, LlmProvider};
use crate::engine::router::AssociationRouter;
use crate::engine::store::embedding::l2_normalize;
use crate::engine::store::MemoryStore;
use crate::engine::tier::{ScopeState, TierManager};
use crate::engine::working_set::WorkingSet;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct MemoryManager {
    config: MemoryConfig,
    store: Arc<MemoryStore>,
    encoder: Encoder,
    energy: EnergyController,
    tier: TierManager,
    router: Mutex<AssociationRouter>,
    conflict: ConflictChecker,
    state: Arc<Mutex<ScopeState>>,
    pending_conflicts: Mutex<Vec<ConflictReport>>,
}

impl MemoryManager {
    /// Create a manager bound to `config.scope_key` and rehydrate the
    /// association graph from the persisted crystal links.
    pub fn new(
        config: MemoryConfig,
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> MemoryResult<Self> {
        let scope = config.scope_key.clone();
        let state = Arc::new(Mutex::new(ScopeState {
            working: WorkingSet::new(config.working_set.clone()),
            graph: MemoryGraph::new(),
        }));
        let energy = EnergyController::new(config.energy.clone());

        let manager = Self {
            encoder: Encoder::new(Arc::clone(&embedder), llm.clone()),
            energy: energy.clone(),
            tier: TierManager::new(
                &scope,
                Arc::clone(&store),
                energy,
                config.tier.clone(),
                Arc::clone(&state),
                llm.clone(),
            ),
            router: Mutex::new(AssociationRouter::new(&scope, config.router.clone())),
            conflict: ConflictChecker::new(config.conflict.clone(), llm),
            state,
            store,
            pending_conflicts: Mutex::new(Vec::new()),
            config,
        };
        manager.hydrate()?;
        Ok(manager)
    }

    /// Rebuild the in-memory graph from crystal_links. L1 starts empty.
    fn hydrate(&self) -> MemoryResult<()> {
        let links = self.store.links_for_scope(&self.config.scope_key)?;
        let count = links.len();
        let mut state = self.state.lock();
        for link in &links {
            state.graph.add_link(link);
        }
        drop(state);
        if count > 0 {
            info!(
                "[memory] Rehydrated {} links into graph for scope '{}'",
                count, self.config.scope_key
            );
        }
        Ok(())
    }

    pub fn scope(&self) -> &str {
        &self.config.scope_key
    }

    // ══════════════════════════════════════════════════════════════════
    // Ingest
    // ══════════════════════════════════════════════════════════════════

    /// Ingest new content. Returns the id of the created node.
    pub async fn ingest(&self, content: &str, source_tag: &str) -> MemoryResult<String> {
        if content.trim().is_empty() {
            return Err(MemoryError::Validation("empty content".into()));
        }

        // Encode: embedding + side-information. Never fails on provider
        // errors; a degraded node comes back instead.
        let mut node = self
            .encoder
            .encode(&self.config.scope_key, content, source_tag)
            .await?;

        // Initial energy from source and entity density.
        let e0 = self
            .energy
            .initial_energy(source_tag, node.metadata.entities.len());
        node.energy = e0;
        node.initial_energy = e0;

        // Neighbour scan feeds both conflict surfacing and semantic
        // routing. Happens before the upsert, so the new node can never be
        // its own neighbour.
        let neighbours = if node.metadata.degraded {
            Vec::new()
        } else {
            self.store.search_nodes_by_vector(
                &self.config.scope_key,
                &node.vector,
                10,
                &VectorFilter::default(),
            )?
        };

        // Conflict arbitration is advisory and non-blocking.
        let conflicts = self.conflict.check(&node, &neighbours).await;
        if !conflicts.is_empty() {
            info!(
                "[memory] Ingest surfaced {} conflict(s) for node {}",
                conflicts.len(),
                node.id
            );
            self.pending_conflicts.lock().extend(conflicts);
        }

        // C4 upsert + C5 add_node + C3 admission.
        let node = self.tier.store_node(node).await?;

        // Link routing: temporal from the recency ring, semantic from the
        // neighbour scan. The graph mutation happens under the scope lock;
        // durable writes follow outside it.
        let links = self
            .router
            .lock()
            .route_new_node(&node, &neighbours, node.created_at);

        let added: Vec<_> = {
            let mut state = self.state.lock();
            links
                .into_iter()
                .filter(|link| state.graph.add_link(link))
                .collect()
        };

        for link in added {
            if let Err(e) = self.store.insert_link(&link) {
                warn!(
                    "[memory] Link persist failed ({} → {}), queued for reconciliation: {}",
                    link.source_id, link.target_id, e
                );
                self.state.lock().graph.mark_pending_persist(link);
            }
        }

        info!(
            "[memory] Ingested {} (E={:.2}, tier {}, degraded={})",
            node.id, node.energy, node.tier, node.metadata.degraded
        );
        Ok(node.id)
    }

    // ══════════════════════════════════════════════════════════════════
    // Recall
    // ══════════════════════════════════════════════════════════════════

    /// Two-stage recall: vector similarity seeds, graph spreading
    /// activation expansion, fused scoring, then an energy boost on every
    /// returned node. Results are ordered by (−score, created_at, id).
    pub async fn recall(
        &self,
        query: &str,
        top_k: usize,
    ) -> MemoryResult<Vec<(MemoryNode, f64)>> {
        if query.trim().is_empty() {
            return Err(MemoryError::Validation("empty query".into()));
        }
        let now = now_ts();

        let query_vec = match self.encoder.generate_embedding(query).await {
            (v, false) => {
                let mut v = v;
                l2_normalize(&mut v);
                v
            }
            (_, true) => {
                // Query embedding failed: fall back to the hottest working
                // set entries, scored by decayed energy.
                warn!("[memory] Recall falling back to working set (embedding unavailable)");
                let residents = { self.state.lock().working.top_k_by_energy(top_k) };
                return Ok(residents
                    .into_iter()
                    .map(|n| {
                        let score = self.energy.decayed(n.energy, n.last_accessed, now);
                        (n, score)
                    })
                    .collect());
            }
        };

        // Stage 1: vector seeds. Degraded nodes are excluded by the store.
        let hits = self.store.search_nodes_by_vector(
            &self.config.scope_key,
            &query_vec,
            self.config.recall.seed_top_k,
            &VectorFilter::default(),
        )?;

        let seeds: Vec<String> = hits
            .iter()
            .take(self.config.recall.seed_count)
            .map(|(n, _)| n.id.clone())
            .collect();

        // Stage 2: spreading activation over a neighbor snapshot taken
        // under the scope lock.
        let activation = {
            self.state.lock().graph.spread(
                &seeds,
                self.config.recall.spread_hops,
                self.config.recall.spread_decay,
            )
        };

        // Fuse: score = α·vec + β·activation, missing components are 0.
        let mut vec_scores: HashMap<String, f64> = HashMap::new();
        for (node, score) in &hits {
            vec_scores.insert(node.id.clone(), *score);
        }
        let mut fused: HashMap<String, f64> = HashMap::new();
        for (id, vec_score) in &vec_scores {
            let act = activation.get(id).copied().unwrap_or(0.0);
            fused.insert(
                id.clone(),
                self.config.recall.score_alpha * vec_score + self.config.recall.score_beta * act,
            );
        }
        for (id, act) in &activation {
            fused
                .entry(id.clone())
                .or_insert(self.config.recall.score_beta * act);
        }

        // Fetch full nodes through the tier manager (decays on read).
        let mut scored: Vec<(MemoryNode, f64)> = Vec::new();
        for (id, score) in fused {
            if let Some(node) = self.tier.get(&id, now).await? {
                scored.push((node, score));
            }
        }

        // Deterministic ordering: (−score, created_at, id).
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.0.created_at
                        .partial_cmp(&b.0.created_at)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(top_k);

        // Boost every returned node (+0.1, clamped; may promote).
        let mut results = Vec::with_capacity(scored.len());
        for (node, score) in scored {
            match self.tier.boost_on_recall(&node.id, now).await? {
                Some(boosted) => results.push((boosted, score)),
                None => results.push((node, score)),
            }
        }

        info!(
            "[memory] Recall returned {} result(s) for scope '{}'",
            results.len(),
            self.config.scope_key
        );
        Ok(results)
    }

    /// Recall with the configured default result count.
    pub async fn recall_top(&self, query: &str) -> MemoryResult<Vec<(MemoryNode, f64)>> {
        self.recall(query, self.config.recall.top_k).await
    }

    /// Formatted context block for prompt injection.
    pub async fn get_context(&self, current_input: &str, limit: usize) -> MemoryResult<String> {
        let memories = self.recall(current_input, limit).await?;
        if memories.is_empty() {
            return Ok(String::new());
        }

        let mut lines = vec!["## Relevant Memories".to_string()];
        for (i, (node, _)) in memories.iter().enumerate() {
            let indicator = if node.energy > 0.7 {
                "●"
            } else if node.energy > 0.3 {
                "○"
            } else {
                "◌"
            };
            lines.push(format!(
                "{}. [{} E={:.2}] {}",
                i + 1,
                indicator,
                node.energy,
                preview(&node.content, 200)
            ));
            if !node.metadata.entities.is_empty() {
                let shown: Vec<&str> = node
                    .metadata
                    .entities
                    .iter()
                    .take(5)
                    .map(String::as_str)
                    .collect();
                lines.push(format!("   Entities: {}", shown.join(", ")));
            }
        }
        Ok(lines.join("\n"))
    }

    // ══════════════════════════════════════════════════════════════════
    // Feedback and causal events
    // ══════════════════════════════════════════════════════════════════

    /// Adjust a node's energy by δ ∈ [-0.5, 0.5].
    pub async fn feedback(&self, node_id: &str, delta: f64) -> MemoryResult<()> {
        let now = now_ts();
        let mut node = self
            .tier
            .get(node_id, now)
            .await?
            .ok_or_else(|| MemoryError::Validation(format!("unknown node: {}", node_id)))?;

        self.energy.apply_feedback(&mut node, delta, now)?;
        self.tier.commit_energy(&node).await?;
        Ok(())
    }

    /// Record an explicit causal association between two existing nodes.
    pub async fn record_causal(&self, source_id: &str, target_id: &str) -> MemoryResult<()> {
        for id in [source_id, target_id] {
            if self.store.get_node(id)?.is_none() {
                return Err(MemoryError::Validation(format!("unknown node: {}", id)));
            }
        }

        let link = self.router.lock().causal_link(source_id, target_id, 1.0);
        let added = { self.state.lock().graph.add_link(&link) };
        if added {
            if let Err(e) = self.store.insert_link(&link) {
                warn!(
                    "[memory] Causal link persist failed ({} → {}), queued: {}",
                    source_id, target_id, e
                );
                self.state.lock().graph.mark_pending_persist(link);
            }
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════
    // Conflicts, reconciliation, stats
    // ══════════════════════════════════════════════════════════════════

    /// Conflicts surfaced by past ingests, oldest first.
    pub fn pending_conflicts(&self) -> Vec<ConflictReport> {
        self.pending_conflicts.lock().clone()
    }

    /// Acknowledge and clear surfaced conflicts.
    pub fn clear_pending_conflicts(&self) {
        self.pending_conflicts.lock().clear();
    }

    /// Retry durable persistence of links that failed their first write.
    /// Returns the number of links now persisted.
    pub async fn reconcile_links(&self) -> MemoryResult<usize> {
        let pending = { self.state.lock().graph.drain_pending_persist() };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut persisted = 0usize;
        for link in pending {
            match self.store.insert_link(&link) {
                Ok(_) => persisted += 1,
                Err(e) => {
                    warn!("[memory] Link reconciliation still failing: {}", e);
                    self.state.lock().graph.mark_pending_persist(link);
                }
            }
        }
        if persisted > 0 {
            info!("[memory] Reconciled {} pending link(s)", persisted);
        }
        Ok(persisted)
    }

    /// Counters per tier for this scope.
    pub fn stats(&self) -> MemoryResult<MemoryStats> {
        let (l1_store, l2_store) = self.store.count_nodes_by_tier(&self.config.scope_key)?;
        let state = self.state.lock();
        Ok(MemoryStats {
            scope: self.config.scope_key.clone(),
            l1_count: state.working.len(),
            l2_count: l1_store + l2_store,
            graph_nodes: state.graph.node_count(),
            graph_links: state.graph.link_count(),
            pending_links: state.graph.pending_persist_count(),
            crystal_facts: self.store.count_facts(&self.config.scope_key)?,
            crystal_links: self.store.count_links(&self.config.scope_key)?,
            pending_conflicts: self.pending_conflicts.lock().len(),
        })
    }

    // ── Background task entry points ───────────────────────────────────

    /// One L1 maintenance pass (decay-driven demotions and evictions).
    pub async fn run_maintenance(&self) -> MemoryResult<()> {
        self.tier.maintenance_sweep(now_ts()).await?;
        Ok(())
    }

    /// One consolidation pass.
    pub async fn run_consolidation(&self) -> MemoryResult<usize> {
        self.tier.consolidate_once(now_ts()).await
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    let mut s: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        s.push_str("...");
    }
    s
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
