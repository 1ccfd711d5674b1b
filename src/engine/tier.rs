// ── TierManager (C9) ───────────────────────────────────────────────────────
//
// Routes nodes across storage tiers and runs the slow-path upkeep:
//   • store: C4 upsert (with bounded retry) + C5 add_node + C3 admission
//   • get: L1 first, then the vector index; always decayed before returning
//   • promotion at post-boost energy ≥ promote_energy, demotion below
//     demote_energy at scan time, single lowest-energy eviction on overflow
//   • consolidation of dense connected subgraphs into L3 crystal facts
//
// Consolidation is advisory: it never alters source nodes, and each cluster
// signature is consolidated at most once per process lifetime.

use crate::atoms::constants::{VECTOR_WRITE_ATTEMPTS, VECTOR_WRITE_BACKOFF_MS};
use crate::atoms::error::MemoryResult;
use crate::atoms::types::{CrystalFact, MemoryNode, MemoryTier, TierConfig};
use crate::engine::energy::EnergyController;
use crate::engine::graph::MemoryGraph;
use crate::engine::providers::LlmProvider;
use crate::engine::store::MemoryStore;
use crate::engine::working_set::{Admission, WorkingSet};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const CONSOLIDATION_PROMPT: &str = r#"The statements below are closely related memories from one conversation history. Merge them into a single concise factual statement that preserves every distinct piece of information. Respond with ONLY the merged statement, no preamble.

Statements:
"#;

/// Shared in-process state for one scope: the L1 working set and the
/// association graph. Guarded by one coarse lock, held only across
/// synchronous structural mutations — never across an await.
pub struct ScopeState {
    pub working: WorkingSet,
    pub graph: MemoryGraph,
}

/// Counters from one maintenance sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub evicted: usize,
    pub demoted: usize,
}

pub struct TierManager {
    scope: String,
    store: Arc<MemoryStore>,
    energy: EnergyController,
    config: TierConfig,
    state: Arc<Mutex<ScopeState>>,
    llm: Option<Arc<dyn LlmProvider>>,
    /// Cluster signatures already consolidated this process lifetime.
    consolidated: Mutex<HashSet<String>>,
}

impl TierManager {
    pub fn new(
        scope: &str,
        store: Arc<MemoryStore>,
        energy: EnergyController,
        config: TierConfig,
        state: Arc<Mutex<ScopeState>>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            scope: scope.to_string(),
            store,
            energy,
            config,
            state,
            llm,
            consolidated: Mutex::new(HashSet::new()),
        }
    }

    // ── Store ──────────────────────────────────────────────────────────

    /// Store a new node: upsert into the vector index, register in the
    /// graph, and admit into L1 when energy allows. A node whose durable
    /// write exhausts its retries survives in L1 only, with a durability
    /// warning.
    pub async fn store_node(&self, mut node: MemoryNode) -> MemoryResult<MemoryNode> {
        let admission = { self.state.lock().working.admission_energy() };
        node.tier = if node.energy >= admission { MemoryTier::L1 } else { MemoryTier::L2 };

        let durable = self.upsert_with_retry(&node).await;
        if !durable {
            warn!(
                "[tier] Vector index write failed for {} — node held in working set only",
                node.id
            );
            node.tier = MemoryTier::L1;
        }

        let displaced = {
            let mut state = self.state.lock();
            state.graph.add_node(&node.id);
            if node.tier == MemoryTier::L1 {
                match state.working.put(node.clone()) {
                    Admission::Admitted { evicted } => evicted,
                    Admission::Rejected => {
                        // Below admission despite the tier decision — only
                        // reachable on the durability fallback path.
                        node.tier = MemoryTier::L2;
                        None
                    }
                }
            } else {
                None
            }
        };

        if let Some(victim) = displaced {
            self.persist_demotion(&victim).await;
        }

        Ok(node)
    }

    async fn upsert_with_retry(&self, node: &MemoryNode) -> bool {
        for attempt in 0..VECTOR_WRITE_ATTEMPTS {
            match self.store.upsert_node(node) {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        "[tier] Vector upsert attempt {}/{} failed for {}: {}",
                        attempt + 1,
                        VECTOR_WRITE_ATTEMPTS,
                        node.id,
                        e
                    );
                    if attempt + 1 < VECTOR_WRITE_ATTEMPTS {
                        let backoff = VECTOR_WRITE_BACKOFF_MS << attempt;
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        false
    }

    // ── Get ────────────────────────────────────────────────────────────

    /// Fetch a node, L1 first. Energy is decayed to `now` before the node
    /// is returned, and the decayed (energy, last_accessed) pair is
    /// persisted to the vector index.
    pub async fn get(&self, id: &str, now: f64) -> MemoryResult<Option<MemoryNode>> {
        let from_l1 = {
            let mut state = self.state.lock();
            state.working.get(id, now).map(|node| {
                self.energy.apply_decay(node, now);
                node.clone()
            })
        };

        if let Some(node) = from_l1 {
            if let Err(e) = self.store.update_node_energy(id, node.energy, node.last_accessed) {
                warn!("[tier] Energy persist failed for {}: {}", id, e);
            }
            return Ok(Some(node));
        }

        let mut node = match self.store.get_node(id)? {
            Some(node) => node,
            None => return Ok(None),
        };
        self.energy.apply_decay(&mut node, now);
        if let Err(e) = self.store.update_node_energy(id, node.energy, node.last_accessed) {
            warn!("[tier] Energy persist failed for {}: {}", id, e);
        }
        Ok(Some(node))
    }

    // ── Boosts and transitions ─────────────────────────────────────────

    /// Recall-hit path: decay, boost, persist, and promote to L1 when the
    /// post-boost energy crosses the promotion threshold.
    pub async fn boost_on_recall(&self, id: &str, now: f64) -> MemoryResult<Option<MemoryNode>> {
        let mut node = match self.get(id, now).await? {
            Some(node) => node,
            None => return Ok(None),
        };
        self.energy.boost_on_recall(&mut node, now);
        self.store.update_node_energy(id, node.energy, node.last_accessed)?;

        {
            let mut state = self.state.lock();
            if let Some(resident) = state.working.get(id, now) {
                resident.energy = node.energy;
            }
        }

        if node.tier == MemoryTier::L2 && node.energy >= self.config.promote_energy {
            node = self.promote(node).await?;
        }
        Ok(Some(node))
    }

    /// Persist an externally adjusted energy and apply any tier transition
    /// it triggers (feedback path).
    pub async fn commit_energy(&self, node: &MemoryNode) -> MemoryResult<MemoryNode> {
        self.store.update_node_energy(&node.id, node.energy, node.last_accessed)?;

        let mut node = node.clone();
        let resident = { self.state.lock().working.contains(&node.id) };

        if resident {
            let mut state = self.state.lock();
            if let Some(in_set) = state.working.get(&node.id, node.last_accessed) {
                in_set.energy = node.energy;
            }
            drop(state);
            if node.energy < self.config.demote_energy {
                self.demote(&node.id).await?;
                node.tier = MemoryTier::L2;
            }
        } else if node.energy >= self.config.promote_energy {
            node = self.promote(node).await?;
        }
        Ok(node)
    }

    async fn promote(&self, mut node: MemoryNode) -> MemoryResult<MemoryNode> {
        node.tier = MemoryTier::L1;
        self.store.set_node_tier(&node.id, MemoryTier::L1)?;

        let displaced = {
            let mut state = self.state.lock();
            match state.working.put(node.clone()) {
                Admission::Admitted { evicted } => evicted,
                Admission::Rejected => None,
            }
        };
        if let Some(victim) = displaced {
            self.persist_demotion(&victim).await;
        }
        info!("[tier] Promoted {} to L1 (E={:.2})", node.id, node.energy);
        Ok(node)
    }

    async fn demote(&self, id: &str) -> MemoryResult<()> {
        let removed = { self.state.lock().working.remove(id) };
        if let Some(node) = removed {
            self.store.set_node_tier(id, MemoryTier::L2)?;
            self.store.update_node_energy(id, node.energy, node.last_accessed)?;
            info!("[tier] Demoted {} to L2 (E={:.2})", id, node.energy);
        }
        Ok(())
    }

    /// Persist a capacity eviction: the node leaves L1 but stays intact in
    /// the vector index.
    async fn persist_demotion(&self, victim: &MemoryNode) {
        if let Err(e) = self.store.set_node_tier(&victim.id, MemoryTier::L2) {
            warn!("[tier] Eviction persist failed for {}: {}", victim.id, e);
        }
        if let Err(e) =
            self.store.update_node_energy(&victim.id, victim.energy, victim.last_accessed)
        {
            warn!("[tier] Eviction persist failed for {}: {}", victim.id, e);
        }
        info!("[tier] Evicted {} from L1 (E={:.2})", victim.id, victim.energy);
    }

    // ── Maintenance sweep ──────────────────────────────────────────────

    /// Scan L1: evict nodes below the scan floor or idle past the TTL,
    /// demote nodes whose decayed energy has fallen below the demotion
    /// threshold. Untouched residents are left alone so genuine idleness
    /// keeps accruing against the TTL.
    pub async fn maintenance_sweep(&self, now: f64) -> MemoryResult<SweepReport> {
        let (snapshot, expired_set) = {
            let state = self.state.lock();
            let expired: std::collections::HashSet<String> =
                state.working.expired_ids(now).into_iter().collect();
            (state.working.snapshot(), expired)
        };
        let mut report = SweepReport::default();

        for resident in snapshot {
            let decayed = self.energy.decayed(resident.energy, resident.last_accessed, now);
            let expired = expired_set.contains(&resident.id);

            if expired || decayed < self.config.demote_energy {
                let removed = { self.state.lock().working.remove(&resident.id) };
                if removed.is_some() {
                    if let Err(e) = self.store.set_node_tier(&resident.id, MemoryTier::L2) {
                        warn!("[tier] Sweep persist failed for {}: {}", resident.id, e);
                    }
                    if let Err(e) = self.store.update_node_energy(&resident.id, decayed, now) {
                        warn!("[tier] Sweep persist failed for {}: {}", resident.id, e);
                    }
                    if expired {
                        report.evicted += 1;
                    } else {
                        report.demoted += 1;
                    }
                }
            }
        }

        if report.evicted + report.demoted > 0 {
            info!(
                "[tier] Sweep: {} evicted, {} demoted",
                report.evicted, report.demoted
            );
        }
        Ok(report)
    }

    // ── Consolidation ──────────────────────────────────────────────────

    /// One consolidation pass: find connected subgraphs of the configured
    /// minimum size whose members' mean decayed energy clears the
    /// threshold, merge their contents through the LLM, and store the
    /// result as a crystal fact citing the source node ids. Returns the
    /// number of facts created.
    pub async fn consolidate_once(&self, now: f64) -> MemoryResult<usize> {
        let components = {
            self.state.lock().graph.components(self.config.consolidation_min_cluster)
        };
        let mut created = 0usize;

        for component in components {
            let signature = component.join("|");
            if self.consolidated.lock().contains(&signature) {
                continue;
            }

            let mut nodes: Vec<MemoryNode> = Vec::new();
            for id in &component {
                if let Some(node) = self.store.get_node(id)? {
                    nodes.push(node);
                }
            }
            if nodes.len() < self.config.consolidation_min_cluster {
                continue;
            }

            let mean_energy = nodes
                .iter()
                .map(|n| self.energy.decayed(n.energy, n.last_accessed, now))
                .sum::<f64>()
                / nodes.len() as f64;
            if mean_energy < self.config.consolidation_min_energy {
                continue;
            }

            let contents: Vec<&str> = nodes.iter().map(|n| n.content.as_str()).collect();
            let merged = match self.consolidate_contents(&contents).await {
                Some(text) => text,
                None => continue,
            };

            let fact = CrystalFact::new(
                &self.scope,
                &merged,
                nodes.iter().map(|n| n.id.clone()).collect(),
                mean_energy.min(1.0),
            );
            self.store.insert_fact(&fact)?;
            self.consolidated.lock().insert(signature);
            created += 1;
            info!(
                "[tier] Consolidated {} nodes into fact {} (confidence {:.2})",
                nodes.len(),
                fact.id,
                fact.confidence
            );
        }
        Ok(created)
    }

    /// Merge cluster contents. With an LLM, ask for a single merged
    /// statement; a provider failure skips this cycle. Without an LLM,
    /// fall back to citing the first member.
    async fn consolidate_contents(&self, contents: &[&str]) -> Option<String> {
        match &self.llm {
            Some(llm) => {
                let mut prompt = String::from(CONSOLIDATION_PROMPT);
                for (i, content) in contents.iter().enumerate() {
                    prompt.push_str(&format!("{}. {}\n", i + 1, content));
                }
                match llm.complete(&prompt).await {
                    Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("[tier] Consolidation LLM call failed: {}", e);
                        None
                    }
                }
            }
            None => contents
                .first()
                .map(|first| format!("[Consolidated from {} memories] {}", contents.len(), first)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
