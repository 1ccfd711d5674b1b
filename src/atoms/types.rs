// ── BIEM Atoms: Memory System Types ────────────────────────────────────────
//
// Type definitions for the tiered memory substrate. These are pure data
// types (no logic beyond constructors and clamps, no DB access, no I/O).
//
// Follows the crate pattern: structs in atoms/, behavior in engine/.
// Nodes are value objects — the association graph stores links as
// (id, id) edges and never holds node references, so there are no cycles.

use serde::{Deserialize, Serialize};

use crate::atoms::constants;

/// Current wall-clock time as epoch seconds. All decay math takes explicit
/// timestamps so tests can pin the clock; this is the production source.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Links
// ═══════════════════════════════════════════════════════════════════════════

/// Type of relationship between memory nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Sequential / time-based relationship.
    Temporal,
    /// Meaning-based similarity.
    Semantic,
    /// Cause-effect relationship. Never created by the router; only the
    /// explicit causal API produces these.
    Causal,
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkType::Temporal => write!(f, "temporal"),
            LinkType::Semantic => write!(f, "semantic"),
            LinkType::Causal => write!(f, "causal"),
        }
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temporal" => Ok(LinkType::Temporal),
            "semantic" => Ok(LinkType::Semantic),
            "causal" => Ok(LinkType::Causal),
            _ => Err(format!("Unknown link type: {}", s)),
        }
    }
}

/// A directed, typed, weighted edge between two memory nodes.
/// Uniqueness key within a scope: (source_id, target_id, link_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub source_id: String,
    pub target_id: String,
    pub link_type: LinkType,
    /// Edge strength in (0, 1], used by spreading activation.
    pub weight: f64,
    /// Creation timestamp (epoch seconds).
    pub created_at: f64,
    /// Scope this link belongs to.
    pub scope: String,
}

impl Link {
    pub fn new(
        scope: &str,
        source_id: &str,
        target_id: &str,
        link_type: LinkType,
        weight: f64,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            link_type,
            weight,
            created_at: now_ts(),
            scope: scope.to_string(),
        }
    }

    /// The (source, target, type) identity used for dedup in graph and store.
    pub fn key(&self) -> (String, String, LinkType) {
        (self.source_id.clone(), self.target_id.clone(), self.link_type)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Memory Nodes
// ═══════════════════════════════════════════════════════════════════════════

/// Storage tier a node currently occupies. L3 holds consolidated facts, not
/// nodes, so a node is always L1 or L2.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemoryTier {
    L1,
    L2,
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryTier::L1 => write!(f, "L1"),
            MemoryTier::L2 => write!(f, "L2"),
        }
    }
}

impl std::str::FromStr for MemoryTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L1" => Ok(MemoryTier::L1),
            "L2" => Ok(MemoryTier::L2),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

/// Side-information attached to a node by the encoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Extracted entity anchors, deduplicated, insertion-ordered.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Emotional polarity in [-1, 1].
    #[serde(default)]
    pub sentiment: f64,
    /// Origin of the memory (user, tool, agent, …).
    #[serde(default)]
    pub source: String,
    /// Set when the embedding call failed and the node carries a zero
    /// vector. Degraded nodes are excluded from recall seeds.
    #[serde(default)]
    pub degraded: bool,
}

/// A single memory unit. Energy decays over time by E = E_last · e^(−λΔt)
/// and is boosted on access; the tier manager moves nodes between L1 and L2
/// based on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: String,
    /// Scope key isolating per-principal memories.
    pub scope: String,
    pub content: String,
    /// Dense embedding, L2-normalized. All-zero when degraded.
    #[serde(default)]
    pub vector: Vec<f32>,
    pub metadata: NodeMetadata,
    /// Current energy level in [0, 1].
    pub energy: f64,
    /// Energy at creation, immutable after ingest.
    pub initial_energy: f64,
    /// Epoch seconds of the last access (read or energy change).
    pub last_accessed: f64,
    /// Epoch seconds of creation.
    pub created_at: f64,
    pub tier: MemoryTier,
}

impl MemoryNode {
    /// Create a node with a fresh uuid, neutral metadata, and full energy.
    pub fn new(scope: &str, content: &str) -> Self {
        let now = now_ts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            content: content.to_string(),
            vector: Vec::new(),
            metadata: NodeMetadata::default(),
            energy: 1.0,
            initial_energy: 1.0,
            last_accessed: now,
            created_at: now,
            tier: MemoryTier::L2,
        }
    }

    /// Update last_accessed to now (activates the memory).
    pub fn touch(&mut self, now: f64) {
        self.last_accessed = now;
    }

    /// One-line preview for logs and context blocks.
    pub fn summarize(&self, max_len: usize) -> String {
        let mut preview: String = self.content.chars().take(max_len).collect();
        if self.content.chars().count() > max_len {
            preview.push_str("...");
        }
        format!("[E={:.2}] {}", self.energy, preview)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Conflicts
// ═══════════════════════════════════════════════════════════════════════════

/// A detected contradiction between a new node and an existing one.
/// Advisory: conflicts are surfaced to the caller and logged, never block
/// the write, and never mutate the existing node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub id: String,
    /// Existing memory.
    pub existing_id: String,
    /// New conflicting memory.
    pub new_id: String,
    /// Cosine similarity that gated the arbitration.
    pub similarity: f64,
    /// Arbiter's classification ("contradiction", "update", …).
    pub conflict_type: String,
    pub description: String,
    /// Arbiter's confidence in the verdict.
    pub confidence: f64,
    pub created_at: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Crystal Facts (L3)
// ═══════════════════════════════════════════════════════════════════════════

/// A consolidated semantic fact stored in L3, synthesized from a dense
/// cluster of related nodes. Source nodes remain queryable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrystalFact {
    pub id: String,
    pub scope: String,
    pub content: String,
    /// Contributing node ids, ordered as clustered.
    pub source_node_ids: Vec<String>,
    /// Confidence in (0, 1], derived from cluster energy.
    pub confidence: f64,
    pub created_at: f64,
    pub updated_at: f64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CrystalFact {
    pub fn new(scope: &str, content: &str, source_node_ids: Vec<String>, confidence: f64) -> Self {
        let now = now_ts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            content: content.to_string(),
            source_node_ids,
            confidence,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Search Filters and Stats
// ═══════════════════════════════════════════════════════════════════════════

/// Optional scalar filters for vector-index searches. The scope filter is
/// mandatory and passed separately; everything here narrows further.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub tier: Option<MemoryTier>,
    pub min_energy: Option<f64>,
    pub created_after: Option<f64>,
    pub created_before: Option<f64>,
    /// When false (default), degraded nodes are skipped.
    pub include_degraded: bool,
}

/// Per-tier counters returned by `stats()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub scope: String,
    pub l1_count: usize,
    pub l2_count: usize,
    pub graph_nodes: usize,
    pub graph_links: usize,
    /// Links held in the graph that still await C6 persistence.
    pub pending_links: usize,
    pub crystal_facts: usize,
    pub crystal_links: usize,
    pub pending_conflicts: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 6: Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Energy dynamics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyConfig {
    /// Decay coefficient per hour.
    pub lambda_decay: f64,
    /// Boost applied on recall hit.
    pub boost_on_recall: f64,
    /// Base term of the initial-energy formula.
    pub init_base: f64,
    /// Weight of the source bonus.
    pub source_weight: f64,
    /// Weight of the entity-density term.
    pub entity_weight: f64,
    /// Entity count at which the density term saturates.
    pub entity_saturation: usize,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            lambda_decay: constants::DECAY_LAMBDA_PER_HOUR,
            boost_on_recall: constants::BOOST_ON_RECALL,
            init_base: constants::ENERGY_INIT_BASE,
            source_weight: constants::ENERGY_SOURCE_WEIGHT,
            entity_weight: constants::ENERGY_ENTITY_WEIGHT,
            entity_saturation: constants::ENERGY_ENTITY_SATURATION,
        }
    }
}

/// L1 working-set configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingSetConfig {
    pub max_nodes: usize,
    pub ttl_seconds: f64,
    pub min_energy: f64,
    pub admission_energy: f64,
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            max_nodes: constants::L1_MAX_NODES,
            ttl_seconds: constants::L1_TTL_SECONDS,
            min_energy: constants::L1_MIN_ENERGY,
            admission_energy: constants::L1_ADMISSION_ENERGY,
        }
    }
}

/// Association-router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub temporal_window_seconds: f64,
    pub max_temporal_links: usize,
    pub semantic_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            temporal_window_seconds: constants::TEMPORAL_WINDOW_SECONDS,
            max_temporal_links: constants::TEMPORAL_MAX_LINKS,
            semantic_threshold: constants::SEMANTIC_LINK_THRESHOLD,
        }
    }
}

/// Conflict-arbitration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    pub similarity_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: constants::CONFLICT_SIMILARITY_THRESHOLD,
            confidence_threshold: constants::CONFLICT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Recall pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    pub top_k: usize,
    pub seed_top_k: usize,
    pub seed_count: usize,
    pub spread_hops: usize,
    pub spread_decay: f64,
    /// Weight of the vector score in the fused score.
    pub score_alpha: f64,
    /// Weight of the activation score in the fused score.
    pub score_beta: f64,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            top_k: constants::RECALL_TOP_K,
            seed_top_k: constants::RECALL_SEED_TOP_K,
            seed_count: constants::RECALL_SEED_COUNT,
            spread_hops: constants::SPREAD_HOPS,
            spread_decay: constants::SPREAD_DECAY,
            score_alpha: constants::SCORE_ALPHA_VECTOR,
            score_beta: constants::SCORE_BETA_ACTIVATION,
        }
    }
}

/// Tier-transition and consolidation configuration. Cluster size and energy
/// thresholds are configuration, not hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub promote_energy: f64,
    pub demote_energy: f64,
    pub consolidation_min_cluster: usize,
    pub consolidation_min_energy: f64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            promote_energy: constants::PROMOTE_ENERGY,
            demote_energy: constants::DEMOTE_ENERGY,
            consolidation_min_cluster: constants::CONSOLIDATION_MIN_CLUSTER,
            consolidation_min_energy: constants::CONSOLIDATION_MIN_ENERGY,
        }
    }
}

/// Master configuration for a memory manager bound to one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Scope key isolating this manager's memories. Knowledge is global
    /// regardless of scope.
    pub scope_key: String,
    /// Embedding dimension; zero vectors of this length mark degraded nodes.
    pub embedding_dim: usize,
    pub energy: EnergyConfig,
    pub working_set: WorkingSetConfig,
    pub router: RouterConfig,
    pub conflict: ConflictConfig,
    pub recall: RecallConfig,
    pub tier: TierConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            scope_key: "default".to_string(),
            embedding_dim: constants::EMBEDDING_DIM,
            energy: EnergyConfig::default(),
            working_set: WorkingSetConfig::default(),
            router: RouterConfig::default(),
            conflict: ConflictConfig::default(),
            recall: RecallConfig::default(),
            tier: TierConfig::default(),
        }
    }
}

impl MemoryConfig {
    pub fn for_scope(scope: &str) -> Self {
        Self { scope_key: scope.to_string(), ..Default::default() }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
