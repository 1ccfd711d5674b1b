// ── BIEM Atoms: Engine Constants ───────────────────────────────────────────
// Every tunable the engine reads lives in a config struct (atoms/types.rs);
// the values here are the documented defaults those configs start from.

// ── Energy ─────────────────────────────────────────────────────────────────

/// Exponential decay coefficient, per hour: E(t) = E_last · e^(−λ·Δt_hours).
pub const DECAY_LAMBDA_PER_HOUR: f64 = 0.1;

/// Energy boost applied to every node returned by a recall.
pub const BOOST_ON_RECALL: f64 = 0.1;

/// Base term of the initial-energy formula.
pub const ENERGY_INIT_BASE: f64 = 0.5;

/// Weight of the source bonus in the initial-energy formula.
pub const ENERGY_SOURCE_WEIGHT: f64 = 0.2;

/// Weight of the entity-density term in the initial-energy formula.
pub const ENERGY_ENTITY_WEIGHT: f64 = 0.3;

/// Entity count at which the entity-density term saturates.
pub const ENERGY_ENTITY_SATURATION: usize = 5;

/// Maximum magnitude accepted by the feedback API.
pub const FEEDBACK_DELTA_MAX: f64 = 0.5;

// ── L1 working set ─────────────────────────────────────────────────────────

/// Maximum nodes held per scope in the L1 working set.
pub const L1_MAX_NODES: usize = 100;

/// Seconds of inactivity after which an L1 node is evicted on scan.
pub const L1_TTL_SECONDS: f64 = 3600.0;

/// Energy below which an L1 node is evicted on scan.
pub const L1_MIN_ENERGY: f64 = 0.1;

/// Minimum energy for admission into L1.
pub const L1_ADMISSION_ENERGY: f64 = 0.5;

// ── Tier transitions ───────────────────────────────────────────────────────

/// Post-boost energy at which an L2 node is promoted to L1.
pub const PROMOTE_ENERGY: f64 = 0.7;

/// Energy below which an L1 node is demoted to L2 at scan time.
pub const DEMOTE_ENERGY: f64 = 0.3;

/// Minimum connected-subgraph size eligible for consolidation.
pub const CONSOLIDATION_MIN_CLUSTER: usize = 5;

/// Minimum mean energy of a subgraph eligible for consolidation.
pub const CONSOLIDATION_MIN_ENERGY: f64 = 0.6;

// ── Association links ──────────────────────────────────────────────────────

/// Temporal-link window: nodes ingested within this many seconds are linked.
pub const TEMPORAL_WINDOW_SECONDS: f64 = 300.0;

/// Maximum temporal links created per new node.
pub const TEMPORAL_MAX_LINKS: usize = 5;

/// Minimum cosine similarity for a semantic link.
pub const SEMANTIC_LINK_THRESHOLD: f64 = 0.7;

/// Minimum cosine similarity before conflict arbitration is attempted.
pub const CONFLICT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Minimum LLM confidence for a conflict verdict to be reported.
pub const CONFLICT_CONFIDENCE_THRESHOLD: f64 = 0.7;

// ── Recall ─────────────────────────────────────────────────────────────────

/// Default number of results returned by recall.
pub const RECALL_TOP_K: usize = 5;

/// Vector-search breadth used to gather spreading-activation seeds.
pub const RECALL_SEED_TOP_K: usize = 10;

/// Number of vector hits promoted to activation seeds.
pub const RECALL_SEED_COUNT: usize = 5;

/// Spreading-activation hop count.
pub const SPREAD_HOPS: usize = 2;

/// Per-hop activation decay factor.
pub const SPREAD_DECAY: f64 = 0.5;

/// Activation below which spreading stops propagating a signal.
pub const SPREAD_FLOOR: f64 = 0.01;

/// Fused score = alpha · vector score + beta · activation score.
pub const SCORE_ALPHA_VECTOR: f64 = 0.7;
pub const SCORE_BETA_ACTIVATION: f64 = 0.3;

// ── Knowledge ──────────────────────────────────────────────────────────────

/// Minimum extraction confidence for a triple to survive the strict filter.
pub const KNOWLEDGE_MIN_CONFIDENCE: f64 = 0.5;

/// Maximum triples accepted from a single message.
pub const KNOWLEDGE_MAX_TRIPLES_PER_MESSAGE: usize = 5;

/// Seconds before an unconfirmed pending update expires.
pub const PENDING_TTL_SECONDS: f64 = 300.0;

/// Maximum knowledge items returned for context injection.
pub const KNOWLEDGE_MAX_CONTEXT_ITEMS: usize = 10;

/// Cluster-expansion fan-out per initial hit.
pub const KNOWLEDGE_EXPANSION_K: usize = 3;

/// Score multiplier applied to expansion hits.
pub const KNOWLEDGE_EXPANSION_WEIGHT: f64 = 0.7;

/// Minimum score for initial knowledge hits.
pub const KNOWLEDGE_MIN_SCORE: f64 = 0.5;

/// Minimum score for expansion hits.
pub const KNOWLEDGE_EXPANSION_MIN_SCORE: f64 = 0.4;

/// Bound on the retained previous_values history per triple.
pub const KNOWLEDGE_MAX_PREVIOUS_VALUES: usize = 32;

// ── Embedding ──────────────────────────────────────────────────────────────

/// Default embedding dimension (bge-m3 family).
pub const EMBEDDING_DIM: usize = 1024;

/// Content is truncated to this many bytes before embedding.
pub const EMBEDDING_MAX_CONTENT_BYTES: usize = 8000;

// ── Durability ─────────────────────────────────────────────────────────────

/// Attempts for the L2 vector upsert before giving up (ingest stays total).
pub const VECTOR_WRITE_ATTEMPTS: u32 = 3;

/// Base backoff between vector write attempts, in milliseconds.
pub const VECTOR_WRITE_BACKOFF_MS: u64 = 100;
