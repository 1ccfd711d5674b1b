// ── BIEM Atoms: Knowledge Triple Store Types ───────────────────────────────
//
// Types for the global knowledge layer: (subject, predicate, object)
// triples with version history, extraction results, conflict results, and
// the pending-update lifecycle.
//
// Knowledge is GLOBAL — shared across all scopes. `contributor_id` records
// who contributed a fact (attribution), it never isolates queries.

use serde::{Deserialize, Serialize};

use crate::atoms::types::now_ts;

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Triples
// ═══════════════════════════════════════════════════════════════════════════

/// Intent behind a knowledge statement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KnowledgeIntent {
    /// Normal factual statement.
    Statement,
    /// Correcting previous information.
    Correction,
    /// Asking about knowledge (nothing to store).
    Question,
    /// Subjective opinion (not stored as fact).
    Opinion,
}

impl std::str::FromStr for KnowledgeIntent {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "statement" => Ok(KnowledgeIntent::Statement),
            "correction" => Ok(KnowledgeIntent::Correction),
            "question" => Ok(KnowledgeIntent::Question),
            "opinion" => Ok(KnowledgeIntent::Opinion),
            _ => Err(format!("Unknown intent: {}", s)),
        }
    }
}

impl KnowledgeIntent {
    /// Only statements and corrections carry storable facts.
    pub fn is_storable(&self) -> bool {
        matches!(self, KnowledgeIntent::Statement | KnowledgeIntent::Correction)
    }
}

/// Source / provenance level of a triple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KnowledgeSource {
    /// Extracted from normal chat.
    Conversation,
    /// User explicitly stated.
    UserStated,
    /// User corrected previous information.
    UserCorrection,
    /// User confirmed an update through the pending flow.
    UserVerified,
    /// Extracted from an assistant message.
    AgentInferred,
}

impl std::fmt::Display for KnowledgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KnowledgeSource::Conversation => "conversation",
            KnowledgeSource::UserStated => "user_stated",
            KnowledgeSource::UserCorrection => "user_correction",
            KnowledgeSource::UserVerified => "user_verified",
            KnowledgeSource::AgentInferred => "agent_inferred",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for KnowledgeSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(KnowledgeSource::Conversation),
            "user_stated" => Ok(KnowledgeSource::UserStated),
            "user_correction" => Ok(KnowledgeSource::UserCorrection),
            "user_verified" => Ok(KnowledgeSource::UserVerified),
            "agent_inferred" => Ok(KnowledgeSource::AgentInferred),
            _ => Err(format!("Unknown knowledge source: {}", s)),
        }
    }
}

/// A knowledge triple: a single fact like
/// (GPT-4, context_window, 128k tokens) or (Python, created_by, Guido van
/// Rossum). At most one triple exists globally per (subject, predicate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeTriple {
    pub id: String,
    pub subject: String,
    /// Relation, normalized to snake_case.
    pub predicate: String,
    pub object: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub source: KnowledgeSource,
    /// Incremented on every object update. version == previous_values.len() + 1
    /// while the bounded history window has not overflowed.
    pub version: u32,
    /// Prior object values, newest first: previous_values[0] is the
    /// immediately preceding object.
    #[serde(default)]
    pub previous_values: Vec<String>,
    /// Who contributed this fact (attribution only, never isolation).
    #[serde(default)]
    pub contributor_id: String,
    #[serde(default)]
    pub session_id: String,
    pub created_at: f64,
    pub updated_at: f64,
    /// Embedding of "subject predicate object", used for semantic search.
    #[serde(skip)]
    pub vector: Vec<f32>,
}

impl KnowledgeTriple {
    pub fn new(subject: &str, predicate: &str, object: &str, confidence: f64) -> Self {
        let now = now_ts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence,
            source: KnowledgeSource::Conversation,
            version: 1,
            previous_values: Vec::new(),
            contributor_id: String::new(),
            session_id: String::new(),
            created_at: now,
            updated_at: now,
            vector: Vec::new(),
        }
    }

    /// Text rendering used for embedding and display.
    pub fn to_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }

    /// Human-readable display format.
    pub fn display(&self) -> String {
        format!("({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Extraction and Conflict Results
// ═══════════════════════════════════════════════════════════════════════════

/// Result of knowledge extraction from a message.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    /// Does the message contain factual content?
    pub is_factual: bool,
    pub intent: Option<KnowledgeIntent>,
    pub triples: Vec<KnowledgeTriple>,
    /// Overall extraction confidence.
    pub confidence: f64,
}

/// Result of conflict detection for one new triple.
#[derive(Debug, Clone)]
pub struct TripleConflict {
    pub existing: KnowledgeTriple,
    pub incoming: KnowledgeTriple,
    /// Always "value_change" for same-key different-object conflicts.
    pub conflict_type: String,
    /// Human-readable confirmation suggestion.
    pub suggestion: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Pending Updates
// ═══════════════════════════════════════════════════════════════════════════

/// A proposed change to an existing triple awaiting user confirmation.
/// State machine: created → (confirmed | rejected | expired). Only
/// `confirmed` applies the update; every terminal state purges the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub id: String,
    pub new_triple: KnowledgeTriple,
    /// The existing conflicting triple, if the update would overwrite one.
    pub existing_triple: Option<KnowledgeTriple>,
    /// Prompt shown to the user.
    pub confirmation_prompt: String,
    pub created_at: f64,
    pub expires_at: f64,
}

impl PendingUpdate {
    pub fn is_expired(&self, now: f64) -> bool {
        now > self.expires_at
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: History and Processing Outcomes
// ═══════════════════════════════════════════════════════════════════════════

/// One row of the knowledge change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHistoryEntry {
    pub id: String,
    pub triple_id: String,
    pub old_value: String,
    pub new_value: String,
    pub reason: String,
    pub confirmed: bool,
    pub contributor_id: String,
    pub session_id: String,
    pub ts: f64,
}

/// Outcome of processing one message through the knowledge pipeline.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Triples stored directly (no conflict, auto_store on).
    pub stored: Vec<KnowledgeTriple>,
    /// Updates held for user confirmation.
    pub pending: Vec<PendingUpdate>,
}

impl ProcessOutcome {
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Counters returned by the knowledge stats API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeStats {
    pub total_triples: usize,
    pub unique_subjects: usize,
    pub unique_predicates: usize,
    pub history_rows: usize,
    pub pending_updates: usize,
}

/// Knowledge layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Store conflict-free triples without confirmation.
    pub auto_store: bool,
    /// Run assistant messages through the same pipeline (as agent_inferred).
    pub extract_from_agent: bool,
    /// Seconds before a pending update expires.
    pub pending_ttl_seconds: f64,
    /// Minimum extraction confidence for the strict filter.
    pub min_confidence: f64,
    pub max_triples_per_message: usize,
    /// Maximum items returned for query-time context injection.
    pub max_context_items: usize,
    pub enable_cluster_expansion: bool,
    pub expansion_k: usize,
    pub expansion_weight: f64,
    pub min_score: f64,
    pub expansion_min_score: f64,
    /// Attribution for stored triples.
    pub contributor_id: String,
    pub session_id: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        use crate::atoms::constants;
        Self {
            auto_store: true,
            extract_from_agent: true,
            pending_ttl_seconds: constants::PENDING_TTL_SECONDS,
            min_confidence: constants::KNOWLEDGE_MIN_CONFIDENCE,
            max_triples_per_message: constants::KNOWLEDGE_MAX_TRIPLES_PER_MESSAGE,
            max_context_items: constants::KNOWLEDGE_MAX_CONTEXT_ITEMS,
            enable_cluster_expansion: true,
            expansion_k: constants::KNOWLEDGE_EXPANSION_K,
            expansion_weight: constants::KNOWLEDGE_EXPANSION_WEIGHT,
            min_score: constants::KNOWLEDGE_MIN_SCORE,
            expansion_min_score: constants::KNOWLEDGE_EXPANSION_MIN_SCORE,
            contributor_id: String::new(),
            session_id: String::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
