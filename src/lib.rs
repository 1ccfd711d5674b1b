// BIEM — Bio-Inspired Evolving Memory engine.
//
// A tiered memory substrate for long-running conversational agents:
// text fragments persist with dense vector embeddings, an association
// graph links them, energy decays over time and drives promotion between
// an in-process working set (L1), a durable vector index + graph (L2),
// and consolidated relational facts (L3). Recall runs in two stages —
// vector-similarity seeding, then graph spreading activation — and a
// global knowledge triple store layers conflict-checked (subject,
// predicate, object) facts with a user-confirmation update flow on the
// same substrate.
//
// Entry points:
//   • `MemoryStore::open` — the shared SQLite persistence
//   • `MemoryManager::new` — the per-scope memory API (ingest / recall /
//     feedback / record_causal / stats)
//   • `KnowledgeEngine::new` — the global knowledge API (process /
//     confirm / query / stats)
//   • `BackgroundTasks::spawn` — maintenance, consolidation, pending
//     sweep, and link reconciliation loops
//
// Lifecycle: open the store, build the managers (the graph rehydrates
// from crystal_links), spawn the background tasks, and call
// `BackgroundTasks::shutdown` on the way out.

pub mod atoms;
pub mod engine;

pub use atoms::error::{MemoryError, MemoryResult};
pub use atoms::knowledge_types::{
    ExtractionResult, KnowledgeConfig, KnowledgeHistoryEntry, KnowledgeIntent, KnowledgeSource,
    KnowledgeStats, KnowledgeTriple, PendingUpdate, ProcessOutcome, TripleConflict,
};
pub use atoms::types::{
    ConflictConfig, ConflictReport, CrystalFact, EnergyConfig, Link, LinkType, MemoryConfig,
    MemoryNode, MemoryStats, MemoryTier, NodeMetadata, RecallConfig, RouterConfig, TierConfig,
    VectorFilter, WorkingSetConfig,
};
pub use engine::knowledge::KnowledgeEngine;
pub use engine::manager::MemoryManager;
pub use engine::providers::{
    EmbeddingProvider, HttpEmbeddingClient, HttpLlmClient, LlmProvider,
};
pub use engine::store::MemoryStore;
pub use engine::tasks::{BackgroundTasks, TaskConfig};
