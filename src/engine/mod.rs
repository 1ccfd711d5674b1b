// BIEM Engine — behavior layer over the atoms types.
//
// Module layout:
//   providers   — EmbeddingProvider / LlmProvider traits + HTTP clients
//   store       — SQLite persistence: node index, crystal, knowledge
//   encoder     — C1: embedding + entities + sentiment
//   energy      — C2: initial energy, decay, boosts
//   working_set — C3: bounded per-scope hot cache
//   graph       — C5: association graph + spreading activation
//   router      — C7: temporal / semantic link creation
//   conflict    — C8: LLM-arbitrated contradiction surfacing
//   tier        — C9: tier transitions + consolidation
//   manager     — C10: the memory API (ingest / recall / feedback / stats)
//   knowledge   — C11–C13: global triple store, pipeline, retrieval
//   tasks       — periodic maintenance loops

pub mod conflict;
pub mod encoder;
pub mod energy;
pub mod graph;
pub mod knowledge;
pub mod manager;
pub mod providers;
pub mod router;
pub mod store;
pub mod tasks;
pub mod tier;
pub mod working_set;
