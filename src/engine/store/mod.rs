// BIEM — Memory Store
// All durable state lives in one SQLite database accessed via rusqlite.
// Independent of any front-end — the engine owns its connection outright.
//
// Module layout:
//   schema    — idempotent table creation and migrations
//   nodes     — biem_memories vector index (C4): upsert, get, filtered cosine search
//   crystal   — crystal_facts + crystal_links (C6/L3)
//   knowledge — knowledge_triples + knowledge_history (C11), triple-vector search
//   embedding — bytes_to_f32_vec, f32_vec_to_bytes, cosine_similarity

use crate::atoms::error::MemoryResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

pub(crate) mod embedding;
mod crystal;
mod knowledge;
mod nodes;
mod schema;

pub use embedding::{cosine_similarity, f32_vec_to_bytes};
pub use knowledge::TripleInsert;

/// Thread-safe database wrapper. The connection mutex is held only for the
/// duration of a synchronous statement batch, never across await points.
pub struct MemoryStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` for integration tests that need raw inspection.
    pub conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the database at `path` and initialize tables.
    pub fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        info!("[store] Opening memory store at {:?}", path);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        schema::run_migrations(&conn)?;

        Ok(MemoryStore { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database with the full schema. Used by tests.
    pub fn open_in_memory() -> MemoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(MemoryStore { conn: Mutex::new(conn) })
    }
}

/// Initialise an already-open connection with the full schema.
/// Used by integration tests that construct their own connections.
pub fn schema_for_testing(conn: &Connection) {
    schema::run_migrations(conn).expect("schema_for_testing: migrations failed");
}
