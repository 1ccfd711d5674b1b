// ── Memory Store: Database Schema ──────────────────────────────────────────
//
// Tables:
//   - biem_memories:     the L2 vector index (C4) — one row per node, with
//                        the embedding as an f32 LE BLOB and scalar filters
//   - crystal_facts:     consolidated L3 facts
//   - crystal_links:     persisted graph links, UNIQUE per (scope, src, tgt, type)
//   - knowledge_triples: global triple store, UNIQUE per lowercased (subject, predicate)
//   - knowledge_history: append-only change log for triples
//
// Called once at open. All statements are idempotent (CREATE IF NOT EXISTS);
// adding a new column later means appending an ALTER TABLE with a silently
// swallowed error — never editing existing SQL.

use crate::atoms::error::MemoryResult;
use log::info;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> MemoryResult<()> {
    info!("[store] Running schema migrations");

    conn.execute_batch(SCHEMA)?;

    info!("[store] Schema migrations complete");
    Ok(())
}

const SCHEMA: &str = "
    -- ═══════════════════════════════════════════════════════════════
    -- Memory nodes (C4: the durable vector index)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS biem_memories (
        id TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        content TEXT NOT NULL,

        -- Embedding (f32 array serialized as little-endian BLOB)
        embedding BLOB,
        dim INTEGER NOT NULL DEFAULT 0,

        -- Energy state
        energy REAL NOT NULL DEFAULT 1.0,
        initial_energy REAL NOT NULL DEFAULT 1.0,
        tier TEXT NOT NULL DEFAULT 'L2',

        -- Encoder side-information
        sentiment REAL NOT NULL DEFAULT 0.0,
        source TEXT NOT NULL DEFAULT '',
        entities TEXT NOT NULL DEFAULT '[]',
        degraded INTEGER NOT NULL DEFAULT 0,

        -- Temporal
        created_at REAL NOT NULL,
        last_accessed REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_memories_scope
        ON biem_memories(scope);
    CREATE INDEX IF NOT EXISTS idx_memories_scope_tier
        ON biem_memories(scope, tier);
    CREATE INDEX IF NOT EXISTS idx_memories_created
        ON biem_memories(scope, created_at DESC);

    -- ═══════════════════════════════════════════════════════════════
    -- Crystal facts (C6/L3: consolidated knowledge)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS crystal_facts (
        id TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        content TEXT NOT NULL,
        source_node_ids TEXT NOT NULL DEFAULT '[]',
        confidence REAL NOT NULL DEFAULT 1.0,
        created_at REAL NOT NULL,
        updated_at REAL NOT NULL,
        metadata TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_facts_scope
        ON crystal_facts(scope, created_at DESC);

    -- ═══════════════════════════════════════════════════════════════
    -- Crystal links (C6: persisted association graph)
    -- The in-memory graph is rehydrated from here at startup.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS crystal_links (
        id TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        link_type TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 1.0,
        created_at REAL NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_links_identity
        ON crystal_links(scope, source_id, target_id, link_type);
    CREATE INDEX IF NOT EXISTS idx_links_scope
        ON crystal_links(scope);
    CREATE INDEX IF NOT EXISTS idx_links_source
        ON crystal_links(source_id);

    -- ═══════════════════════════════════════════════════════════════
    -- Knowledge triples (C11: GLOBAL — no scope column is consulted)
    -- subject_key / predicate_key hold the lowercased forms so the
    -- uniqueness constraint is case-insensitive.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS knowledge_triples (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object TEXT NOT NULL,
        subject_key TEXT NOT NULL,
        predicate_key TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0.8,
        source TEXT NOT NULL DEFAULT 'conversation',
        version INTEGER NOT NULL DEFAULT 1,
        previous_values TEXT NOT NULL DEFAULT '[]',
        contributor_id TEXT NOT NULL DEFAULT '',
        session_id TEXT NOT NULL DEFAULT '',
        embedding BLOB,
        created_at REAL NOT NULL,
        updated_at REAL NOT NULL,

        UNIQUE(subject_key, predicate_key)
    );

    CREATE INDEX IF NOT EXISTS idx_triples_subject
        ON knowledge_triples(subject_key);
    CREATE INDEX IF NOT EXISTS idx_triples_predicate
        ON knowledge_triples(predicate_key);
    CREATE INDEX IF NOT EXISTS idx_triples_updated
        ON knowledge_triples(updated_at DESC);

    -- ═══════════════════════════════════════════════════════════════
    -- Knowledge history (append-only)
    -- One row per object transition; version − 1 rows exist per triple.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS knowledge_history (
        id TEXT PRIMARY KEY,
        triple_id TEXT NOT NULL,
        old_value TEXT NOT NULL,
        new_value TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        confirmed INTEGER NOT NULL DEFAULT 0,
        contributor_id TEXT NOT NULL DEFAULT '',
        session_id TEXT NOT NULL DEFAULT '',
        ts REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_triple
        ON knowledge_history(triple_id, ts DESC);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (
                    'biem_memories', 'crystal_facts', 'crystal_links',
                    'knowledge_triples', 'knowledge_history')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn link_identity_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT OR IGNORE INTO crystal_links
            (id, scope, source_id, target_id, link_type, weight, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
        conn.execute(insert, rusqlite::params!["l1", "s", "a", "b", "semantic", 0.9, 0.0])
            .unwrap();
        conn.execute(insert, rusqlite::params!["l2", "s", "a", "b", "semantic", 0.8, 1.0])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM crystal_links", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
