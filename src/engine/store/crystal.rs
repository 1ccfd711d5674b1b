// ── Memory Store: Crystal (C6/L3) ──────────────────────────────────────────
//
// Consolidated facts and persisted graph links. Links are the durable twin
// of the in-memory graph: every link added to the graph is mirrored here
// within the same ingest (or by the reconciler after a transient failure),
// and the graph is rehydrated from this table on startup.

use super::MemoryStore;
use crate::atoms::error::MemoryResult;
use crate::atoms::types::{CrystalFact, Link, LinkType};
use rusqlite::{params, OptionalExtension, Row};

impl MemoryStore {
    // ── Facts ──────────────────────────────────────────────────────────

    /// Store a consolidated fact.
    pub fn insert_fact(&self, fact: &CrystalFact) -> MemoryResult<()> {
        let conn = self.conn.lock();
        let sources_json = serde_json::to_string(&fact.source_node_ids)?;
        let metadata_json = if fact.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&fact.metadata)?)
        };

        conn.execute(
            "INSERT OR REPLACE INTO crystal_facts
                (id, scope, content, source_node_ids, confidence, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fact.id,
                fact.scope,
                fact.content,
                sources_json,
                fact.confidence,
                fact.created_at,
                fact.updated_at,
                metadata_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_fact(&self, id: &str) -> MemoryResult<Option<CrystalFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scope, content, source_node_ids, confidence, created_at, updated_at, metadata
             FROM crystal_facts WHERE id = ?1",
        )?;
        let result = stmt.query_row(params![id], Self::fact_from_row).optional()?;
        Ok(result)
    }

    /// Most recent facts for a scope.
    pub fn facts_for_scope(&self, scope: &str, limit: usize) -> MemoryResult<Vec<CrystalFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scope, content, source_node_ids, confidence, created_at, updated_at, metadata
             FROM crystal_facts WHERE scope = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let facts = stmt
            .query_map(params![scope, limit as i64], Self::fact_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    pub fn count_facts(&self, scope: &str) -> MemoryResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM crystal_facts WHERE scope = ?1",
            params![scope],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Links ──────────────────────────────────────────────────────────

    /// Persist a link. Idempotent on (scope, source, target, type):
    /// returns true when a new row was written, false when the identity
    /// already existed.
    pub fn insert_link(&self, link: &Link) -> MemoryResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO crystal_links
                (id, scope, source_id, target_id, link_type, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::new_v4().to_string(),
                link.scope,
                link.source_id,
                link.target_id,
                link.link_type.to_string(),
                link.weight,
                link.created_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// All persisted links for a scope — the graph rehydration source.
    pub fn links_for_scope(&self, scope: &str) -> MemoryResult<Vec<Link>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT scope, source_id, target_id, link_type, weight, created_at
             FROM crystal_links WHERE scope = ?1",
        )?;
        let links = stmt
            .query_map(params![scope], Self::link_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(links)
    }

    pub fn count_links(&self, scope: &str) -> MemoryResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM crystal_links WHERE scope = ?1",
            params![scope],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Row mapping ────────────────────────────────────────────────────

    fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<CrystalFact> {
        let sources_json: String = row.get(3)?;
        let metadata_json: Option<String> = row.get(7)?;
        Ok(CrystalFact {
            id: row.get(0)?,
            scope: row.get(1)?,
            content: row.get(2)?,
            source_node_ids: serde_json::from_str(&sources_json).unwrap_or_default(),
            confidence: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            metadata: metadata_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
        })
    }

    fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
        let type_str: String = row.get(3)?;
        Ok(Link {
            scope: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            link_type: type_str.parse().unwrap_or(LinkType::Semantic),
            weight: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
