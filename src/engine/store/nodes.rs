// ── Memory Store: Node Index (C4) ──────────────────────────────────────────
//
// Low-level CRUD and filtered cosine search over biem_memories.
// All methods follow the store pattern: &self, lock conn, rusqlite params.
// The scope filter is mandatory on every search — a query can never cross
// scope boundaries.

use super::embedding::{bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes};
use super::MemoryStore;
use crate::atoms::error::MemoryResult;
use crate::atoms::types::{MemoryNode, MemoryTier, NodeMetadata, VectorFilter};
use rusqlite::{params, OptionalExtension, Row};

impl MemoryStore {
    /// Upsert a node by id. Fully replaces mutable scalars.
    pub fn upsert_node(&self, node: &MemoryNode) -> MemoryResult<()> {
        let conn = self.conn.lock();
        let embedding_bytes = if node.vector.is_empty() {
            None
        } else {
            Some(f32_vec_to_bytes(&node.vector))
        };
        let entities_json = serde_json::to_string(&node.metadata.entities)?;

        conn.execute(
            "INSERT OR REPLACE INTO biem_memories (
                id, scope, content, embedding, dim,
                energy, initial_energy, tier,
                sentiment, source, entities, degraded,
                created_at, last_accessed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                node.id,
                node.scope,
                node.content,
                embedding_bytes,
                node.vector.len() as i64,
                node.energy,
                node.initial_energy,
                node.tier.to_string(),
                node.metadata.sentiment,
                node.metadata.source,
                entities_json,
                node.metadata.degraded as i64,
                node.created_at,
                node.last_accessed,
            ],
        )?;

        Ok(())
    }

    /// Exact fetch by id.
    pub fn get_node(&self, id: &str) -> MemoryResult<Option<MemoryNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scope, content, embedding, energy, initial_energy, tier,
                    sentiment, source, entities, degraded, created_at, last_accessed
             FROM biem_memories WHERE id = ?1",
        )?;

        let result = stmt.query_row(params![id], Self::node_from_row).optional()?;
        Ok(result)
    }

    /// Delete a node by id. For administrative reset only — the engine never
    /// destroys nodes during normal operation.
    pub fn delete_node(&self, id: &str) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM biem_memories WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Persist an energy change together with its access timestamp.
    /// Energy and last_accessed always move together.
    pub fn update_node_energy(
        &self,
        id: &str,
        energy: f64,
        last_accessed: f64,
    ) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE biem_memories SET energy = ?2, last_accessed = ?3 WHERE id = ?1",
            params![id, energy, last_accessed],
        )?;
        Ok(())
    }

    /// Record a tier transition.
    pub fn set_node_tier(&self, id: &str, tier: MemoryTier) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE biem_memories SET tier = ?2 WHERE id = ?1",
            params![id, tier.to_string()],
        )?;
        Ok(())
    }

    /// Cosine similarity search within a scope, with optional scalar
    /// filters. Degraded nodes (zero vectors) are skipped unless the filter
    /// explicitly includes them — and even then they score 0.
    pub fn search_nodes_by_vector(
        &self,
        scope: &str,
        query: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> MemoryResult<Vec<(MemoryNode, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scope, content, embedding, energy, initial_energy, tier,
                    sentiment, source, entities, degraded, created_at, last_accessed
             FROM biem_memories
             WHERE scope = ?1 AND embedding IS NOT NULL",
        )?;

        let mut scored: Vec<(MemoryNode, f64)> = stmt
            .query_map(params![scope], Self::node_from_row)?
            .filter_map(|r| r.ok())
            .filter(|node| filter.include_degraded || !node.metadata.degraded)
            .filter(|node| filter.tier.map_or(true, |t| node.tier == t))
            .filter(|node| filter.min_energy.map_or(true, |e| node.energy >= e))
            .filter(|node| filter.created_after.map_or(true, |t| node.created_at >= t))
            .filter(|node| filter.created_before.map_or(true, |t| node.created_at <= t))
            .map(|node| {
                let sim = cosine_similarity(&node.vector, query);
                (node, sim)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored)
    }

    /// Node counts per tier for one scope: (l1, l2).
    pub fn count_nodes_by_tier(&self, scope: &str) -> MemoryResult<(usize, usize)> {
        let conn = self.conn.lock();
        let l1: i64 = conn.query_row(
            "SELECT COUNT(*) FROM biem_memories WHERE scope = ?1 AND tier = 'L1'",
            params![scope],
            |r| r.get(0),
        )?;
        let l2: i64 = conn.query_row(
            "SELECT COUNT(*) FROM biem_memories WHERE scope = ?1 AND tier = 'L2'",
            params![scope],
            |r| r.get(0),
        )?;
        Ok((l1 as usize, l2 as usize))
    }

    fn node_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryNode> {
        let embedding: Option<Vec<u8>> = row.get(3)?;
        let tier_str: String = row.get(6)?;
        let entities_json: String = row.get(9)?;
        let degraded: i64 = row.get(10)?;

        Ok(MemoryNode {
            id: row.get(0)?,
            scope: row.get(1)?,
            content: row.get(2)?,
            vector: embedding.map(|b| bytes_to_f32_vec(&b)).unwrap_or_default(),
            metadata: NodeMetadata {
                entities: serde_json::from_str(&entities_json).unwrap_or_default(),
                sentiment: row.get(7)?,
                source: row.get(8)?,
                degraded: degraded != 0,
            },
            energy: row.get(4)?,
            initial_energy: row.get(5)?,
            tier: tier_str.parse().unwrap_or(MemoryTier::L2),
            created_at: row.get(11)?,
            last_accessed: row.get(12)?,
        })
    }
}
