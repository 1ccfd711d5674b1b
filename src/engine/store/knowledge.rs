// ── Memory Store: Knowledge Triples (C11) ──────────────────────────────────
//
// Global triple persistence under UNIQUE(lower(subject), lower(predicate)),
// with versioned object updates and an append-only history log. A differing
// object behind an existing key is never an error here — it is the signal
// that launches the confirmation flow, so inserts report it as an outcome.

use super::embedding::{bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes};
use super::MemoryStore;
use crate::atoms::constants::KNOWLEDGE_MAX_PREVIOUS_VALUES;
use crate::atoms::error::MemoryResult;
use crate::atoms::knowledge_types::{
    KnowledgeHistoryEntry, KnowledgeSource, KnowledgeStats, KnowledgeTriple,
};
use crate::atoms::types::now_ts;
use log::warn;
use rusqlite::{params, OptionalExtension, Row};

/// Outcome of a triple insert attempt.
#[derive(Debug)]
pub enum TripleInsert {
    /// A new row was written.
    Inserted(String),
    /// The same fact already existed; its confidence was refreshed.
    Corroborated(String),
    /// An existing triple holds a different object for this key. Nothing
    /// was written — the caller must route through the confirmation flow.
    Conflicted(KnowledgeTriple),
}

impl MemoryStore {
    /// Insert a triple, honoring the global uniqueness constraint.
    ///
    /// Same (subject, predicate) with the same object corroborates the
    /// existing row (confidence takes the max). A different object yields
    /// `Conflicted` and writes nothing — silent overwrite is impossible at
    /// this layer.
    pub fn insert_triple(&self, triple: &KnowledgeTriple) -> MemoryResult<TripleInsert> {
        let conn = self.conn.lock();
        let subject_key = triple.subject.to_lowercase();
        let predicate_key = triple.predicate.to_lowercase();

        let existing = conn
            .prepare(
                "SELECT id, subject, predicate, object, confidence, source, version,
                        previous_values, contributor_id, session_id, embedding,
                        created_at, updated_at
                 FROM knowledge_triples
                 WHERE subject_key = ?1 AND predicate_key = ?2",
            )?
            .query_row(params![subject_key, predicate_key], Self::triple_from_row)
            .optional()?;

        if let Some(existing) = existing {
            if existing.object.to_lowercase() == triple.object.to_lowercase() {
                let confidence = existing.confidence.max(triple.confidence);
                conn.execute(
                    "UPDATE knowledge_triples SET confidence = ?2, updated_at = ?3 WHERE id = ?1",
                    params![existing.id, confidence, now_ts()],
                )?;
                return Ok(TripleInsert::Corroborated(existing.id));
            }
            warn!(
                "[knowledge] Insert blocked by existing ({}, {}) — confirmation required",
                existing.subject, existing.predicate
            );
            return Ok(TripleInsert::Conflicted(existing));
        }

        let embedding_bytes = if triple.vector.is_empty() {
            None
        } else {
            Some(f32_vec_to_bytes(&triple.vector))
        };
        conn.execute(
            "INSERT INTO knowledge_triples (
                id, subject, predicate, object, subject_key, predicate_key,
                confidence, source, version, previous_values,
                contributor_id, session_id, embedding, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                triple.id,
                triple.subject,
                triple.predicate,
                triple.object,
                subject_key,
                predicate_key,
                triple.confidence,
                triple.source.to_string(),
                triple.version,
                serde_json::to_string(&triple.previous_values)?,
                triple.contributor_id,
                triple.session_id,
                embedding_bytes,
                triple.created_at,
                triple.updated_at,
            ],
        )?;
        Ok(TripleInsert::Inserted(triple.id.clone()))
    }

    pub fn get_triple(&self, id: &str) -> MemoryResult<Option<KnowledgeTriple>> {
        let conn = self.conn.lock();
        let result = conn
            .prepare(
                "SELECT id, subject, predicate, object, confidence, source, version,
                        previous_values, contributor_id, session_id, embedding,
                        created_at, updated_at
                 FROM knowledge_triples WHERE id = ?1",
            )?
            .query_row(params![id], Self::triple_from_row)
            .optional()?;
        Ok(result)
    }

    /// Case-insensitive lookup by (subject, predicate).
    pub fn find_by_subject_predicate(
        &self,
        subject: &str,
        predicate: &str,
    ) -> MemoryResult<Option<KnowledgeTriple>> {
        let conn = self.conn.lock();
        let result = conn
            .prepare(
                "SELECT id, subject, predicate, object, confidence, source, version,
                        previous_values, contributor_id, session_id, embedding,
                        created_at, updated_at
                 FROM knowledge_triples
                 WHERE subject_key = ?1 AND predicate_key = ?2",
            )?
            .query_row(
                params![subject.to_lowercase(), predicate.to_lowercase()],
                Self::triple_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Existing triples that hold a different object for the same key.
    pub fn find_potential_conflicts(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> MemoryResult<Vec<KnowledgeTriple>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, subject, predicate, object, confidence, source, version,
                    previous_values, contributor_id, session_id, embedding,
                    created_at, updated_at
             FROM knowledge_triples
             WHERE subject_key = ?1 AND predicate_key = ?2
               AND LOWER(object) != LOWER(?3)",
        )?;
        let rows = stmt
            .query_map(
                params![subject.to_lowercase(), predicate.to_lowercase(), object],
                Self::triple_from_row,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Apply a confirmed object change: bump the version, prepend the old
    /// object to previous_values (bounded window), write the history row,
    /// and store the re-embedded vector if provided. One transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn update_triple_object(
        &self,
        triple_id: &str,
        new_object: &str,
        reason: &str,
        source: KnowledgeSource,
        confidence: f64,
        contributor_id: &str,
        session_id: &str,
        new_vector: Option<&[f32]>,
    ) -> MemoryResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_ts();

        let current: Option<(String, String)> = tx
            .prepare("SELECT object, previous_values FROM knowledge_triples WHERE id = ?1")?
            .query_row(params![triple_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;

        let (old_object, previous_json) = match current {
            Some(pair) => pair,
            None => return Ok(false),
        };

        let mut previous: Vec<String> =
            serde_json::from_str(&previous_json).unwrap_or_default();
        previous.insert(0, old_object.clone());
        previous.truncate(KNOWLEDGE_MAX_PREVIOUS_VALUES);

        let embedding_bytes = new_vector.map(f32_vec_to_bytes);
        if let Some(bytes) = &embedding_bytes {
            tx.execute(
                "UPDATE knowledge_triples
                 SET object = ?2, confidence = ?3, source = ?4,
                     version = version + 1, previous_values = ?5,
                     embedding = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    triple_id,
                    new_object,
                    confidence,
                    source.to_string(),
                    serde_json::to_string(&previous)?,
                    bytes,
                    now,
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE knowledge_triples
                 SET object = ?2, confidence = ?3, source = ?4,
                     version = version + 1, previous_values = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    triple_id,
                    new_object,
                    confidence,
                    source.to_string(),
                    serde_json::to_string(&previous)?,
                    now,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO knowledge_history
                (id, triple_id, old_value, new_value, reason, confirmed,
                 contributor_id, session_id, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                triple_id,
                old_object,
                new_object,
                reason,
                contributor_id,
                session_id,
                now,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Store or replace a triple's embedding.
    pub fn update_triple_vector(&self, triple_id: &str, vector: &[f32]) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE knowledge_triples SET embedding = ?2 WHERE id = ?1",
            params![triple_id, f32_vec_to_bytes(vector)],
        )?;
        Ok(())
    }

    /// Cosine search over triple embeddings (global — no scope filter).
    pub fn search_triples_by_vector(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f64,
    ) -> MemoryResult<Vec<(KnowledgeTriple, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, subject, predicate, object, confidence, source, version,
                    previous_values, contributor_id, session_id, embedding,
                    created_at, updated_at
             FROM knowledge_triples WHERE embedding IS NOT NULL",
        )?;

        let mut scored: Vec<(KnowledgeTriple, f64)> = stmt
            .query_map([], Self::triple_from_row)?
            .filter_map(|r| r.ok())
            .map(|t| {
                let sim = cosine_similarity(&t.vector, query);
                (t, sim)
            })
            .filter(|(_, sim)| *sim >= min_score)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn triple_history(&self, triple_id: &str) -> MemoryResult<Vec<KnowledgeHistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, triple_id, old_value, new_value, reason, confirmed,
                    contributor_id, session_id, ts
             FROM knowledge_history WHERE triple_id = ?1
             ORDER BY ts DESC",
        )?;
        let rows = stmt
            .query_map(params![triple_id], |row| {
                let confirmed: i64 = row.get(5)?;
                Ok(KnowledgeHistoryEntry {
                    id: row.get(0)?,
                    triple_id: row.get(1)?,
                    old_value: row.get(2)?,
                    new_value: row.get(3)?,
                    reason: row.get(4)?,
                    confirmed: confirmed != 0,
                    contributor_id: row.get(6)?,
                    session_id: row.get(7)?,
                    ts: row.get(8)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Global knowledge counters. Pending updates are counted by the engine
    /// layer — the store knows nothing about the in-flight map.
    pub fn knowledge_stats(&self) -> MemoryResult<KnowledgeStats> {
        let conn = self.conn.lock();
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM knowledge_triples", [], |r| r.get(0))?;
        let subjects: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT subject_key) FROM knowledge_triples",
            [],
            |r| r.get(0),
        )?;
        let predicates: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT predicate_key) FROM knowledge_triples",
            [],
            |r| r.get(0),
        )?;
        let history: i64 =
            conn.query_row("SELECT COUNT(*) FROM knowledge_history", [], |r| r.get(0))?;

        Ok(KnowledgeStats {
            total_triples: total as usize,
            unique_subjects: subjects as usize,
            unique_predicates: predicates as usize,
            history_rows: history as usize,
            pending_updates: 0,
        })
    }

    /// Administrative reset — removes all triples and history.
    pub fn clear_knowledge(&self) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM knowledge_triples", [])?;
        conn.execute("DELETE FROM knowledge_history", [])?;
        Ok(())
    }

    fn triple_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeTriple> {
        let previous_json: String = row.get(7)?;
        let source_str: String = row.get(5)?;
        let embedding: Option<Vec<u8>> = row.get(10)?;
        Ok(KnowledgeTriple {
            id: row.get(0)?,
            subject: row.get(1)?,
            predicate: row.get(2)?,
            object: row.get(3)?,
            confidence: row.get(4)?,
            source: source_str.parse().unwrap_or(KnowledgeSource::Conversation),
            version: row.get::<_, i64>(6)? as u32,
            previous_values: serde_json::from_str(&previous_json).unwrap_or_default(),
            contributor_id: row.get(8)?,
            session_id: row.get(9)?,
            vector: embedding.map(|b| bytes_to_f32_vec(&b)).unwrap_or_default(),
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_triple(subject: &str, predicate: &str, object: &str) -> KnowledgeTriple {
        KnowledgeTriple::new(subject, predicate, object, 0.9)
    }

    #[test]
    fn insert_then_lookup_case_insensitive() {
        let store = MemoryStore::open_in_memory().unwrap();
        let t = make_triple("GPT-4", "context_window", "32k");
        assert!(matches!(store.insert_triple(&t).unwrap(), TripleInsert::Inserted(_)));

        let found = store.find_by_subject_predicate("gpt-4", "CONTEXT_WINDOW").unwrap();
        assert_eq!(found.unwrap().object, "32k");
    }

    #[test]
    fn same_fact_corroborates_instead_of_duplicating() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.insert_triple(&make_triple("Rust", "created_by", "Graydon Hoare")).unwrap();

        let mut again = make_triple("rust", "created_by", "graydon hoare");
        again.confidence = 0.95;
        let outcome = store.insert_triple(&again).unwrap();
        assert!(matches!(outcome, TripleInsert::Corroborated(_)));

        let stats = store.knowledge_stats().unwrap();
        assert_eq!(stats.total_triples, 1);
        let stored = store.find_by_subject_predicate("Rust", "created_by").unwrap().unwrap();
        assert!((stored.confidence - 0.95).abs() < 1e-9);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn differing_object_reports_conflict_and_writes_nothing() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.insert_triple(&make_triple("GPT-4", "context_window", "32k")).unwrap();

        let outcome = store.insert_triple(&make_triple("GPT-4", "context_window", "128k")).unwrap();
        match outcome {
            TripleInsert::Conflicted(existing) => assert_eq!(existing.object, "32k"),
            other => panic!("expected conflict, got {:?}", other),
        }

        let stored = store.find_by_subject_predicate("GPT-4", "context_window").unwrap().unwrap();
        assert_eq!(stored.object, "32k");
    }

    #[test]
    fn update_bumps_version_prepends_previous_and_logs_history() {
        let store = MemoryStore::open_in_memory().unwrap();
        let t = make_triple("GPT-4", "context_window", "32k");
        store.insert_triple(&t).unwrap();

        let ok = store
            .update_triple_object(
                &t.id,
                "128k",
                "user_confirmed",
                KnowledgeSource::UserVerified,
                1.0,
                "alice",
                "sess-1",
                None,
            )
            .unwrap();
        assert!(ok);

        let updated = store.get_triple(&t.id).unwrap().unwrap();
        assert_eq!(updated.object, "128k");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.previous_values, vec!["32k".to_string()]);
        assert_eq!(updated.source, KnowledgeSource::UserVerified);

        let history = store.triple_history(&t.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_value, "32k");
        assert_eq!(history[0].new_value, "128k");
        assert!(history[0].confirmed);
        assert_eq!(history[0].reason, "user_confirmed");
        assert_eq!(updated.version as usize, updated.previous_values.len() + 1);
    }

    #[test]
    fn update_keeps_previous_values_newest_first() {
        let store = MemoryStore::open_in_memory().unwrap();
        let t = make_triple("GPT-4", "context_window", "8k");
        store.insert_triple(&t).unwrap();

        for object in ["32k", "128k"] {
            store
                .update_triple_object(
                    &t.id,
                    object,
                    "user_confirmed",
                    KnowledgeSource::UserVerified,
                    1.0,
                    "",
                    "",
                    None,
                )
                .unwrap();
        }

        let updated = store.get_triple(&t.id).unwrap().unwrap();
        assert_eq!(updated.object, "128k");
        assert_eq!(updated.version, 3);
        assert_eq!(updated.previous_values, vec!["32k".to_string(), "8k".to_string()]);
        assert_eq!(store.triple_history(&t.id).unwrap().len(), 2);
    }

    #[test]
    fn update_of_missing_triple_is_a_no_op() {
        let store = MemoryStore::open_in_memory().unwrap();
        let ok = store
            .update_triple_object(
                "missing",
                "x",
                "r",
                KnowledgeSource::UserVerified,
                1.0,
                "",
                "",
                None,
            )
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn vector_search_honors_min_score() {
        let store = MemoryStore::open_in_memory().unwrap();
        let mut a = make_triple("A", "p", "1");
        a.vector = vec![1.0, 0.0];
        let mut b = make_triple("B", "p", "2");
        b.vector = vec![0.0, 1.0];
        store.insert_triple(&a).unwrap();
        store.insert_triple(&b).unwrap();

        let hits = store.search_triples_by_vector(&[1.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.subject, "A");
    }

    #[test]
    fn stats_count_distinct_keys() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.insert_triple(&make_triple("A", "p1", "x")).unwrap();
        store.insert_triple(&make_triple("A", "p2", "y")).unwrap();
        store.insert_triple(&make_triple("B", "p1", "z")).unwrap();

        let stats = store.knowledge_stats().unwrap();
        assert_eq!(stats.total_triples, 3);
        assert_eq!(stats.unique_subjects, 2);
        assert_eq!(stats.unique_predicates, 2);
    }
}
