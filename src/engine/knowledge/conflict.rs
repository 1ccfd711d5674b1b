// ── Knowledge Conflict Detection and Confirmation (C12) ────────────────────
//
// Conflict detection is deterministic here: an existing triple with the
// same (subject, predicate) but a different object is a value_change
// conflict. A detected conflict never overwrites silently — it becomes a
// PendingUpdate that waits for an explicit user decision inside a bounded
// window. Expired updates are treated as rejected and purged.

use crate::atoms::knowledge_types::{KnowledgeTriple, PendingUpdate, TripleConflict};
use crate::atoms::types::now_ts;
use crate::engine::store::MemoryStore;
use crate::atoms::error::MemoryResult;
use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Detect a value-change conflict for one incoming triple.
pub fn detect_conflict(
    store: &MemoryStore,
    incoming: &KnowledgeTriple,
) -> MemoryResult<Option<TripleConflict>> {
    let conflicts =
        store.find_potential_conflicts(&incoming.subject, &incoming.predicate, &incoming.object)?;

    Ok(conflicts.into_iter().next().map(|existing| {
        let suggestion = confirmation_prompt(&existing, incoming);
        TripleConflict {
            existing,
            incoming: incoming.clone(),
            conflict_type: "value_change".to_string(),
            suggestion,
        }
    }))
}

/// The prompt shown to the user when a conflicting update needs a decision.
pub fn confirmation_prompt(existing: &KnowledgeTriple, incoming: &KnowledgeTriple) -> String {
    let display_predicate = existing.predicate.replace('_', " ");
    format!(
        "I have recorded that **{}**'s {} is **{}**.\n\nYou mentioned **{}**. Has this information been updated?",
        existing.subject, display_predicate, existing.object, incoming.object
    )
}

/// Holds PendingUpdates between detection and the user's decision.
/// Expiry is enforced on every read and by the periodic sweep.
pub struct ConfirmationManager {
    ttl_seconds: f64,
    pending: Arc<Mutex<HashMap<String, PendingUpdate>>>,
}

impl ConfirmationManager {
    pub fn new(ttl_seconds: f64) -> Self {
        Self { ttl_seconds, pending: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register a conflict as a pending update and return it for surfacing.
    pub fn add_pending(&self, conflict: &TripleConflict, now: f64) -> PendingUpdate {
        let update = PendingUpdate {
            id: uuid::Uuid::new_v4().to_string(),
            new_triple: conflict.incoming.clone(),
            existing_triple: Some(conflict.existing.clone()),
            confirmation_prompt: conflict.suggestion.clone(),
            created_at: now,
            expires_at: now + self.ttl_seconds,
        };
        self.pending.lock().insert(update.id.clone(), update.clone());
        info!(
            "[knowledge] Pending update {} for ({}, {})",
            update.id, update.new_triple.subject, update.new_triple.predicate
        );
        update
    }

    /// Take a pending update for a terminal decision. An expired record is
    /// purged and treated as rejected (returns None). The first terminal
    /// transition is final: the record leaves the map here, so a second
    /// confirm or reject of the same id finds nothing.
    pub fn take(&self, pending_id: &str, now: f64) -> Option<PendingUpdate> {
        let mut pending = self.pending.lock();
        let update = pending.remove(pending_id)?;
        if update.is_expired(now) {
            info!("[knowledge] Pending update {} expired — treated as rejected", pending_id);
            return None;
        }
        Some(update)
    }

    /// Live pending updates, purging expired ones on the way.
    pub fn list(&self, now: f64) -> Vec<PendingUpdate> {
        let mut pending = self.pending.lock();
        pending.retain(|_, u| !u.is_expired(now));
        let mut live: Vec<PendingUpdate> = pending.values().cloned().collect();
        live.sort_by(|a, b| {
            a.created_at.partial_cmp(&b.created_at).unwrap_or(std::cmp::Ordering::Equal)
        });
        live
    }

    /// Purge expired records. Returns how many were dropped.
    pub fn sweep_expired(&self, now: f64) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, u| !u.is_expired(now));
        let dropped = before - pending.len();
        if dropped > 0 {
            info!("[knowledge] Swept {} expired pending update(s)", dropped);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
