// ── L1 WorkingSet (C3) ─────────────────────────────────────────────────────
//
// The in-process hot cache: a bounded map from node id to MemoryNode for a
// single scope. Admission requires energy ≥ 0.5; overflowing the capacity
// evicts exactly one node — the lowest-energy one. Eviction only removes
// from this set, it never destroys the node in the vector index.
//
// NOT internally synchronized. The owner wraps it in the per-scope lock.

use crate::atoms::types::{MemoryNode, WorkingSetConfig};
use std::collections::HashMap;

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// Node energy below the admission threshold; nothing stored.
    Rejected,
    /// Stored; if capacity overflowed, the displaced lowest-energy node.
    Admitted { evicted: Option<MemoryNode> },
}

pub struct WorkingSet {
    config: WorkingSetConfig,
    nodes: HashMap<String, MemoryNode>,
}

impl WorkingSet {
    pub fn new(config: WorkingSetConfig) -> Self {
        Self { config, nodes: HashMap::new() }
    }

    /// Energy required for admission.
    pub fn admission_energy(&self) -> f64 {
        self.config.admission_energy
    }

    /// Admit a node. Replacing an existing id never triggers eviction.
    pub fn put(&mut self, node: MemoryNode) -> Admission {
        if node.energy < self.config.admission_energy {
            return Admission::Rejected;
        }

        self.nodes.insert(node.id.clone(), node);

        let evicted = if self.nodes.len() > self.config.max_nodes {
            self.evict_lowest_energy()
        } else {
            None
        };
        Admission::Admitted { evicted }
    }

    /// Retrieve a node and mark it accessed.
    pub fn get(&mut self, id: &str, now: f64) -> Option<&mut MemoryNode> {
        let node = self.nodes.get_mut(id)?;
        node.touch(now);
        Some(node)
    }

    /// Read without touching (scans, stats).
    pub fn peek(&self, id: &str) -> Option<&MemoryNode> {
        self.nodes.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryNode> {
        self.nodes.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids sorted by energy ascending (eviction order).
    pub fn ids_by_energy_asc(&self) -> Vec<String> {
        let mut entries: Vec<(&String, f64)> =
            self.nodes.iter().map(|(id, n)| (id, n.energy)).collect();
        entries.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Top-k nodes by energy descending — the recall fallback when the
    /// query cannot be embedded.
    pub fn top_k_by_energy(&self, k: usize) -> Vec<MemoryNode> {
        let mut nodes: Vec<MemoryNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| {
            b.energy
                .partial_cmp(&a.energy)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes.truncate(k);
        nodes
    }

    /// Cloned view of every resident node, for maintenance scans.
    pub fn snapshot(&self) -> Vec<MemoryNode> {
        self.nodes.values().cloned().collect()
    }

    /// Ids whose stored energy has dropped below the scan floor or whose
    /// last access is older than the TTL. Lazy: called by the maintenance
    /// sweep, which then removes them.
    pub fn expired_ids(&self, now: f64) -> Vec<String> {
        let cutoff = now - self.config.ttl_seconds;
        self.nodes
            .iter()
            .filter(|(_, n)| n.energy < self.config.min_energy || n.last_accessed < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn evict_lowest_energy(&mut self) -> Option<MemoryNode> {
        let victim = self
            .nodes
            .values()
            .min_by(|a, b| {
                a.energy
                    .partial_cmp(&b.energy)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            })?
            .id
            .clone();
        self.nodes.remove(&victim)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
