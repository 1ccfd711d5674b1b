// ── AssociationRouter (C7) ─────────────────────────────────────────────────
//
// Computes the links a newly ingested node should carry:
//   • temporal pairs to the most recently ingested nodes within the window,
//     weight 1.0, both directions
//   • semantic pairs to vector-index neighbours above the similarity
//     threshold, weight = similarity, both directions
//
// Causal links are never created here — only the explicit causal API
// produces them. The router is pure link computation; the manager adds the
// links to the graph under the scope lock and persists them to the store.
//
// NOT internally synchronized. The owner wraps it in a mutex.

use crate::atoms::types::{Link, LinkType, MemoryNode, RouterConfig};
use crate::engine::store::cosine_similarity;
use std::collections::VecDeque;

/// Ring capacity for recently ingested nodes — comfortably above the
/// temporal fan-out so the window filter sees every candidate.
const MAX_RECENT: usize = 50;

pub struct AssociationRouter {
    config: RouterConfig,
    scope: String,
    /// (node_id, ingest timestamp), most recent at the back.
    recent: VecDeque<(String, f64)>,
}

impl AssociationRouter {
    pub fn new(scope: &str, config: RouterConfig) -> Self {
        Self { config, scope: scope.to_string(), recent: VecDeque::new() }
    }

    /// Compute the link set for a new node and record it in the recency
    /// ring. `neighbours` are the vector-index hits gathered for this
    /// ingest (the new node itself is not among them).
    pub fn route_new_node(
        &mut self,
        node: &MemoryNode,
        neighbours: &[(MemoryNode, f64)],
        now: f64,
    ) -> Vec<Link> {
        let mut links = Vec::new();
        links.extend(self.temporal_links(node, now));
        links.extend(self.semantic_links(node, neighbours));

        self.recent.push_back((node.id.clone(), now));
        if self.recent.len() > MAX_RECENT {
            self.recent.pop_front();
        }

        links
    }

    /// Symmetric temporal pairs to the ≤ max_temporal_links most recent
    /// nodes within the window, weight 1.0.
    fn temporal_links(&self, node: &MemoryNode, now: f64) -> Vec<Link> {
        let cutoff = now - self.config.temporal_window_seconds;

        let mut in_window: Vec<(&String, f64)> = self
            .recent
            .iter()
            .filter(|(id, ts)| *ts >= cutoff && id != &node.id)
            .map(|(id, ts)| (id, *ts))
            .collect();
        in_window.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        in_window.truncate(self.config.max_temporal_links);

        let mut links = Vec::new();
        for (target_id, _) in in_window {
            links.push(Link::new(&self.scope, &node.id, target_id, LinkType::Temporal, 1.0));
            links.push(Link::new(&self.scope, target_id, &node.id, LinkType::Temporal, 1.0));
        }
        links
    }

    /// Symmetric semantic pairs to neighbours at or above the similarity
    /// threshold, weight = cosine similarity.
    fn semantic_links(&self, node: &MemoryNode, neighbours: &[(MemoryNode, f64)]) -> Vec<Link> {
        if node.vector.is_empty() || node.metadata.degraded {
            return Vec::new();
        }

        let mut links = Vec::new();
        for (candidate, _) in neighbours {
            if candidate.id == node.id || candidate.vector.is_empty() {
                continue;
            }
            let sim = cosine_similarity(&node.vector, &candidate.vector);
            if sim >= self.config.semantic_threshold {
                links.push(Link::new(&self.scope, &node.id, &candidate.id, LinkType::Semantic, sim));
                links.push(Link::new(&self.scope, &candidate.id, &node.id, LinkType::Semantic, sim));
            }
        }
        links
    }

    /// Explicit causal link, reserved for the feedback/event API.
    pub fn causal_link(&self, source_id: &str, target_id: &str, weight: f64) -> Link {
        Link::new(&self.scope, source_id, target_id, LinkType::Causal, weight)
    }

    /// Drop a node from the recency ring (administrative delete).
    pub fn forget(&mut self, node_id: &str) {
        self.recent.retain(|(id, _)| id != node_id);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
