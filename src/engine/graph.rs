// ── L2 Graph (C5) ──────────────────────────────────────────────────────────
//
// The in-memory association web: a directed multigraph of node ids with
// typed, weighted edges, unique per (source, target, type). Rebuilt from
// crystal_links at startup; links that failed durable persistence are held
// in the pending-persist queue for the reconciler.
//
// NOT internally synchronized. The owner wraps it in the per-scope lock;
// recall takes its neighbor snapshot under that lock.

use crate::atoms::constants::SPREAD_FLOOR;
use crate::atoms::types::{Link, LinkType};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub target: String,
    pub link_type: LinkType,
    pub weight: f64,
}

#[derive(Default)]
pub struct MemoryGraph {
    nodes: HashSet<String>,
    out: HashMap<String, Vec<GraphEdge>>,
    edge_count: usize,
    /// Links added to the graph whose crystal_links row has not landed yet.
    pending_persist: Vec<Link>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node id. Idempotent.
    pub fn add_node(&mut self, id: &str) {
        self.nodes.insert(id.to_string());
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    /// Add a directed edge. Idempotent on (source, target, type): a
    /// duplicate identity is ignored and reported as false.
    pub fn add_link(&mut self, link: &Link) -> bool {
        self.add_node(&link.source_id);
        self.add_node(&link.target_id);

        let edges = self.out.entry(link.source_id.clone()).or_default();
        if edges
            .iter()
            .any(|e| e.target == link.target_id && e.link_type == link.link_type)
        {
            return false;
        }
        edges.push(GraphEdge {
            target: link.target_id.clone(),
            link_type: link.link_type,
            weight: link.weight,
        });
        self.edge_count += 1;
        true
    }

    /// Outgoing neighbors of a node: (neighbor_id, type, weight).
    pub fn neighbors(&self, id: &str) -> Vec<(String, LinkType, f64)> {
        self.out
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| (e.target.clone(), e.link_type, e.weight))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove a node and every edge touching it. Administrative reset only.
    pub fn remove_node(&mut self, id: &str) {
        self.nodes.remove(id);
        if let Some(edges) = self.out.remove(id) {
            self.edge_count -= edges.len();
        }
        for edges in self.out.values_mut() {
            let before = edges.len();
            edges.retain(|e| e.target != id);
            self.edge_count -= before - edges.len();
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.edge_count
    }

    // ── Spreading activation ───────────────────────────────────────────

    /// Spread activation outward from the seeds. Seeds start at 1.0 and
    /// keep that value; within a hop, contributions from multiple activated
    /// predecessors accumulate (wave[m] += s·decay·w); across hops a node
    /// keeps the maximum wave value it reached. Signals below the floor
    /// stop propagating. The returned map excludes the seeds, so hops = 0
    /// yields an empty map.
    pub fn spread(&self, seeds: &[String], hops: usize, decay: f64) -> HashMap<String, f64> {
        let mut activation: HashMap<String, f64> = HashMap::new();
        let seed_set: HashSet<&String> = seeds.iter().collect();

        let mut current_wave: HashMap<String, f64> = seeds
            .iter()
            .filter(|id| self.nodes.contains(*id))
            .map(|id| (id.clone(), 1.0))
            .collect();

        for _ in 0..hops {
            let mut next_wave: HashMap<String, f64> = HashMap::new();

            for (node_id, score) in &current_wave {
                for edge in self.out.get(node_id).map(Vec::as_slice).unwrap_or(&[]) {
                    let signal = score * decay * edge.weight;
                    if signal <= SPREAD_FLOOR {
                        continue;
                    }
                    *next_wave.entry(edge.target.clone()).or_insert(0.0) += signal;
                }
            }

            for (node_id, score) in &next_wave {
                let entry = activation.entry(node_id.clone()).or_insert(0.0);
                if *score > *entry {
                    *entry = *score;
                }
            }

            if next_wave.is_empty() {
                break;
            }
            current_wave = next_wave;
        }

        activation.retain(|id, _| !seed_set.contains(id));
        activation
    }

    // ── Connected components ───────────────────────────────────────────

    /// Weakly connected components of at least `min_size` nodes, for the
    /// consolidation scan. Edges are treated as undirected.
    pub fn components(&self, min_size: usize) -> Vec<Vec<String>> {
        let mut undirected: HashMap<&str, Vec<&str>> = HashMap::new();
        for (src, edges) in &self.out {
            for edge in edges {
                undirected.entry(src.as_str()).or_default().push(edge.target.as_str());
                undirected.entry(edge.target.as_str()).or_default().push(src.as_str());
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut components = Vec::new();

        for start in self.nodes.iter() {
            if seen.contains(start.as_str()) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start.as_str()];
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                component.push(id.to_string());
                for next in undirected.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                    if !seen.contains(next) {
                        stack.push(next);
                    }
                }
            }
            if component.len() >= min_size {
                component.sort();
                components.push(component);
            }
        }
        components
    }

    // ── Pending persistence ────────────────────────────────────────────

    /// Remember a link whose durable write failed; the reconciler retries.
    pub fn mark_pending_persist(&mut self, link: Link) {
        self.pending_persist.push(link);
    }

    /// Take the pending queue for a reconciliation attempt. Failures are
    /// re-marked by the caller.
    pub fn drain_pending_persist(&mut self) -> Vec<Link> {
        std::mem::take(&mut self.pending_persist)
    }

    pub fn pending_persist_count(&self) -> usize {
        self.pending_persist.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
