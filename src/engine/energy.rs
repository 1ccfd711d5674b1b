// ── EnergyController (C2) ──────────────────────────────────────────────────
//
// Energy dynamics for memory nodes: initial scoring, lazy exponential
// decay, and access/feedback boosts.
//
//   E(t) = E_last · e^(−λ · Δt_hours)
//
// Decay is evaluated lazily against last_accessed; every persisted energy
// change moves last_accessed with it, which keeps the law memoryless across
// repeated observations. Energy is clamped to [0, 1] after every operation.

use crate::atoms::constants::FEEDBACK_DELTA_MAX;
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{EnergyConfig, MemoryNode};

#[derive(Clone)]
pub struct EnergyController {
    config: EnergyConfig,
}

impl EnergyController {
    pub fn new(config: EnergyConfig) -> Self {
        Self { config }
    }

    // ── Initial energy ─────────────────────────────────────────────────

    /// E₀ = clamp(w_base + w_source·src_bonus + w_entities·min(1, |entities|/K), 0, 1)
    pub fn initial_energy(&self, source_tag: &str, entity_count: usize) -> f64 {
        let src_bonus = source_bonus(source_tag);
        let entity_term =
            (entity_count as f64 / self.config.entity_saturation as f64).min(1.0);
        let e0 = self.config.init_base
            + self.config.source_weight * src_bonus
            + self.config.entity_weight * entity_term;
        e0.clamp(0.0, 1.0)
    }

    // ── Decay ──────────────────────────────────────────────────────────

    /// Energy after decay from `last_accessed` to `now`, without mutation.
    /// Non-positive elapsed time returns the stored energy unchanged.
    pub fn decayed(&self, energy: f64, last_accessed: f64, now: f64) -> f64 {
        let delta_hours = (now - last_accessed) / 3600.0;
        if delta_hours <= 0.0 {
            return energy.clamp(0.0, 1.0);
        }
        (energy * (-self.config.lambda_decay * delta_hours).exp()).clamp(0.0, 1.0)
    }

    /// Decay a node in place and move its access timestamp to `now`.
    /// Returns the new energy. Callers persist (energy, last_accessed).
    pub fn apply_decay(&self, node: &mut MemoryNode, now: f64) -> f64 {
        node.energy = self.decayed(node.energy, node.last_accessed, now);
        node.touch(now);
        node.energy
    }

    // ── Boosts ─────────────────────────────────────────────────────────

    /// Recall-hit boost: decay to now, then add the configured boost,
    /// clamped at 1. Returns the new energy.
    pub fn boost_on_recall(&self, node: &mut MemoryNode, now: f64) -> f64 {
        self.apply_decay(node, now);
        node.energy = (node.energy + self.config.boost_on_recall).min(1.0);
        node.energy
    }

    /// Feedback adjustment δ ∈ [-0.5, 0.5], validated before any effect.
    pub fn apply_feedback(&self, node: &mut MemoryNode, delta: f64, now: f64) -> MemoryResult<f64> {
        if !delta.is_finite() || delta.abs() > FEEDBACK_DELTA_MAX {
            return Err(MemoryError::Validation(format!(
                "feedback delta {} outside [-{}, {}]",
                delta, FEEDBACK_DELTA_MAX, FEEDBACK_DELTA_MAX
            )));
        }
        self.apply_decay(node, now);
        node.energy = (node.energy + delta).clamp(0.0, 1.0);
        Ok(node.energy)
    }
}

/// Source bonus in the initial-energy formula. User statements carry the
/// most weight; tool output the least.
fn source_bonus(source_tag: &str) -> f64 {
    match source_tag {
        "user" => 1.0,
        "agent" => 0.5,
        "tool" => 0.25,
        _ => 0.0,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
