// ── ConflictChecker (C8) ───────────────────────────────────────────────────
//
// LLM-arbitrated detection of contradictions between a new node and its
// closest vector-index neighbours. Advisory only: a reported conflict never
// blocks the write and never mutates or deletes existing nodes — it is
// logged and surfaced to the caller.

use crate::atoms::types::{ConflictConfig, ConflictReport, MemoryNode, now_ts};
use crate::engine::providers::{extract_json_block, LlmProvider};
use crate::engine::store::cosine_similarity;
use log::{info, warn};
use std::sync::Arc;

const CONFLICT_PROMPT: &str = r#"You are a memory consistency checker. Two statements from the same memory store are shown below. Decide whether they contradict each other.

Respond with ONLY valid JSON in this shape, no additional text:
{"is_conflict": false, "conflict_type": "contradiction", "description": "", "confidence": 0.0}

conflict_type must be one of: "contradiction" (the statements cannot both be true), "update" (the newer statement supersedes the older), "refinement" (the newer statement adds detail without contradicting).

Statement A (existing memory):
{a}

Statement B (new memory):
{b}
"#;

pub struct ConflictChecker {
    config: ConflictConfig,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl ConflictChecker {
    pub fn new(config: ConflictConfig, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { config, llm }
    }

    /// Check a new node against candidate neighbours. Only pairs at or
    /// above the similarity threshold are arbitrated; only verdicts with
    /// is_conflict = true and confidence ≥ the threshold are reported.
    /// Arbitration failures are absorbed — the pipeline never blocks here.
    pub async fn check(
        &self,
        new_node: &MemoryNode,
        neighbours: &[(MemoryNode, f64)],
    ) -> Vec<ConflictReport> {
        let llm = match &self.llm {
            Some(llm) => llm,
            None => return Vec::new(),
        };
        if new_node.vector.is_empty() || new_node.metadata.degraded {
            return Vec::new();
        }

        let mut reports = Vec::new();
        for (existing, _) in neighbours {
            if existing.id == new_node.id || existing.vector.is_empty() {
                continue;
            }
            let similarity = cosine_similarity(&new_node.vector, &existing.vector);
            if similarity < self.config.similarity_threshold {
                continue;
            }

            let prompt = CONFLICT_PROMPT
                .replace("{a}", &existing.content)
                .replace("{b}", &new_node.content);

            let response = match llm.complete(&prompt).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("[conflict] Arbitration skipped for {}: {}", existing.id, e);
                    continue;
                }
            };

            let verdict = match extract_json_block(&response) {
                Some(v) => v,
                None => {
                    warn!("[conflict] Unparseable arbitration response for {}", existing.id);
                    continue;
                }
            };

            let is_conflict = verdict["is_conflict"].as_bool().unwrap_or(false);
            let confidence = verdict["confidence"].as_f64().unwrap_or(0.0);
            if !is_conflict || confidence < self.config.confidence_threshold {
                continue;
            }

            let report = ConflictReport {
                id: uuid::Uuid::new_v4().to_string(),
                existing_id: existing.id.clone(),
                new_id: new_node.id.clone(),
                similarity,
                conflict_type: verdict["conflict_type"]
                    .as_str()
                    .unwrap_or("contradiction")
                    .to_string(),
                description: verdict["description"].as_str().unwrap_or("").to_string(),
                confidence,
                created_at: now_ts(),
            };
            info!(
                "[conflict] {} vs {} — {} (confidence {:.2})",
                report.new_id, report.existing_id, report.conflict_type, report.confidence
            );
            reports.push(report);
        }
        reports
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
