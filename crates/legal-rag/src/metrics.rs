//! Per-stage latency, counts, and cutover/violation flags (C16).
//!
//! Grounded on the teacher's informal metrics-struct-plus-tracing-span
//! convention (see `reranking/llm_reranker.rs`'s latency logging): a plain
//! accumulator struct appended to over the lifetime of one request, emitted
//! as `tracing` fields at `done`/`error` time rather than exported to a
//! separate metrics backend (out of scope per spec.md Non-goals).

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: String,
    pub latency_ms: u64,
    pub ok: bool,
}

/// Append-only metrics bag for one request, passed by `&mut` through the
/// orchestrator (§3: "metrics (append-only)").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub request_id: String,
    pub stages: Vec<StageMetric>,
    pub retrieval_leg_failures: Vec<String>,
    pub fusion_overlap_count: usize,
    pub fusion_unique_before: usize,
    pub fusion_unique_after: usize,
    pub fusion_gain: f32,
    pub fusion_fell_back: bool,
    pub cutover_violation: bool,
    pub cutover_offending_collections: Vec<String>,
    pub total_tokens: u64,
}

impl RequestMetrics {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn record_stage(&mut self, stage: &str, started: Instant, ok: bool) {
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(request_id = %self.request_id, stage, latency_ms, ok, "stage complete");
        self.stages.push(StageMetric {
            stage: stage.to_string(),
            latency_ms,
            ok,
        });
    }

    pub fn record_leg_failure(&mut self, leg: impl Into<String>) {
        self.retrieval_leg_failures.push(leg.into());
    }

    pub fn total_latency_ms(&self) -> u64 {
        self.stages.iter().map(|s| s.latency_ms).sum()
    }
}

/// RAII stage timer: start on construction, record on drop via the closure
/// captured by the caller. Kept deliberately simple (no global registry) —
/// the spec explicitly treats metrics as per-request and append-only.
pub struct StageTimer {
    pub stage: &'static str,
    pub started: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            started: Instant::now(),
        }
    }

    pub fn finish(self, metrics: &mut RequestMetrics, ok: bool) {
        metrics.record_stage(self.stage, self.started, ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_stage_latency() {
        let mut metrics = RequestMetrics::new("req-1");
        let timer = StageTimer::start("classify");
        timer.finish(&mut metrics, true);
        assert_eq!(metrics.stages.len(), 1);
        assert_eq!(metrics.stages[0].stage, "classify");
        assert!(metrics.stages[0].ok);
    }

    #[test]
    fn total_latency_sums_stages() {
        let mut metrics = RequestMetrics::new("req-1");
        metrics.stages.push(StageMetric {
            stage: "a".into(),
            latency_ms: 10,
            ok: true,
        });
        metrics.stages.push(StageMetric {
            stage: "b".into(),
            latency_ms: 20,
            ok: true,
        });
        assert_eq!(metrics.total_latency_ms(), 30);
    }
}
