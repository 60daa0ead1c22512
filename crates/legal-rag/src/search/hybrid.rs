//! Fusion Engine (C8, spec §4.8). `hybrid_rrf` is reciprocal rank fusion
//! over the dense sets with the spec's BM25 weighting (`w=1.5`) layered on
//! top, and `fusion_metrics` computes the overlap/gain figures the
//! orchestrator uses to decide whether to fall back to a single retriever
//! leg.

use std::collections::{HashMap, HashSet};

/// Per-doc provenance flags populated by [`hybrid_rrf`] (§4.8: "per-doc
/// flags `found_by_bm25`, `retriever_sources` are populated").
#[derive(Debug, Clone)]
pub struct HybridDoc {
    pub id: String,
    pub score: f32,
    pub found_by_bm25: bool,
    pub retriever_sources: Vec<&'static str>,
}

/// Hybrid RRF (§4.8): identical to plain RRF over the dense sets, plus each
/// BM25-ranked doc contributes `w * 1/(k+rank)` in addition to any dense
/// contribution. Documents without ids are skipped by construction (the
/// input lists are always `(id, score)` pairs).
pub fn hybrid_rrf(dense_sets: &[Vec<(String, f32)>], bm25_results: &[(String, f32)], k: usize, w: f32) -> Vec<HybridDoc> {
    let mut scores: HashMap<String, (f32, bool, HashSet<&'static str>)> = HashMap::new();

    for dense in dense_sets {
        for (rank, (id, _score)) in dense.iter().enumerate() {
            let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
            let entry = scores.entry(id.clone()).or_insert((0.0, false, HashSet::new()));
            entry.0 += rrf;
            entry.2.insert("dense");
        }
    }

    for (rank, (id, _score)) in bm25_results.iter().enumerate() {
        let rrf = w * (1.0 / (k as f32 + rank as f32 + 1.0));
        let entry = scores.entry(id.clone()).or_insert((0.0, false, HashSet::new()));
        entry.0 += rrf;
        entry.1 = true;
        entry.2.insert("bm25");
    }

    let mut merged: Vec<HybridDoc> = scores
        .into_iter()
        .map(|(id, (score, found_by_bm25, sources))| HybridDoc {
            id,
            score,
            found_by_bm25,
            retriever_sources: sources.into_iter().collect(),
        })
        .collect();

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

/// Fusion metrics (§4.8): `overlap_count` (docs in ≥2 input sets),
/// `unique_docs_before`/`unique_docs_after`, and `fusion_gain`. The
/// orchestrator falls back to the single highest-quality input set when
/// `fusion_gain < 0.05` or fewer than 2 non-empty sets were fused.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionMetrics {
    pub overlap_count: usize,
    pub unique_docs_before: usize,
    pub unique_docs_after: usize,
    pub fusion_gain: f32,
    pub should_fall_back: bool,
}

pub fn fusion_metrics(input_sets: &[Vec<(String, f32)>], fused_ids: &[String]) -> FusionMetrics {
    let non_empty_sets = input_sets.iter().filter(|s| !s.is_empty()).count();

    let mut seen_counts: HashMap<&str, usize> = HashMap::new();
    let mut union: HashSet<&str> = HashSet::new();
    for set in input_sets {
        for (id, _) in set {
            *seen_counts.entry(id.as_str()).or_insert(0) += 1;
            union.insert(id.as_str());
        }
    }
    let overlap_count = seen_counts.values().filter(|&&c| c >= 2).count();
    let unique_docs_before = union.len();
    let unique_docs_after = fused_ids.len();
    let fusion_gain = (unique_docs_after as f32 - unique_docs_before as f32) / (unique_docs_before.max(1) as f32);

    FusionMetrics {
        overlap_count,
        unique_docs_before,
        unique_docs_after,
        fusion_gain,
        should_fall_back: fusion_gain < 0.05 || non_empty_sets < 2,
    }
}

#[cfg(test)]
mod spec_fusion_tests {
    use super::*;

    #[test]
    fn fusion_tie_break_matches_spec_scenario_6() {
        let dense_sets = vec![
            vec!["a".to_string(), "b".to_string()].into_iter().map(|id| (id, 1.0)).collect(),
            vec!["b".to_string(), "c".to_string()].into_iter().map(|id| (id, 1.0)).collect(),
        ];
        let docs = hybrid_rrf(&dense_sets, &[], 60, 1.5);
        let score_of = |id: &str| docs.iter().find(|d| d.id == id).unwrap().score;
        assert!(score_of("b") > score_of("a"));
        assert!(score_of("b") > score_of("c"));
        assert_eq!(docs[0].id, "b");
    }

    #[test]
    fn hybrid_rrf_weights_bm25_contribution() {
        let dense = vec![vec![("x".to_string(), 1.0)]];
        let bm25 = vec![("x".to_string(), 1.0)];
        let docs = hybrid_rrf(&dense, &bm25, 60, 1.5);
        let x = docs.iter().find(|d| d.id == "x").unwrap();
        assert!(x.found_by_bm25);
        assert!((x.score - (1.0 / 61.0 + 1.5 * (1.0 / 61.0))).abs() < 1e-6);
    }

    #[test]
    fn fusion_metrics_flags_low_gain_fallback() {
        let input_sets = vec![vec![("a".to_string(), 1.0)], vec![("a".to_string(), 1.0)]];
        let fused_ids = vec!["a".to_string()];
        let metrics = fusion_metrics(&input_sets, &fused_ids);
        assert_eq!(metrics.overlap_count, 1);
        assert_eq!(metrics.unique_docs_before, 1);
        assert!(metrics.should_fall_back);
    }

    #[test]
    fn fusion_metrics_single_nonempty_set_falls_back() {
        let input_sets = vec![vec![("a".to_string(), 1.0), ("b".to_string(), 0.5)], vec![]];
        let fused_ids = vec!["a".to_string(), "b".to_string()];
        let metrics = fusion_metrics(&input_sets, &fused_ids);
        assert!(metrics.should_fall_back);
    }
}
