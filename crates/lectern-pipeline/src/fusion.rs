// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Consensus fusion: merges the successful attempts for a page into one
// transcription.
//
// Outputs are normalised and linked when their similarity reaches the
// threshold; linked outputs form clusters (connected components). Each
// cluster scores the sum of confidence x engine weight over its members and
// the best cluster wins. A winning cluster with two or more members is a
// consensus. When the winner is a lone output the engines disagreed, and the
// best single output is returned flagged low-certainty.
//
// Aggregate confidence for a consensus combines the strongest member with the
// normalised support of the cluster:
//
//   confidence = 1 - (1 - max_member_confidence) * (1 - support)
//
// so agreement never lowers confidence below that of any member.
//
// The same attempt set always yields a byte-identical result: attempts are
// sorted canonically, the id is a UUID v5 of the page and the contributing
// attempts, and the timestamp is the latest contributing end time.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use lectern_core::types::{EngineAttempt, EngineId, FusedId, FusedResult, FusionMethod, PageId};
use lectern_engine::EngineRegistry;
use tracing::debug;
use uuid::Uuid;

use crate::normalize::{normalize_text, similarity};

/// Weight assumed for an engine missing from the weight table.
const DEFAULT_WEIGHT: f64 = 1.0;

/// Fusion bound to a registry for engine weights.
#[derive(Clone)]
pub struct FusionEngine {
    registry: Arc<EngineRegistry>,
    similarity_threshold: f64,
}

impl FusionEngine {
    pub fn new(registry: Arc<EngineRegistry>, similarity_threshold: f64) -> Self {
        Self {
            registry,
            similarity_threshold,
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn fuse(&self, page_id: PageId, attempts: &[EngineAttempt]) -> Option<FusedResult> {
        fuse(
            page_id,
            attempts,
            &self.registry.weights(),
            self.similarity_threshold,
        )
    }
}

struct Candidate<'a> {
    attempt: &'a EngineAttempt,
    normalized: String,
    weight: f64,
}

impl Candidate<'_> {
    fn score(&self) -> f64 {
        self.attempt.confidence * self.weight
    }
}

struct Cluster {
    /// Indices into the canonically sorted candidates, ascending.
    members: Vec<usize>,
    score: f64,
    best_weight: f64,
}

/// Fuse the successful attempts for `page_id`. Failed attempts are ignored.
/// Returns `None` when nothing succeeded.
pub fn fuse(
    page_id: PageId,
    attempts: &[EngineAttempt],
    weights: &HashMap<EngineId, f64>,
    similarity_threshold: f64,
) -> Option<FusedResult> {
    let mut successes: Vec<&EngineAttempt> = attempts
        .iter()
        .filter(|a| a.is_success() && a.page_id == page_id)
        .collect();
    successes.sort_by(|a, b| canonical_order(a, b));

    let candidates: Vec<Candidate<'_>> = successes
        .into_iter()
        .map(|attempt| Candidate {
            attempt,
            normalized: normalize_text(&attempt.text),
            weight: weights
                .get(&attempt.engine_id)
                .copied()
                .unwrap_or(DEFAULT_WEIGHT),
        })
        .collect();

    match candidates.len() {
        0 => None,
        1 => Some(single_engine(page_id, &candidates[0])),
        _ => Some(fuse_many(page_id, &candidates, similarity_threshold)),
    }
}

fn canonical_order(a: &EngineAttempt, b: &EngineAttempt) -> Ordering {
    a.started_at
        .cmp(&b.started_at)
        .then_with(|| a.engine_id.cmp(&b.engine_id))
        .then_with(|| a.attempt.cmp(&b.attempt))
        .then_with(|| a.id.cmp(&b.id))
}

fn single_engine(page_id: PageId, candidate: &Candidate<'_>) -> FusedResult {
    let attempt = candidate.attempt;
    FusedResult {
        id: fused_id(page_id, &[attempt]),
        page_id,
        text: attempt.text.clone(),
        confidence: attempt.confidence,
        support: attempt.confidence,
        method: FusionMethod::SingleEngine,
        low_certainty: false,
        contributing: vec![attempt.id],
        computed_at: attempt.finished_at,
    }
}

fn fuse_many(page_id: PageId, candidates: &[Candidate<'_>], threshold: f64) -> FusedResult {
    let total_weight: f64 = candidates.iter().map(|c| c.weight).sum();
    let clusters = cluster(candidates, threshold);

    // Candidates are sorted by start time, so the lowest member index is the
    // earliest start.
    let winner = clusters.iter().max_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.best_weight.total_cmp(&b.best_weight))
            .then_with(|| b.members[0].cmp(&a.members[0]))
    });

    debug!(
        candidates = candidates.len(),
        clusters = clusters.len(),
        "fusing engine outputs"
    );

    match winner {
        Some(cluster) if cluster.members.len() >= 2 => {
            consensus(page_id, candidates, cluster, total_weight)
        }
        _ => best_of_disagreeing(page_id, candidates, total_weight),
    }
}

/// Connected components of the "similar enough" graph.
fn cluster(candidates: &[Candidate<'_>], threshold: f64) -> Vec<Cluster> {
    let mut parent: Vec<usize> = (0..candidates.len()).collect();

    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            // Inclusive: a pair exactly at the threshold is linked.
            if similarity(&candidates[i].normalized, &candidates[j].normalized) >= threshold {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
    }

    let mut by_root: Vec<Option<usize>> = vec![None; candidates.len()];
    let mut clusters: Vec<Cluster> = Vec::new();
    for i in 0..candidates.len() {
        let root = find(&mut parent, i);
        let slot = match by_root[root] {
            Some(slot) => slot,
            None => {
                clusters.push(Cluster {
                    members: Vec::new(),
                    score: 0.0,
                    best_weight: 0.0,
                });
                by_root[root] = Some(clusters.len() - 1);
                clusters.len() - 1
            }
        };
        let c = &mut clusters[slot];
        c.members.push(i);
        c.score += candidates[i].score();
        c.best_weight = c.best_weight.max(candidates[i].weight);
    }
    clusters
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Higher confidence, then higher weight, then earlier start, then engine id.
fn representative_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.attempt
        .confidence
        .total_cmp(&a.attempt.confidence)
        .then_with(|| b.weight.total_cmp(&a.weight))
        .then_with(|| a.attempt.started_at.cmp(&b.attempt.started_at))
        .then_with(|| a.attempt.engine_id.cmp(&b.attempt.engine_id))
}

/// Higher confidence x weight, then higher weight, then earlier start, then
/// engine id.
fn fallback_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| b.weight.total_cmp(&a.weight))
        .then_with(|| a.attempt.started_at.cmp(&b.attempt.started_at))
        .then_with(|| a.attempt.engine_id.cmp(&b.attempt.engine_id))
}

fn consensus(
    page_id: PageId,
    candidates: &[Candidate<'_>],
    cluster: &Cluster,
    total_weight: f64,
) -> FusedResult {
    let members: Vec<&Candidate<'_>> = cluster.members.iter().map(|&i| &candidates[i]).collect();
    let mut ranked = members.clone();
    ranked.sort_by(|a, b| representative_order(a, b));
    let representative = ranked[0];

    let support = ratio(cluster.score, total_weight);
    let max_confidence = representative.attempt.confidence;
    let confidence = (1.0 - (1.0 - max_confidence) * (1.0 - support)).clamp(0.0, 1.0);

    let contributing: Vec<&EngineAttempt> = members.iter().map(|c| c.attempt).collect();
    FusedResult {
        id: fused_id(page_id, &contributing),
        page_id,
        text: representative.attempt.text.clone(),
        confidence,
        support,
        method: FusionMethod::Consensus,
        low_certainty: false,
        contributing: contributing.iter().map(|a| a.id).collect(),
        computed_at: latest_finish(&contributing),
    }
}

fn best_of_disagreeing(
    page_id: PageId,
    candidates: &[Candidate<'_>],
    total_weight: f64,
) -> FusedResult {
    let best = candidates.iter().min_by(|a, b| fallback_order(a, b));
    // `fuse_many` is only reached with two or more candidates.
    let Some(best) = best else {
        return single_engine(page_id, &candidates[0]);
    };

    FusedResult {
        id: fused_id(page_id, &[best.attempt]),
        page_id,
        text: best.attempt.text.clone(),
        confidence: best.attempt.confidence,
        support: ratio(best.score(), total_weight),
        method: FusionMethod::BestOfDisagreeing,
        low_certainty: true,
        contributing: vec![best.attempt.id],
        computed_at: best.attempt.finished_at,
    }
}

fn ratio(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        (part / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn latest_finish(attempts: &[&EngineAttempt]) -> chrono::DateTime<chrono::Utc> {
    attempts
        .iter()
        .map(|a| a.finished_at)
        .max()
        .unwrap_or_default()
}

fn fused_id(page_id: PageId, contributing: &[&EngineAttempt]) -> FusedId {
    let mut name = Vec::with_capacity(contributing.len() * 16);
    for attempt in contributing {
        name.extend_from_slice(attempt.id.0.as_bytes());
    }
    FusedId(Uuid::new_v5(&page_id.0, &name))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use lectern_core::types::{AttemptId, AttemptOutcome};

    use super::*;

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_790_000_000, 0).unwrap_or_default()
    }

    /// A successful attempt starting `offset_ms` after a fixed instant.
    fn success(
        page_id: PageId,
        engine: &str,
        text: &str,
        confidence: f64,
        offset_ms: i64,
    ) -> EngineAttempt {
        let started_at = base_time() + Duration::milliseconds(offset_ms);
        EngineAttempt {
            id: AttemptId::new(),
            page_id,
            engine_id: EngineId::from(engine),
            attempt: 1,
            started_at,
            finished_at: started_at + Duration::milliseconds(40),
            outcome: AttemptOutcome::Success,
            text: text.to_string(),
            confidence,
            boxes: Vec::new(),
            error: None,
        }
    }

    fn failure(page_id: PageId, engine: &str) -> EngineAttempt {
        EngineAttempt {
            outcome: AttemptOutcome::Timeout,
            text: String::new(),
            confidence: 0.0,
            error: Some("engine call timed out after 50ms".into()),
            ..success(page_id, engine, "", 0.0, 0)
        }
    }

    fn equal_weights() -> HashMap<EngineId, f64> {
        HashMap::new()
    }

    #[test]
    fn no_successes_no_result() {
        let page = PageId::new();
        let attempts = vec![failure(page, "a"), failure(page, "b")];
        assert!(fuse(page, &attempts, &equal_weights(), 0.85).is_none());
        assert!(fuse(page, &[], &equal_weights(), 0.85).is_none());
    }

    #[test]
    fn single_success_is_verbatim() {
        let page = PageId::new();
        let ok = success(page, "printed", "Invoice #123", 0.97, 0);
        let attempts = vec![ok.clone(), failure(page, "htr")];

        let fused = fuse(page, &attempts, &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::SingleEngine);
        assert_eq!(fused.text, "Invoice #123");
        assert_eq!(fused.confidence, 0.97);
        assert_eq!(fused.support, 0.97);
        assert!(!fused.low_certainty);
        assert_eq!(fused.contributing, vec![ok.id]);
        assert_eq!(fused.computed_at, ok.finished_at);
    }

    #[test]
    fn near_identical_outputs_reach_consensus() {
        let page = PageId::new();
        let a = success(page, "a", "Total: 45.00", 0.80, 0);
        let b = success(page, "b", "Total: 45,00", 0.82, 5);

        let fused = fuse(page, &[a.clone(), b.clone()], &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::Consensus);
        assert_eq!(fused.text, "Total: 45,00");
        assert!((fused.support - 0.81).abs() < 1e-9);
        assert!((fused.confidence - 0.9658).abs() < 1e-9);
        assert_eq!(fused.contributing, vec![a.id, b.id]);
        assert_eq!(fused.computed_at, b.finished_at);
    }

    #[test]
    fn dissimilar_outputs_fall_back_to_best() {
        let page = PageId::new();
        let a = success(page, "a", "Dear Sir, thank you", 0.95, 0);
        let b = success(page, "b", "Invoice 2024-07-01", 0.60, 5);

        let fused = fuse(page, &[a.clone(), b], &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::BestOfDisagreeing);
        assert!(fused.low_certainty);
        assert_eq!(fused.text, a.text);
        assert_eq!(fused.confidence, 0.95);
        assert!((fused.support - 0.95 / 2.0).abs() < 1e-9);
        assert_eq!(fused.contributing, vec![a.id]);
    }

    #[test]
    fn agreement_never_lowers_confidence() {
        let page = PageId::new();
        for confidences in [[0.1, 0.2, 0.3], [0.9, 0.5, 0.99], [0.0, 0.0, 0.0], [1.0, 0.4, 0.7]] {
            let attempts: Vec<_> = confidences
                .iter()
                .enumerate()
                .map(|(i, &c)| success(page, &format!("e{i}"), " same  text ", c, i as i64))
                .collect();
            let fused = fuse(page, &attempts, &equal_weights(), 0.85).unwrap();
            assert_eq!(fused.method, FusionMethod::Consensus);
            for c in confidences {
                assert!(fused.confidence >= c, "{} < {c}", fused.confidence);
            }
        }
    }

    #[test]
    fn whitespace_and_compatibility_forms_are_ignored() {
        let page = PageId::new();
        let a = success(page, "a", "ﬁnal  total\n12", 0.7, 0);
        let b = success(page, "b", "final total 12", 0.7, 1);
        let fused = fuse(page, &[a, b], &equal_weights(), 1.0).unwrap();
        assert_eq!(fused.method, FusionMethod::Consensus);
        assert!((fused.support - 0.7).abs() < 1e-9);
    }

    #[test]
    fn similarity_at_threshold_links() {
        let page = PageId::new();
        // One substitution in four chars: similarity is exactly 0.75.
        let a = success(page, "a", "A-17", 0.8, 0);
        let b = success(page, "b", "A-11", 0.8, 1);
        let attempts = [a, b];

        let linked = fuse(page, &attempts, &equal_weights(), 0.75).unwrap();
        assert_eq!(linked.method, FusionMethod::Consensus);
        assert_eq!(linked.contributing.len(), 2);

        let apart = fuse(page, &attempts, &equal_weights(), 0.76).unwrap();
        assert_eq!(apart.method, FusionMethod::BestOfDisagreeing);
        assert!(apart.low_certainty);
    }

    #[test]
    fn weights_decide_between_clusters() {
        let page = PageId::new();
        let a1 = success(page, "a1", "the quick brown fox", 0.6, 0);
        let a2 = success(page, "a2", "the quick brown f0x", 0.6, 1);
        let b1 = success(page, "b1", "lorem ipsum dolor", 0.7, 2);
        let b2 = success(page, "b2", "lorem ipsum dolor", 0.7, 3);
        let attempts = vec![a1.clone(), a2.clone(), b1, b2];

        let fused = fuse(page, &attempts, &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.text, "lorem ipsum dolor");

        let weights = HashMap::from([(EngineId::from("a1"), 2.0), (EngineId::from("a2"), 2.0)]);
        let fused = fuse(page, &attempts, &weights, 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::Consensus);
        assert_eq!(fused.contributing, vec![a1.id, a2.id]);
        // 0.6*2 + 0.6*2 over a total weight of 6.
        assert!((fused.support - 2.4 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn heavy_singleton_winner_is_low_certainty() {
        let page = PageId::new();
        let a = success(page, "a", "completely different", 0.9, 0);
        let b = success(page, "b", "agreeing output", 0.5, 1);
        let c = success(page, "c", "agreeing output", 0.5, 2);
        let weights = HashMap::from([(EngineId::from("a"), 5.0)]);

        let fused = fuse(page, &[a.clone(), b, c], &weights, 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::BestOfDisagreeing);
        assert!(fused.low_certainty);
        assert_eq!(fused.contributing, vec![a.id]);
    }

    #[test]
    fn score_tie_goes_to_heavier_member_then_earlier_start() {
        let page = PageId::new();
        let light = success(page, "light", "alpha beta", 0.8, 0);
        let heavy = success(page, "heavy", "gamma delta", 0.4, 1);
        let weights = HashMap::from([(EngineId::from("heavy"), 2.0)]);
        let fused = fuse(page, &[light.clone(), heavy.clone()], &weights, 0.85).unwrap();
        assert_eq!(fused.contributing, vec![heavy.id]);

        let early = success(page, "x", "alpha beta", 0.5, 0);
        let late = success(page, "y", "gamma delta", 0.5, 1);
        let fused = fuse(page, &[late, early.clone()], &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.contributing, vec![early.id]);
    }

    #[test]
    fn representative_is_most_confident_member() {
        let page = PageId::new();
        let a = success(page, "a", "Meeting at 10:30", 0.70, 0);
        let b = success(page, "b", "Meeting at 10.30", 0.90, 1);
        let c = success(page, "c", "Meeting at 10:30", 0.80, 2);
        let fused = fuse(page, &[a, b.clone(), c], &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.text, b.text);
    }

    #[test]
    fn fusion_is_deterministic() {
        let page = PageId::new();
        let attempts = vec![
            success(page, "a", "Total: 45.00", 0.80, 0),
            success(page, "b", "Total: 45,00", 0.82, 5),
            success(page, "c", "Tota1 45.00", 0.60, 7),
            failure(page, "d"),
        ];
        let mut reversed = attempts.clone();
        reversed.reverse();

        let first = serde_json::to_string(&fuse(page, &attempts, &equal_weights(), 0.85)).unwrap();
        let second = serde_json::to_string(&fuse(page, &reversed, &equal_weights(), 0.85)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn attempts_for_other_pages_are_ignored() {
        let page = PageId::new();
        let ours = success(page, "a", "ours", 0.9, 0);
        let theirs = success(PageId::new(), "b", "ours", 0.9, 1);
        let fused = fuse(page, &[ours, theirs], &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::SingleEngine);
    }

    #[test]
    fn empty_outputs_agree() {
        let page = PageId::new();
        let a = success(page, "a", "", 0.3, 0);
        let b = success(page, "b", "   ", 0.3, 1);
        let fused = fuse(page, &[a, b], &equal_weights(), 0.85).unwrap();
        assert_eq!(fused.method, FusionMethod::Consensus);
    }
}
