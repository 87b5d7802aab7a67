//! Retrieved candidates: ranking and deduplication.
//!
//! # Determinism
//!
//! Ranking is a total order: similarity descending, then timestamp
//! descending (newer first), then event id ascending. Identical inputs
//! always produce identical bundles.

use mynd_core::event::SemanticEvent;
use std::cmp::Ordering;
use std::collections::HashSet;

/// An event pulled from the index, ready to be ranked and priced.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedCandidate {
    pub event: SemanticEvent,
    /// Higher is better. NaN scores are stored as negative infinity.
    pub similarity_score: f32,
    /// What including this event costs against the budget, header included.
    pub estimated_tokens: usize,
}

impl RetrievedCandidate {
    pub fn new(event: SemanticEvent, similarity_score: f32, estimated_tokens: usize) -> Self {
        let similarity_score = if similarity_score.is_nan() {
            f32::NEG_INFINITY
        } else {
            similarity_score
        };
        Self {
            event,
            similarity_score,
            estimated_tokens,
        }
    }
}

fn rank_order(a: &RetrievedCandidate, b: &RetrievedCandidate) -> Ordering {
    b.similarity_score
        .partial_cmp(&a.similarity_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.event.timestamp.cmp(&a.event.timestamp))
        .then_with(|| a.event.id.cmp(&b.event.id))
}

/// Sort best first.
pub fn rank(candidates: &mut [RetrievedCandidate]) {
    candidates.sort_by(rank_order);
}

/// Lowercase, collapse whitespace runs, trim.
pub fn normalize_summary(summary: &str) -> String {
    summary
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop later (lower-ranked) candidates that repeat an earlier event id or
/// normalized summary. Input must already be ranked.
pub fn dedup(candidates: Vec<RetrievedCandidate>) -> Vec<RetrievedCandidate> {
    let mut seen_ids = HashSet::new();
    let mut seen_summaries = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| {
            let new_id = seen_ids.insert(c.event.id.clone());
            let new_summary = seen_summaries.insert(normalize_summary(&c.event.semantic_summary));
            new_id && new_summary
        })
        .collect()
}
