//! Term vectors and cosine similarity.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity over dense vectors
//! - Term-frequency vectors for short summaries, aligned so two texts can be
//!   compared with the same cosine

use std::collections::{BTreeMap, BTreeSet};

/// Words too common to say anything about relevance.
const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "did", "do", "for", "from", "how",
    "i", "in", "is", "it", "my", "of", "on", "or", "that", "the", "this", "to", "was", "we",
    "what", "when", "which", "why", "with",
];

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Lowercased alphanumeric terms of `text`, stopwords and single characters
/// removed.
pub fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}

/// Term-frequency vector of `text`, keyed by term.
pub fn term_frequencies(text: &str) -> BTreeMap<String, f32> {
    let mut tf = BTreeMap::new();
    for term in terms(text) {
        *tf.entry(term).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two term-frequency vectors.
///
/// Both are laid out over the union of their vocabularies so the dense
/// [`cosine_similarity`] applies.
pub fn term_similarity(a: &BTreeMap<String, f32>, b: &BTreeMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let vocab: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    let dense_a: Vec<f32> = vocab.iter().map(|t| a.get(*t).copied().unwrap_or(0.0)).collect();
    let dense_b: Vec<f32> = vocab.iter().map(|t| b.get(*t).copied().unwrap_or(0.0)).collect();
    cosine_similarity(&dense_a, &dense_b)
}
