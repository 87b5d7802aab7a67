//! Token estimation for context items.
//!
//! Estimates are abstract budget units, not exact tokenizer counts. The
//! estimator is chosen by configuration and must be deterministic.

use mynd_config::EstimatorKind;
use std::sync::Arc;

/// Sizes a piece of text in budget tokens.
pub trait TokenEstimator: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(&self, text: &str) -> usize;
}

/// 1 token ≈ 4 characters. Rounds up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn name(&self) -> &str {
        "chars"
    }

    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// 1 word ≈ 4/3 tokens. Rounds up.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordEstimator;

impl TokenEstimator for WordEstimator {
    fn name(&self) -> &str {
        "words"
    }

    fn estimate(&self, text: &str) -> usize {
        (text.split_whitespace().count() * 4).div_ceil(3)
    }
}

/// The estimator a configuration asks for.
pub fn estimator_for(kind: EstimatorKind) -> Arc<dyn TokenEstimator> {
    match kind {
        EstimatorKind::Chars => Arc::new(CharEstimator),
        EstimatorKind::Words => Arc::new(WordEstimator),
    }
}
