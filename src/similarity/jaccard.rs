//! Token-set overlap backend — zero-dependency floor.

use super::SimilarityBackend;
use std::collections::HashSet;

/// Jaccard similarity over lowercased whitespace tokens.
pub struct JaccardBackend;

impl JaccardBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JaccardBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityBackend for JaccardBackend {
    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        if a.trim().is_empty() || b.trim().is_empty() {
            return 0.0;
        }

        let tokens_a: HashSet<String> =
            a.to_lowercase().split_whitespace().map(str::to_string).collect();
        let tokens_b: HashSet<String> =
            b.to_lowercase().split_whitespace().map(str::to_string).collect();

        let intersection = tokens_a.intersection(&tokens_b).count();
        let union = tokens_a.union(&tokens_b).count();
        if union == 0 {
            return 0.0;
        }

        let score = intersection as f64 / union as f64;
        if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
    }
}
