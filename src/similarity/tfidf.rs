//! TF-IDF + cosine backend.
//!
//! Fit on the pair: term frequencies per document, inverse document
//! frequency over the two-document corpus with add-one smoothing. Light
//! enough to run per round-pair without caching.

use super::SimilarityBackend;
use std::collections::{HashMap, HashSet};

pub struct TfIdfBackend;

impl TfIdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TfIdfBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, f64> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
    }
    let total = tokens.len() as f64;
    for value in counts.values_mut() {
        *value /= total;
    }
    counts
}

impl SimilarityBackend for TfIdfBackend {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        let tokens_a = tokenize(a);
        let tokens_b = tokenize(b);
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return 0.0;
        }

        let tf_a = term_frequencies(&tokens_a);
        let tf_b = term_frequencies(&tokens_b);

        let vocabulary: HashSet<&str> =
            tf_a.keys().chain(tf_b.keys()).copied().collect();

        // Smoothed IDF over the 2-document corpus: ln((n+1)/(df+1)) + 1
        let n = 2.0f64;
        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for term in vocabulary {
            let in_a = tf_a.contains_key(term);
            let in_b = tf_b.contains_key(term);
            let df = (in_a as u8 + in_b as u8) as f64;
            let idf = ((n + 1.0) / (df + 1.0)).ln() + 1.0;

            let wa = tf_a.get(term).copied().unwrap_or(0.0) * idf;
            let wb = tf_b.get(term).copied().unwrap_or(0.0) * idf;
            dot += wa * wb;
            norm_a += wa * wa;
            norm_b += wb * wb;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        let score = dot / (norm_a.sqrt() * norm_b.sqrt());
        if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
    }
}
