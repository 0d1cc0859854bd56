//! Semantic similarity backends.
//!
//! Pluggable scalar similarity over text pairs, used by the convergence
//! detector and the decision graph. Preferred order: neural embeddings
//! (feature `local-embeddings`), TF-IDF cosine, token-set overlap. The
//! first backend that initialises is selected once at process start and
//! fixed for the run.

#[cfg(feature = "local-embeddings")]
pub mod embedding;
mod jaccard;
mod tfidf;

pub use jaccard::JaccardBackend;
pub use tfidf::TfIdfBackend;

use std::sync::Arc;

/// Scalar similarity over a text pair. Stateless per call; implementations
/// may cache model weights process-wide.
pub trait SimilarityBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity in [0, 1]. Either input empty → 0.0; identical → 1.0
    /// (within epsilon for embedding backends); non-finite scores → 0.0.
    fn compute_similarity(&self, a: &str, b: &str) -> f64;

    /// Per-text vector for backends that support one (embedding cache
    /// integration). Pairwise-only backends return None.
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

/// Pick the best available backend. Logged once; the choice is fixed for
/// the process lifetime.
pub fn select_backend() -> Arc<dyn SimilarityBackend> {
    #[cfg(feature = "local-embeddings")]
    {
        match embedding::EmbeddingBackend::try_new() {
            Ok(backend) => {
                tracing::info!("Similarity backend: local embeddings");
                return Arc::new(backend);
            }
            Err(e) => {
                tracing::warn!("Embedding backend unavailable, falling back to TF-IDF: {e}");
            }
        }
    }
    tracing::info!("Similarity backend: tf-idf");
    Arc::new(TfIdfBackend::new())
}

/// Cosine similarity of two vectors, clamped to [0, 1].
/// Mismatched lengths or zero norms score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = (dot / (norm_a * norm_b)) as f64;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.5f32, 0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_negative_clamped_to_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_select_backend_always_yields_one() {
        let backend = select_backend();
        assert!(!backend.name().is_empty());
        let score = backend.compute_similarity("same text", "same text");
        assert!((score - 1.0).abs() < 1e-6);
    }

    /// Symmetry must hold for every backend.
    #[test]
    fn test_backends_are_symmetric() {
        let backends: Vec<Box<dyn SimilarityBackend>> = vec![
            Box::new(TfIdfBackend::new()),
            Box::new(JaccardBackend::new()),
        ];
        let a = "we should adopt typescript for the frontend";
        let b = "typescript adoption helps the frontend team";
        for backend in &backends {
            let ab = backend.compute_similarity(a, b);
            let ba = backend.compute_similarity(b, a);
            assert!(
                (ab - ba).abs() < 1e-9,
                "{} asymmetric: {ab} vs {ba}",
                backend.name()
            );
        }
    }

    /// Self-similarity is 1.0 for every backend.
    #[test]
    fn test_backends_self_similarity() {
        let backends: Vec<Box<dyn SimilarityBackend>> = vec![
            Box::new(TfIdfBackend::new()),
            Box::new(JaccardBackend::new()),
        ];
        for backend in &backends {
            let score = backend.compute_similarity("identical input", "identical input");
            assert!(
                (score - 1.0).abs() < 1e-6,
                "{} self-similarity: {score}",
                backend.name()
            );
        }
    }

    /// Empty input scores 0.0 for every backend.
    #[test]
    fn test_backends_empty_input() {
        let backends: Vec<Box<dyn SimilarityBackend>> = vec![
            Box::new(TfIdfBackend::new()),
            Box::new(JaccardBackend::new()),
        ];
        for backend in &backends {
            assert_eq!(backend.compute_similarity("", "anything"), 0.0);
            assert_eq!(backend.compute_similarity("anything", ""), 0.0);
            assert_eq!(backend.compute_similarity("", ""), 0.0);
        }
    }
}
