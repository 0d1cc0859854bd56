//! Neural embedding backend — singleton qmd engine, cosine over query
//! embeddings.
//!
//! Downloads the embedding model on first use. Initialisation can fail
//! (no internet, CPU without AVX), in which case `select_backend` falls
//! back to TF-IDF.

use super::{SimilarityBackend, cosine_similarity};
use once_cell::sync::OnceCell;
use qmd::{EmbeddingEngine, pull_model};
use std::sync::Mutex;

static ENGINE: OnceCell<Mutex<EmbeddingEngine>> = OnceCell::new();

/// Disable llama.cpp's C-level logging globally.
///
/// Must be called once before creating any EmbeddingEngine.
fn silence_llama_logs() {
    use llama_cpp_2::{LogOptions, send_logs_to_tracing};
    send_logs_to_tracing(LogOptions::default().with_logs_enabled(false));
}

/// Verify the CPU supports the instruction sets required by llama.cpp.
/// Returns Err on x86 without AVX; passes through on ARM/other architectures.
fn check_cpu_features() -> Result<(), String> {
    #[cfg(target_arch = "x86_64")]
    {
        if !std::arch::is_x86_feature_detected!("avx") {
            return Err(
                "CPU lacks AVX — llama.cpp GGUF inference requires AVX".to_string(),
            );
        }
    }
    Ok(())
}

fn get_engine() -> Result<&'static Mutex<EmbeddingEngine>, String> {
    ENGINE.get_or_try_init(|| {
        check_cpu_features()?;
        silence_llama_logs();

        let pull = pull_model(qmd::llm::DEFAULT_EMBED_MODEL_URI, false)
            .map_err(|e| format!("Failed to pull embedding model: {e}"))?;

        let engine = EmbeddingEngine::new(&pull.path)
            .map_err(|e| format!("Failed to init embedding engine: {e}"))?;

        tracing::info!(
            "Embedding engine ready: {} ({:.1} MB)",
            pull.model,
            pull.size_bytes as f64 / 1_048_576.0
        );
        Ok(Mutex::new(engine))
    })
}

/// Sentence-embedding similarity backend.
pub struct EmbeddingBackend {
    engine: &'static Mutex<EmbeddingEngine>,
}

impl EmbeddingBackend {
    /// Initialise the shared engine, downloading the model if needed.
    pub fn try_new() -> Result<Self, String> {
        Ok(Self {
            engine: get_engine()?,
        })
    }

    fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let mut engine = self.engine.lock().ok()?;
        engine.embed_query(text).ok().map(|r| r.embedding)
    }
}

impl SimilarityBackend for EmbeddingBackend {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        if a.trim().is_empty() || b.trim().is_empty() {
            return 0.0;
        }
        match (self.embed_text(a), self.embed_text(b)) {
            (Some(va), Some(vb)) => cosine_similarity(&va, &vb),
            _ => 0.0,
        }
    }

    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        self.embed_text(text)
    }
}
