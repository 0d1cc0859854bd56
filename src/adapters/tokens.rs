//! Token accounting for adapter invocations.
//!
//! HTTP providers report usage in their response metadata (`exact`).
//! CLI adapters have no such channel, so counts are estimated locally with
//! tiktoken cl100k_base, falling back to the `len/4` heuristic when the
//! encoder cannot be built.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

/// How a token count was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAccuracy {
    /// Reported by the provider in response metadata.
    Exact,
    /// Counted locally from the text.
    Estimated,
    /// No count could be produced.
    Unavailable,
}

/// Token usage for a single invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    pub total: u64,
    pub accuracy: TokenAccuracy,
    pub adapter_type: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl TokenUsage {
    /// Exact usage from provider metadata.
    pub fn exact(
        input: u64,
        output: u64,
        reasoning: u64,
        adapter_type: &str,
        model: &str,
    ) -> Self {
        let cost_usd = crate::pricing::pricing().calculate_cost(model, input, output);
        Self {
            input,
            output,
            reasoning,
            total: input + output + reasoning,
            accuracy: TokenAccuracy::Exact,
            adapter_type: adapter_type.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
            cost_usd: (cost_usd > 0.0).then_some(cost_usd),
        }
    }

    /// Locally estimated usage from the prompt and response texts.
    pub fn estimated(prompt: &str, response: &str, adapter_type: &str, model: &str) -> Self {
        let input = estimate_tokens(prompt);
        let output = estimate_tokens(response);
        let cost_usd = crate::pricing::pricing().calculate_cost(model, input, output);
        Self {
            input,
            output,
            reasoning: 0,
            total: input + output,
            accuracy: TokenAccuracy::Estimated,
            adapter_type: adapter_type.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
            cost_usd: (cost_usd > 0.0).then_some(cost_usd),
        }
    }

    /// Usage record for an invocation that produced no countable output.
    pub fn unavailable(adapter_type: &str, model: &str) -> Self {
        Self {
            input: 0,
            output: 0,
            reasoning: 0,
            total: 0,
            accuracy: TokenAccuracy::Unavailable,
            adapter_type: adapter_type.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
            cost_usd: None,
        }
    }
}

static ENCODER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("tiktoken cl100k_base unavailable, using len/4 estimates: {e}");
        None
    }
});

/// Count tokens in `text`: tiktoken when available, `len/4` otherwise.
pub fn estimate_tokens(text: &str) -> u64 {
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_ordinary(text).len() as u64,
        None => (text.len() / 4) as u64,
    }
}
