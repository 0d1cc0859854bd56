//! Centralized model pricing table
//!
//! Loaded from `~/.ai-counsel/usage_pricing.toml` at runtime.
//! Falls back to compiled-in defaults if the file is missing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A single model pricing entry.
/// `prefix` is matched as a substring of the model name (case-insensitive).
/// First match wins, so put more specific prefixes before general ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub prefix: String,
    pub input_per_m: f64,
    pub output_per_m: f64,
}

/// The full pricing table, keyed by provider name (for display only).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PricingConfig {
    #[serde(default)]
    pub providers: HashMap<String, Vec<PricingEntry>>,
}

impl PricingConfig {
    /// Calculate cost for a model + token counts.
    /// Searches all providers, matches by prefix (case-insensitive, first match wins).
    /// Returns 0.0 if no match found.
    pub fn calculate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.find_entry(model) {
            Some(entry) => {
                let input = (input_tokens as f64 / 1_000_000.0) * entry.input_per_m;
                let output = (output_tokens as f64 / 1_000_000.0) * entry.output_per_m;
                input + output
            }
            None => 0.0,
        }
    }

    /// Estimate cost from a combined token count using an 80/20 input/output split.
    /// Returns None if model is unknown.
    pub fn estimate_cost(&self, model: &str, token_count: u64) -> Option<f64> {
        self.find_entry(model).map(|entry| {
            let input = (token_count as f64 * 0.80 / 1_000_000.0) * entry.input_per_m;
            let output = (token_count as f64 * 0.20 / 1_000_000.0) * entry.output_per_m;
            input + output
        })
    }

    /// Cost bounds for an estimated token count: the spread between pricing
    /// every token at the input rate and pricing every token at the output
    /// rate. Returns None if model is unknown.
    pub fn estimate_cost_bounds(&self, model: &str, token_count: u64) -> Option<(f64, f64)> {
        self.find_entry(model).map(|entry| {
            let tokens_m = token_count as f64 / 1_000_000.0;
            let lower = tokens_m * entry.input_per_m.min(entry.output_per_m);
            let upper = tokens_m * entry.input_per_m.max(entry.output_per_m);
            (lower, upper)
        })
    }

    fn find_entry(&self, model: &str) -> Option<&PricingEntry> {
        let m = model.to_lowercase();
        self.providers
            .values()
            .flatten()
            .find(|entry| m.contains(&entry.prefix.to_lowercase()))
    }

    /// Load from ~/.ai-counsel/usage_pricing.toml.
    /// Returns compiled-in defaults if file is missing or unreadable.
    pub fn load() -> Self {
        let path = crate::config::counsel_home().join("usage_pricing.toml");
        if let Ok(content) = std::fs::read_to_string(&path)
            && let Ok(cfg) = toml::from_str::<PricingConfig>(&content)
        {
            return cfg;
        }
        Self::defaults()
    }

    /// Compiled-in defaults — used as fallback if file missing.
    pub fn defaults() -> Self {
        toml::from_str(DEFAULT_PRICING_TOML).unwrap_or_default()
    }
}

static PRICING: OnceLock<PricingConfig> = OnceLock::new();

/// Returns the global pricing config, initialized once per process.
pub fn pricing() -> &'static PricingConfig {
    PRICING.get_or_init(PricingConfig::load)
}

const DEFAULT_PRICING_TOML: &str = r#"
# ai-counsel Usage Pricing Table
# Edit this file to customize pricing or add new models.
#
# Rules:
#   - `prefix` is matched as a case-insensitive substring of the model name
#   - First match within each provider wins — put specific prefixes before general ones
#   - Costs are per 1 million tokens (USD)

[providers]
anthropic = [
  { prefix = "claude-opus-4",      input_per_m = 5.0,  output_per_m = 25.0 },
  { prefix = "claude-sonnet-4",    input_per_m = 3.0,  output_per_m = 15.0 },
  { prefix = "claude-3-7-sonnet",  input_per_m = 3.0,  output_per_m = 15.0 },
  { prefix = "claude-3-5-sonnet",  input_per_m = 3.0,  output_per_m = 15.0 },
  { prefix = "claude-haiku-4",     input_per_m = 1.0,  output_per_m = 5.0  },
  { prefix = "claude-3-5-haiku",   input_per_m = 0.80, output_per_m = 4.0  },
]

openai = [
  { prefix = "gpt-4o-mini",        input_per_m = 0.15, output_per_m = 0.60  },
  { prefix = "gpt-4o",             input_per_m = 2.50, output_per_m = 10.0  },
  { prefix = "gpt-4-turbo",        input_per_m = 10.0, output_per_m = 30.0  },
  { prefix = "gpt-4",              input_per_m = 30.0, output_per_m = 60.0  },
  { prefix = "o3-mini",            input_per_m = 1.10, output_per_m = 4.40  },
  { prefix = "o3",                 input_per_m = 10.0, output_per_m = 40.0  },
  { prefix = "o1",                 input_per_m = 15.0, output_per_m = 60.0  },
]

google = [
  { prefix = "gemini-2.0-flash",   input_per_m = 0.10, output_per_m = 0.40  },
  { prefix = "gemini-1.5-pro",     input_per_m = 1.25, output_per_m = 5.0   },
  { prefix = "gemini-1.5-flash",   input_per_m = 0.075,output_per_m = 0.30  },
]

deepseek = [
  { prefix = "deepseek-r1",        input_per_m = 0.55, output_per_m = 2.19  },
  { prefix = "deepseek",           input_per_m = 0.27, output_per_m = 1.10  },
]

meta = [
  { prefix = "llama-3.3-70b",      input_per_m = 0.59, output_per_m = 0.79  },
  { prefix = "llama-3.1-8b",       input_per_m = 0.07, output_per_m = 0.07  },
]
"#;
