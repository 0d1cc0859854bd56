//! Model Adapter Abstraction Layer
//!
//! Provides a unified async interface for invoking heterogeneous model
//! back-ends: local CLI tools spawned as subprocesses and HTTP chat APIs.

pub mod cli;
pub mod error;
pub mod http;
pub mod retry;
pub mod tokens;

// Re-exports
pub use cli::CliAdapter;
pub use error::{AdapterError, Result};
pub use http::HttpAdapter;
pub use retry::{RetryConfig, retry_with_backoff};
pub use tokens::{TokenAccuracy, TokenUsage, estimate_tokens};

use crate::config::{AdapterConfig, Config};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A model back-end the deliberation engine can invoke.
///
/// Implementations must be cancel-safe: dropping the future aborts the
/// underlying subprocess or request.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Adapter name as configured (the `cli` half of `model@cli`).
    fn name(&self) -> &str;

    /// "cli" or "http" — recorded in token accounting.
    fn adapter_type(&self) -> &'static str;

    /// Invoke the model. `context` is prepended to the prompt with a blank
    /// line separator when present.
    async fn invoke(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        is_deliberation: bool,
    ) -> Result<String>;

    /// Invoke and account tokens. The default implementation estimates from
    /// the texts; HTTP adapters override to extract provider-exact counts.
    async fn invoke_with_metadata(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        is_deliberation: bool,
    ) -> Result<(String, TokenUsage)> {
        let full_prompt = compose_prompt(prompt, context);
        let text = self.invoke(prompt, model, context, is_deliberation).await?;
        let usage = TokenUsage::estimated(&full_prompt, &text, self.adapter_type(), model);
        Ok((text, usage))
    }
}

/// Prepend `context` to `prompt` with a blank line separator.
pub fn compose_prompt(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!("{ctx}\n\n{prompt}"),
        _ => prompt.to_string(),
    }
}

/// Build every configured adapter. Names are the lookup keys participants
/// reference through their `cli` field.
pub fn build_adapters(config: &Config) -> BTreeMap<String, Arc<dyn ModelAdapter>> {
    let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
    for (name, adapter_config) in &config.adapters {
        match adapter_config {
            AdapterConfig::Cli(cli) => {
                tracing::info!("Adapter '{}': cli ({})", name, cli.command);
                adapters.insert(name.clone(), Arc::new(CliAdapter::new(name, cli)));
            }
            AdapterConfig::Http(http) => {
                tracing::info!(
                    "Adapter '{}': http ({:?} at {})",
                    name,
                    http.kind,
                    http.base_url
                );
                adapters.insert(name.clone(), Arc::new(HttpAdapter::new(name, http.clone())));
            }
        }
    }
    adapters
}
