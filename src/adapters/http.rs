//! HTTP API adapter.
//!
//! A shared base drives the request/retry/parse loop; per-provider dialects
//! supply headers, request bodies, and response extraction for the two wire
//! shapes in the wild: OpenAI chat completions and Anthropic messages.

use super::error::{AdapterError, Result};
use super::retry::{RetryConfig, retry_with_backoff};
use super::tokens::TokenUsage;
use super::{ModelAdapter, compose_prompt};
use crate::config::{HttpAdapterConfig, HttpAdapterKind};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Usage counts pulled from a provider response.
pub struct ProviderUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
}

/// Wire-shape hooks implemented per provider dialect.
trait ProviderDialect: Send + Sync {
    fn headers(&self, config: &HttpAdapterConfig) -> Result<HeaderMap>;
    fn body(&self, model: &str, prompt: &str) -> Value;
    fn parse_response(&self, response: &Value) -> Result<String>;
    fn extract_usage(&self, response: &Value) -> Option<ProviderUsage>;
}

/// Adapter for a remote chat-completion API.
pub struct HttpAdapter {
    name: String,
    config: HttpAdapterConfig,
    client: Client,
    dialect: Box<dyn ProviderDialect>,
    retry: RetryConfig,
}

impl HttpAdapter {
    pub fn new(name: &str, config: HttpAdapterConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(2)
            .build()
            .unwrap_or_default();

        let dialect: Box<dyn ProviderDialect> = match config.kind {
            HttpAdapterKind::Openai => Box::new(OpenAiDialect),
            HttpAdapterKind::Anthropic => Box::new(AnthropicDialect),
        };

        Self {
            name: name.to_string(),
            retry: RetryConfig::with_max_attempts(config.max_retries),
            config,
            client,
            dialect,
        }
    }

    /// Override the retry policy (used by tests to avoid real backoff).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// POST with retries on 5xx / 429 / transport errors. 4xx fails fast.
    async fn post(&self, body: &Value) -> Result<Value> {
        let headers = self.dialect.headers(&self.config)?;

        retry_with_backoff(
            || async {
                let response = self
                    .client
                    .post(&self.config.base_url)
                    .headers(headers.clone())
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| self.map_transport_error(e))?;

                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(if status.as_u16() == 429 {
                        AdapterError::RateLimited(message)
                    } else {
                        AdapterError::Api {
                            status: status.as_u16(),
                            message,
                        }
                    });
                }

                response
                    .json::<Value>()
                    .await
                    .map_err(|e| AdapterError::Parse(e.to_string()))
            },
            &self.retry,
        )
        .await
    }

    fn map_transport_error(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout {
                seconds: self.config.timeout,
            }
        } else {
            AdapterError::Network(e)
        }
    }
}

#[async_trait]
impl ModelAdapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> &'static str {
        "http"
    }

    async fn invoke(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        _is_deliberation: bool,
    ) -> Result<String> {
        let full_prompt = compose_prompt(prompt, context);
        let body = self.dialect.body(model, &full_prompt);
        let response = self.post(&body).await?;
        self.dialect.parse_response(&response)
    }

    async fn invoke_with_metadata(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        _is_deliberation: bool,
    ) -> Result<(String, TokenUsage)> {
        let full_prompt = compose_prompt(prompt, context);
        let body = self.dialect.body(model, &full_prompt);
        let response = self.post(&body).await?;
        let text = self.dialect.parse_response(&response)?;

        // Exact counts when the provider reports usage, estimation otherwise
        let usage = match self.dialect.extract_usage(&response) {
            Some(u) => TokenUsage::exact(u.input, u.output, u.reasoning, "http", model),
            None => {
                tracing::debug!(
                    "Adapter '{}': response lacks usage fields, estimating tokens",
                    self.name
                );
                TokenUsage::estimated(&full_prompt, &text, "http", model)
            }
        };

        Ok((text, usage))
    }
}

fn base_headers(config: &HttpAdapterConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &config.headers {
        let name: HeaderName = name
            .parse()
            .map_err(|_| AdapterError::Parse(format!("invalid header name '{name}'")))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| AdapterError::Parse(format!("invalid value for header '{name}'")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

// ─── OpenAI chat-completions dialect ─────────────────────────

struct OpenAiDialect;

impl ProviderDialect for OpenAiDialect {
    fn headers(&self, config: &HttpAdapterConfig) -> Result<HeaderMap> {
        let mut headers = base_headers(config)?;
        if let Some(key) = &config.api_key {
            let value: HeaderValue = format!("Bearer {}", key.trim())
                .parse()
                .map_err(|_| AdapterError::InvalidApiKey)?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn body(&self, model: &str, prompt: &str) -> Value {
        json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
        })
    }

    fn parse_response(&self, response: &Value) -> Result<String> {
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AdapterError::Parse("response has no choices[0].message.content".to_string())
            })
    }

    fn extract_usage(&self, response: &Value) -> Option<ProviderUsage> {
        let usage = response.get("usage")?;
        let input = usage.get("prompt_tokens")?.as_u64()?;
        let output = usage.get("completion_tokens")?.as_u64()?;
        let reasoning = usage
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Some(ProviderUsage {
            input,
            output,
            reasoning,
        })
    }
}

// ─── Anthropic messages dialect ──────────────────────────────

struct AnthropicDialect;

impl ProviderDialect for AnthropicDialect {
    fn headers(&self, config: &HttpAdapterConfig) -> Result<HeaderMap> {
        let mut headers = base_headers(config)?;
        if let Some(key) = &config.api_key {
            let value: HeaderValue = key
                .trim()
                .parse()
                .map_err(|_| AdapterError::InvalidApiKey)?;
            headers.insert(
                HeaderName::from_static("x-api-key"),
                value,
            );
        }
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    fn body(&self, model: &str, prompt: &str) -> Value {
        json!({
            "model": model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        })
    }

    fn parse_response(&self, response: &Value) -> Result<String> {
        response["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AdapterError::Parse("response has no content[0].text".to_string()))
    }

    fn extract_usage(&self, response: &Value) -> Option<ProviderUsage> {
        let usage = response.get("usage")?;
        let input = usage.get("input_tokens")?.as_u64()?;
        let output = usage.get("output_tokens")?.as_u64()?;
        Some(ProviderUsage {
            input,
            output,
            reasoning: 0,
        })
    }
}
