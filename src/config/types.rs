//! Configuration types, defaults, loading, and validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading/validation failures. Fatal — a deliberation is
/// refused rather than run against a broken config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] config::ConfigError),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnv(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Named model adapters (CLI subprocesses and HTTP APIs)
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterConfig>,

    /// Deliberation behaviour
    #[serde(default)]
    pub deliberation: DeliberationConfig,

    /// Decision graph memory
    #[serde(default)]
    pub decision_graph: DecisionGraphConfig,

    /// Per-request defaults
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Control-plane gateway
    #[serde(default)]
    pub server: ServerConfig,
}

/// One adapter definition, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterConfig {
    Cli(CliAdapterConfig),
    Http(HttpAdapterConfig),
}

/// CLI subprocess adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliAdapterConfig {
    /// Executable to spawn (resolved via PATH)
    pub command: String,

    /// Arguments; `{model}` and `{prompt}` placeholders are substituted
    #[serde(default)]
    pub args: Vec<String>,

    /// Activity timeout in seconds — resets on every output chunk.
    /// Reasoning models may think silently, so this is NOT a wall clock.
    #[serde(default = "default_cli_timeout")]
    pub timeout: u64,
}

fn default_cli_timeout() -> u64 {
    300
}

/// Wire dialect spoken by an HTTP adapter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HttpAdapterKind {
    /// OpenAI chat-completions protocol (OpenAI, OpenRouter, LM Studio, Ollama, ...)
    #[default]
    Openai,
    /// Anthropic messages protocol
    Anthropic,
}

/// HTTP API adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpAdapterConfig {
    /// Full endpoint URL
    pub base_url: String,

    /// API key; supports `${ENV_VAR}` interpolation
    #[serde(default)]
    pub api_key: Option<String>,

    /// Extra request headers; values support `${ENV_VAR}` interpolation
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Total request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,

    /// Retry attempts for 5xx / 429 / transient network errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Protocol dialect (default: openai-compatible)
    #[serde(default)]
    pub kind: HttpAdapterKind,
}

fn default_http_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

/// Deliberation behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliberationConfig {
    #[serde(default)]
    pub convergence_detection: ConvergenceConfig,
}

/// Convergence detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum pairwise similarity considered "stable agreement"
    #[serde(default = "default_similarity_threshold")]
    pub semantic_similarity_threshold: f64,

    /// Below this the round pair counts as active disagreement
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: f64,

    /// Checks begin at round `min_rounds_before_check + 1`
    #[serde(default = "default_min_rounds")]
    pub min_rounds_before_check: u32,

    /// Consecutive stable rounds required before stopping
    #[serde(default = "default_stable_rounds")]
    pub consecutive_stable_rounds: u32,
}

fn default_true() -> bool {
    true
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_divergence_threshold() -> f64 {
    0.40
}

fn default_min_rounds() -> u32 {
    2
}

fn default_stable_rounds() -> u32 {
    2
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            semantic_similarity_threshold: default_similarity_threshold(),
            divergence_threshold: default_divergence_threshold(),
            min_rounds_before_check: default_min_rounds(),
            consecutive_stable_rounds: default_stable_rounds(),
        }
    }
}

/// Decision graph memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionGraphConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite file; default `~/.ai-counsel/decision_graph.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Token budget for injected context
    #[serde(default = "default_token_budget")]
    pub context_token_budget: usize,

    /// Score boundaries for strong/moderate/brief tiers
    #[serde(default)]
    pub tier_boundaries: TierBoundaries,

    /// How many recent decisions are scored on a cache miss
    #[serde(default = "default_query_window")]
    pub query_window: usize,

    /// Hard cap on decisions injected, on top of adaptive-k
    #[serde(default)]
    pub max_context_decisions: Option<usize>,

    /// Whether the background worker computes similarity edges
    #[serde(default = "default_true")]
    pub compute_similarities: bool,
}

fn default_token_budget() -> usize {
    1500
}

fn default_query_window() -> usize {
    1000
}

impl Default for DecisionGraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: None,
            context_token_budget: default_token_budget(),
            tier_boundaries: TierBoundaries::default(),
            query_window: default_query_window(),
            max_context_decisions: None,
            compute_similarities: true,
        }
    }
}

/// Tier score boundaries. Anything under `moderate` lands in `brief`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierBoundaries {
    #[serde(default = "default_strong_boundary")]
    pub strong: f64,

    #[serde(default = "default_moderate_boundary")]
    pub moderate: f64,
}

fn default_strong_boundary() -> f64 {
    0.75
}

fn default_moderate_boundary() -> f64 {
    0.60
}

impl Default for TierBoundaries {
    fn default() -> Self {
        Self {
            strong: default_strong_boundary(),
            moderate: default_moderate_boundary(),
        }
    }
}

/// Per-request defaults for the control-plane verbs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// "quick" or "conference"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Rounds requested when the caller omits the field
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Upper bound on rounds, regardless of the request
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Optional wall-clock bound for a whole round, in seconds
    #[serde(default)]
    pub timeout_per_round: Option<u64>,
}

fn default_mode() -> String {
    "quick".to_string()
}

fn default_rounds() -> u32 {
    2
}

fn default_max_rounds() -> u32 {
    5
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            rounds: default_rounds(),
            max_rounds: default_max_rounds(),
            timeout_per_round: None,
        }
    }
}

/// Control-plane gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: "127.0.0.1")
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Gateway port (default: 9301)
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Allowed CORS origins — empty means no cross-origin requests
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    9301
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            port: default_server_port(),
            allowed_origins: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, detected by extension),
    /// apply environment overrides, interpolate `${ENV}` references, and
    /// validate. Read once at startup — no hot reload.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        } else {
            let default_path = super::counsel_home().join("counsel.yaml");
            builder =
                builder.add_source(config::File::from(default_path).required(false));
        }

        let mut cfg: Config = builder.build()?.try_deserialize()?;

        cfg.apply_env_overrides();
        cfg.interpolate_env()?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Environment overrides recognised at load time.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DECISION_GRAPH_ENABLED") {
            self.decision_graph.enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        // Per-invocation kill switch, takes precedence
        if std::env::var("AI_COUNSEL_GRAPH_DISABLED").as_deref() == Ok("1") {
            self.decision_graph.enabled = false;
        }
    }

    /// Resolve `${NAME}` references in adapter strings against the process
    /// environment. A missing variable is fatal.
    fn interpolate_env(&mut self) -> Result<(), ConfigError> {
        for adapter in self.adapters.values_mut() {
            match adapter {
                AdapterConfig::Http(http) => {
                    http.base_url = interpolate(&http.base_url)?;
                    if let Some(key) = &http.api_key {
                        http.api_key = Some(interpolate(key)?);
                    }
                    for value in http.headers.values_mut() {
                        *value = interpolate(value)?;
                    }
                }
                AdapterConfig::Cli(cli) => {
                    cli.command = interpolate(&cli.command)?;
                    for arg in cli.args.iter_mut() {
                        *arg = interpolate(arg)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.defaults.rounds == 0 {
            return Err(ConfigError::Invalid("defaults.rounds must be >= 1".into()));
        }
        if self.defaults.max_rounds < self.defaults.rounds {
            return Err(ConfigError::Invalid(
                "defaults.max_rounds must be >= defaults.rounds".into(),
            ));
        }
        let conv = &self.deliberation.convergence_detection;
        if !(0.0..=1.0).contains(&conv.semantic_similarity_threshold)
            || !(0.0..=1.0).contains(&conv.divergence_threshold)
        {
            return Err(ConfigError::Invalid(
                "convergence thresholds must be within [0, 1]".into(),
            ));
        }
        if conv.divergence_threshold > conv.semantic_similarity_threshold {
            return Err(ConfigError::Invalid(
                "divergence_threshold must not exceed semantic_similarity_threshold".into(),
            ));
        }
        for (name, adapter) in &self.adapters {
            if let AdapterConfig::Cli(cli) = adapter
                && cli.command.trim().is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "adapter '{name}': command must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Resolved decision graph DB path.
    pub fn graph_db_path(&self) -> PathBuf {
        self.decision_graph
            .db_path
            .clone()
            .unwrap_or_else(|| super::counsel_home().join("decision_graph.db"))
    }
}

/// Replace every `${NAME}` in `input` with the value of the `NAME`
/// environment variable. Errors on the first missing variable.
fn interpolate(input: &str) -> Result<String, ConfigError> {
    static PATTERN: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env pattern")
    });

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in PATTERN.captures_iter(input) {
        let whole = caps.get(0).expect("match");
        let name = &caps[1];
        let value = std::env::var(name)
            .map_err(|_| ConfigError::MissingEnv(name.to_string()))?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.defaults.rounds, 2);
        assert_eq!(cfg.defaults.max_rounds, 5);
        assert_eq!(cfg.defaults.mode, "quick");
        assert!(cfg.decision_graph.enabled);
        assert_eq!(cfg.decision_graph.context_token_budget, 1500);
        assert_eq!(cfg.decision_graph.query_window, 1000);
        let conv = cfg.deliberation.convergence_detection;
        assert!((conv.semantic_similarity_threshold - 0.85).abs() < f64::EPSILON);
        assert!((conv.divergence_threshold - 0.40).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adapter_config_tagged_parse() {
        let toml_src = r#"
            [adapters.claude]
            type = "cli"
            command = "claude"
            args = ["-m", "{model}", "-p", "{prompt}"]

            [adapters.openrouter]
            type = "http"
            base_url = "https://openrouter.ai/api/v1/chat/completions"
            timeout = 60
        "#;
        let cfg: Config = toml::from_str(toml_src).expect("parse");
        assert_eq!(cfg.adapters.len(), 2);
        match &cfg.adapters["claude"] {
            AdapterConfig::Cli(cli) => {
                assert_eq!(cli.command, "claude");
                assert_eq!(cli.timeout, 300);
            }
            _ => panic!("expected cli adapter"),
        }
        match &cfg.adapters["openrouter"] {
            AdapterConfig::Http(http) => {
                assert_eq!(http.timeout, 60);
                assert_eq!(http.max_retries, 3);
                assert_eq!(http.kind, HttpAdapterKind::Openai);
            }
            _ => panic!("expected http adapter"),
        }
    }

    #[test]
    fn test_interpolate_resolves_env() {
        // SAFETY: test-local variable name, no concurrent reader cares
        unsafe { std::env::set_var("COUNSEL_TEST_KEY_1", "sk-abc") };
        let out = interpolate("Bearer ${COUNSEL_TEST_KEY_1}").expect("interpolate");
        assert_eq!(out, "Bearer sk-abc");
    }

    #[test]
    fn test_interpolate_missing_env_is_fatal() {
        let err = interpolate("${COUNSEL_DEFINITELY_UNSET_42}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "COUNSEL_DEFINITELY_UNSET_42"));
    }

    #[test]
    fn test_interpolate_passthrough() {
        let out = interpolate("no refs here").expect("interpolate");
        assert_eq!(out, "no refs here");
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = Config::default();
        cfg.deliberation.convergence_detection.divergence_threshold = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let mut cfg = Config::default();
        cfg.defaults.rounds = 0;
        assert!(cfg.validate().is_err());
    }
}
