//! Adapter error types.
//!
//! Every variant is per-participant and non-fatal to a deliberation: the
//! engine records the failure in the participant's round response and moves
//! on. Retry classification lives here so the backoff loop stays generic.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors produced by a single model invocation.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No output activity (CLI) or no response (HTTP) within the timeout.
    #[error("Invocation timed out after {seconds}s without activity")]
    Timeout { seconds: u64 },

    /// Subprocess exited non-zero; message carries the stderr tail.
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// HTTP error status after retries; message carries the response body.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// 429 from the provider.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Transport-level failure (connect, TLS, read).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider returned a payload we could not interpret.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    /// API key string cannot be placed in a header.
    #[error("API key contains invalid characters")]
    InvalidApiKey,

    /// The deliberation was cancelled while this invocation was in flight.
    #[error("Invocation cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Whether the retry loop should attempt this invocation again.
    /// 5xx, 429 and transport errors are transient; 4xx and local
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::RateLimited(_) => true,
            AdapterError::Api { status, .. } => *status >= 500,
            AdapterError::Network(e) => {
                e.status().map(|s| s.is_server_error()).unwrap_or(true)
            }
            _ => false,
        }
    }
}
