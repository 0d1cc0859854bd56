//! Exponential backoff for transient adapter failures.

use super::error::{AdapterError, Result};
use std::time::Duration;

/// Retry policy for HTTP invocations. 4xx errors never retry.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// First backoff delay; doubles each retry.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry `n` (1-based): `base * 2^(n-1)`, capped.
    fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, returns a non-retryable error, or
/// the attempt budget is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(operation: F, config: &RetryConfig) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    "Retryable adapter error (attempt {}/{}), backing off {:?}: {}",
                    attempt,
                    config.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for(1), Duration::from_secs(1));
        assert_eq!(cfg.delay_for(2), Duration::from_secs(2));
        assert_eq!(cfg.delay_for(3), Duration::from_secs(4));
        assert_eq!(cfg.delay_for(4), Duration::from_secs(8));
        assert_eq!(cfg.delay_for(5), Duration::from_secs(10));
        assert_eq!(cfg.delay_for(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let cfg = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AdapterError::Api {
                        status: 502,
                        message: "bad gateway".into(),
                    })
                } else {
                    Ok("ok")
                }
            },
            &cfg,
        )
        .await;
        assert_eq!(result.expect("succeeds on third attempt"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let cfg = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<&str> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Api {
                    status: 401,
                    message: "unauthorized".into(),
                })
            },
            &cfg,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted() {
        let cfg = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<&str> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::RateLimited("429".into()))
            },
            &cfg,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
