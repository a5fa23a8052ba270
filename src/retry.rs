use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Client retry policy: exponential backoff with jitter, applied only to
/// idempotent calls and only on `Transient` failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Delay before retry `attempt` (0-based): `base * 2^attempt`, capped, with
/// symmetric jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(32))
        .min(config.max_delay_ms) as f64;
    let jitter = exp * config.jitter_factor;
    let delay = exp + rand::rng().random_range(-jitter..=jitter);
    Duration::from_millis(delay.max(0.0) as u64)
}

/// Run an idempotent operation with timeout and backoff. Non-transient
/// errors and exhausted budgets surface to the caller unchanged.
pub async fn retry_idempotent<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Transient(format!(
                "timed out after {}ms",
                config.timeout_ms
            ))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt);
                tracing::debug!("retrying after {delay:?} (attempt {attempt}): {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_factor: 0.2,
            timeout_ms: 1000,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 0).as_millis(), 100);
        assert_eq!(backoff_delay(&config, 1).as_millis(), 200);
        assert_eq!(backoff_delay(&config, 2).as_millis(), 400);
        assert_eq!(backoff_delay(&config, 10).as_millis(), 5000);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryConfig::default();
        for attempt in 0..5 {
            let base = (config.base_delay_ms * (1 << attempt)).min(config.max_delay_ms) as f64;
            let ms = backoff_delay(&config, attempt).as_millis() as f64;
            assert!(ms >= base * 0.8 - 1.0 && ms <= base * 1.2 + 1.0, "{ms} vs {base}");
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_idempotent(&fast_config(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GraphError::Transient("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_idempotent(&fast_config(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GraphError::NotFound("gone".into())) }
        })
        .await;
        assert!(matches!(result, Err(GraphError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_idempotent(&fast_config(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GraphError::Transient("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(GraphError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
