//! Retry with exponential backoff and jitter for transient Firestore errors.

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_retry;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

/// Retry configuration for Firestore requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Load retry tuning from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let base_delay_ms = std::env::var("FIRESTORE_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BASE_DELAY_MS);

        let max_delay_ms = std::env::var("FIRESTORE_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_DELAY_MS);

        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms,
            max_delay_ms,
        }
    }
}

/// Run `f`, retrying transient failures with exponential backoff.
///
/// Non-retryable errors (404, 409, 412, auth failures) are returned
/// immediately so callers can react to them.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> FirestoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FirestoreResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                record_retry(operation);
                let delay_ms = calculate_delay(config, attempt, e.retry_after_ms());
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms,
                    error = %e,
                    "transient firestore error, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Compute the backoff delay for a given attempt.
///
/// Exponential in `attempt`, capped at `max_delay_ms`, with full jitter.
/// A server-provided `retry_after_ms` acts as a floor on the result.
fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> u64 {
    let exponential = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(16));
    let capped = exponential.min(config.max_delay_ms);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jittered = (capped / 2) + nanos % (capped / 2 + 1);

    let floor = retry_after_ms.unwrap_or(0).max(config.base_delay_ms);
    jittered.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
        }
    }

    #[test]
    fn test_calculate_delay_respects_cap_and_floor() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        };

        for attempt in 0..8 {
            let delay = calculate_delay(&config, attempt, None);
            assert!(delay >= config.base_delay_ms);
            assert!(delay <= config.max_delay_ms);
        }

        let delay = calculate_delay(&config, 0, Some(2_000));
        assert!(delay >= 2_000);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(), "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FirestoreError::ServerError(503, "unavailable".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_fast_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: FirestoreResult<()> = with_retry(&fast_config(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FirestoreError::NotFound("missing".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(FirestoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: FirestoreResult<()> = with_retry(&fast_config(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FirestoreError::ServerError(500, "boom".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(FirestoreError::ServerError(500, _))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
