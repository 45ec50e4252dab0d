//! Retry policy for failed transcode jobs.
//!
//! Retries are scheduled, not performed: a failed job writes its next
//! eligible time onto the record and the poll loop picks it back up once
//! that time has passed. Delay doubles per attempt up to a cap, and a
//! record that has burned through `max_attempts` is left failed with no
//! next retry time, which quarantines it from future polls.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_SECS: u64 = 60;
const DEFAULT_MAX_DELAY_SECS: u64 = 1800;

/// Backoff schedule applied to failed jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a record is quarantined
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Ceiling for the doubled delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(DEFAULT_BASE_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Build from environment variables, falling back to defaults:
    /// - `RETRY_MAX_ATTEMPTS`
    /// - `RETRY_BASE_DELAY_SECS`
    /// - `RETRY_MAX_DELAY_SECS`
    pub fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_delay: Duration::from_secs(
                std::env::var("RETRY_BASE_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_BASE_DELAY_SECS),
            ),
            max_delay: Duration::from_secs(
                std::env::var("RETRY_MAX_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_DELAY_SECS),
            ),
        }
    }

    /// True once `attempts` completed attempts leave no retries.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the retry that follows `attempts` completed attempts.
    /// Doubles per attempt, capped at `max_delay`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Earliest time the next attempt may start, or `None` once attempts
    /// are exhausted.
    pub fn next_retry_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_exhausted(attempts) {
            return None;
        }
        let delay = self.backoff_delay(attempts);
        Some(now + ChronoDuration::seconds(delay.as_secs() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(1800),
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(120));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(240));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(1800));
        assert_eq!(policy.backoff_delay(60), Duration::from_secs(1800));
    }

    #[test]
    fn test_next_retry_at_follows_backoff() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let at = policy.next_retry_at(1, now).unwrap();
        assert_eq!((at - now).num_seconds(), 60);
        let at = policy.next_retry_at(2, now).unwrap();
        assert_eq!((at - now).num_seconds(), 120);
    }

    #[test]
    fn test_exhausted_attempts_stop_scheduling() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
        assert!(policy.next_retry_at(5, Utc::now()).is_none());
    }
}
