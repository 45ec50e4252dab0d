//! Worker configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between catalog polls
    pub poll_interval: Duration,
    /// Maximum candidates fetched per poll
    pub poll_batch_size: u32,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Work directory for temporary files
    pub work_dir: String,
    /// Timeout for downloading one source video
    pub download_timeout: Duration,
    /// Timeout for the full transcode of one video
    pub transcode_timeout: Duration,
    /// Timeout for uploading one video's artifacts
    pub upload_timeout: Duration,
    /// Age after which a processing record is considered abandoned
    pub stale_processing_after: Duration,
    /// Backoff schedule for failed jobs
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_batch_size: 5,
            max_concurrent_jobs: 1,
            work_dir: "/tmp/vhls".to_string(),
            download_timeout: Duration::from_secs(300), // 5 minutes
            transcode_timeout: Duration::from_secs(1800), // 30 minutes
            upload_timeout: Duration::from_secs(600),   // 10 minutes
            stale_processing_after: Duration::from_secs(1800),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(
                std::env::var("POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            poll_batch_size: std::env::var("POLL_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or_else(|_| "/tmp/vhls".to_string()),
            download_timeout: Duration::from_secs(
                std::env::var("DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            transcode_timeout: Duration::from_secs(
                std::env::var("TRANSCODE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            upload_timeout: Duration::from_secs(
                std::env::var("UPLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            stale_processing_after: Duration::from_secs(
                std::env::var("STALE_PROCESSING_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            retry: RetryPolicy::from_env(),
        }
    }
}
