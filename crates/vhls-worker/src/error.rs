//! Error types for the transcode worker.
//!
//! Three layers, matching where a failure is handled:
//! - [`WorkerError`]: startup and wiring failures; fatal for the process.
//! - [`TickError`]: discovery failures; aborts one poll tick, which is
//!   simply retried on the next interval.
//! - [`JobError`]: failures inside one job's pipeline; recorded on the
//!   job's terminal record and never propagated past the job boundary.

use thiserror::Error;

use vhls_media::MediaError;

/// Pipeline stage a [`JobError`] is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Claim,
    Download,
    Transcode,
    Upload,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Claim => "claim",
            Stage::Download => "download",
            Stage::Transcode => "transcode",
            Stage::Upload => "upload",
            Stage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of one transcode job, tagged with the stage that produced it.
///
/// The message ends up in the terminal record's `error_message`, so it
/// should say what happened without leaking local paths.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Claim failed: {0}")]
    Claim(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("{stage} timed out after {seconds} seconds")]
    Timeout { stage: Stage, seconds: u64 },

    #[error("Output mismatch: {0}")]
    OutputMismatch(String),

    #[error("Record write failed: {0}")]
    Persist(String),
}

impl JobError {
    /// Map a media-layer error into the stage it occurred in. Media-side
    /// timeouts keep their timeout identity instead of folding into the
    /// stage's generic message.
    pub fn from_media(stage: Stage, err: MediaError) -> Self {
        match err {
            MediaError::Timeout(seconds) => JobError::Timeout { stage, seconds },
            other => match stage {
                Stage::Download => JobError::Download(other.to_string()),
                Stage::Transcode => JobError::Transcode(other.to_string()),
                _ => JobError::Transcode(other.to_string()),
            },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            JobError::Claim(_) => Stage::Claim,
            JobError::Download(_) => Stage::Download,
            JobError::Transcode(_) => Stage::Transcode,
            JobError::Upload(_) | JobError::OutputMismatch(_) => Stage::Upload,
            JobError::Timeout { stage, .. } => *stage,
            JobError::Persist(_) => Stage::Persist,
        }
    }
}

/// Failure from a catalog or record-store backend, reduced to text so the
/// scheduler and pipeline stay independent of the backing implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<vhls_firestore::FirestoreError> for StoreError {
    fn from(err: vhls_firestore::FirestoreError) -> Self {
        Self(err.to_string())
    }
}

/// Discovery failure that aborts the current poll tick.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("Catalog fetch failed: {0}")]
    Discovery(StoreError),

    #[error("Record lookup failed for {url}: {source}")]
    RecordLookup { url: String, source: StoreError },
}

impl TickError {
    pub fn discovery(err: StoreError) -> Self {
        TickError::Discovery(err)
    }

    pub fn record_lookup(url: impl Into<String>, source: StoreError) -> Self {
        TickError::RecordLookup {
            url: url.into(),
            source,
        }
    }
}

/// Fatal worker error surfaced during startup or wiring.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] vhls_firestore::FirestoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] vhls_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vhls_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vhls_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(message: impl Into<String>) -> Self {
        WorkerError::ConfigError(message.into())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_timeout_keeps_stage_and_seconds() {
        let err = JobError::from_media(Stage::Download, MediaError::Timeout(300));
        assert_eq!(err.stage(), Stage::Download);
        assert_eq!(err.to_string(), "download timed out after 300 seconds");
    }

    #[test]
    fn test_output_mismatch_is_an_upload_stage_failure() {
        let err = JobError::OutputMismatch("720p.m3u8 was never uploaded".to_string());
        assert_eq!(err.stage(), Stage::Upload);
    }

    #[test]
    fn test_media_error_folds_into_stage_message() {
        let err = JobError::from_media(
            Stage::Download,
            MediaError::DownloadFailed {
                message: "HTTP 404".to_string(),
            },
        );
        assert!(err.to_string().contains("404"));
        assert_eq!(err.stage(), Stage::Download);
    }
}
