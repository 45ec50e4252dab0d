//! Transcode record models.
//!
//! One record per source URL tracks the lifecycle of its conversion. The
//! record store keeps at most one non-failed record per URL; failed records
//! stay behind for retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::video::{SourceVideo, VideoId};

/// Transcode lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStatus {
    /// An attempt is in flight (or a worker died holding the claim)
    #[default]
    Processing,
    /// Conversion finished and all artifacts are uploaded
    Processed,
    /// The last attempt failed; eligible for retry until attempts run out
    Failed,
}

impl TranscodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStatus::Processing => "processing",
            TranscodeStatus::Processed => "processed",
            TranscodeStatus::Failed => "failed",
        }
    }

    /// Parse from the persisted string form. Unknown strings map to
    /// `Processing` so a half-written document is never treated as done.
    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "processed" => TranscodeStatus::Processed,
            "failed" => TranscodeStatus::Failed,
            _ => TranscodeStatus::Processing,
        }
    }
}

impl fmt::Display for TranscodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The artifacts a finished conversion produced.
///
/// `variant_urls` preserves the order the transcoder reported its files in,
/// so the recorded set corresponds one-to-one with what was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOutput {
    /// Public URL of the master playlist
    pub master_url: String,

    /// Public URLs of every variant playlist and segment
    pub variant_urls: Vec<String>,
}

impl TranscodeOutput {
    pub fn new(master_url: impl Into<String>, variant_urls: Vec<String>) -> Self {
        Self {
            master_url: master_url.into(),
            variant_urls,
        }
    }
}

/// Durable record of a transcode attempt, keyed by source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeRecord {
    /// Source video this record belongs to
    pub video_id: VideoId,

    /// Source URL; unique among non-failed records
    pub source_url: String,

    /// Original filename, carried for display
    pub file_name: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: TranscodeStatus,

    /// Uploaded artifacts, present once processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<TranscodeOutput>,

    /// Error text from the last failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Number of attempts started (this one included)
    #[serde(default)]
    pub attempts: u32,

    /// Earliest time the next retry may start, set when an attempt fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl TranscodeRecord {
    /// Create a fresh processing record for a source video (first attempt).
    pub fn new(video: &SourceVideo) -> Self {
        let now = Utc::now();
        Self {
            video_id: video.video_id.clone(),
            source_url: video.url.clone(),
            file_name: video.file_name.clone(),
            status: TranscodeStatus::Processing,
            output: None,
            error_message: None,
            attempts: 1,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Mark as processed with the uploaded artifacts.
    pub fn complete(mut self, output: TranscodeOutput) -> Self {
        self.status = TranscodeStatus::Processed;
        self.output = Some(output);
        self.error_message = None;
        self.next_retry_at = None;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Mark as failed with the attempt's error text and retry schedule.
    pub fn fail(mut self, error: impl Into<String>, next_retry_at: Option<DateTime<Utc>>) -> Self {
        self.status = TranscodeStatus::Failed;
        self.error_message = Some(error.into());
        self.next_retry_at = next_retry_at;
        self.failed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Start another attempt over an existing record: back to processing
    /// with the attempt counter bumped.
    pub fn reattempt(mut self) -> Self {
        self.status = TranscodeStatus::Processing;
        self.attempts += 1;
        self.next_retry_at = None;
        self.updated_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_video() -> SourceVideo {
        SourceVideo::new(VideoId::from("v1"), "https://cdn.example.com/raw/a.mp4", "a.mp4")
    }

    #[test]
    fn test_new_record_is_processing() {
        let record = TranscodeRecord::new(&sample_video());
        assert_eq!(record.status, TranscodeStatus::Processing);
        assert_eq!(record.attempts, 1);
        assert!(record.output.is_none());
    }

    #[test]
    fn test_complete_transition() {
        let output = TranscodeOutput::new(
            "https://cdn.example.com/hls/v1/master.m3u8",
            vec!["https://cdn.example.com/hls/v1/1080p/1080p.m3u8".to_string()],
        );
        let record = TranscodeRecord::new(&sample_video()).complete(output.clone());

        assert_eq!(record.status, TranscodeStatus::Processed);
        assert_eq!(record.output, Some(output));
        assert!(record.completed_at.is_some());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn test_fail_transition_keeps_error_text() {
        let record = TranscodeRecord::new(&sample_video()).fail("download timed out", None);
        assert_eq!(record.status, TranscodeStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("download timed out"));
        assert!(record.failed_at.is_some());
    }

    #[test]
    fn test_reattempt_bumps_counter() {
        let record = TranscodeRecord::new(&sample_video())
            .fail("transient", None)
            .reattempt();
        assert_eq!(record.status, TranscodeStatus::Processing);
        assert_eq!(record.attempts, 2);
        assert!(record.next_retry_at.is_none());
    }

    #[test]
    fn test_status_parse_defaults_to_processing() {
        assert_eq!(
            TranscodeStatus::from_str_or_default("garbage"),
            TranscodeStatus::Processing
        );
        assert_eq!(
            TranscodeStatus::from_str_or_default("processed"),
            TranscodeStatus::Processed
        );
    }
}
