//! Source video models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a source video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A source video discovered from the upload catalog.
///
/// Read-only from the pipeline's point of view; the upload subsystem owns
/// these documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVideo {
    /// Unique video ID (catalog document id)
    pub video_id: VideoId,

    /// Public URL of the uploaded source file
    pub url: String,

    /// Original filename as uploaded
    pub file_name: String,

    /// Display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Source file size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// Source duration in seconds, when the uploader probed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    /// Upload timestamp
    pub created_at: DateTime<Utc>,
}

impl SourceVideo {
    /// Create a new source video entry.
    pub fn new(video_id: VideoId, url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            video_id,
            url: url.into(),
            file_name: file_name.into(),
            title: None,
            size_bytes: None,
            duration_seconds: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the catalog entry carries a usable source URL.
    pub fn has_source_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_source_video_creation() {
        let id = VideoId::new();
        let video = SourceVideo::new(id.clone(), "https://cdn.example.com/raw/a.mp4", "a.mp4");

        assert_eq!(video.video_id, id);
        assert!(video.has_source_url());
        assert!(video.title.is_none());
    }

    #[test]
    fn test_blank_url_is_not_usable() {
        let video = SourceVideo::new(VideoId::new(), "   ", "a.mp4");
        assert!(!video.has_source_url());
    }
}
