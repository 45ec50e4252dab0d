//! Per-job scratch directories.
//!
//! Every attempt gets its own directory so retries never see a previous
//! attempt's partial files. The directory is removed when the job ends,
//! whatever the outcome.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use vhls_models::VideoId;

/// One attempt's scratch space: `{work_dir}/{video_id}/{attempt_millis}`
/// with `source/` for the download and `output/` for transcode artifacts.
pub struct JobWorkspace {
    root: PathBuf,
    cleaned: bool,
}

impl JobWorkspace {
    /// Allocate the workspace directories for an attempt starting now.
    pub async fn create(
        work_dir: &str,
        video_id: &VideoId,
        started_at: DateTime<Utc>,
    ) -> std::io::Result<Self> {
        let root = Path::new(work_dir)
            .join(video_id.as_str())
            .join(started_at.timestamp_millis().to_string());
        tokio::fs::create_dir_all(root.join("source")).await?;
        tokio::fs::create_dir_all(root.join("output")).await?;
        debug!(path = %root.display(), "Allocated job workspace");
        Ok(Self {
            root,
            cleaned: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Remove the workspace. Failures are logged and swallowed; cleanup
    /// never changes a job's outcome.
    pub async fn cleanup(mut self) {
        self.cleaned = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "Removed job workspace"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.root.display(), error = %err, "Failed to remove job workspace")
            }
        }
        // the per-video directory goes too once no attempt is left in it;
        // remove_dir refuses non-empty directories
        if let Some(parent) = self.root.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        // reached only when cleanup() was bypassed, e.g. by a panic
        if !self.cleaned {
            let _ = std::fs::remove_dir_all(&self.root);
            if let Some(parent) = self.root.parent() {
                let _ = std::fs::remove_dir(parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_removes_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().to_string_lossy().to_string();
        let ws = JobWorkspace::create(&work_dir, &VideoId::from("v1"), Utc::now())
            .await
            .unwrap();
        let root = ws.root().to_path_buf();
        tokio::fs::write(ws.source_dir().join("source.mp4"), b"data")
            .await
            .unwrap();
        ws.cleanup().await;
        assert!(!root.exists());
        assert!(!root.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_drop_removes_the_tree_when_cleanup_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().to_string_lossy().to_string();
        let root = {
            let ws = JobWorkspace::create(&work_dir, &VideoId::from("v2"), Utc::now())
                .await
                .unwrap();
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_subdirectories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().to_string_lossy().to_string();
        let ws = JobWorkspace::create(&work_dir, &VideoId::from("v3"), Utc::now())
            .await
            .unwrap();
        assert!(ws.source_dir().is_dir());
        assert!(ws.output_dir().is_dir());
        ws.cleanup().await;
    }
}
