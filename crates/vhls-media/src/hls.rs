//! Multi-quality HLS transcoding.
//!
//! One FFmpeg invocation per ladder rung writes `{rendition}.m3u8` plus
//! `{rendition}_NNN.ts` segments into a flat output directory, then a
//! master playlist is rendered on top. The master references variants by
//! their uploaded layout (`{rendition}/{rendition}.m3u8`), not the local
//! flat layout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use vhls_models::{Rendition, HLS_SEGMENT_SECONDS};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_source;

/// Filename of the master playlist.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

/// Artifacts produced by one transcode.
#[derive(Debug, Clone)]
pub struct HlsOutput {
    /// Path of the master playlist
    pub master_playlist: PathBuf,
    /// Every produced playlist and segment (master included), sorted by name
    pub files: Vec<PathBuf>,
}

/// Converts a local source file into an adaptive HLS rendition set.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output_dir: &Path) -> MediaResult<HlsOutput>;
}

/// FFmpeg-backed transcoder producing one variant per ladder rung.
pub struct HlsTranscoder {
    ladder: Vec<Rendition>,
    timeout_secs: u64,
}

impl HlsTranscoder {
    /// Create a transcoder over the default ladder.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            ladder: Rendition::default_ladder(),
            timeout_secs,
        }
    }

    /// Replace the rendition ladder.
    pub fn with_ladder(mut self, ladder: Vec<Rendition>) -> Self {
        self.ladder = ladder;
        self
    }

    async fn run_rendition(
        &self,
        input: &Path,
        output_dir: &Path,
        rendition: &Rendition,
    ) -> MediaResult<()> {
        let playlist = output_dir.join(rendition.playlist_name());
        let segment_pattern = output_dir.join(rendition.segment_pattern());

        let cmd = FfmpegCommand::new(input, &playlist)
            .output_args(rendition.to_ffmpeg_args())
            .output_args([
                "-f".to_string(),
                "hls".to_string(),
                "-hls_time".to_string(),
                HLS_SEGMENT_SECONDS.to_string(),
                "-hls_list_size".to_string(),
                "0".to_string(),
                "-hls_segment_filename".to_string(),
                segment_pattern.to_string_lossy().to_string(),
            ]);

        debug!(rendition = %rendition.name, "Starting rendition encode");
        FfmpegRunner::new()
            .with_timeout(self.timeout_secs)
            .run(&cmd)
            .await?;
        debug!(rendition = %rendition.name, "Rendition encode finished");

        Ok(())
    }
}

#[async_trait]
impl Transcoder for HlsTranscoder {
    async fn transcode(&self, input: &Path, output_dir: &Path) -> MediaResult<HlsOutput> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        if self.ladder.is_empty() {
            return Err(MediaError::invalid_video("empty rendition ladder"));
        }

        let source = probe_source(input).await?;
        info!(
            input = %input.display(),
            width = source.width,
            height = source.height,
            duration_seconds = source.duration_seconds,
            codec = %source.codec,
            "Probed source file"
        );

        tokio::fs::create_dir_all(output_dir).await?;

        for rendition in &self.ladder {
            self.run_rendition(input, output_dir, rendition).await?;
        }

        let master_playlist = output_dir.join(MASTER_PLAYLIST_NAME);
        tokio::fs::write(&master_playlist, render_master_playlist(&self.ladder)).await?;

        let files = collect_artifacts(output_dir).await?;
        info!(
            output_dir = %output_dir.display(),
            renditions = self.ladder.len(),
            files = files.len(),
            "Transcode complete"
        );

        Ok(HlsOutput {
            master_playlist,
            files,
        })
    }
}

/// Render the master playlist text for a ladder.
fn render_master_playlist(ladder: &[Rendition]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for rendition in ladder {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            rendition.bandwidth(),
            rendition.resolution()
        ));
        // Uploaded layout: each rendition lives in its own folder
        out.push_str(&format!("{}/{}\n", rendition.name, rendition.playlist_name()));
    }
    out
}

/// Enumerate the playlists and segments in an output directory, sorted by
/// filename so callers see a stable order.
async fn collect_artifacts(dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_artifact = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "m3u8" || e == "ts")
            .unwrap_or(false);
        if is_artifact {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_playlist_rendering() {
        let playlist = render_master_playlist(&Rendition::default_ladder());

        assert!(playlist.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(playlist.contains("#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080"));
        assert!(playlist.contains("1080p/1080p.m3u8"));
        assert!(playlist.contains("480p/480p.m3u8"));
        assert_eq!(playlist.matches("#EXT-X-STREAM-INF").count(), 3);
    }

    #[tokio::test]
    async fn test_collect_artifacts_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["720p_001.ts", "720p_000.ts", "720p.m3u8", "master.m3u8", "probe.log"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let files = collect_artifacts(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["720p.m3u8", "720p_000.ts", "720p_001.ts", "master.m3u8"]);
    }

    #[tokio::test]
    async fn test_transcode_rejects_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = HlsTranscoder::new(60);
        let err = transcoder
            .transcode(Path::new("/nonexistent/in.mp4"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
