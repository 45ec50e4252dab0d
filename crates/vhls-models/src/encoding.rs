//! HLS encoding defaults and the rendition ladder.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Audio sample rate for all renditions
pub const AUDIO_SAMPLE_RATE: u32 = 48000;
/// Segment duration in seconds
pub const HLS_SEGMENT_SECONDS: u32 = 10;

/// One quality tier of the adaptive ladder.
///
/// The rendition name doubles as the filename prefix for its playlist and
/// segments (`1080p.m3u8`, `1080p_000.ts`, ...), which is what groups the
/// files under per-variant folders in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Rendition name and filename prefix (e.g. "1080p")
    pub name: String,

    /// Target width
    pub width: u32,

    /// Target height
    pub height: u32,

    /// Video bitrate in kbps
    pub video_bitrate_kbps: u32,

    /// Audio bitrate (FFmpeg form, e.g. "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Rendition {
    /// Create a rendition with the default audio bitrate.
    pub fn new(name: impl Into<String>, width: u32, height: u32, video_bitrate_kbps: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            video_bitrate_kbps,
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }

    /// The default 1080p/720p/480p ladder.
    pub fn default_ladder() -> Vec<Rendition> {
        vec![
            Rendition::new("1080p", 1920, 1080, 5000),
            Rendition::new("720p", 1280, 720, 2500),
            Rendition::new("480p", 854, 480, 1000),
        ]
    }

    /// Variant playlist filename, e.g. "1080p.m3u8".
    pub fn playlist_name(&self) -> String {
        format!("{}.m3u8", self.name)
    }

    /// Segment filename pattern, e.g. "1080p_%03d.ts".
    pub fn segment_pattern(&self) -> String {
        format!("{}_%03d.ts", self.name)
    }

    /// "WIDTHxHEIGHT" string for the master playlist.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Peak bandwidth in bits per second for the master playlist.
    pub fn bandwidth(&self) -> u64 {
        self.video_bitrate_kbps as u64 * 1000
    }

    /// Scale filter preserving aspect ratio within the target box.
    pub fn scale_filter(&self) -> String {
        format!(
            "scale=w={}:h={}:force_original_aspect_ratio=decrease",
            self.width, self.height
        )
    }

    /// Per-rendition FFmpeg output arguments (codec, rate control, scaling,
    /// audio). The HLS muxer arguments are added by the transcoder since
    /// they carry output paths.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            DEFAULT_VIDEO_CODEC.to_string(),
            "-preset".to_string(),
            DEFAULT_PRESET.to_string(),
            "-b:v".to_string(),
            format!("{}k", self.video_bitrate_kbps),
            "-maxrate".to_string(),
            format!("{}k", self.video_bitrate_kbps),
            "-bufsize".to_string(),
            format!("{}k", self.video_bitrate_kbps * 2),
            "-vf".to_string(),
            self.scale_filter(),
            "-c:a".to_string(),
            DEFAULT_AUDIO_CODEC.to_string(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder() {
        let ladder = Rendition::default_ladder();
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[0].name, "1080p");
        assert_eq!(ladder[0].resolution(), "1920x1080");
        assert_eq!(ladder[2].video_bitrate_kbps, 1000);
    }

    #[test]
    fn test_filename_conventions() {
        let rendition = Rendition::new("720p", 1280, 720, 2500);
        assert_eq!(rendition.playlist_name(), "720p.m3u8");
        assert_eq!(rendition.segment_pattern(), "720p_%03d.ts");
    }

    #[test]
    fn test_ffmpeg_args() {
        let rendition = Rendition::new("1080p", 1920, 1080, 5000);
        let args = rendition.to_ffmpeg_args();
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"5000k".to_string()));
        assert!(args.contains(&"10000k".to_string())); // bufsize is 2x bitrate
        assert!(args
            .iter()
            .any(|a| a.contains("force_original_aspect_ratio=decrease")));
    }

    #[test]
    fn test_bandwidth_is_bits_per_second() {
        let rendition = Rendition::new("480p", 854, 480, 1000);
        assert_eq!(rendition.bandwidth(), 1_000_000);
    }
}
