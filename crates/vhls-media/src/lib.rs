//! FFmpeg CLI wrapper and source plumbing for the VHLS pipeline.
//!
//! This crate provides:
//! - FFmpeg command building and execution with hard timeouts
//! - FFprobe-based source validation
//! - Streaming HTTP download of source files
//! - Multi-quality HLS transcoding with master playlist generation

#![deny(unreachable_patterns)]

pub mod command;
pub mod download;
pub mod error;
pub mod hls;
pub mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use download::{HttpFetcher, SourceFetcher};
pub use error::{MediaError, MediaResult};
pub use hls::{HlsOutput, HlsTranscoder, Transcoder, MASTER_PLAYLIST_NAME};
pub use probe::{probe_source, SourceInfo};
