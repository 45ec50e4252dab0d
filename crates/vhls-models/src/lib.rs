//! Shared data models for the VHLS transcoding pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Source videos discovered from the upload catalog
//! - Transcode records and their status transitions
//! - The HLS rendition ladder and encoding defaults

pub mod encoding;
pub mod record;
pub mod video;

// Re-export common types
pub use encoding::{Rendition, DEFAULT_AUDIO_BITRATE, HLS_SEGMENT_SECONDS};
pub use record::{TranscodeOutput, TranscodeRecord, TranscodeStatus};
pub use video::{SourceVideo, VideoId};
