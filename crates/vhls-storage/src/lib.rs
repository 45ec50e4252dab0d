//! S3-compatible object storage for HLS artifacts.
//!
//! This crate provides:
//! - An R2 client with env-driven configuration
//! - The `BlobStore` seam used by the pipeline
//! - Deterministic mapping from local artifact filenames to remote keys

pub mod client;
pub mod error;
pub mod operations;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use operations::{
    content_type_for, hls_key_for, variant_for, BlobStore, CONTENT_TYPE_PLAYLIST,
    CONTENT_TYPE_SEGMENT,
};
