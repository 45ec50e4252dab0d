//! Firestore REST API client.
//!
//! This crate provides:
//! - A transcode record repository with conditional claim semantics
//! - A read-only repository over the upload catalog
//! - Service account authentication via gcp_auth with token caching
//! - Merge updates, updateTime preconditions, and retry logic

pub mod catalog_repo;
pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod transcode_repo;
pub mod types;

pub use catalog_repo::VideoCatalogRepository;
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use transcode_repo::{StoredRecord, TranscodeRepository};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
