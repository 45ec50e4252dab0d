//! Error types for storage operations.

use std::collections::HashMap;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// A folder upload stopped partway. The files uploaded before the
    /// failure stay in `uploaded` so callers can report what made it out.
    #[error("Folder upload failed at {failed_file}: {message}")]
    FolderUploadIncomplete {
        failed_file: String,
        message: String,
        uploaded: HashMap<String, String>,
    },

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Create a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an upload failure error.
    pub fn upload_failed(message: impl Into<String>) -> Self {
        Self::UploadFailed(message.into())
    }
}
