//! HLS artifact operations on top of the R2 client.
//!
//! Remote layout:
//! - `hls/{video_id}/master.m3u8`
//! - `hls/{video_id}/{variant}/{filename}` for everything else
//!
//! The variant folder comes from the filename: segments are grouped by the
//! prefix before the first underscore, variant playlists by their stem,
//! and anything unrecognized lands under `other/`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use vhls_models::VideoId;

use crate::client::R2Client;
use crate::error::{StorageError, StorageResult};

/// Playlist content type.
pub const CONTENT_TYPE_PLAYLIST: &str = "application/vnd.apple.mpegurl";
/// Segment content type.
pub const CONTENT_TYPE_SEGMENT: &str = "video/mp2t";

/// Uploads local artifacts and hands back their public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload one file to `key`, returning its public URL.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str)
        -> StorageResult<String>;

    /// Upload every file in `dir` under the video's HLS prefix, returning
    /// a map of local filename to public URL. A failure carries the map of
    /// files that made it out before the failure.
    async fn upload_hls_dir(
        &self,
        dir: &Path,
        video_id: &VideoId,
    ) -> StorageResult<HashMap<String, String>>;
}

#[async_trait]
impl BlobStore for R2Client {
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        self.put_file(path, key, content_type).await
    }

    async fn upload_hls_dir(
        &self,
        dir: &Path,
        video_id: &VideoId,
    ) -> StorageResult<HashMap<String, String>> {
        let mut file_names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                file_names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        file_names.sort();

        let mut uploaded = HashMap::new();
        for file_name in file_names {
            let key = hls_key_for(video_id.as_str(), &file_name);
            let content_type = content_type_for(&file_name);

            match self.put_file(dir.join(&file_name), &key, content_type).await {
                Ok(url) => {
                    uploaded.insert(file_name, url);
                }
                Err(e) => {
                    warn!(
                        video_id = %video_id,
                        file = %file_name,
                        uploaded = uploaded.len(),
                        "Folder upload failed partway"
                    );
                    return Err(StorageError::FolderUploadIncomplete {
                        failed_file: file_name,
                        message: e.to_string(),
                        uploaded,
                    });
                }
            }
        }

        info!(
            video_id = %video_id,
            files = uploaded.len(),
            "Uploaded HLS artifacts"
        );
        Ok(uploaded)
    }
}

/// Remote key for one HLS artifact.
pub fn hls_key_for(video_id: &str, file_name: &str) -> String {
    if file_name == "master.m3u8" {
        format!("hls/{}/master.m3u8", video_id)
    } else {
        format!("hls/{}/{}/{}", video_id, variant_for(file_name), file_name)
    }
}

/// Variant folder for a filename.
pub fn variant_for(file_name: &str) -> &str {
    if let Some((prefix, _)) = file_name.split_once('_') {
        if !prefix.is_empty() {
            return prefix;
        }
    }
    if let Some(stem) = file_name.strip_suffix(".m3u8") {
        if !stem.is_empty() {
            return stem;
        }
    }
    "other"
}

/// Content type for an artifact filename.
pub fn content_type_for(file_name: &str) -> &'static str {
    if file_name.ends_with(".m3u8") {
        CONTENT_TYPE_PLAYLIST
    } else if file_name.ends_with(".ts") {
        CONTENT_TYPE_SEGMENT
    } else {
        "application/octet-stream"
    }
}
