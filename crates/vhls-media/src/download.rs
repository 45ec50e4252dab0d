//! Streaming download of source files over HTTP.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;
use url::Url;

use crate::error::{MediaError, MediaResult};

/// Fetches a remote source file into a local directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest_dir`, returning the path of the local file.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<PathBuf>;
}

/// HTTP fetcher that streams the response body to disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vhls-media/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<PathBuf> {
        let parsed = Url::parse(url)
            .map_err(|e| MediaError::download_failed(format!("invalid source URL {url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(MediaError::download_failed(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(file_name_from_url(&parsed));

        let response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(MediaError::download_failed(format!(
                "HTTP {} fetching {}",
                response.status(),
                url
            )));
        }

        let mut file = tokio::fs::File::create(&dest).await?;
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await?;

        if bytes_written == 0 {
            return Err(MediaError::download_failed("downloaded file is empty"));
        }

        info!(
            output = %dest.display(),
            size_mb = bytes_written as f64 / (1024.0 * 1024.0),
            "Downloaded source file"
        );

        Ok(dest)
    }
}

/// Derive a local filename from the URL path, falling back to "source.mp4"
/// when the path carries no usable final segment.
fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && name.contains('.'))
        .map(|name| name.to_string())
        .unwrap_or_else(|| "source.mp4".to_string())
}
