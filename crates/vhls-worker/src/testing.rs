//! In-memory doubles for pipeline and scheduler tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use vhls_media::{HlsOutput, MediaError, MediaResult, SourceFetcher, Transcoder};
use vhls_models::{SourceVideo, TranscodeOutput, TranscodeRecord, VideoId};
use vhls_storage::{hls_key_for, BlobStore, StorageError, StorageResult};

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::stores::{
    evaluate_eligibility, ClaimOutcome, Eligibility, RecordStore, SkipReason, VideoCatalog,
};

/// Catalog serving a fixed list, with an injectable fetch failure.
pub struct StaticCatalog {
    videos: Mutex<Vec<SourceVideo>>,
    fail: AtomicBool,
}

impl StaticCatalog {
    pub fn new(videos: Vec<SourceVideo>) -> Self {
        Self {
            videos: Mutex::new(videos),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoCatalog for StaticCatalog {
    async fn fetch_candidates(&self, limit: u32) -> Result<Vec<SourceVideo>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::new("catalog unavailable"));
        }
        let videos = self.videos.lock().unwrap();
        Ok(videos.iter().take(limit as usize).cloned().collect())
    }
}

/// Record store over a map, claiming under one lock with the same
/// eligibility rule as the Firestore adapter.
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, TranscodeRecord>>,
    policy: RetryPolicy,
    stale_after: Duration,
    fail_lookups: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new(policy: RetryPolicy, stale_after: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            policy,
            stale_after,
            fail_lookups: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn seed(&self, record: TranscodeRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.source_url.clone(), record);
    }

    pub fn get(&self, url: &str) -> Option<TranscodeRecord> {
        self.records.lock().unwrap().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<TranscodeRecord>, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::new("record store unavailable"));
        }
        Ok(self.records.lock().unwrap().get(url).cloned())
    }

    async fn claim(
        &self,
        video: &SourceVideo,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::new("record store unavailable"));
        }
        let mut records = self.records.lock().unwrap();
        match evaluate_eligibility(records.get(&video.url), now, &self.policy, self.stale_after) {
            Eligibility::Skip(reason) => Ok(ClaimOutcome::Skip(reason)),
            Eligibility::Fresh => {
                let record = TranscodeRecord::new(video);
                let attempt = record.attempts;
                records.insert(video.url.clone(), record);
                Ok(ClaimOutcome::Claimed { attempt })
            }
            Eligibility::RetryDue | Eligibility::StaleTakeover => {
                let Some(existing) = records.get(&video.url).cloned() else {
                    return Ok(ClaimOutcome::Skip(SkipReason::LostRace));
                };
                let record = existing.reattempt();
                let attempt = record.attempts;
                records.insert(video.url.clone(), record);
                Ok(ClaimOutcome::Claimed { attempt })
            }
        }
    }

    async fn mark_processed(&self, url: &str, output: &TranscodeOutput) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::new("record store unavailable"));
        }
        let mut records = self.records.lock().unwrap();
        match records.remove(url) {
            Some(record) => {
                records.insert(url.to_string(), record.complete(output.clone()));
                Ok(())
            }
            None => Err(StoreError::new(format!("no record for {}", url))),
        }
    }

    async fn mark_failed(
        &self,
        url: &str,
        error: &str,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::new("record store unavailable"));
        }
        let mut records = self.records.lock().unwrap();
        match records.remove(url) {
            Some(mut record) => {
                record.attempts = attempts;
                records.insert(url.to_string(), record.fail(error, next_retry_at));
                Ok(())
            }
            None => Err(StoreError::new(format!("no record for {}", url))),
        }
    }
}

/// Fetcher writing a stub source file, failing for chosen URLs.
pub struct StubFetcher {
    calls: AtomicU32,
    fail_urls: Mutex<HashSet<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_urls: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, url: &str) {
        self.fail_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_urls.lock().unwrap().contains(url) {
            return Err(MediaError::DownloadFailed {
                message: format!("connection reset fetching {}", url),
            });
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join("source.mp4");
        tokio::fs::write(&path, b"stub-source").await?;
        Ok(path)
    }
}

/// Transcoder writing a canned two-variant rendition set.
pub struct StubTranscoder;

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn transcode(&self, _input: &Path, output_dir: &Path) -> MediaResult<HlsOutput> {
        tokio::fs::create_dir_all(output_dir).await?;
        let names = [
            "1080p.m3u8",
            "1080p_000.ts",
            "720p.m3u8",
            "720p_000.ts",
            "master.m3u8",
        ];
        for name in names {
            tokio::fs::write(output_dir.join(name), b"stub").await?;
        }
        let mut files: Vec<PathBuf> = names.iter().map(|n| output_dir.join(n)).collect();
        files.sort();
        Ok(HlsOutput {
            master_playlist: output_dir.join("master.m3u8"),
            files,
        })
    }
}

/// Blob store collecting uploads in memory, with an injectable per-file
/// failure.
pub struct MemoryBlobStore {
    base_url: String,
    uploads: Mutex<HashMap<String, String>>,
    fail_file: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            base_url: "https://cdn.test".to_string(),
            uploads: Mutex::new(HashMap::new()),
            fail_file: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, file_name: &str) {
        *self.fail_file.lock().unwrap() = Some(file_name.to_string());
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.uploads.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_file(
        &self,
        _path: &Path,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<String> {
        let url = format!("{}/{}", self.base_url, key);
        self.uploads
            .lock()
            .unwrap()
            .insert(key.to_string(), url.clone());
        Ok(url)
    }

    async fn upload_hls_dir(
        &self,
        dir: &Path,
        video_id: &VideoId,
    ) -> StorageResult<HashMap<String, String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();

        let mut result = HashMap::new();
        for name in names {
            if self.fail_file.lock().unwrap().as_deref() == Some(name.as_str()) {
                return Err(StorageError::FolderUploadIncomplete {
                    failed_file: name,
                    message: "injected upload failure".to_string(),
                    uploaded: result,
                });
            }
            let key = hls_key_for(video_id.as_str(), &name);
            let url = format!("{}/{}", self.base_url, key);
            self.uploads.lock().unwrap().insert(key, url.clone());
            result.insert(name, url);
        }
        Ok(result)
    }
}
