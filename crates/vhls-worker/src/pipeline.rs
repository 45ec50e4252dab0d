//! One video's end-to-end transcode job.
//!
//! `run_job` drives claim, download, transcode, upload, and the terminal
//! record write. Every failure is caught at this boundary: the caller
//! always gets a [`JobOutcome`], never an error, and the job's scratch
//! directory is gone by the time it returns.

use chrono::Utc;
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use vhls_media::{HlsOutput, SourceFetcher, Transcoder};
use vhls_models::{SourceVideo, TranscodeOutput};
use vhls_storage::{BlobStore, StorageError};

use crate::config::WorkerConfig;
use crate::error::{JobError, Stage};
use crate::stores::{ClaimOutcome, RecordStore, SkipReason};
use crate::workspace::JobWorkspace;

/// Terminal outcome of one job, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Processed { attempt: u32 },
    Failed { stage: Stage, message: String },
    Skipped(SkipReason),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Processed { .. } => "processed",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Skipped(_) => "skipped",
        }
    }
}

/// Everything a job needs, injected once at startup.
pub struct PipelineContext {
    pub records: Arc<dyn RecordStore>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub transcoder: Arc<dyn Transcoder>,
    pub blob_store: Arc<dyn BlobStore>,
    pub config: WorkerConfig,
}

impl PipelineContext {
    pub fn new(
        records: Arc<dyn RecordStore>,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn Transcoder>,
        blob_store: Arc<dyn BlobStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            records,
            fetcher,
            transcoder,
            blob_store,
            config,
        }
    }
}

/// Run one video through the pipeline to a terminal outcome.
pub async fn run_job(ctx: &PipelineContext, video: &SourceVideo) -> JobOutcome {
    // claim before touching the filesystem
    let attempt = match ctx.records.claim(video, Utc::now()).await {
        Ok(ClaimOutcome::Claimed { attempt }) => attempt,
        Ok(ClaimOutcome::Skip(reason)) => {
            debug!(video_id = %video.video_id, reason = %reason, "Skipping video");
            counter!("vhls_jobs_total", "outcome" => "skipped").increment(1);
            return JobOutcome::Skipped(reason);
        }
        Err(err) => {
            warn!(video_id = %video.video_id, error = %err, "Claim failed");
            counter!("vhls_jobs_total", "outcome" => "failed").increment(1);
            return JobOutcome::Failed {
                stage: Stage::Claim,
                message: err.to_string(),
            };
        }
    };

    info!(video_id = %video.video_id, attempt, url = %video.url, "Starting transcode job");
    let started = std::time::Instant::now();

    let workspace =
        match JobWorkspace::create(&ctx.config.work_dir, &video.video_id, Utc::now()).await {
            Ok(ws) => ws,
            Err(err) => {
                let job_err =
                    JobError::Download(format!("workspace allocation failed: {}", err));
                let outcome = finalize_failure(ctx, video, attempt, job_err).await;
                counter!("vhls_jobs_total", "outcome" => "failed").increment(1);
                return outcome;
            }
        };

    let result = execute_stages(ctx, video, &workspace).await;

    let outcome = match result {
        Ok(output) => match ctx.records.mark_processed(&video.url, &output).await {
            Ok(()) => {
                info!(
                    video_id = %video.video_id,
                    attempt,
                    master_url = %output.master_url,
                    variants = output.variant_urls.len(),
                    duration_secs = started.elapsed().as_secs(),
                    "Transcode job finished"
                );
                JobOutcome::Processed { attempt }
            }
            Err(err) => {
                // artifacts are uploaded but the record does not say so;
                // the next claim of this URL redoes the work
                error!(video_id = %video.video_id, error = %err, "Transcode succeeded but the record write failed");
                JobOutcome::Failed {
                    stage: Stage::Persist,
                    message: err.to_string(),
                }
            }
        },
        Err(job_err) => finalize_failure(ctx, video, attempt, job_err).await,
    };

    // unconditional: the workspace goes away whatever the outcome
    workspace.cleanup().await;

    histogram!("vhls_job_duration_seconds").record(started.elapsed().as_secs_f64());
    counter!("vhls_jobs_total", "outcome" => outcome.as_str()).increment(1);
    outcome
}

/// Download, transcode, and upload inside the job's workspace.
async fn execute_stages(
    ctx: &PipelineContext,
    video: &SourceVideo,
    workspace: &JobWorkspace,
) -> Result<TranscodeOutput, JobError> {
    let download_secs = ctx.config.download_timeout.as_secs();
    let source_path = tokio::time::timeout(
        ctx.config.download_timeout,
        ctx.fetcher.fetch(&video.url, &workspace.source_dir()),
    )
    .await
    .map_err(|_| JobError::Timeout {
        stage: Stage::Download,
        seconds: download_secs,
    })?
    .map_err(|err| JobError::from_media(Stage::Download, err))?;
    debug!(video_id = %video.video_id, path = %source_path.display(), "Source downloaded");

    // the transcoder enforces its own per-process timeout and kills the
    // child when it fires
    let hls = ctx
        .transcoder
        .transcode(&source_path, &workspace.output_dir())
        .await
        .map_err(|err| JobError::from_media(Stage::Transcode, err))?;
    debug!(video_id = %video.video_id, files = hls.files.len(), "Transcode produced artifacts");

    let upload_secs = ctx.config.upload_timeout.as_secs();
    let uploaded = tokio::time::timeout(
        ctx.config.upload_timeout,
        ctx.blob_store
            .upload_hls_dir(&workspace.output_dir(), &video.video_id),
    )
    .await
    .map_err(|_| JobError::Timeout {
        stage: Stage::Upload,
        seconds: upload_secs,
    })?
    .map_err(|err| {
        if let StorageError::FolderUploadIncomplete { uploaded, .. } = &err {
            warn!(
                video_id = %video.video_id,
                uploaded = uploaded.len(),
                "Upload failed partway; files already uploaded stay in place"
            );
        }
        JobError::Upload(err.to_string())
    })?;

    resolve_output(&hls, &uploaded)
}

/// Pair the transcoder's reported files with their uploaded URLs.
///
/// Every reported file must appear in the upload map; a hole would put an
/// unreachable URL set on the record, so the job fails instead. Variant
/// URLs keep the order the transcoder reported its files in.
fn resolve_output(
    hls: &HlsOutput,
    uploaded: &HashMap<String, String>,
) -> Result<TranscodeOutput, JobError> {
    let master_name = file_name_of(&hls.master_playlist)?;
    let master_url = uploaded.get(&master_name).ok_or_else(|| {
        JobError::OutputMismatch(format!("{} was never uploaded", master_name))
    })?;

    let mut variant_urls = Vec::with_capacity(hls.files.len());
    for file in &hls.files {
        let name = file_name_of(file)?;
        if name == master_name {
            continue;
        }
        let url = uploaded
            .get(&name)
            .ok_or_else(|| JobError::OutputMismatch(format!("{} was never uploaded", name)))?;
        variant_urls.push(url.clone());
    }
    Ok(TranscodeOutput::new(master_url.clone(), variant_urls))
}

fn file_name_of(path: &Path) -> Result<String, JobError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            JobError::OutputMismatch(format!("unusable artifact path {}", path.display()))
        })
}

/// Write the failed record and reduce the error to an outcome.
async fn finalize_failure(
    ctx: &PipelineContext,
    video: &SourceVideo,
    attempt: u32,
    err: JobError,
) -> JobOutcome {
    let stage = err.stage();
    let message = err.to_string();
    warn!(
        video_id = %video.video_id,
        attempt,
        stage = stage.as_str(),
        error = %message,
        "Transcode job failed"
    );
    let next_retry_at = ctx.config.retry.next_retry_at(attempt, Utc::now());
    if let Err(persist_err) = ctx
        .records
        .mark_failed(&video.url, &message, attempt, next_retry_at)
        .await
    {
        error!(video_id = %video.video_id, error = %persist_err, "Failed to record the job failure");
    }
    JobOutcome::Failed { stage, message }
}
