//! Polling scheduler.
//!
//! Polls the catalog on a fixed interval, filters out candidates whose
//! record says there is nothing to do, and runs the rest through the
//! pipeline under a bounded concurrency pool. A tick only ends once all
//! of its jobs have reached a terminal outcome, so ticks never overlap
//! and nothing is ever re-queued within a tick.

use metrics::counter;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use chrono::Utc;

use crate::config::WorkerConfig;
use crate::error::{TickError, WorkerResult};
use crate::pipeline::{self, JobOutcome, PipelineContext};
use crate::stores::{evaluate_eligibility, Eligibility, VideoCatalog};

/// Per-tick outcome counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TickStats {
    pub fn total(&self) -> usize {
        self.processed + self.failed + self.skipped
    }

    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Processed { .. } => self.processed += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Scheduler that drives the transcode pipeline off catalog polls.
pub struct PollScheduler {
    config: WorkerConfig,
    catalog: Arc<dyn VideoCatalog>,
    ctx: Arc<PipelineContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl PollScheduler {
    pub fn new(
        config: WorkerConfig,
        catalog: Arc<dyn VideoCatalog>,
        ctx: Arc<PipelineContext>,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            catalog,
            ctx,
            job_semaphore,
            shutdown,
        }
    }

    /// Poll until a shutdown signal arrives. A tick in flight when the
    /// signal lands finishes before the loop exits.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.poll_batch_size,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting poll scheduler"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping scheduler");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.run_tick().await {
                        Ok(stats) if stats.total() > 0 => {
                            info!(
                                processed = stats.processed,
                                failed = stats.failed,
                                skipped = stats.skipped,
                                "Poll tick finished"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => {
                            counter!("vhls_ticks_aborted_total").increment(1);
                            warn!(error = %err, "Poll tick aborted; retrying next interval");
                        }
                    }
                }
            }
        }

        info!("Poll scheduler stopped");
        Ok(())
    }

    /// Signal the scheduler to stop after the current tick.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One poll: fetch candidates, pre-filter against the record store,
    /// and run every eligible video to a terminal outcome.
    ///
    /// Catalog and record-lookup failures abort the whole tick; job
    /// failures only ever count against their own video.
    pub(crate) async fn run_tick(&self) -> Result<TickStats, TickError> {
        let candidates = self
            .catalog
            .fetch_candidates(self.config.poll_batch_size)
            .await
            .map_err(TickError::discovery)?;
        if candidates.is_empty() {
            return Ok(TickStats::default());
        }
        debug!(count = candidates.len(), "Fetched transcode candidates");

        let mut stats = TickStats::default();
        let mut eligible = Vec::new();
        let now = Utc::now();
        for video in candidates {
            if !video.has_source_url() {
                debug!(video_id = %video.video_id, "Candidate has no source URL");
                continue;
            }
            let record = self
                .ctx
                .records
                .find_by_url(&video.url)
                .await
                .map_err(|err| TickError::record_lookup(&video.url, err))?;
            match evaluate_eligibility(
                record.as_ref(),
                now,
                &self.config.retry,
                self.config.stale_processing_after,
            ) {
                Eligibility::Skip(reason) => {
                    debug!(video_id = %video.video_id, reason = %reason, "Skipping candidate");
                    stats.skipped += 1;
                }
                _ => eligible.push(video),
            }
        }

        let mut jobs = JoinSet::new();
        for video in eligible {
            let Ok(permit) = Arc::clone(&self.job_semaphore).acquire_owned().await else {
                break;
            };
            let ctx = Arc::clone(&self.ctx);
            jobs.spawn(async move {
                let _permit = permit;
                let outcome = pipeline::run_job(&ctx, &video).await;
                (video.video_id.clone(), outcome)
            });
        }

        // the tick ends only after every spawned job reports a terminal
        // outcome
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((video_id, outcome)) => {
                    debug!(video_id = %video_id, outcome = outcome.as_str(), "Job finished");
                    stats.record(&outcome);
                }
                Err(err) => {
                    error!(error = %err, "Job task panicked");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    use vhls_models::{SourceVideo, TranscodeRecord, TranscodeStatus, VideoId};

    use crate::testing::{
        MemoryBlobStore, MemoryRecordStore, StaticCatalog, StubFetcher, StubTranscoder,
    };

    struct Harness {
        catalog: Arc<StaticCatalog>,
        records: Arc<MemoryRecordStore>,
        fetcher: Arc<StubFetcher>,
        blob_store: Arc<MemoryBlobStore>,
        scheduler: PollScheduler,
        _work_dir: tempfile::TempDir,
    }

    fn harness(videos: Vec<SourceVideo>) -> Harness {
        let work_dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            work_dir: work_dir.path().to_string_lossy().to_string(),
            max_concurrent_jobs: 2,
            ..Default::default()
        };
        let catalog = Arc::new(StaticCatalog::new(videos));
        let records = Arc::new(MemoryRecordStore::new(
            config.retry.clone(),
            config.stale_processing_after,
        ));
        let fetcher = Arc::new(StubFetcher::new());
        let blob_store = Arc::new(MemoryBlobStore::new());
        let ctx = Arc::new(PipelineContext::new(
            records.clone(),
            fetcher.clone(),
            Arc::new(StubTranscoder),
            blob_store.clone(),
            config.clone(),
        ));
        let scheduler = PollScheduler::new(config, catalog.clone(), ctx);
        Harness {
            catalog,
            records,
            fetcher,
            blob_store,
            scheduler,
            _work_dir: work_dir,
        }
    }

    fn video(n: u32) -> SourceVideo {
        SourceVideo::new(
            VideoId::from(format!("v{}", n)),
            format!("https://cdn.example.com/raw/v{}.mp4", n),
            format!("v{}.mp4", n),
        )
    }

    #[tokio::test]
    async fn test_one_failing_job_never_aborts_the_batch() {
        let h = harness((1..=5).map(video).collect());
        h.fetcher.fail_for(&video(3).url);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 0);

        // every candidate reached a terminal record
        for n in 1..=5 {
            let record = h.records.get(&video(n).url).unwrap();
            if n == 3 {
                assert_eq!(record.status, TranscodeStatus::Failed);
                assert!(record.error_message.unwrap().contains("connection reset"));
            } else {
                assert_eq!(record.status, TranscodeStatus::Processed);
            }
        }
    }

    #[tokio::test]
    async fn test_second_tick_skips_processed_videos() {
        let h = harness(vec![video(1), video(2)]);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(h.fetcher.call_count(), 2);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.skipped, 2);
        // no second download for an already-processed video
        assert_eq!(h.fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_catalog_failure_aborts_the_tick() {
        let h = harness(vec![video(1)]);
        h.catalog.set_fail(true);

        let err = h.scheduler.run_tick().await.unwrap_err();
        assert!(matches!(err, TickError::Discovery(_)));
        assert_eq!(h.records.len(), 0);
        assert_eq!(h.fetcher.call_count(), 0);

        // next interval's tick works once the catalog recovers
        h.catalog.set_fail(false);
        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_record_lookup_failure_aborts_the_tick() {
        let h = harness(vec![video(1)]);
        h.records.set_fail_lookups(true);

        let err = h.scheduler.run_tick().await.unwrap_err();
        assert!(matches!(err, TickError::RecordLookup { .. }));
        assert_eq!(h.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_candidates_without_source_url_are_dropped() {
        let blank = SourceVideo::new(VideoId::from("blank"), "", "blank.mp4");
        let h = harness(vec![video(1), blank]);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.total(), 1);
        assert_eq!(h.records.len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_is_honored_until_due() {
        let h = harness(vec![video(1)]);
        let waiting = TranscodeRecord::new(&video(1))
            .fail("boom", Some(Utc::now() + ChronoDuration::seconds(300)));
        h.records.seed(waiting);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(h.fetcher.call_count(), 0);

        let due =
            TranscodeRecord::new(&video(1)).fail("boom", Some(Utc::now() - ChronoDuration::seconds(1)));
        h.records.seed(due);
        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 1);
        let record = h.records.get(&video(1).url).unwrap();
        assert_eq!(record.status, TranscodeStatus::Processed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_records_stay_quarantined() {
        let h = harness(vec![video(1)]);
        let mut spent = TranscodeRecord::new(&video(1)).fail("boom", None);
        spent.attempts = h.scheduler.config.retry.max_attempts;
        h.records.seed(spent);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(h.fetcher.call_count(), 0);
        let record = h.records.get(&video(1).url).unwrap();
        assert_eq!(record.status, TranscodeStatus::Failed);
        assert_eq!(record.attempts, h.scheduler.config.retry.max_attempts);
    }

    #[tokio::test]
    async fn test_stale_processing_record_is_taken_over() {
        let h = harness(vec![video(1)]);
        let mut stuck = TranscodeRecord::new(&video(1));
        stuck.updated_at = Utc::now() - ChronoDuration::seconds(3600);
        h.records.seed(stuck);

        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 1);
        let record = h.records.get(&video(1).url).unwrap();
        assert_eq!(record.status, TranscodeStatus::Processed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_run_loop() {
        let h = harness(vec![]);
        let scheduler = Arc::new(h.scheduler);
        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_upload_artifacts_land_under_the_video_prefix() {
        let h = harness(vec![video(7)]);
        let stats = h.scheduler.run_tick().await.unwrap();
        assert_eq!(stats.processed, 1);
        let keys = h.blob_store.uploaded_keys();
        assert!(keys.contains(&"hls/v7/master.m3u8".to_string()));
        assert!(keys.iter().any(|k| k.starts_with("hls/v7/1080p/")));
    }
}
