//! Store traits the scheduler and pipeline run against.
//!
//! The worker talks to its catalog and record store through these traits
//! so tests can substitute in-memory implementations. Production wiring
//! uses the Firestore-backed adapters at the bottom of this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use vhls_firestore::{FirestoreError, StoredRecord, TranscodeRepository, VideoCatalogRepository};
use vhls_models::{SourceVideo, TranscodeOutput, TranscodeRecord, TranscodeStatus};

use crate::error::StoreError;
use crate::retry::RetryPolicy;

/// Source of videos awaiting transcode.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Fetch up to `limit` videos that have a source URL.
    async fn fetch_candidates(&self, limit: u32) -> Result<Vec<SourceVideo>, StoreError>;
}

/// Durable store of per-URL transcode records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the record for a source URL.
    async fn find_by_url(&self, url: &str) -> Result<Option<TranscodeRecord>, StoreError>;

    /// Atomically claim a video for processing. Exactly one concurrent
    /// caller per URL gets `Claimed`; everyone else gets a skip.
    async fn claim(&self, video: &SourceVideo, now: DateTime<Utc>)
        -> Result<ClaimOutcome, StoreError>;

    /// Record a successful transcode.
    async fn mark_processed(&self, url: &str, output: &TranscodeOutput) -> Result<(), StoreError>;

    /// Record a failed attempt and when it may be retried.
    async fn mark_failed(
        &self,
        url: &str,
        error: &str,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker owns the job; `attempt` is the attempt number now
    /// recorded on the processing record.
    Claimed { attempt: u32 },
    /// The record is not ours to process.
    Skip(SkipReason),
}

/// Why a candidate was skipped instead of claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    InFlight,
    BackoffPending,
    Quarantined,
    LostRace,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyProcessed => "already_processed",
            SkipReason::InFlight => "in_flight",
            SkipReason::BackoffPending => "backoff_pending",
            SkipReason::Quarantined => "quarantined",
            SkipReason::LostRace => "lost_race",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::AlreadyProcessed => "already processed",
            SkipReason::InFlight => "another worker is processing it",
            SkipReason::BackoffPending => "retry backoff has not elapsed",
            SkipReason::Quarantined => "retry attempts exhausted",
            SkipReason::LostRace => "another worker claimed it first",
        };
        write!(f, "{}", text)
    }
}

/// How an existing record (or its absence) should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// No record exists; claim by inserting a fresh one.
    Fresh,
    /// A prior failed attempt is due for another try.
    RetryDue,
    /// A processing record has outlived the stale window and may be
    /// taken over.
    StaleTakeover,
    /// Not eligible.
    Skip(SkipReason),
}

/// Decide what to do with a candidate given its current record.
///
/// Both the poll-time pre-filter and the claim itself evaluate this; the
/// claim is what makes the decision stick, the pre-filter just avoids
/// spawning jobs that would skip immediately.
pub fn evaluate_eligibility(
    record: Option<&TranscodeRecord>,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
    stale_after: Duration,
) -> Eligibility {
    let Some(record) = record else {
        return Eligibility::Fresh;
    };
    match record.status {
        TranscodeStatus::Processed => Eligibility::Skip(SkipReason::AlreadyProcessed),
        TranscodeStatus::Processing => {
            let age = now.signed_duration_since(record.updated_at);
            if age.num_seconds() >= stale_after.as_secs() as i64 {
                Eligibility::StaleTakeover
            } else {
                Eligibility::Skip(SkipReason::InFlight)
            }
        }
        TranscodeStatus::Failed => {
            if policy.is_exhausted(record.attempts) {
                return Eligibility::Skip(SkipReason::Quarantined);
            }
            match record.next_retry_at {
                Some(at) if at > now => Eligibility::Skip(SkipReason::BackoffPending),
                _ => Eligibility::RetryDue,
            }
        }
    }
}

// ===== Firestore adapters =====

/// Catalog backed by the Firestore `videos` collection.
pub struct FirestoreVideoCatalog {
    repo: VideoCatalogRepository,
}

impl FirestoreVideoCatalog {
    pub fn new(repo: VideoCatalogRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl VideoCatalog for FirestoreVideoCatalog {
    async fn fetch_candidates(&self, limit: u32) -> Result<Vec<SourceVideo>, StoreError> {
        self.repo
            .fetch_with_source_url(limit)
            .await
            .map_err(StoreError::from)
    }
}

/// Record store backed by the Firestore `transcodes` collection.
///
/// Claims lean on Firestore's own atomicity: a fresh claim is a create
/// that conflicts when the document already exists, and a takeover is an
/// update preconditioned on the document's last-seen `updateTime`. A
/// conflict either way means another worker got there first.
pub struct FirestoreRecordStore {
    repo: TranscodeRepository,
    policy: RetryPolicy,
    stale_after: Duration,
}

impl FirestoreRecordStore {
    pub fn new(repo: TranscodeRepository, policy: RetryPolicy, stale_after: Duration) -> Self {
        Self {
            repo,
            policy,
            stale_after,
        }
    }

    async fn insert_fresh(&self, video: &SourceVideo) -> Result<ClaimOutcome, StoreError> {
        let record = TranscodeRecord::new(video);
        match self.repo.insert_processing(&record).await {
            Ok(()) => Ok(ClaimOutcome::Claimed {
                attempt: record.attempts,
            }),
            Err(FirestoreError::AlreadyExists(_)) => {
                debug!(url = %video.url, "Fresh claim lost to a concurrent insert");
                Ok(ClaimOutcome::Skip(SkipReason::LostRace))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn reclaim_existing(&self, stored: StoredRecord) -> Result<ClaimOutcome, StoreError> {
        let Some(update_time) = stored.update_time else {
            return Err(StoreError::new(format!(
                "record for {} has no updateTime to precondition on",
                stored.record.source_url
            )));
        };
        let record = stored.record.reattempt();
        match self.repo.reclaim(&record, &update_time).await {
            Ok(()) => Ok(ClaimOutcome::Claimed {
                attempt: record.attempts,
            }),
            Err(err) if err.is_precondition_failed() => {
                debug!(url = %record.source_url, "Reclaim lost to a concurrent update");
                Ok(ClaimOutcome::Skip(SkipReason::LostRace))
            }
            Err(FirestoreError::NotFound(_)) => {
                debug!(url = %record.source_url, "Record vanished during reclaim");
                Ok(ClaimOutcome::Skip(SkipReason::LostRace))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RecordStore for FirestoreRecordStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<TranscodeRecord>, StoreError> {
        let stored = self.repo.find_by_url(url).await.map_err(StoreError::from)?;
        Ok(stored.map(|s| s.record))
    }

    async fn claim(
        &self,
        video: &SourceVideo,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let stored = self
            .repo
            .find_by_url(&video.url)
            .await
            .map_err(StoreError::from)?;
        let eligibility = evaluate_eligibility(
            stored.as_ref().map(|s| &s.record),
            now,
            &self.policy,
            self.stale_after,
        );
        match eligibility {
            Eligibility::Skip(reason) => Ok(ClaimOutcome::Skip(reason)),
            Eligibility::Fresh => self.insert_fresh(video).await,
            Eligibility::RetryDue | Eligibility::StaleTakeover => match stored {
                Some(stored) => self.reclaim_existing(stored).await,
                // the retry arms only come out of a present record
                None => Ok(ClaimOutcome::Skip(SkipReason::LostRace)),
            },
        }
    }

    async fn mark_processed(&self, url: &str, output: &TranscodeOutput) -> Result<(), StoreError> {
        self.repo
            .mark_processed(url, output)
            .await
            .map_err(StoreError::from)
    }

    async fn mark_failed(
        &self,
        url: &str,
        error: &str,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.repo
            .mark_failed(url, error, attempts, next_retry_at)
            .await
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use vhls_models::VideoId;

    fn sample_video() -> SourceVideo {
        SourceVideo::new(
            VideoId::from("v1"),
            "https://cdn.example.com/raw/a.mp4",
            "a.mp4",
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    const STALE_AFTER: Duration = Duration::from_secs(1800);

    #[test]
    fn test_missing_record_is_fresh() {
        let verdict = evaluate_eligibility(None, Utc::now(), &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::Fresh);
    }

    #[test]
    fn test_processed_record_skips() {
        let record =
            TranscodeRecord::new(&sample_video()).complete(TranscodeOutput::new("m", vec![]));
        let verdict = evaluate_eligibility(Some(&record), Utc::now(), &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::Skip(SkipReason::AlreadyProcessed));
    }

    #[test]
    fn test_recent_processing_record_skips() {
        let record = TranscodeRecord::new(&sample_video());
        let verdict = evaluate_eligibility(Some(&record), Utc::now(), &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::Skip(SkipReason::InFlight));
    }

    #[test]
    fn test_stale_processing_record_is_taken_over() {
        let mut record = TranscodeRecord::new(&sample_video());
        record.updated_at = Utc::now() - ChronoDuration::seconds(1801);
        let verdict = evaluate_eligibility(Some(&record), Utc::now(), &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::StaleTakeover);
    }

    #[test]
    fn test_failed_record_with_due_retry_is_eligible() {
        let now = Utc::now();
        let record = TranscodeRecord::new(&sample_video())
            .fail("boom", Some(now - ChronoDuration::seconds(1)));
        let verdict = evaluate_eligibility(Some(&record), now, &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::RetryDue);
    }

    #[test]
    fn test_failed_record_without_schedule_is_eligible() {
        let record = TranscodeRecord::new(&sample_video()).fail("boom", None);
        let verdict = evaluate_eligibility(Some(&record), Utc::now(), &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::RetryDue);
    }

    #[test]
    fn test_failed_record_in_backoff_skips() {
        let now = Utc::now();
        let record = TranscodeRecord::new(&sample_video())
            .fail("boom", Some(now + ChronoDuration::seconds(60)));
        let verdict = evaluate_eligibility(Some(&record), now, &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::Skip(SkipReason::BackoffPending));
    }

    #[test]
    fn test_exhausted_record_is_quarantined() {
        let mut record = TranscodeRecord::new(&sample_video()).fail("boom", None);
        record.attempts = policy().max_attempts;
        let verdict = evaluate_eligibility(Some(&record), Utc::now(), &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::Skip(SkipReason::Quarantined));
    }

    #[test]
    fn test_quarantine_wins_over_due_schedule() {
        let now = Utc::now();
        let mut record = TranscodeRecord::new(&sample_video())
            .fail("boom", Some(now - ChronoDuration::seconds(10)));
        record.attempts = policy().max_attempts + 2;
        let verdict = evaluate_eligibility(Some(&record), now, &policy(), STALE_AFTER);
        assert_eq!(verdict, Eligibility::Skip(SkipReason::Quarantined));
    }
}
