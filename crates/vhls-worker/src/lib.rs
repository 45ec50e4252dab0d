//! Transcode worker.
//!
//! Polls the video catalog on a fixed interval and drives every new
//! video through download, adaptive HLS transcode, and upload to public
//! object storage, with a durable per-URL record of each attempt.
//!
//! This crate provides:
//! - The poll scheduler and its bounded job pool
//! - The per-video pipeline with stage-tagged failure handling
//! - Store traits over the catalog and the transcode records
//! - Worker configuration and the failed-job retry policy

pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod stores;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use config::WorkerConfig;
pub use error::{JobError, Stage, StoreError, TickError, WorkerError, WorkerResult};
pub use pipeline::{run_job, JobOutcome, PipelineContext};
pub use retry::RetryPolicy;
pub use scheduler::{PollScheduler, TickStats};
pub use stores::{
    evaluate_eligibility, ClaimOutcome, Eligibility, FirestoreRecordStore, FirestoreVideoCatalog,
    RecordStore, SkipReason, VideoCatalog,
};
pub use workspace::JobWorkspace;
