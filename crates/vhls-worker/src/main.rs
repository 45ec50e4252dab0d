//! Transcode worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vhls_firestore::{FirestoreClient, TranscodeRepository, VideoCatalogRepository};
use vhls_media::{check_ffmpeg, HlsTranscoder, HttpFetcher};
use vhls_storage::R2Client;
use vhls_worker::{
    FirestoreRecordStore, FirestoreVideoCatalog, PipelineContext, PollScheduler, WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vhls=info".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vhls-worker");

    // Load configuration
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    // The transcoder shells out to ffmpeg; fail fast if it is missing
    if let Err(e) = check_ffmpeg() {
        error!("FFmpeg check failed: {}", e);
        std::process::exit(1);
    }

    // Firestore client and repositories
    let firestore = match FirestoreClient::from_env().await {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create Firestore client: {}", e);
            std::process::exit(1);
        }
    };
    let transcode_repo = TranscodeRepository::new(firestore.clone());
    let catalog_repo = VideoCatalogRepository::new(firestore);

    if let Err(e) = transcode_repo.check_connectivity().await {
        error!("Firestore connectivity check failed: {}", e);
        std::process::exit(1);
    }

    // Object storage
    let blob_store = match R2Client::from_env().await {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create R2 client: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = blob_store.check_connectivity().await {
        error!("R2 connectivity check failed: {}", e);
        std::process::exit(1);
    }

    // Source downloader
    let fetcher = match HttpFetcher::new() {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to create source fetcher: {}", e);
            std::process::exit(1);
        }
    };

    let transcoder = HlsTranscoder::new(config.transcode_timeout.as_secs());
    let records = FirestoreRecordStore::new(
        transcode_repo,
        config.retry.clone(),
        config.stale_processing_after,
    );
    let catalog = FirestoreVideoCatalog::new(catalog_repo);

    let ctx = Arc::new(PipelineContext::new(
        Arc::new(records),
        Arc::new(fetcher),
        Arc::new(transcoder),
        Arc::new(blob_store),
        config.clone(),
    ));
    let scheduler = Arc::new(PollScheduler::new(config, Arc::new(catalog), ctx));

    // Setup signal handlers
    let signal_scheduler = Arc::clone(&scheduler);
    let shutdown_handle = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_scheduler.shutdown();
    });

    // Run the poll loop
    if let Err(e) = scheduler.run().await {
        error!("Scheduler error: {}", e);
        std::process::exit(1);
    }

    shutdown_handle.abort();

    info!("Worker shutdown complete");
}
