//! Avatar generation worker.
//!
//! Connects the pipeline to PostgreSQL, S3 and the HTTP prediction
//! service, checks the blob store, resumes interrupted polls, then runs
//! the re-drive sweep until SIGINT or SIGTERM.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use avatarflow_db::repositories::JobRepo;
use avatarflow_db::store::PgDocumentStore;
use avatarflow_events::EventBus;
use avatarflow_pipeline::{JobFeed, Orchestrator, PipelineConfig, ReDriveSweep};
use avatarflow_prediction::PredictionApi;
use avatarflow_storage::{diagnostics, BlobUploader, S3BlobStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::WorkerConfig;

/// How long background services get to stop after the orchestrator.
const SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avatarflow_worker=info,avatarflow_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let pipeline_config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let worker_config = WorkerConfig::from_env()?;
    tracing::info!(
        strategy = %pipeline_config.submission_strategy,
        poll_interval_ms = pipeline_config.poll.interval.as_millis() as u64,
        poll_max_attempts = pipeline_config.poll.max_attempts,
        bucket = %worker_config.blob_bucket,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = avatarflow_db::create_pool(&worker_config.database_url)
        .await
        .context("Failed to connect to database")?;
    avatarflow_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    avatarflow_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    let store = Arc::new(
        PgDocumentStore::connect(pool)
            .await
            .context("Failed to start document change listener")?,
    );
    let repo = JobRepo::new(store.clone());

    // --- Blob store ---
    let aws = aws_config::load_from_env().await;
    let blob_store = Arc::new(S3BlobStore::new(
        aws_sdk_s3::Client::new(&aws),
        worker_config.blob_bucket.clone(),
        worker_config.blob_public_base_url.clone(),
    ));

    let report = diagnostics::run_checks(blob_store.as_ref()).await;
    for line in &report.results {
        if line.passed() {
            tracing::info!("Storage check: {line}");
        } else {
            tracing::warn!("Storage check: {line}");
        }
    }

    let uploader = BlobUploader::new(
        blob_store,
        pipeline_config.storage_namespace.clone(),
        pipeline_config.upload_timeout,
    );

    // --- Prediction service ---
    let prediction = Arc::new(
        PredictionApi::new(
            pipeline_config.prediction_api_url.clone(),
            pipeline_config.prediction_api_token.clone(),
            pipeline_config.model_version.clone(),
        )
        .request_timeout(pipeline_config.submit_timeout)
        .max_inline_bytes(pipeline_config.max_inline_payload_bytes),
    );

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(avatarflow_events::log_events(event_bus.subscribe()));

    // --- Orchestrator and re-drive sweep ---
    let orchestrator = Orchestrator::new(
        repo.clone(),
        uploader,
        prediction,
        Arc::clone(&event_bus),
        pipeline_config,
    );

    match orchestrator.resume_interrupted().await {
        Ok(0) => {}
        Ok(resumed) => tracing::info!(resumed, "Resumed polling for interrupted jobs"),
        Err(e) => tracing::warn!(error = %e, "Could not list interrupted jobs"),
    }

    let sweep_cancel = CancellationToken::new();
    let sweep = ReDriveSweep::new(Arc::clone(&orchestrator), JobFeed::new(repo));
    let sweep_handle = tokio::spawn(sweep.run(sweep_cancel.clone()));
    tracing::info!("Worker started");

    shutdown_signal().await?;

    // --- Shutdown ---
    sweep_cancel.cancel();
    let _ = tokio::time::timeout(SERVICE_STOP_TIMEOUT, sweep_handle).await;

    orchestrator.shutdown().await;
    store.shutdown();

    // The orchestrator holds the last other reference to the bus.
    drop(orchestrator);
    drop(event_bus);
    let _ = tokio::time::timeout(SERVICE_STOP_TIMEOUT, logger_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("Failed to install Ctrl-C handler")?;
                tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, starting graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("Failed to install Ctrl-C handler")?;
        tracing::info!("Received Ctrl-C, starting graceful shutdown");
    }

    Ok(())
}
