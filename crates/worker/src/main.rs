//! StudySpark Worker
//!
//! Hosts the ingestion and enrichment triggers over the configured stores
//! and runs the janitor on its schedule.
//!
//! ```text
//! studyspark-worker                          # serve storage.blob_dir until Ctrl+C
//! studyspark-worker sweep                    # one janitor pass over storage.blob_dir
//! studyspark-worker upload <file.pdf> [mode] # process one file locally
//! ```

mod pipeline;
mod telemetry;

use crate::pipeline::Pipeline;
use anyhow::{bail, Context};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use studyspark_client::{BlobUploader, Phase, SyncClient};
use studyspark_common::{
    config::AppConfig,
    metrics,
    model::{create_model, GenerativeModel},
    Feature, SummaryMode, VERSION,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    telemetry::init_tracing(&config.observability);
    info!(service = %config.observability.service_name, "Starting StudySpark Worker v{}", VERSION);

    metrics::register_metrics();
    telemetry::install_metrics_exporter(config.observability.metrics_port)?;

    let model = create_model(&config.model).map_err(|e| {
        error!(error = %e, "Failed to initialize model client");
        e
    })?;
    info!(model = %model.model_name(), provider = %config.model.provider, "Model client initialized");

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("serve") => serve(&config, model).await,
        Some("sweep") => {
            let pipeline = Pipeline::new(&config, model).await?;
            if !pipeline.is_persistent() {
                bail!("sweep needs storage.blob_dir (APP__STORAGE__BLOB_DIR)");
            }
            let report = pipeline.sweep_once().await?;
            println!(
                "Swept {} blob(s): {} deleted, {} failed",
                report.scanned, report.deleted, report.failed
            );
            Ok(())
        }
        Some("upload") => {
            let Some(path) = args.get(2) else {
                bail!("usage: studyspark-worker upload <file.pdf> [cheat-sheet|detailed]");
            };
            let mode = SummaryMode::from_metadata(args.get(3).map(String::as_str));
            upload(&config, model, Path::new(path), mode).await
        }
        Some(other) => bail!("unknown command: {}", other),
    }
}

async fn serve(config: &AppConfig, model: Arc<dyn GenerativeModel>) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config, model).await?;
    if !pipeline.is_persistent() {
        bail!("serve needs storage.blob_dir (APP__STORAGE__BLOB_DIR)");
    }
    let tasks = pipeline.spawn();
    info!(
        bucket = %config.storage.bucket,
        blob_dir = ?config.storage.blob_dir,
        records_dir = ?config.storage.records_dir,
        retention_secs = config.janitor.retention_secs,
        "Worker ready, dispatching trigger events"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for task in tasks {
        task.abort();
    }
    info!("Worker shutting down");
    Ok(())
}

/// Run one file through the whole pipeline, then request every extra
/// artifact and print the final record.
async fn upload(
    config: &AppConfig,
    model: Arc<dyn GenerativeModel>,
    path: &Path,
    mode: SummaryMode,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("upload path has no file name")?;

    let pipeline = Pipeline::new(config, model).await?;
    let tasks = pipeline.spawn();

    let client = SyncClient::new(
        Arc::new(BlobUploader::new(pipeline.blobs.clone())),
        pipeline.documents.clone(),
    );
    client.upload(file_name, bytes, mode)?;

    // The trigger budget bounds each phase.
    let budget = config.trigger_timeout() + Duration::from_secs(30);

    let summarized = tokio::time::timeout(
        budget,
        client.wait_until(|s| matches!(s.phase, Phase::Complete | Phase::Error)),
    )
    .await
    .context("timed out waiting for the summary")?;

    if summarized.phase == Phase::Error {
        bail!(
            "processing failed: {}",
            summarized.error.unwrap_or_default()
        );
    }

    for feature in [Feature::Flashcards, Feature::Quiz] {
        if let Err(e) = client.request_feature(feature).await {
            warn!(feature = %feature, error = %e, "Feature not requested");
        }
    }

    let finished = tokio::time::timeout(budget, client.wait_until(|s| s.busy.is_empty()))
        .await
        .context("timed out waiting for flashcards and quiz")?;

    for task in tasks {
        task.abort();
    }

    let record = finished.record.context("session finished without a record")?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
